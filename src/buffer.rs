// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::unbounded;

/// An unbounded, insertion-ordered queue of formatted log lines.
///
/// Any number of threads may [`push`](MessageBuffer::push) concurrently without blocking each
/// other. The flushing side takes whole lines out with [`drain`](MessageBuffer::drain).
#[derive(Debug)]
pub struct MessageBuffer {
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Append one formatted line.
    pub fn push(&self, line: String) {
        // never disconnected: the receiver lives as long as the sender
        let _ = self.sender.send(line);
    }

    /// Remove and return every line queued at the moment of the call, oldest first.
    ///
    /// Lines pushed while draining stay queued for the next call.
    pub fn drain(&self) -> Vec<String> {
        let queued = self.receiver.len();
        self.receiver.try_iter().take(queued).collect()
    }

    /// Return the number of queued lines.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Return whether no line is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
