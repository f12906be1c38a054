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

//! A repeating background task whose delay is recomputed before every wait.

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use crossbeam_channel::TryRecvError;
use crossbeam_channel::bounded;

use crate::Error;
use crate::ErrorKind;
use crate::Trap;

/// Runs one task on a dedicated thread at a variable rate.
///
/// The task runs once after the initial delay. After every run the delay provider is queried
/// again, so a value it reads (for example a flush interval changed at runtime) takes effect on
/// the very next cycle.
///
/// A zero delay leaves the task dormant: it never runs again, but the thread stays parked until
/// [`VariableRateScheduler::shutdown`] is called.
///
/// A task that returns an error or panics is reported to the [`Trap`] and the next cycle is
/// still scheduled.
#[derive(Debug)]
pub struct VariableRateScheduler {
    thread_name: String,
    trap: Arc<dyn Trap>,
    state: Option<State>,
}

#[derive(Debug)]
struct State {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl VariableRateScheduler {
    /// Create an idle scheduler whose worker thread will be named `thread_name`.
    pub fn new(thread_name: impl Into<String>, trap: Arc<dyn Trap>) -> Self {
        Self {
            thread_name: thread_name.into(),
            trap,
            state: None,
        }
    }

    /// Start running `task` after `initial_delay`, then again after every delay `delay` returns.
    ///
    /// # Errors
    ///
    /// Return an error if a task is already scheduled on this scheduler.
    pub fn schedule_at_variable_rate<T, D>(
        &mut self,
        initial_delay: Duration,
        task: T,
        delay: D,
    ) -> Result<(), Error>
    where
        T: FnMut() -> Result<(), Error> + Send + 'static,
        D: FnMut() -> Duration + Send + 'static,
    {
        if self.state.is_some() {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "a task is already scheduled on this scheduler",
            )
            .with_context("thread", &self.thread_name));
        }

        let (shutdown, receiver) = bounded(0);
        let worker = Worker {
            task,
            delay,
            shutdown: receiver,
            trap: self.trap.clone(),
        };

        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || worker.run(initial_delay))
            .expect("failed to spawn the variable rate scheduler thread");

        self.state = Some(State { shutdown, handle });
        Ok(())
    }

    /// Return whether a task is scheduled and its thread has not exited.
    pub fn is_running(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| !state.handle.is_finished())
    }

    /// Stop the scheduled task.
    ///
    /// A sleeping wait is cancelled immediately. A run already in progress is allowed to finish;
    /// this call waits for it, so no run starts after it returns. Calling this from the task
    /// itself only cancels future runs. Shutting down an idle scheduler is a no-op.
    pub fn shutdown(&mut self) {
        let Some(State { shutdown, handle }) = self.state.take() else {
            return;
        };

        // disconnecting the channel wakes the worker wherever it waits
        drop(shutdown);

        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            let err = Error::new(ErrorKind::Unexpected, "scheduler thread panicked")
                .with_context("thread", &self.thread_name);
            self.trap.trap(&err);
        }
    }
}

impl Drop for VariableRateScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<T, D> {
    task: T,
    delay: D,
    shutdown: Receiver<()>,
    trap: Arc<dyn Trap>,
}

impl<T, D> Worker<T, D>
where
    T: FnMut() -> Result<(), Error>,
    D: FnMut() -> Duration,
{
    fn run(mut self, initial_delay: Duration) {
        if self.wait(initial_delay) {
            return;
        }

        loop {
            if self.is_shutdown() {
                return;
            }

            self.run_task();

            let delay = (self.delay)();
            if delay.is_zero() {
                // dormant until shutdown
                let _ = self.shutdown.recv();
                return;
            }

            if self.wait(delay) {
                return;
            }
        }
    }

    fn run_task(&mut self) {
        let task = &mut self.task;
        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.trap.trap(&err),
            Err(payload) => {
                let err = Error::new(ErrorKind::Unexpected, "scheduled task panicked")
                    .with_context("panic", panic_message(payload.as_ref()));
                self.trap.trap(&err);
            }
        }
    }

    /// Wait for `delay`; return `true` if shutdown was requested meanwhile.
    fn wait(&self, delay: Duration) -> bool {
        match self.shutdown.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    fn is_shutdown(&self) -> bool {
        match self.shutdown.try_recv() {
            Err(TryRecvError::Empty) => false,
            Ok(()) | Err(TryRecvError::Disconnected) => true,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use crossbeam_channel::unbounded;

    use super::*;

    #[derive(Debug, Default)]
    struct CollectTrap(Mutex<Vec<String>>);

    impl Trap for CollectTrap {
        fn trap(&self, err: &Error) {
            self.0.lock().unwrap().push(err.to_string());
        }
    }

    fn new_scheduler(name: &str) -> (VariableRateScheduler, Arc<CollectTrap>) {
        let trap = Arc::new(CollectTrap::default());
        (VariableRateScheduler::new(name, trap.clone()), trap)
    }

    #[test]
    fn test_delay_is_queried_before_every_wait() {
        let (tx, rx) = unbounded();
        let mut delays = vec![100u64, 50, 200].into_iter();

        let (mut scheduler, _) = new_scheduler("test-variable-rate");
        scheduler
            .schedule_at_variable_rate(
                Duration::ZERO,
                move || {
                    tx.send(Instant::now()).unwrap();
                    Ok(())
                },
                move || delays.next().map_or(Duration::ZERO, Duration::from_millis),
            )
            .unwrap();

        let runs = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect::<Vec<_>>();

        for (pair, expected) in runs.windows(2).zip([100u64, 50, 200]) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(expected - 5),
                "gap {gap:?} shorter than {expected}ms"
            );
            assert!(
                gap < Duration::from_millis(expected + 250),
                "gap {gap:?} much longer than {expected}ms"
            );
        }

        // the provider ran dry, the task is dormant
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(scheduler.is_running());
        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_shutdown_prevents_next_run() {
        let (tx, rx) = unbounded();
        let (mut scheduler, _) = new_scheduler("test-shutdown");
        scheduler
            .schedule_at_variable_rate(
                Duration::ZERO,
                move || {
                    let _ = tx.send(());
                    Ok(())
                },
                || Duration::from_millis(100),
            )
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.shutdown();

        thread::sleep(Duration::from_millis(250));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_cancels_long_wait() {
        let (mut scheduler, _) = new_scheduler("test-long-wait");
        let hour = Duration::from_secs(3600);
        scheduler
            .schedule_at_variable_rate(hour, || Ok(()), move || hour)
            .unwrap();

        let start = Instant::now();
        scheduler.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_failing_task_keeps_running() {
        let (tx, rx) = unbounded();
        let (mut scheduler, trap) = new_scheduler("test-failing");
        let mut count = 0;

        scheduler
            .schedule_at_variable_rate(
                Duration::ZERO,
                move || {
                    count += 1;
                    let _ = tx.send(count);
                    match count {
                        1 => Err(Error::new(ErrorKind::Flush, "boom")),
                        2 => panic!("kaboom"),
                        _ => Ok(()),
                    }
                },
                || Duration::from_millis(10),
            )
            .unwrap();

        for expected in 1..=3 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), expected);
        }
        scheduler.shutdown();

        let trapped = trap.0.lock().unwrap();
        assert_eq!(trapped.len(), 2);
        assert!(trapped[0].contains("boom"));
        assert!(trapped[1].contains("kaboom"));
    }

    #[test]
    fn test_schedule_twice_is_rejected() {
        let (mut scheduler, _) = new_scheduler("test-twice");
        scheduler
            .schedule_at_variable_rate(Duration::from_secs(60), || Ok(()), || Duration::ZERO)
            .unwrap();

        let err = scheduler
            .schedule_at_variable_rate(Duration::ZERO, || Ok(()), || Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);

        // a shut down scheduler can be reused
        scheduler.shutdown();
        scheduler
            .schedule_at_variable_rate(Duration::from_secs(60), || Ok(()), || Duration::ZERO)
            .unwrap();
    }
}
