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

//! Logcycle buffers log lines in memory, flushes them to files on a background thread, and
//! manages the lifecycle of those files.
//!
//! # Overview
//!
//! A [`Logger`] renders lines through a template and queues them without blocking the caller.
//! Once started, a dedicated thread per logger flushes the queue at a rate that can change while
//! running, and periodically deletes archives older than a retention window.
//!
//! A [`Registry`] owns a set of loggers. Its startup pass archives every target file that already
//! holds content, once per file even when loggers share it, optionally gzip-compresses the
//! archive, creates missing files, then starts the loggers. Its shutdown flushes what is left.
//!
//! Failures that the pipeline recovers from are reported to a [`Trap`] and never stop logging.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use logcycle::Logger;
//! use logcycle::LoggerConfig;
//! use logcycle::Registry;
//!
//! let mut config = LoggerConfig::new("app");
//! config.log_directory = "logs".into();
//! config.flush_interval = Duration::from_millis(500);
//! let logger = Logger::new(config).unwrap();
//!
//! let registry = Registry::new();
//! registry.register(logger.clone()).unwrap();
//! registry.init().unwrap();
//!
//! logger.info("Hello info!");
//! logger.set_flush_interval(Duration::from_secs(2)).unwrap();
//!
//! registry.shutdown();
//! ```
//!
//! Route the `log` crate macros through a logger:
//!
//! ```no_run
//! let logger = logcycle::Logger::new(logcycle::LoggerConfig::new("app")).unwrap();
//! logger.init().unwrap();
//! logcycle::bridge::setup_log_crate(logger);
//!
//! log::warn!("Hello warn!");
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod archive;
pub mod bridge;
pub mod buffer;
pub mod layout;
pub mod retention;
pub mod scheduler;

#[cfg(feature = "colored")]
mod color;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod logger;
pub use logger::*;

mod registry;
pub use registry::*;

mod trap;
pub use trap::*;
