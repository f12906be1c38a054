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

//! Integration with the `log` crate.

use std::fmt::Write;

use crate::Logger;

/// Set up the log crate global logger.
///
/// This function calls [`log::set_boxed_logger`] with `logger`, so all logs from the log crate
/// are rendered and buffered by it. Key-values of a record are appended to its message as
/// `key=value` pairs.
///
/// This function will set the global maximum log level to `Trace`. To override this, call
/// [`log::set_max_level`] after this function.
///
/// # Errors
///
/// Return an error if the log crate global logger has already been set.
///
/// # Examples
///
/// ```no_run
/// let logger = logcycle::Logger::new(logcycle::LoggerConfig::new("app")).unwrap();
/// logcycle::bridge::try_setup_log_crate(logger.clone()).unwrap();
/// log::info!("routed through logcycle");
/// ```
pub fn try_setup_log_crate(logger: Logger) -> Result<(), log::SetLoggerError> {
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

/// Set up the log crate global logger.
///
/// See [`try_setup_log_crate`].
///
/// # Panics
///
/// Panic if the log crate global logger has already been set.
pub fn setup_log_crate(logger: Logger) {
    try_setup_log_crate(logger).expect(
        "logcycle::bridge::setup_log_crate must be called before the log crate global logger initialized",
    )
}

impl log::Log for Logger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        // every level is written to the files
        true
    }

    fn log(&self, record: &log::Record) {
        let mut message = record.args().to_string();

        struct KeyValueVisitor<'a> {
            message: &'a mut String,
        }

        impl<'kvs> log::kv::VisitSource<'kvs> for KeyValueVisitor<'_> {
            fn visit_pair(
                &mut self,
                key: log::kv::Key<'kvs>,
                value: log::kv::Value<'kvs>,
            ) -> Result<(), log::kv::Error> {
                let _ = write!(self.message, " {key}={value}");
                Ok(())
            }
        }

        let mut visitor = KeyValueVisitor {
            message: &mut message,
        };
        let _ = record.key_values().visit(&mut visitor);

        Logger::log(self, record.level(), message);
    }

    fn flush(&self) {
        if let Err(err) = Logger::flush(self) {
            self.trap().trap(&err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::LoggerConfig;

    #[test]
    fn test_log_trait_renders_key_values() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let mut config = LoggerConfig::new("bridge");
        config.log_directory = temp_dir.path().to_path_buf();
        config.console = false;
        config.template = "{loggingLevelName} {message}".to_string();
        let logger = Logger::new(config).unwrap();

        let kvs = vec![("user", "ferris")];
        let metadata = log::Metadata::builder().level(log::Level::Trace).build();
        assert!(log::Log::enabled(&logger, &metadata));

        log::Log::log(
            &logger,
            &log::Record::builder()
                .args(format_args!("login"))
                .level(log::Level::Trace)
                .key_values(&kvs)
                .build(),
        );
        log::Log::flush(&logger);

        let content = fs::read_to_string(temp_dir.path().join("latest.log")).unwrap();
        assert_eq!(content, "TRACE login user=ferris\n");
    }
}
