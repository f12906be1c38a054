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

//! Logger configuration and its persisted override document.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jiff::Timestamp;
use jiff::tz::TimeZone;
use log::LevelFilter;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::ErrorKind;
use crate::layout::DEFAULT_TEMPLATE;

/// The date format used to stamp archive names when none is configured.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// The name of the file added by [`LoggerConfig::log_to_latest`].
pub const LATEST_FILE_NAME: &str = "latest.log";

/// The number of unwritten bytes a failing target file keeps by default.
pub const DEFAULT_MAX_BACKLOG: usize = 8 * 1024 * 1024;

/// The configuration of one [`Logger`](crate::Logger).
///
/// Build one with [`LoggerConfig::new`], adjust the public fields, then hand it to
/// [`Logger::new`](crate::Logger::new), which validates it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// let mut config = logcycle::LoggerConfig::new("app");
/// config.log_directory = "var/logs".into();
/// config.flush_interval = Duration::from_millis(250);
/// config.compression = false;
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// The logger name, unique within a registry and rendered by `{loggerName}`.
    pub name: String,
    /// Extra files every line is appended to.
    pub target_files: Vec<PathBuf>,
    /// The directory archives are written to and swept in.
    pub log_directory: PathBuf,
    /// The strftime-style format stamped in front of archive names.
    pub date_format: String,
    /// The delay between two flushes. Must not be zero.
    pub flush_interval: Duration,
    /// The number of unwritten bytes kept for retry per failing target file. Older lines past
    /// this bound are dropped and reported to the trap.
    pub max_backlog: usize,
    /// The maximum age of an archive. Zero disables deletion.
    pub retention: Duration,
    /// The delay between two periodic retention sweeps. Zero sweeps only at startup.
    pub sweep_interval: Duration,
    /// Whether archives are gzip-compressed.
    pub compression: bool,
    /// The least severe level still echoed to the console.
    pub min_level: LevelFilter,
    /// Whether lines are echoed to the console at all.
    pub console: bool,
    /// The line template, see [`TemplateLayout`](crate::layout::TemplateLayout).
    pub template: String,
    /// Whether `<log_directory>/latest.log` is a target file.
    pub log_to_latest: bool,
}

impl LoggerConfig {
    /// Create a configuration named `name` with every other field at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_files: vec![],
            log_directory: PathBuf::from("logs"),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            flush_interval: Duration::from_secs(1),
            max_backlog: DEFAULT_MAX_BACKLOG,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            compression: true,
            min_level: LevelFilter::Debug,
            console: true,
            template: DEFAULT_TEMPLATE.to_string(),
            log_to_latest: true,
        }
    }

    /// Check that a logger can be built from this configuration.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if the name is blank, the flush interval is zero, the
    /// log directory is empty, or the date format is blank, invalid, cannot be parsed back, or
    /// renders a path separator.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::config("logger name must not be blank"));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::config("flush interval must be greater than zero")
                .with_context("logger", &self.name));
        }
        if self.log_directory.as_os_str().is_empty() {
            return Err(Error::config("log directory must not be empty")
                .with_context("logger", &self.name));
        }
        validate_date_format(&self.date_format)
            .map_err(|err| err.with_context("logger", &self.name))
    }

    /// Return a copy of this configuration with `overrides` applied on top.
    ///
    /// Files listed in the overrides are appended to the target files; every other present field
    /// replaces the current value. Frequencies are read as milliseconds.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if the level name is unknown or the result does not
    /// pass [`LoggerConfig::validate`].
    pub fn with_overrides(&self, overrides: &PersistedConfig) -> Result<Self, Error> {
        let mut config = self.clone();

        if let Some(files) = &overrides.files_to_log_to {
            for file in files {
                if !config.target_files.contains(file) {
                    config.target_files.push(file.clone());
                }
            }
        }
        if let Some(compression) = overrides.is_compression_enabled {
            config.compression = compression;
        }
        if let Some(millis) = overrides.log_frequency {
            config.flush_interval = Duration::from_millis(millis);
        }
        if let Some(millis) = overrides.deletion_frequency {
            config.retention = Duration::from_millis(millis);
        }
        if let Some(dir) = &overrides.log_directory {
            config.log_directory = dir.clone();
        }
        if let Some(level) = &overrides.logging_level {
            config.min_level = parse_level(level)?;
        }
        if let Some(template) = &overrides.logging_layout {
            config.template = template.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Return the files lines are appended to, without duplicates.
    ///
    /// With [`LoggerConfig::log_to_latest`] set, `<log_directory>/latest.log` comes first.
    pub fn resolved_target_files(&self) -> Vec<PathBuf> {
        let latest = self
            .log_to_latest
            .then(|| self.log_directory.join(LATEST_FILE_NAME));

        let mut files: Vec<PathBuf> = vec![];
        for file in latest.into_iter().chain(self.target_files.iter().cloned()) {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        files
    }
}

fn validate_date_format(date_format: &str) -> Result<(), Error> {
    if date_format.trim().is_empty() {
        return Err(Error::config("date format must not be blank"));
    }

    let sample = Timestamp::UNIX_EPOCH.to_zoned(TimeZone::UTC);
    let rendered = jiff::fmt::strtime::format(date_format, &sample).map_err(|err| {
        Error::config("date format is invalid")
            .with_context("date_format", date_format)
            .with_source(err)
    })?;
    if rendered.contains(['/', '\\']) {
        return Err(Error::config("date format must not render a path separator")
            .with_context("date_format", date_format));
    }
    // archives that cannot be parsed back would never be swept
    jiff::fmt::strtime::parse(date_format, &rendered).map_err(|err| {
        Error::config("date format cannot be parsed back")
            .with_context("date_format", date_format)
            .with_source(err)
    })?;
    Ok(())
}

fn parse_level(name: &str) -> Result<LevelFilter, Error> {
    LevelFilter::from_str(name.trim()).map_err(|err| {
        Error::config("unknown logging level")
            .with_context("level", name)
            .with_source(err)
    })
}

/// The persisted override document for one logger.
///
/// Every field is optional; absent fields leave the configured value alone. Keys use the
/// PascalCase names of the document format:
///
/// ```json
/// {
///     "FilesToLogTo": ["logs/app.log"],
///     "IsCompressionEnabled": false,
///     "LogFrequency": 500,
///     "DeletionFrequency": 604800000,
///     "LogDirectory": "logs",
///     "LoggingLevel": "INFO",
///     "LoggingLayout": "{hours}:{minutes} {message}"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PersistedConfig {
    /// Files appended to the target files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_to_log_to: Option<Vec<PathBuf>>,
    /// Whether archives are compressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_compression_enabled: Option<bool>,
    /// The flush interval in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_frequency: Option<u64>,
    /// The retention window in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_frequency: Option<u64>,
    /// The archive directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_directory: Option<PathBuf>,
    /// The console level name, such as `DEBUG`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_level: Option<String>,
    /// The line template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_layout: Option<String>,
}

impl PersistedConfig {
    /// Parse a document from a JSON string.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if the string is not a valid document.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|err| Error::config("failed to parse logger config").with_source(err))
    }

    /// Read and parse a document from a JSON file.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|err| {
            Error::from_io_error(ErrorKind::Config, "failed to read logger config", err)
                .with_context("path", path.display())
        })?;
        Self::from_json_str(&json).map_err(|err| err.with_context("path", path.display()))
    }

    /// Serialize this document as pretty-printed JSON.
    pub fn to_json_string(&self) -> String {
        // a map of plain values always serializes
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
