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

use std::fmt;
use std::io;

/// The kind of an [`Error`].
///
/// Only [`ErrorKind::Config`] is fatal: it is returned before a logger opens any resource. Every
/// other kind describes a recoverable failure that the engine reports and then keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The logger configuration is invalid.
    Config,
    /// Writing buffered lines to a target file failed.
    Flush,
    /// Archiving or compressing an existing log file failed.
    Archive,
    /// Inspecting or deleting an expired archive failed.
    Retention,
    /// The registry was used incorrectly.
    Registry,
    /// Anything else, such as a panicking scheduled task.
    Unexpected,
}

impl ErrorKind {
    /// Return a static string of this kind.
    pub fn into_static(self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Flush => "FlushFailure",
            ErrorKind::Archive => "ArchiveFailure",
            ErrorKind::Retention => "RetentionFailure",
            ErrorKind::Registry => "RegistryError",
            ErrorKind::Unexpected => "Unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.into_static())
    }
}

/// The error struct of logcycle.
pub struct Error {
    kind: ErrorKind,
    message: String,
    sources: Vec<anyhow::Error>,
    context: Vec<(&'static str, String)>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
            write!(f, " }}")?;
        }

        if !self.sources.is_empty() {
            write!(f, ", sources: [")?;
            for (i, source) in self.sources.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{source}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If alternate has been specified, we will print like Debug.
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("sources", &self.sources);
            return de.finish();
        }

        write!(f, "{}: {}", self.kind, self.message)?;
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "   {k}: {v}")?;
            }
        }
        if !self.sources.is_empty() {
            writeln!(f)?;
            writeln!(f, "Sources:")?;
            for source in self.sources.iter() {
                writeln!(f, "   {source:#}")?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.sources.first().map(|v| v.as_ref())
    }
}

impl Error {
    /// Create a new Error with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sources: vec![],
            context: vec![],
        }
    }

    /// Add one more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Add one more source in error.
    pub fn with_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        self.sources.push(src.into());
        self
    }

    /// Return the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return the message of this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Return the value of the first context entry named `key`.
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Return an iterator over all sources of this error.
    pub fn sources(&self) -> impl ExactSizeIterator<Item = &(dyn std::error::Error + 'static)> {
        self.sources.iter().map(|v| v.as_ref())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Config, message)
    }

    pub(crate) fn from_io_error(
        kind: ErrorKind,
        message: impl Into<String>,
        err: io::Error,
    ) -> Self {
        Error::new(kind, message).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context_and_sources() {
        let err = Error::new(ErrorKind::Flush, "failed to write log lines")
            .with_context("path", "logs/latest.log")
            .with_source(io::Error::other("disk full"))
            .with_source(io::Error::other("read-only"));

        let s = err.to_string();
        assert_eq!(
            s,
            "failed to write log lines (FlushFailure), context: { path: logs/latest.log }, \
             sources: [disk full, read-only]"
        );
        assert_eq!(err.sources().len(), 2);
        assert_eq!(err.context("path"), Some("logs/latest.log"));
        assert_eq!(err.context("missing"), None);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_debug_lists_sections() {
        let err = Error::config("logger name must not be blank").with_context("name", "");
        let s = format!("{err:?}");
        assert!(s.starts_with("ConfigError: logger name must not be blank"));
        assert!(s.contains("Context:"));
        assert!(!s.contains("Sources:"));

        let s = format!("{err:#?}");
        assert!(s.contains("kind: Config"));
    }
}
