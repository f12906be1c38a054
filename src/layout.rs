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

use std::error::Error as StdError;
use std::fmt::Write;
use std::thread;

use jiff::Zoned;
use jiff::tz::TimeZone;
use log::Level;

/// The template used when none is configured.
pub const DEFAULT_TEMPLATE: &str =
    "{hours}:{minutes}:{seconds} [{threadName}] {loggingLevelName} {loggerName} - {message}";

/// A layout that renders a line by substituting tokens in a template.
///
/// Output format with [`DEFAULT_TEMPLATE`]:
///
/// ```text
/// 22:44:57 [main] ERROR app - Hello error!
/// 22:44:57 [worker-1] INFO app - Hello info!
/// ```
///
/// Recognised tokens are `{hours}`, `{minutes}`, `{seconds}`, `{milliseconds}`, `{nanoseconds}`,
/// `{threadName}`, `{loggingLevelName}`, `{loggerName}` and `{message}`. Substitution is literal
/// and single pass: text coming from the message is never scanned for tokens, and unknown tokens
/// are copied through unchanged.
///
/// You can customize the timezone of the timestamp by setting a [`TimeZone`]. Otherwise, the
/// system timezone is used.
#[derive(Debug, Clone)]
pub struct TemplateLayout {
    template: String,
    tz: Option<TimeZone>,
}

impl Default for TemplateLayout {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl TemplateLayout {
    /// Create a layout from a template.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            tz: None,
        }
    }

    /// Set the timezone of the rendered time fields.
    pub fn timezone(mut self, tz: TimeZone) -> Self {
        self.tz = Some(tz);
        self
    }

    /// Return the template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render one line stamped with the current time and the calling thread's name.
    pub fn format(&self, level: Level, logger: &str, message: &str) -> String {
        let now = match self.tz.clone() {
            Some(tz) => Zoned::now().with_time_zone(tz),
            None => Zoned::now(),
        };
        let current = thread::current();
        let thread_name = current.name().unwrap_or("unnamed");
        self.format_at(&now, thread_name, level, logger, message)
    }

    /// Render one line with explicit time and thread name.
    pub fn format_at(
        &self,
        time: &Zoned,
        thread_name: &str,
        level: Level,
        logger: &str,
        message: &str,
    ) -> String {
        let mut out = String::with_capacity(self.template.len() + message.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            rest = &rest[start..];

            let Some(end) = rest.find('}') else {
                break;
            };

            let token = &rest[..=end];
            let _ = match token {
                "{hours}" => write!(out, "{:02}", time.hour()),
                "{minutes}" => write!(out, "{:02}", time.minute()),
                "{seconds}" => write!(out, "{:02}", time.second()),
                "{milliseconds}" => write!(out, "{:03}", time.millisecond()),
                "{nanoseconds}" => write!(out, "{:09}", time.subsec_nanosecond()),
                "{threadName}" => write!(out, "{thread_name}"),
                "{loggingLevelName}" => write!(out, "{level}"),
                "{loggerName}" => write!(out, "{logger}"),
                "{message}" => write!(out, "{message}"),
                _ => {
                    // not a token; emit the brace and rescan after it
                    out.push('{');
                    rest = &rest[1..];
                    continue;
                }
            };
            rest = &rest[end + 1..];
        }

        out.push_str(rest);
        out
    }
}

/// Append an error and its chain of sources, one per line, to a rendered line.
pub fn append_error_chain(line: &mut String, err: &(dyn StdError + 'static)) {
    let _ = write!(line, "\n{err}");
    let mut source = err.source();
    while let Some(err) = source {
        let _ = write!(line, "\n    caused by: {err}");
        source = err.source();
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::str::FromStr;

    use super::*;

    fn time() -> Zoned {
        Zoned::from_str("2024-08-10T07:02:09.012345678[UTC]").unwrap()
    }

    #[test]
    fn test_default_template() {
        let layout = TemplateLayout::default();
        let line = layout.format_at(&time(), "main", Level::Warn, "app", "disk almost full");
        assert_eq!(line, "07:02:09 [main] WARN app - disk almost full");
    }

    #[test]
    fn test_every_token() {
        let layout = TemplateLayout::new(
            "{hours}|{minutes}|{seconds}|{milliseconds}|{nanoseconds}|{threadName}|\
             {loggingLevelName}|{loggerName}|{message}",
        );
        let line = layout.format_at(&time(), "worker", Level::Debug, "db", "hi");
        assert_eq!(line, "07|02|09|012|012345678|worker|DEBUG|db|hi");
    }

    #[test]
    fn test_message_is_not_rescanned() {
        let layout = TemplateLayout::new("{message} {unknown} {loggerName} {");
        let line = layout.format_at(&time(), "t", Level::Info, "app", "{hours} {loggerName}");
        assert_eq!(line, "{hours} {loggerName} {unknown} app {");
    }

    #[test]
    fn test_format_uses_current_thread_name() {
        let layout = TemplateLayout::new("{threadName}").timezone(TimeZone::UTC);
        let line = thread::Builder::new()
            .name("named-producer".to_string())
            .spawn(move || layout.format(Level::Info, "app", "x"))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(line, "named-producer");
    }

    #[test]
    fn test_append_error_chain() {
        let inner = io::Error::other("permission denied");
        let outer = crate::Error::new(crate::ErrorKind::Flush, "write failed").with_source(inner);

        let mut line = "12:00:00 [main] ERROR app - oops".to_string();
        append_error_chain(&mut line, &outer);

        let lines = line.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("write failed"));
        assert_eq!(lines[2], "    caused by: permission denied");
    }
}
