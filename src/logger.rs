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

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

use log::Level;
use log::LevelFilter;

use crate::DefaultTrap;
use crate::Error;
use crate::ErrorKind;
use crate::LoggerConfig;
use crate::PersistedConfig;
use crate::Trap;
use crate::buffer::MessageBuffer;
use crate::layout::TemplateLayout;
use crate::layout::append_error_chain;
use crate::retention;
use crate::scheduler::VariableRateScheduler;

/// A named logger that buffers lines and flushes them to its target files on a background thread.
///
/// Producers on any thread call [`Logger::log`] (or [`Logger::info`] and friends); lines are
/// rendered with the logger's layout and queued without blocking. Once [`Logger::init`] has been
/// called, a dedicated thread flushes the queue every flush interval and sweeps expired archives
/// every sweep interval. Both intervals are read live, so setters take effect on the next cycle.
///
/// Every line goes to every target file regardless of level. The minimum level only decides
/// which lines are also echoed to the console.
///
/// `Logger` is a cheap handle; clones share the same buffer and files. Dropping the last handle
/// stops the background thread and flushes what is left.
///
/// # Examples
///
/// ```no_run
/// let logger = logcycle::Logger::new(logcycle::LoggerConfig::new("app")).unwrap();
/// logger.init().unwrap();
/// logger.info("service started");
/// logger.close().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    date_format: String,
    trap: Arc<dyn Trap>,
    buffer: MessageBuffer,
    targets: Mutex<Vec<PathBuf>>,
    log_directory: RwLock<PathBuf>,
    layout: RwLock<TemplateLayout>,
    flush_interval: AtomicU64,
    retention: AtomicU64,
    sweep_interval: AtomicU64,
    compression: AtomicBool,
    min_level: AtomicUsize,
    console: AtomicBool,
    // unwritten bytes per target file; the lock also serializes flushes
    backlog: Mutex<HashMap<PathBuf, Vec<u8>>>,
    max_backlog: AtomicUsize,
    scheduler: Mutex<VariableRateScheduler>,
    #[cfg(feature = "colored")]
    colors: crate::color::LevelColor,
}

impl Logger {
    /// Create a logger that reports recoverable failures to standard error.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if `config` is invalid. No file is touched.
    pub fn new(config: LoggerConfig) -> Result<Self, Error> {
        Self::with_trap(config, Arc::new(DefaultTrap::default()))
    }

    /// Create a logger that reports recoverable failures to `trap`.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if `config` is invalid. No file is touched.
    pub fn with_trap(config: LoggerConfig, trap: Arc<dyn Trap>) -> Result<Self, Error> {
        config.validate()?;

        let targets = config.resolved_target_files();
        let thread_name = format!("logcycle-{}", config.name);
        let scheduler = VariableRateScheduler::new(thread_name, trap.clone());
        let inner = Inner {
            buffer: MessageBuffer::new(),
            targets: Mutex::new(targets),
            log_directory: RwLock::new(config.log_directory),
            layout: RwLock::new(TemplateLayout::new(config.template)),
            flush_interval: AtomicU64::new(duration_to_nanos(config.flush_interval)),
            retention: AtomicU64::new(duration_to_nanos(config.retention)),
            sweep_interval: AtomicU64::new(duration_to_nanos(config.sweep_interval)),
            compression: AtomicBool::new(config.compression),
            min_level: AtomicUsize::new(config.min_level as usize),
            console: AtomicBool::new(config.console),
            backlog: Mutex::new(HashMap::new()),
            max_backlog: AtomicUsize::new(config.max_backlog),
            scheduler: Mutex::new(scheduler),
            #[cfg(feature = "colored")]
            colors: crate::color::LevelColor::default(),
            name: config.name,
            date_format: config.date_format,
            trap,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Return the logger name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Return the format stamped in front of archive names.
    pub fn date_format(&self) -> &str {
        &self.inner.date_format
    }

    /// Return the files every line is appended to.
    pub fn target_files(&self) -> Vec<PathBuf> {
        self.inner.target_files()
    }

    /// Add a target file. Return `false` if it was already a target.
    ///
    /// Target files are never removed. The new file receives lines from the next flush on.
    pub fn add_target_file(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let mut targets = self.inner.targets.lock().unwrap_or_else(|e| e.into_inner());
        if targets.contains(&path) {
            return false;
        }
        targets.push(path);
        true
    }

    /// Return the directory archives are written to and swept in.
    pub fn log_directory(&self) -> PathBuf {
        self.inner.log_directory()
    }

    /// Return the delay between two flushes.
    pub fn flush_interval(&self) -> Duration {
        self.inner.flush_interval()
    }

    /// Set the delay between two flushes. The running flush thread picks it up after its
    /// current wait.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if `interval` is zero; the interval is unchanged then.
    pub fn set_flush_interval(&self, interval: Duration) -> Result<(), Error> {
        if interval.is_zero() {
            return Err(Error::config("flush interval must be greater than zero")
                .with_context("logger", &self.inner.name));
        }
        let nanos = duration_to_nanos(interval);
        self.inner.flush_interval.store(nanos, Ordering::Relaxed);
        Ok(())
    }

    /// Return the number of unwritten bytes kept per failing target file.
    pub fn max_backlog(&self) -> usize {
        self.inner.max_backlog.load(Ordering::Relaxed)
    }

    /// Set the number of unwritten bytes kept per failing target file. The bound applies from
    /// the next failed write on.
    pub fn set_max_backlog(&self, bytes: usize) {
        self.inner.max_backlog.store(bytes, Ordering::Relaxed);
    }

    /// Return the maximum age of an archive.
    pub fn retention(&self) -> Duration {
        nanos_to_duration(self.inner.retention.load(Ordering::Relaxed))
    }

    /// Set the maximum age of an archive. Zero disables deletion.
    pub fn set_retention(&self, retention: Duration) {
        let nanos = duration_to_nanos(retention);
        self.inner.retention.store(nanos, Ordering::Relaxed);
    }

    /// Return the delay between two periodic retention sweeps.
    pub fn sweep_interval(&self) -> Duration {
        nanos_to_duration(self.inner.sweep_interval.load(Ordering::Relaxed))
    }

    /// Set the delay between two periodic retention sweeps. Zero sweeps only at startup.
    pub fn set_sweep_interval(&self, interval: Duration) {
        let nanos = duration_to_nanos(interval);
        self.inner.sweep_interval.store(nanos, Ordering::Relaxed);
    }

    /// Return whether archives are compressed.
    pub fn compression(&self) -> bool {
        self.inner.compression.load(Ordering::Relaxed)
    }

    /// Set whether archives are compressed.
    pub fn set_compression(&self, compression: bool) {
        self.inner.compression.store(compression, Ordering::Relaxed);
    }

    /// Return the least severe level echoed to the console.
    pub fn min_level(&self) -> LevelFilter {
        let index = self.inner.min_level.load(Ordering::Relaxed);
        LevelFilter::iter().nth(index).unwrap_or(LevelFilter::Trace)
    }

    /// Set the least severe level echoed to the console.
    pub fn set_min_level(&self, level: LevelFilter) {
        self.inner.min_level.store(level as usize, Ordering::Relaxed);
    }

    /// Set whether lines are echoed to the console.
    pub fn set_console(&self, console: bool) {
        self.inner.console.store(console, Ordering::Relaxed);
    }

    /// Return the number of lines waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Render `message` at `level` and queue it.
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        let line = self.render(level, &message.to_string());
        self.enqueue(level, line);
    }

    /// Render `message` at `level` followed by the chain of `err`, one source per line.
    pub fn log_with_source(
        &self,
        level: Level,
        message: impl fmt::Display,
        err: &(dyn StdError + 'static),
    ) {
        let mut line = self.render(level, &message.to_string());
        append_error_chain(&mut line, err);
        self.enqueue(level, line);
    }

    /// Log at [`Level::Error`].
    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::Error, message);
    }

    /// Log at [`Level::Warn`].
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::Warn, message);
    }

    /// Log at [`Level::Info`].
    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::Info, message);
    }

    /// Log at [`Level::Debug`].
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::Debug, message);
    }

    /// Queue an already rendered line as is. It is not echoed to the console.
    pub fn push(&self, line: impl Into<String>) {
        self.inner.buffer.push(line.into());
    }

    /// Write every queued line to every target file.
    ///
    /// A target that fails keeps its unwritten bytes and retries them, ahead of newer lines, on
    /// the next flush. Bytes the file already accepted are not written again. When the kept bytes
    /// outgrow [`Logger::max_backlog`], the oldest whole lines are dropped and the loss is sent to
    /// the trap. The other targets are written regardless.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Flush`] error with one source per failed target file.
    pub fn flush(&self) -> Result<(), Error> {
        self.inner.flush()
    }

    /// Delete archives in the log directory older than the retention window.
    ///
    /// Return the deleted paths.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Retention`] error if the log directory cannot be listed. Failures on
    /// single files are sent to the trap.
    pub fn sweep(&self) -> Result<Vec<PathBuf>, Error> {
        self.inner.sweep()
    }

    /// Start the background flush thread. Calling this on a running logger is a no-op.
    ///
    /// # Errors
    ///
    /// Return an error if the thread cannot be scheduled.
    pub fn init(&self) -> Result<(), Error> {
        let mut scheduler = self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if scheduler.is_running() {
            return Ok(());
        }
        scheduler.shutdown();

        let tick = Arc::downgrade(&self.inner);
        let delay = tick.clone();
        let mut last_sweep = Instant::now();
        let mut failing = vec![];

        scheduler.schedule_at_variable_rate(
            self.flush_interval(),
            move || run_tick(&tick, &mut last_sweep, &mut failing),
            move || {
                delay
                    .upgrade()
                    .map_or(Duration::ZERO, |inner| inner.flush_interval())
            },
        )
    }

    /// Return whether the background flush thread is running.
    pub fn is_running(&self) -> bool {
        let scheduler = self.inner.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        scheduler.is_running()
    }

    /// Stop the background thread, then flush what is left.
    ///
    /// A flush already in progress finishes first. The logger can be initialized again.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Flush`] error if the final flush fails.
    pub fn close(&self) -> Result<(), Error> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shutdown();
        self.inner.flush()
    }

    /// Apply a persisted override document to this live logger.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error if the document is invalid; nothing is changed then.
    pub fn apply_overrides(&self, overrides: &PersistedConfig) -> Result<(), Error> {
        let config = self.config().with_overrides(overrides)?;

        for file in config.target_files {
            self.add_target_file(file);
        }
        self.set_compression(config.compression);
        self.set_flush_interval(config.flush_interval)?;
        self.set_retention(config.retention);
        self.set_min_level(config.min_level);
        *self
            .inner
            .log_directory
            .write()
            .unwrap_or_else(|e| e.into_inner()) = config.log_directory;
        *self.inner.layout.write().unwrap_or_else(|e| e.into_inner()) =
            TemplateLayout::new(config.template);
        Ok(())
    }

    /// Return a snapshot of the current settings.
    ///
    /// The resolved target files are listed in `target_files`, so `log_to_latest` is unset.
    pub fn config(&self) -> LoggerConfig {
        let template = {
            let layout = self.inner.layout.read().unwrap_or_else(|e| e.into_inner());
            layout.template().to_string()
        };

        LoggerConfig {
            name: self.inner.name.clone(),
            target_files: self.target_files(),
            log_directory: self.log_directory(),
            date_format: self.inner.date_format.clone(),
            flush_interval: self.flush_interval(),
            max_backlog: self.max_backlog(),
            retention: self.retention(),
            sweep_interval: self.sweep_interval(),
            compression: self.compression(),
            min_level: self.min_level(),
            console: self.inner.console.load(Ordering::Relaxed),
            template,
            log_to_latest: false,
        }
    }

    pub(crate) fn trap(&self) -> &Arc<dyn Trap> {
        &self.inner.trap
    }

    pub(crate) fn ptr_eq(&self, other: &Logger) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn render(&self, level: Level, message: &str) -> String {
        let layout = self.inner.layout.read().unwrap_or_else(|e| e.into_inner());
        layout.format(level, &self.inner.name, message)
    }

    fn enqueue(&self, level: Level, line: String) {
        if self.inner.console.load(Ordering::Relaxed) && level <= self.min_level() {
            self.echo(level, &line);
        }
        self.inner.buffer.push(line);
    }

    #[cfg(feature = "colored")]
    fn echo(&self, level: Level, line: &str) {
        let line = self.inner.colors.colorize_line(level, line);
        let _ = writeln!(io::stdout().lock(), "{line}");
    }

    #[cfg(not(feature = "colored"))]
    fn echo(&self, _: Level, line: &str) {
        let _ = writeln!(io::stdout().lock(), "{line}");
    }
}

impl Inner {
    fn target_files(&self) -> Vec<PathBuf> {
        self.targets.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn log_directory(&self) -> PathBuf {
        self.log_directory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn flush_interval(&self) -> Duration {
        nanos_to_duration(self.flush_interval.load(Ordering::Relaxed))
    }

    fn flush(&self) -> Result<(), Error> {
        let failures = self.write_pending();
        self.flush_error(failures)
    }

    /// Append the queued lines to every target and return the targets that failed.
    fn write_pending(&self) -> Vec<(PathBuf, io::Error)> {
        let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());

        let mut batch = Vec::new();
        for line in self.buffer.drain() {
            batch.extend_from_slice(line.as_bytes());
            batch.push(b'\n');
        }

        let mut failures = vec![];
        for target in self.target_files() {
            let mut pending = backlog.remove(&target).unwrap_or_default();
            pending.extend_from_slice(&batch);
            if pending.is_empty() {
                continue;
            }

            if let Err((written, err)) = append(&target, &pending) {
                pending.drain(..written);
                let max_backlog = self.max_backlog.load(Ordering::Relaxed);
                let dropped = trim_backlog(&mut pending, max_backlog);
                if dropped > 0 {
                    let report = Error::new(ErrorKind::Flush, "dropped unwritten log lines")
                        .with_context("logger", &self.name)
                        .with_context("path", target.display())
                        .with_context("dropped_bytes", dropped);
                    self.trap.trap(&report);
                }
                if !pending.is_empty() {
                    backlog.insert(target.clone(), pending);
                }
                failures.push((target, err));
            }
        }
        failures
    }

    fn flush_error(&self, failures: Vec<(PathBuf, io::Error)>) -> Result<(), Error> {
        if failures.is_empty() {
            return Ok(());
        }

        let mut error = Error::new(ErrorKind::Flush, "failed to write log lines")
            .with_context("logger", &self.name);
        for (target, err) in failures {
            error = error
                .with_context("path", target.display())
                .with_source(err);
        }
        Err(error)
    }

    fn sweep(&self) -> Result<Vec<PathBuf>, Error> {
        let retention = nanos_to_duration(self.retention.load(Ordering::Relaxed));
        retention::sweep_expired(
            &self.log_directory(),
            &self.date_format,
            retention,
            SystemTime::now(),
            self.trap.as_ref(),
        )
        .map_err(|err| err.with_context("logger", &self.name))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.scheduler
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .shutdown();
        if let Err(err) = self.flush() {
            self.trap.trap(&err);
        }
    }
}

fn run_tick(
    inner: &Weak<Inner>,
    last_sweep: &mut Instant,
    failing: &mut Vec<PathBuf>,
) -> Result<(), Error> {
    let Some(inner) = inner.upgrade() else {
        return Ok(());
    };

    // the same targets failing again are reported once
    let failures = inner.write_pending();
    let failed = failures.iter().map(|(path, _)| path.clone()).collect::<Vec<_>>();
    let flushed = if failed == *failing {
        Ok(())
    } else {
        inner.flush_error(failures)
    };
    *failing = failed;

    let sweep_interval = nanos_to_duration(inner.sweep_interval.load(Ordering::Relaxed));
    if !sweep_interval.is_zero() && last_sweep.elapsed() >= sweep_interval {
        *last_sweep = Instant::now();
        if let Err(err) = inner.sweep() {
            inner.trap.trap(&err);
        }
    }

    flushed
}

/// Append `bytes` to the file at `path`. On failure, return how many bytes the file accepted.
fn append(path: &Path, bytes: &[u8]) -> Result<(), (usize, io::Error)> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| (0, err))?;
    write_counted(&mut file, bytes)
}

fn write_counted(writer: &mut impl Write, bytes: &[u8]) -> Result<(), (usize, io::Error)> {
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err((written, io::Error::from(io::ErrorKind::WriteZero))),
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err((written, err)),
        }
    }
    writer.flush().map_err(|err| (written, err))
}

/// Drop the oldest bytes of `pending` until at most `max` are left, cutting at a line end.
///
/// Return the number of dropped bytes.
fn trim_backlog(pending: &mut Vec<u8>, max: usize) -> usize {
    if pending.len() <= max {
        return 0;
    }

    let excess = pending.len() - max;
    let cut = pending[excess - 1..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(pending.len(), |i| excess + i);
    pending.drain(..cut);
    cut
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn nanos_to_duration(nanos: u64) -> Duration {
    Duration::from_nanos(nanos)
}
