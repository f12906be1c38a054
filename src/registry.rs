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
use std::collections::HashSet;
use std::fs;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use crate::DefaultTrap;
use crate::Error;
use crate::ErrorKind;
use crate::Logger;
use crate::PersistedConfig;
use crate::Trap;
use crate::archive;

/// How a file shared by loggers with different compression settings is archived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionPolicy {
    /// Compress if any referencing logger has compression enabled.
    #[default]
    Any,
    /// Compress only if every referencing logger has compression enabled.
    All,
    /// Compress if more than half of the referencing loggers have compression enabled.
    Majority,
}

impl CompressionPolicy {
    /// Decide from the compression settings of the loggers referencing one file.
    pub fn resolve(self, settings: impl IntoIterator<Item = bool>) -> bool {
        let (enabled, total) = settings
            .into_iter()
            .fold((0usize, 0usize), |(enabled, total), on| {
                (enabled + usize::from(on), total + 1)
            });
        match self {
            CompressionPolicy::Any => enabled > 0,
            CompressionPolicy::All => total > 0 && enabled == total,
            CompressionPolicy::Majority => enabled * 2 > total,
        }
    }
}

/// The set of active loggers and their shared startup and shutdown.
///
/// [`Registry::init`] runs the startup pass over every registered logger:
///
/// 1. Collect the target files of all loggers, once per path.
/// 2. Archive each file that already holds content, once, no matter how many loggers share it.
///    The first registered logger referencing a file supplies the archive directory and date
///    format; the [`CompressionPolicy`] decides compression.
/// 3. Create every target file that does not exist yet.
/// 4. Sweep expired archives of every logger.
/// 5. Start every logger's background flush thread.
///
/// A logger registered after `init` goes through the same pass on its own, except that a file
/// seen by an earlier pass is never archived again.
///
/// Dropping the registry shuts it down, which flushes what every logger still buffers. Own the
/// registry in `main` or whatever the entrypoint of the program is, so it is dropped when `main`
/// returns or unwinds. A registry kept in a `static` is never dropped; hold a
/// [`Registry::shutdown_guard`] in `main` instead. If the program terminates abruptly (such as
/// through `std::process::exit`), buffered lines may not be written.
///
/// # Examples
///
/// ```no_run
/// use logcycle::Logger;
/// use logcycle::LoggerConfig;
/// use logcycle::Registry;
///
/// let registry = Registry::new();
/// let logger = Logger::new(LoggerConfig::new("app")).unwrap();
/// registry.register(logger.clone()).unwrap();
/// registry.init().unwrap();
///
/// logger.info("ready");
/// registry.shutdown();
/// ```
#[derive(Debug)]
pub struct Registry {
    trap: Arc<dyn Trap>,
    compression_policy: CompressionPolicy,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    loggers: Vec<Logger>,
    initialized: bool,
    // every path a startup pass has looked at
    processed: HashSet<PathBuf>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry that reports failures to standard error.
    pub fn new() -> Self {
        Self::with_trap(Arc::new(DefaultTrap::default()))
    }

    /// Create an empty registry that reports failures to `trap`.
    pub fn with_trap(trap: Arc<dyn Trap>) -> Self {
        Self {
            trap,
            compression_policy: CompressionPolicy::default(),
            state: Mutex::new(State::default()),
        }
    }

    /// Set the policy for files shared by loggers with different compression settings.
    pub fn compression_policy(mut self, policy: CompressionPolicy) -> Self {
        self.compression_policy = policy;
        self
    }

    /// Add a logger. Registering the same logger twice is a no-op.
    ///
    /// If the registry is already initialized, the logger is started right away.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Registry`] error if another logger with the same name is registered,
    /// or an error from starting the logger.
    pub fn register(&self, logger: Logger) -> Result<(), Error> {
        let mut state = self.lock();
        if state.loggers.iter().any(|l| l.ptr_eq(&logger)) {
            return Ok(());
        }
        if state.loggers.iter().any(|l| l.name() == logger.name()) {
            return Err(Error::new(
                ErrorKind::Registry,
                "a logger with this name is already registered",
            )
            .with_context("logger", logger.name()));
        }

        state.loggers.push(logger.clone());
        if state.initialized {
            self.start(&mut state, std::slice::from_ref(&logger))?;
        }
        Ok(())
    }

    /// Close and remove a logger.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Registry`] error if the logger is not registered, or the error of its
    /// final flush. The logger is removed in the latter case.
    pub fn unregister(&self, logger: &Logger) -> Result<(), Error> {
        let removed = {
            let mut state = self.lock();
            let index = state
                .loggers
                .iter()
                .position(|l| l.ptr_eq(logger))
                .ok_or_else(|| {
                    Error::new(ErrorKind::Registry, "logger is not registered")
                        .with_context("logger", logger.name())
                })?;
            state.loggers.remove(index)
        };
        removed.close()
    }

    /// Return the registered logger named `name`.
    pub fn get(&self, name: &str) -> Option<Logger> {
        let state = self.lock();
        state.loggers.iter().find(|l| l.name() == name).cloned()
    }

    /// Return every registered logger in registration order.
    pub fn loggers(&self) -> Vec<Logger> {
        self.lock().loggers.clone()
    }

    /// Return whether [`Registry::init`] has run and [`Registry::shutdown`] has not since.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Run the startup pass over every registered logger. A second call is a no-op.
    ///
    /// Archive, creation and sweep failures on single files are sent to the trap.
    ///
    /// # Errors
    ///
    /// Return an error if a logger cannot be started.
    pub fn init(&self) -> Result<(), Error> {
        self.init_with(&HashMap::new())
    }

    /// Like [`Registry::init`], but first apply `overrides` to the loggers with matching names.
    ///
    /// # Errors
    ///
    /// Return a [`ErrorKind::Config`] error before anything is touched if an override document is
    /// invalid for its logger, or an error if a logger cannot be started.
    pub fn init_with(&self, overrides: &HashMap<String, PersistedConfig>) -> Result<(), Error> {
        let mut state = self.lock();
        if state.initialized {
            return Ok(());
        }

        for logger in &state.loggers {
            if let Some(document) = overrides.get(logger.name()) {
                logger.config().with_overrides(document)?;
            }
        }
        for logger in &state.loggers {
            if let Some(document) = overrides.get(logger.name()) {
                logger.apply_overrides(document)?;
            }
        }

        let loggers = state.loggers.clone();
        self.start(&mut state, &loggers)?;
        state.initialized = true;
        Ok(())
    }

    /// Close every logger. Calling this on a registry that is not initialized is a no-op.
    ///
    /// Loggers stay registered, and a later [`Registry::init`] starts them again without
    /// archiving their files a second time. Final flush failures are sent to the trap.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if !state.initialized {
            return;
        }
        for logger in &state.loggers {
            if let Err(err) = logger.close() {
                self.trap.trap(&err);
            }
        }
        state.initialized = false;
    }

    fn start(&self, state: &mut State, loggers: &[Logger]) -> Result<(), Error> {
        let mut files: Vec<(PathBuf, Vec<&Logger>)> = vec![];
        for logger in loggers {
            for file in logger.target_files() {
                match files.iter_mut().find(|(path, _)| *path == file) {
                    Some((_, group)) => group.push(logger),
                    None => files.push((file, vec![logger])),
                }
            }
        }

        for (file, group) in &files {
            if !state.processed.insert(file.clone()) {
                continue;
            }
            self.archive(file, group);
        }

        for (file, _) in &files {
            if let Err(err) = create_if_missing(file) {
                self.trap.trap(&err);
            }
        }

        for logger in loggers {
            if let Err(err) = logger.sweep() {
                self.trap.trap(&err);
            }
        }

        for logger in loggers {
            logger.init()?;
        }
        Ok(())
    }

    fn archive(&self, file: &Path, group: &[&Logger]) {
        let Some(owner) = group.first() else {
            return;
        };
        // only regular files holding content are archived
        match fs::metadata(file) {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => {}
            _ => return,
        }

        let compress = self
            .compression_policy
            .resolve(group.iter().map(|l| l.compression()));
        let archived = archive::archive_file(
            file,
            &owner.log_directory(),
            owner.date_format(),
            compress,
        );
        if let Err(err) = archived {
            self.trap.trap(&err.with_context("logger", owner.name()));
        }
    }

    /// Return a guard that shuts this registry down when dropped.
    ///
    /// Use it when the registry outlives `main`, such as one kept in a `static`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::LazyLock;
    ///
    /// use logcycle::Registry;
    ///
    /// static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
    ///
    /// fn main() {
    ///     let _guard = REGISTRY.shutdown_guard();
    ///     REGISTRY.init().unwrap();
    /// }
    /// ```
    pub fn shutdown_guard(&self) -> ShutdownGuard<'_> {
        ShutdownGuard { registry: self }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A guard that calls [`Registry::shutdown`] when dropped.
///
/// Assign it in `main`, so it is dropped when `main` returns or unwinds.
#[derive(Debug)]
#[must_use = "the registry is shut down as soon as the guard is dropped"]
pub struct ShutdownGuard<'a> {
    registry: &'a Registry,
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}

fn create_if_missing(file: &Path) -> Result<(), Error> {
    if file.exists() {
        return Ok(());
    }
    let create_err = |message: &str, err| {
        Error::from_io_error(ErrorKind::Archive, message, err).with_context("path", file.display())
    };

    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| create_err("failed to create log directory", err))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .map_err(|err| create_err("failed to create log file", err))?;
    Ok(())
}
