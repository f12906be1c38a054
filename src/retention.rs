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

//! Deletion of archives older than a retention window.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use crate::Error;
use crate::ErrorKind;
use crate::Trap;
use crate::archive::ARCHIVE_EXTENSION;
use crate::archive::COMPRESSED_SUFFIX;

/// Return whether `filename` looks like an archive stamped with `date_format`.
///
/// Archive suffixes and a trailing `(n)` counter are stripped first. The remainder matches if it,
/// or any part of it before an underscore, parses as a timestamp in `date_format`.
pub fn is_archive_name(filename: &str, date_format: &str) -> bool {
    let stem = filename.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(filename);
    let Some(stem) = stem.strip_suffix(ARCHIVE_EXTENSION) else {
        return false;
    };
    let stem = strip_counter(stem);

    std::iter::once(stem)
        .chain(stem.match_indices('_').map(|(i, _)| &stem[..i]))
        .any(|prefix| !prefix.is_empty() && jiff::fmt::strtime::parse(date_format, prefix).is_ok())
}

fn strip_counter(stem: &str) -> &str {
    let Some(rest) = stem.strip_suffix(')') else {
        return stem;
    };
    match rest.rfind('(') {
        Some(open) => {
            let digits = &rest[open + 1..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                &rest[..open]
            } else {
                stem
            }
        }
        None => stem,
    }
}

/// Delete archives in `dir` last modified strictly before `now - retention`.
///
/// Only regular files directly in `dir` whose names pass [`is_archive_name`] are candidates; the
/// live log files and unrelated files are never touched. A zero `retention` disables deletion.
///
/// A failure on a single file is sent to `trap` and the sweep moves on to the next file.
///
/// Return the deleted paths.
///
/// # Errors
///
/// Return an error if `dir` exists but cannot be listed.
pub fn sweep_expired(
    dir: &Path,
    date_format: &str,
    retention: Duration,
    now: SystemTime,
    trap: &dyn Trap,
) -> Result<Vec<PathBuf>, Error> {
    if retention.is_zero() || !dir.is_dir() {
        return Ok(vec![]);
    }
    let Some(cutoff) = now.checked_sub(retention) else {
        return Ok(vec![]);
    };

    let read_dir = fs::read_dir(dir).map_err(|err| {
        Error::from_io_error(ErrorKind::Retention, "failed to read log directory", err)
            .with_context("dir", dir.display())
    })?;

    let mut deleted = vec![];
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let err = Error::from_io_error(ErrorKind::Retention, "failed to read entry", err)
                    .with_context("dir", dir.display());
                trap.trap(&err);
                continue;
            }
        };
        let path = entry.path();

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                let err = Error::from_io_error(ErrorKind::Retention, "failed to stat file", err)
                    .with_context("path", path.display());
                trap.trap(&err);
                continue;
            }
        };

        // We only create files, never delete a dir or symlink.
        if !metadata.is_file() {
            continue;
        }

        let filename = entry.file_name();
        let Some(filename) = filename.to_str() else {
            continue;
        };
        if !is_archive_name(filename, date_format) {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                let err = Error::from_io_error(
                    ErrorKind::Retention,
                    "failed to get last modified time",
                    err,
                )
                .with_context("path", path.display());
                trap.trap(&err);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => deleted.push(path),
            Err(err) => {
                let err =
                    Error::from_io_error(ErrorKind::Retention, "failed to delete old log", err)
                        .with_context("path", path.display());
                trap.trap(&err);
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, Default)]
    struct CollectTrap(Mutex<Vec<String>>);

    impl Trap for CollectTrap {
        fn trap(&self, err: &Error) {
            self.0.lock().unwrap().push(err.to_string());
        }
    }

    const FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(modified).unwrap();
        path
    }

    #[test]
    fn test_is_archive_name() {
        assert!(is_archive_name("2024-08-10-17-12-52_latest.log", FORMAT));
        assert!(is_archive_name("2024-08-10-17-12-52_latest(3).log", FORMAT));
        assert!(is_archive_name("2024-08-10-17-12-52_latest.log.tar.gz", FORMAT));
        assert!(is_archive_name("2024-08-10-17-12-52_my_app(1).log.tar.gz", FORMAT));
        assert!(is_archive_name("2024-08-10-17-12-52.log", FORMAT));
        assert!(is_archive_name("09-30-2024_app.log", "%m-%d-%Y"));

        assert!(!is_archive_name("latest.log", FORMAT));
        assert!(!is_archive_name("my_app.log", FORMAT));
        assert!(!is_archive_name("2024-08-10-17-12-52_notes.txt", FORMAT));
        assert!(!is_archive_name("2024-13-10-17-12-52_latest.log", FORMAT));
        assert!(!is_archive_name("09-30-2024_app.log", FORMAT));
    }

    #[test]
    fn test_strip_counter() {
        assert_eq!(strip_counter("a_b(12)"), "a_b");
        assert_eq!(strip_counter("a_b()"), "a_b()");
        assert_eq!(strip_counter("a_b(x)"), "a_b(x)");
        assert_eq!(strip_counter("a_b"), "a_b");
    }

    #[test]
    fn test_sweep_deletes_strictly_before_cutoff() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let dir = temp_dir.path();

        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let cutoff = now - DAY;

        let old = touch(dir, "2023-11-01-00-00-00_latest.log", cutoff - Duration::from_secs(1));
        let old_compressed = touch(
            dir,
            "2023-11-01-00-00-00_latest(1).log.tar.gz",
            cutoff - Duration::from_secs(60),
        );
        let boundary = touch(dir, "2023-11-13-22-13-20_latest.log", cutoff);
        let fresh = touch(dir, "2023-11-14-21-00-00_latest.log", now - Duration::from_secs(3600));
        let live = touch(dir, "latest.log", cutoff - DAY);
        let unrelated = touch(dir, "notes.txt", cutoff - DAY);
        fs::create_dir(dir.join("2023-11-01-00-00-00_nested.log")).unwrap();

        let trap = CollectTrap::default();
        let mut deleted = sweep_expired(dir, FORMAT, DAY, now, &trap).unwrap();
        deleted.sort();

        let mut expected = vec![old.clone(), old_compressed.clone()];
        expected.sort();
        assert_eq!(deleted, expected);

        assert!(!old.exists());
        assert!(!old_compressed.exists());
        assert!(boundary.exists());
        assert!(fresh.exists());
        assert!(live.exists());
        assert!(unrelated.exists());
        assert!(dir.join("2023-11-01-00-00-00_nested.log").is_dir());
        assert!(trap.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sweep_disabled_or_missing_dir() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let now = SystemTime::now();
        let old = touch(temp_dir.path(), "2020-01-01-00-00-00_latest.log", now - 400 * DAY);

        let trap = CollectTrap::default();
        let deleted = sweep_expired(temp_dir.path(), FORMAT, Duration::ZERO, now, &trap).unwrap();
        assert!(deleted.is_empty());
        assert!(old.exists());

        let missing = temp_dir.path().join("missing");
        let deleted = sweep_expired(&missing, FORMAT, DAY, now, &trap).unwrap();
        assert!(deleted.is_empty());
    }
}
