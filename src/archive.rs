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

//! Startup archival of log files that already hold content.
//!
//! An archive of `logs/latest.log` last touched on 2024-09-30 with the date format `%m-%d-%Y`
//! is named `logs/09-30-2024_latest.log`. If that name is taken the counter form
//! `09-30-2024_latest(1).log`, `(2)` and so on is used. A compressed archive appends
//! `.tar.gz` to the archive name; its content is a plain gzip stream of the log bytes.

use std::ffi::OsString;
use std::fs;
use std::fs::File;
use std::fs::FileTimes;
use std::fs::OpenOptions;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use flate2::Compression;
use flate2::write::GzEncoder;
use jiff::Timestamp;
use jiff::tz::TimeZone;

use crate::Error;
use crate::ErrorKind;

/// Extension of every uncompressed archive.
pub const ARCHIVE_EXTENSION: &str = ".log";

/// Suffix appended to an archive when it is compressed.
pub const COMPRESSED_SUFFIX: &str = ".tar.gz";

/// Format `time` in the system time zone with a strftime-style `date_format`.
///
/// # Errors
///
/// Return an error if the format string is invalid or the time is out of range.
pub fn format_timestamp(time: SystemTime, date_format: &str) -> Result<String, Error> {
    let timestamp = Timestamp::try_from(time).map_err(|err| {
        Error::new(ErrorKind::Config, "time is out of range").with_source(err)
    })?;
    let zoned = timestamp.to_zoned(TimeZone::system());
    jiff::fmt::strtime::format(date_format, &zoned).map_err(|err| {
        Error::config("failed to format timestamp")
            .with_context("date_format", date_format)
            .with_source(err)
    })
}

/// Return the first free archive path for `stem` stamped with `timestamp` in `dir`.
///
/// A name counts as taken if either the archive or its compressed form exists.
pub fn archive_path(dir: &Path, timestamp: &str, stem: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{timestamp}_{stem}{ARCHIVE_EXTENSION}"));
    let mut count = 1;
    while candidate.exists() || compressed_path(&candidate).exists() {
        candidate = dir.join(format!("{timestamp}_{stem}({count}){ARCHIVE_EXTENSION}"));
        count += 1;
    }
    candidate
}

/// Return `path` with [`COMPRESSED_SUFFIX`] appended to its file name.
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

/// Archive the content of `source` into `dir` and reset `source` to empty.
///
/// The archive is stamped with the last modification time of `source`; on Windows the creation
/// time is preferred when available. The content is copied, not moved, so the live file keeps its
/// identity. Its timestamps are reset to now before truncation, so the next archive of the same
/// file carries the time of its own content.
///
/// If `compress` is set, the archive is gzip-compressed and the uncompressed copy removed once
/// the compressed one is complete.
///
/// Return the path of the final archive.
///
/// # Errors
///
/// Return an error if the source cannot be read, the archive cannot be written, or compression
/// fails. When only compression fails the uncompressed archive is kept and the live file has
/// already been reset.
pub fn archive_file(
    source: &Path,
    dir: &Path,
    date_format: &str,
    compress: bool,
) -> Result<PathBuf, Error> {
    let archive_err = |message: &str, err: io::Error| {
        Error::from_io_error(ErrorKind::Archive, message, err)
            .with_context("source", source.display())
    };

    let metadata =
        fs::metadata(source).map_err(|err| archive_err("failed to stat log file", err))?;
    // only Windows lets the reset rewind the creation time
    #[cfg(windows)]
    let time = metadata.created().or_else(|_| metadata.modified());
    #[cfg(not(windows))]
    let time = metadata.modified();
    let time = time.map_err(|err| archive_err("failed to read log file time", err))?;
    let timestamp = format_timestamp(time, date_format)
        .map_err(|err| Error::new(ErrorKind::Archive, "failed to name archive").with_source(err))?;
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    fs::create_dir_all(dir).map_err(|err| archive_err("failed to create log directory", err))?;
    let archive = archive_path(dir, &timestamp, &stem);
    if let Err(err) = fs::copy(source, &archive) {
        let _ = fs::remove_file(&archive);
        let err = archive_err("failed to copy log file", err);
        return Err(err.with_context("archive", archive.display()));
    }
    reset(source).map_err(|err| archive_err("failed to reset log file", err))?;

    if !compress {
        return Ok(archive);
    }

    let compressed = self::compress(&archive)?;
    fs::remove_file(&archive).map_err(|err| {
        Error::from_io_error(ErrorKind::Archive, "failed to remove compressed archive", err)
            .with_context("archive", archive.display())
    })?;
    Ok(compressed)
}

/// Gzip `path` into `path` + [`COMPRESSED_SUFFIX`], leaving `path` untouched.
///
/// # Errors
///
/// Return an error if the output already exists or any I/O fails. A partially written output is
/// removed.
pub fn compress(path: &Path) -> Result<PathBuf, Error> {
    let target = compressed_path(path);
    let compress_err = |message: &str, err: io::Error| {
        Error::from_io_error(ErrorKind::Archive, message, err)
            .with_context("archive", path.display())
            .with_context("target", target.display())
    };

    let mut input = File::open(path).map_err(|err| compress_err("failed to open archive", err))?;
    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(|err| compress_err("failed to create compressed archive", err))?;

    let written = (|| {
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();

    match written {
        Ok(()) => Ok(target),
        Err(err) => {
            let _ = fs::remove_file(&target);
            Err(compress_err("failed to compress archive", err))
        }
    }
}

fn reset(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;

    let now = SystemTime::now();
    let times = FileTimes::new().set_accessed(now).set_modified(now);
    #[cfg(windows)]
    let times = {
        use std::os::windows::fs::FileTimesExt;
        times.set_created(now)
    };
    // not every platform lets us set times; truncation still proceeds
    let _ = file.set_times(times);

    file.set_len(0)
}
