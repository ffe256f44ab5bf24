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

//! Backup naming, directory scanning, and retention planning.
//!
//! A live file `name.ext` rotates to `name-<timestamp>.ext`, optionally
//! gaining a `.gz` suffix once compressed. The directory listing is the only
//! source of truth; nothing here is persisted.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use jiff::Span;
use jiff::Zoned;
use jiff::civil::DateTime;
use jiff::fmt::strtime;

use crate::Error;
use crate::ErrorKind;

pub(crate) const COMPRESSED_SUFFIX: &str = ".gz";

/// A backup file discovered by scanning the live file's directory.
#[derive(Debug)]
pub(crate) struct Backup {
    pub(crate) path: PathBuf,
    pub(crate) timestamp: DateTime,
    #[allow(dead_code)] // retention only needs the timestamp
    pub(crate) compressed: bool,
}

/// Split a filename into its stem (without the extension) and its extension
/// including the leading dot; `app.log` gives `("app", ".log")`.
fn split_filename(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(i) => filename.split_at(i),
        None => (filename, ""),
    }
}

/// Compute the backup path for the live file rotated at `now`.
pub(crate) fn backup_path(
    live: &Path,
    time_format: &str,
    now: &Zoned,
) -> Result<PathBuf, Error> {
    let filename = live
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::Rotation,
                format!("live log path has no usable filename: {}", live.display()),
            )
        })?;
    let (stem, ext) = split_filename(filename);

    let timestamp = strtime::format(time_format, now).map_err(|err| {
        Error::new(ErrorKind::Rotation, "failed to format backup timestamp").with_source(err)
    })?;

    let dir = live.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!("{stem}-{timestamp}{ext}")))
}

/// Parse the rotation timestamp out of a backup filename.
///
/// Returns `None` for anything that is not a backup of this writer: wrong
/// prefix, wrong suffix, or a timestamp the pattern cannot parse.
pub(crate) fn parse_backup_name(
    filename: &str,
    stem: &str,
    ext: &str,
    time_format: &str,
) -> Option<(DateTime, bool)> {
    let rest = filename.strip_prefix(stem)?.strip_prefix('-')?;
    let (rest, compressed) = match rest.strip_suffix(COMPRESSED_SUFFIX) {
        Some(rest) => (rest, true),
        None => (rest, false),
    };
    let timestamp = rest.strip_suffix(ext)?;
    let timestamp = DateTime::strptime(time_format, timestamp).ok()?;
    Some((timestamp, compressed))
}

/// List all backups of `live` in its directory, sorted newest first.
pub(crate) fn list_backups(live: &Path, time_format: &str) -> Result<Vec<Backup>, Error> {
    let filename = live
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::Cleanup,
                format!("live log path has no usable filename: {}", live.display()),
            )
        })?;
    let (stem, ext) = split_filename(filename);

    let dir = live.parent().unwrap_or_else(|| Path::new("."));
    let read_dir = fs::read_dir(dir).map_err(|err| {
        Error::new(
            ErrorKind::Cleanup,
            format!("failed to read log directory: {}", dir.display()),
        )
        .with_source(err)
    })?;

    let mut backups = read_dir
        .filter_map(|entry| {
            let entry = entry.ok()?;
            // the writer only creates files, not directories or symlinks
            if !entry.metadata().ok()?.is_file() {
                return None;
            }

            let name = entry.file_name();
            let name = name.to_str()?;
            let (timestamp, compressed) = parse_backup_name(name, stem, ext, time_format)?;

            Some(Backup {
                path: entry.path(),
                timestamp,
                compressed,
            })
        })
        .collect::<Vec<_>>();

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(backups)
}

/// Decide which backups a cleanup pass deletes.
///
/// `backups` must be sorted newest first. Backups beyond the first
/// `max_backups` are marked; the age limit then applies to the survivors of
/// the count limit, so a backup inside the count window is still deleted once
/// it is older than `now - max_age_days` days. Either limit is disabled by
/// passing `0`.
pub(crate) fn plan_retention(
    mut backups: Vec<Backup>,
    max_backups: usize,
    max_age_days: u32,
    now: &Zoned,
) -> Vec<Backup> {
    let mut doomed = Vec::new();

    if max_backups > 0 && backups.len() > max_backups {
        doomed = backups.split_off(max_backups);
    }

    if max_age_days > 0
        && let Ok(age) = Span::new().try_days(i64::from(max_age_days))
        && let Ok(cutoff) = now.checked_sub(age)
    {
        let cutoff = cutoff.datetime();
        doomed.extend(backups.into_iter().filter(|b| b.timestamp < cutoff));
    }

    doomed
}
