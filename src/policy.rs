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

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use jiff::Zoned;
use jiff::civil::DateTime;
use jiff::fmt::strtime;

use crate::Error;
use crate::ErrorKind;

/// Rotate once the live file would grow past 10 MB, unless configured
/// otherwise.
const DEFAULT_MAX_SIZE: usize = 10_000_000;
const DEFAULT_MAX_AGE_DAYS: u32 = 30;
const DEFAULT_MAX_BACKUPS: usize = 30;

/// Sortable, filesystem-safe, millisecond precision. Colons are avoided on
/// purpose so backup names stay valid on Windows.
const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S.%3f";

/// The validated, immutable configuration of a [`RotatingWriter`].
///
/// [`RotatingWriter`]: crate::RotatingWriter
#[derive(Clone, Debug)]
pub struct RotationPolicy {
    filepath: PathBuf,
    max_size: usize,
    max_age_days: u32,
    max_backups: usize,
    local_time: bool,
    time_format: String,
}

impl RotationPolicy {
    /// Create a new [`RotationPolicyBuilder`].
    #[must_use]
    pub fn builder() -> RotationPolicyBuilder {
        RotationPolicyBuilder {
            filepath: None,
            max_size: None,
            max_age_days: None,
            max_backups: None,
            local_time: false,
            time_format: None,
        }
    }

    /// Path of the live log file.
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Rotation threshold in bytes. Always greater than zero.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Maximum age of a backup in days; `0` disables the age limit.
    pub fn max_age_days(&self) -> u32 {
        self.max_age_days
    }

    /// Maximum number of backups to keep; `0` disables the count limit.
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Whether backup timestamps use the local time zone instead of UTC.
    pub fn local_time(&self) -> bool {
        self.local_time
    }

    /// The strftime pattern used for backup timestamps.
    pub fn time_format(&self) -> &str {
        &self.time_format
    }
}

/// A builder for configuring [`RotationPolicy`].
///
/// Unset numeric options take their defaults; an explicit `0` for
/// [`max_age_days`](RotationPolicyBuilder::max_age_days) or
/// [`max_backups`](RotationPolicyBuilder::max_backups) means "no limit of
/// that kind" and is preserved as such.
#[derive(Debug)]
pub struct RotationPolicyBuilder {
    filepath: Option<PathBuf>,
    max_size: Option<usize>,
    max_age_days: Option<u32>,
    max_backups: Option<usize>,
    local_time: bool,
    time_format: Option<String>,
}

impl RotationPolicyBuilder {
    /// Set the path of the live log file.
    ///
    /// Defaults to `<dir-of-executable>/log/<executable-name>.log`, creating
    /// the directory if absent.
    #[must_use]
    pub fn filepath(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    /// Set the rotation threshold in bytes. `0` falls back to the default.
    #[must_use]
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = Some(n);
        self
    }

    /// Set the maximum backup age in days. `0` disables the age limit.
    #[must_use]
    pub fn max_age_days(mut self, n: u32) -> Self {
        self.max_age_days = Some(n);
        self
    }

    /// Set the maximum number of backups to keep. `0` disables the count
    /// limit.
    #[must_use]
    pub fn max_backups(mut self, n: usize) -> Self {
        self.max_backups = Some(n);
        self
    }

    /// Timestamp backups in the local time zone instead of UTC.
    #[must_use]
    pub fn local_time(mut self, local_time: bool) -> Self {
        self.local_time = local_time;
        self
    }

    /// Set the strftime pattern for backup timestamps.
    ///
    /// The pattern must format and reparse losslessly, and should keep
    /// millisecond precision so rapid rotations do not collide.
    #[must_use]
    pub fn time_format(mut self, time_format: impl Into<String>) -> Self {
        self.time_format = Some(time_format.into());
        self
    }

    /// Build the [`RotationPolicy`].
    ///
    /// # Errors
    ///
    /// Returns a [`Configuration`](ErrorKind::Configuration) error if either:
    ///
    /// * The configured filepath is empty.
    /// * No filepath is configured and the default cannot be derived.
    /// * The timestamp pattern cannot format or reparse a probe instant.
    pub fn build(self) -> Result<RotationPolicy, Error> {
        let Self {
            filepath,
            max_size,
            max_age_days,
            max_backups,
            local_time,
            time_format,
        } = self;

        let filepath = match filepath {
            Some(filepath) if filepath.as_os_str().is_empty() => {
                return Err(Error::new(
                    ErrorKind::Configuration,
                    "log filepath must not be empty",
                ));
            }
            Some(filepath) => filepath,
            None => default_filepath()?,
        };

        let max_size = match max_size {
            Some(0) | None => DEFAULT_MAX_SIZE,
            Some(n) => n,
        };

        let time_format = time_format.unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string());
        verify_time_format(&time_format)?;

        Ok(RotationPolicy {
            filepath,
            max_size,
            max_age_days: max_age_days.unwrap_or(DEFAULT_MAX_AGE_DAYS),
            max_backups: max_backups.unwrap_or(DEFAULT_MAX_BACKUPS),
            local_time,
            time_format,
        })
    }
}

/// Derive `<dir-of-executable>/log/<executable-name>.log` and ensure the
/// directory exists.
fn default_filepath() -> Result<PathBuf, Error> {
    let exe = env::current_exe().map_err(|err| {
        Error::new(
            ErrorKind::Configuration,
            "failed to resolve the running executable path",
        )
        .with_source(err)
    })?;

    let dir = exe.parent().unwrap_or_else(|| Path::new(".")).join("log");
    fs::create_dir_all(&dir).map_err(|err| {
        Error::new(
            ErrorKind::Configuration,
            format!("failed to create default log directory: {}", dir.display()),
        )
        .with_source(err)
    })?;

    let name = exe
        .file_name()
        .ok_or_else(|| Error::new(ErrorKind::Configuration, "executable path has no filename"))?;
    Ok(dir.join(format!("{}.log", name.to_string_lossy())))
}

/// Reject timestamp patterns that cannot round-trip through a filename, since
/// backups named with them would never match the listing logic again.
fn verify_time_format(time_format: &str) -> Result<(), Error> {
    let probe = strtime::format(time_format, &Zoned::now()).map_err(|err| {
        Error::new(
            ErrorKind::Configuration,
            format!("invalid backup time format: {time_format}"),
        )
        .with_source(err)
    })?;

    DateTime::strptime(time_format, &probe).map_err(|err| {
        Error::new(
            ErrorKind::Configuration,
            format!("backup time format does not round-trip: {time_format}"),
        )
        .with_source(err)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RotationPolicy::builder()
            .filepath("logs/app.log")
            .build()
            .unwrap();

        assert_eq!(policy.max_size(), DEFAULT_MAX_SIZE);
        assert_eq!(policy.max_age_days(), DEFAULT_MAX_AGE_DAYS);
        assert_eq!(policy.max_backups(), DEFAULT_MAX_BACKUPS);
        assert!(!policy.local_time());
        assert_eq!(policy.time_format(), DEFAULT_TIME_FORMAT);
    }

    #[test]
    fn test_explicit_zero_disables_retention_limits() {
        let policy = RotationPolicy::builder()
            .filepath("logs/app.log")
            .max_age_days(0)
            .max_backups(0)
            .build()
            .unwrap();

        assert_eq!(policy.max_age_days(), 0);
        assert_eq!(policy.max_backups(), 0);
    }

    #[test]
    fn test_zero_max_size_falls_back_to_default() {
        let policy = RotationPolicy::builder()
            .filepath("logs/app.log")
            .max_size(0)
            .build()
            .unwrap();

        assert_eq!(policy.max_size(), DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_empty_filepath_is_rejected() {
        let err = RotationPolicy::builder().filepath("").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_invalid_time_format_is_rejected() {
        let err = RotationPolicy::builder()
            .filepath("logs/app.log")
            .time_format("%")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_non_round_tripping_time_format_is_rejected() {
        // %a formats a weekday name that strptime cannot anchor to a date
        let err = RotationPolicy::builder()
            .filepath("logs/app.log")
            .time_format("%a")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
