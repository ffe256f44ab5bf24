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

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use jiff::Zoned;
use jiff::tz::TimeZone;

use crate::Error;
use crate::ErrorKind;
use crate::backup;
use crate::clock::Clock;
use crate::compress;
use crate::policy::RotationPolicy;
use crate::trap::DefaultTrap;
use crate::trap::Trap;

/// A byte sink that rotates its backing file once it would grow past the
/// policy's size threshold.
///
/// Rotation renames the live file to a timestamped backup and hands it to a
/// background worker that gzip-compresses it and then prunes backups
/// violating the age/count retention limits. Background failures are
/// delivered to the writer's [`Trap`] and never fail the write path.
///
/// All writer state is guarded by a single lock; `write`, `rotate`, and
/// `close` serialize against each other. One writer per path: concurrent
/// processes rotating the same file are out of scope.
#[derive(Debug)]
pub struct RotatingWriter {
    inner: Mutex<Inner>,
    shared: Arc<Shared>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl RotatingWriter {
    /// Create a writer for the given policy, trapping background errors to
    /// standard error.
    ///
    /// The live file is opened lazily on the first write, so construction
    /// touches no files.
    pub fn new(policy: RotationPolicy) -> Self {
        Self::with_trap(policy, DefaultTrap::default())
    }

    /// Create a writer with a custom [`Trap`] for background errors.
    pub fn with_trap(policy: RotationPolicy, trap: impl Into<Box<dyn Trap>>) -> Self {
        Self::build(policy, Clock::System, trap.into())
    }

    #[cfg(test)]
    fn with_clock(policy: RotationPolicy, clock: Clock) -> Self {
        Self::build(policy, clock, Box::new(DefaultTrap::default()))
    }

    fn build(policy: RotationPolicy, clock: Clock, trap: Box<dyn Trap>) -> Self {
        let shared = Arc::new(Shared {
            policy,
            clock,
            trap: Arc::from(trap),
        });

        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("rotafile-worker".to_string())
                .spawn(move || run_worker(receiver, shared))
                .expect("failed to spawn rotafile background worker")
        };

        Self {
            inner: Mutex::new(Inner {
                file: None,
                written: 0,
            }),
            shared,
            jobs: Some(sender),
            worker: Some(worker),
        }
    }

    /// Write a record to the live file, rotating first if the record would
    /// push it past the size threshold.
    ///
    /// # Errors
    ///
    /// * [`RecordTooLarge`](ErrorKind::RecordTooLarge) if the record alone
    ///   exceeds the threshold; writer state is untouched.
    /// * [`Rotation`](ErrorKind::Rotation) if a required rotation failed; the
    ///   next write retries the reopen.
    /// * [`Io`](ErrorKind::Io) for write failures, including short writes.
    pub fn write(&self, data: &[u8]) -> Result<usize, Error> {
        self.lock().write(data, &self.shared, self.jobs.as_ref())
    }

    /// Rotate the live file now, regardless of its size.
    ///
    /// Useful for SIGHUP-style external triggers. Rotating when no live file
    /// exists succeeds and produces no backup.
    pub fn rotate(&self) -> Result<(), Error> {
        self.lock().rotate(&self.shared, self.jobs.as_ref())
    }

    /// Flush the live file, if one is open.
    pub fn flush(&self) -> Result<(), Error> {
        self.lock().flush()
    }

    /// Close the live file. Closing when nothing is open is a no-op; the
    /// next write reopens.
    pub fn close(&self) -> Result<(), Error> {
        self.lock().close()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RotatingWriter {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = inner.close() {
            self.shared.report(&err);
        }

        // disconnect the channel so the worker drains its queue and exits
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl io::Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingWriter::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingWriter::flush(self).map_err(io::Error::from)
    }
}

impl io::Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingWriter::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingWriter::flush(*self).map_err(io::Error::from)
    }
}

/// State shared between the writer and its background worker. The worker
/// never touches [`Inner`].
#[derive(Debug)]
struct Shared {
    policy: RotationPolicy,
    clock: Clock,
    trap: Arc<dyn Trap>,
}

impl Shared {
    /// The current instant in the policy's time zone.
    fn now(&self) -> Zoned {
        let now = self.clock.now();
        if self.policy.local_time() {
            now
        } else {
            now.with_time_zone(TimeZone::UTC)
        }
    }

    fn report(&self, err: &Error) {
        self.trap.trap(err);
    }
}

/// The mutable writer state: the open handle and the number of bytes written
/// to it since it was opened or adopted. Only ever mutated under the writer
/// lock, and always consistent as a pair.
#[derive(Debug)]
struct Inner {
    file: Option<File>,
    written: usize,
}

impl Inner {
    fn write(
        &mut self,
        data: &[u8],
        shared: &Shared,
        jobs: Option<&Sender<Job>>,
    ) -> Result<usize, Error> {
        let max_size = shared.policy.max_size();
        if data.len() > max_size {
            return Err(Error::new(
                ErrorKind::RecordTooLarge,
                format!(
                    "record size ({}) exceeds max log file size ({max_size})",
                    data.len()
                ),
            ));
        }

        if self.file.is_none() {
            self.open_existing_or_new(data.len(), shared, jobs)?;
        } else if self.written + data.len() > max_size {
            self.rotate(shared, jobs)?;
        }

        let Some(file) = self.file.as_mut() else {
            return Err(Error::new(
                ErrorKind::Rotation,
                "no live log file after open",
            ));
        };

        let n = file.write(data).map_err(|err| {
            Error::new(ErrorKind::Io, "failed to write to live log file").with_source(err)
        })?;
        self.written += n;

        if n < data.len() {
            return Err(Error::new(
                ErrorKind::Io,
                format!("short write to live log file: {n} of {} bytes", data.len()),
            ));
        }
        Ok(n)
    }

    /// First write with no open handle: adopt the on-disk file if it exists
    /// and still has room, otherwise rotate or start fresh.
    fn open_existing_or_new(
        &mut self,
        incoming: usize,
        shared: &Shared,
        jobs: Option<&Sender<Job>>,
    ) -> Result<(), Error> {
        let path = shared.policy.filepath();
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return self.open_fresh(shared, jobs);
            }
            Err(err) => {
                return Err(Error::new(
                    ErrorKind::Io,
                    format!("failed to stat live log file: {}", path.display()),
                )
                .with_source(err));
            }
        };

        if metadata.len() as usize + incoming >= shared.policy.max_size() {
            return self.rotate(shared, jobs);
        }

        match OpenOptions::new().append(true).open(path) {
            Ok(file) => {
                self.file = Some(file);
                self.written = metadata.len() as usize;
                Ok(())
            }
            // e.g. the file was deleted between the stat and the open
            Err(_) => self.open_fresh(shared, jobs),
        }
    }

    /// Close, reopen fresh, then schedule a retention pass.
    fn rotate(&mut self, shared: &Shared, jobs: Option<&Sender<Job>>) -> Result<(), Error> {
        self.close()?;
        self.open_fresh(shared, jobs)?;
        send_job(Job::Prune, shared, jobs);
        Ok(())
    }

    /// Archive any live file at the target path and open a new one there.
    ///
    /// The backup is renamed under the writer lock so the live path is free
    /// before the new file is created; compressing it happens on the worker.
    fn open_fresh(&mut self, shared: &Shared, jobs: Option<&Sender<Job>>) -> Result<(), Error> {
        let path = shared.policy.filepath();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|err| {
            Error::new(
                ErrorKind::Rotation,
                format!("failed to create log directory: {}", dir.display()),
            )
            .with_source(err)
        })?;

        let mut mode = None;
        match fs::metadata(path) {
            Ok(metadata) => {
                mode = preserved_mode(&metadata);

                let now = shared.now();
                let backup = backup::backup_path(path, shared.policy.time_format(), &now)?;
                fs::rename(path, &backup).map_err(|err| {
                    Error::new(
                        ErrorKind::Rotation,
                        format!("failed to rename live log file to: {}", backup.display()),
                    )
                    .with_source(err)
                })?;

                send_job(Job::Archive { backup }, shared, jobs);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(Error::new(
                    ErrorKind::Rotation,
                    format!("failed to stat live log file: {}", path.display()),
                )
                .with_source(err));
            }
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        apply_mode(&mut options, mode);
        let file = options.open(path).map_err(|err| {
            Error::new(
                ErrorKind::Rotation,
                format!("failed to create fresh log file: {}", path.display()),
            )
            .with_source(err)
        })?;

        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if let Some(file) = self.file.as_mut() {
            file.flush().map_err(|err| {
                Error::new(ErrorKind::Io, "failed to flush live log file").with_source(err)
            })?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        self.written = 0;
        file.flush().map_err(|err| {
            Error::new(ErrorKind::Io, "failed to flush live log file on close").with_source(err)
        })
    }
}

fn send_job(job: Job, shared: &Shared, jobs: Option<&Sender<Job>>) {
    let delivered = match jobs {
        Some(jobs) => jobs.send(job).is_ok(),
        None => false,
    };
    if !delivered {
        shared.report(&Error::new(
            ErrorKind::Cleanup,
            "background worker is gone; skipping compression and retention",
        ));
    }
}

#[cfg(unix)]
fn preserved_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn preserved_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

#[cfg(unix)]
fn apply_mode(options: &mut OpenOptions, mode: Option<u32>) {
    use std::os::unix::fs::OpenOptionsExt;
    if let Some(mode) = mode {
        options.mode(mode);
    }
}

#[cfg(not(unix))]
fn apply_mode(_options: &mut OpenOptions, _mode: Option<u32>) {}

/// Work dispatched to the background thread after a rotation.
#[derive(Debug)]
enum Job {
    /// Compress a freshly renamed backup, then remove the uncompressed
    /// original.
    Archive { backup: PathBuf },
    /// Run a retention pass over the backup directory.
    Prune,
}

/// Process archive/prune jobs in rotation order until the writer drops its
/// sender. Runs entirely outside the writer lock and never touches the live
/// handle or size.
fn run_worker(jobs: Receiver<Job>, shared: Arc<Shared>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Archive { backup } => archive(&backup, &shared),
            Job::Prune => prune(&shared),
        }
    }
}

fn archive(backup: &Path, shared: &Shared) {
    match compress::compress_backup(backup) {
        Ok(_) => {
            // only a fully written .gz may replace the original
            if let Err(err) = fs::remove_file(backup)
                && err.kind() != io::ErrorKind::NotFound
            {
                let err = Error::new(
                    ErrorKind::Compression,
                    format!("failed to remove uncompressed backup: {}", backup.display()),
                )
                .with_source(err);
                shared.report(&err);
            }
        }
        Err(err) => shared.report(&err),
    }
}

fn prune(shared: &Shared) {
    let policy = &shared.policy;
    if policy.max_backups() == 0 && policy.max_age_days() == 0 {
        return;
    }

    let backups = match backup::list_backups(policy.filepath(), policy.time_format()) {
        Ok(backups) => backups,
        Err(err) => {
            shared.report(&err);
            return;
        }
    };

    let now = shared.now();
    let doomed = backup::plan_retention(backups, policy.max_backups(), policy.max_age_days(), &now);
    for backup in doomed {
        // a concurrent pass may have deleted it already; that is fine
        if let Err(err) = fs::remove_file(&backup.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            let err = Error::new(
                ErrorKind::Cleanup,
                format!("failed to delete old backup: {}", backup.path.display()),
            )
            .with_source(err);
            shared.report(&err);
        }
    }
}
