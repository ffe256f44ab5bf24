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

//! End-to-end rotation and retention through the public API only.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use rotafile::ErrorKind;
use rotafile::RotatingWriter;
use rotafile::RotationPolicy;
use tempfile::TempDir;

fn backup_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            let name = entry.as_ref().unwrap().file_name();
            let name = name.to_string_lossy();
            name.starts_with("app-") && name.contains(".log")
        })
        .count()
}

#[test]
fn test_count_limited_rotation_end_to_end() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let path = temp_dir.path().join("app.log");

    let policy = RotationPolicy::builder()
        .filepath(&path)
        .max_size(100)
        .max_backups(3)
        .max_age_days(0)
        .build()
        .unwrap();
    let mut writer = RotatingWriter::new(policy);

    for i in 0..20 {
        // backup timestamps have millisecond precision; space out rotations
        thread::sleep(Duration::from_millis(2));
        let record = format!("entry {i:02}: {}\n", "x".repeat(50));
        writer.write_all(record.as_bytes()).unwrap();
        writer.flush().unwrap();
        assert!(fs::metadata(&path).unwrap().len() <= 100);
    }
    drop(writer);

    assert_eq!(backup_count(temp_dir.path()), 3);
    assert!(fs::metadata(&path).unwrap().len() > 0);
}

#[test]
fn test_oversized_record_is_rejected_and_writer_survives() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let path = temp_dir.path().join("app.log");

    let policy = RotationPolicy::builder()
        .filepath(&path)
        .max_size(64)
        .max_backups(0)
        .max_age_days(0)
        .build()
        .unwrap();
    let writer = RotatingWriter::new(policy);

    let err = writer.write(&[b'x'; 65]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecordTooLarge);

    writer.write(b"small enough\n").unwrap();
    writer.flush().unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"small enough\n");
}

#[test]
fn test_manual_rotation_via_public_api() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let path = temp_dir.path().join("app.log");

    let policy = RotationPolicy::builder()
        .filepath(&path)
        .max_size(1_000_000)
        .max_backups(0)
        .max_age_days(0)
        .build()
        .unwrap();
    let writer = RotatingWriter::new(policy);

    // nothing on disk yet: forced rotation produces no backup
    writer.rotate().unwrap();

    writer.write(b"first generation\n").unwrap();
    thread::sleep(Duration::from_millis(2));
    writer.rotate().unwrap();
    writer.write(b"second generation\n").unwrap();
    writer.flush().unwrap();
    drop(writer);

    assert_eq!(fs::read(&path).unwrap(), b"second generation\n");
    assert_eq!(backup_count(temp_dir.path()), 1);
}

#[test]
fn test_writer_usable_through_io_write_trait() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let path = temp_dir.path().join("app.log");

    let policy = RotationPolicy::builder()
        .filepath(&path)
        .max_size(1_000_000)
        .build()
        .unwrap();
    let writer = RotatingWriter::new(policy);

    // shared-reference writes, the way an exporter holds the sink
    let mut sink = &writer;
    writeln!(sink, "via io::Write").unwrap();
    sink.flush().unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"via io::Write\n");
}
