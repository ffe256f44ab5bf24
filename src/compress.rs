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

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::Error;
use crate::ErrorKind;
use crate::backup::COMPRESSED_SUFFIX;

/// Compress a rotated backup into `<backup>.gz` at maximum compression level.
///
/// The uncompressed original is left in place; the caller removes it only
/// after this returns `Ok`, so a failed compression never loses data.
pub(crate) fn compress_backup(backup: &Path) -> Result<PathBuf, Error> {
    let mut compressed = backup.as_os_str().to_os_string();
    compressed.push(COMPRESSED_SUFFIX);
    let compressed = PathBuf::from(compressed);

    let source = File::open(backup).map_err(|err| {
        Error::new(
            ErrorKind::Compression,
            format!("failed to open backup for compression: {}", backup.display()),
        )
        .with_source(err)
    })?;

    let target = File::create(&compressed).map_err(|err| {
        Error::new(
            ErrorKind::Compression,
            format!("failed to create compressed backup: {}", compressed.display()),
        )
        .with_source(err)
    })?;

    let mut encoder = GzEncoder::new(BufWriter::new(target), Compression::best());
    io::copy(&mut BufReader::new(source), &mut encoder)
        .and_then(|_| encoder.finish())
        .and_then(|mut target| target.flush())
        .map_err(|err| {
            Error::new(
                ErrorKind::Compression,
                format!("failed to compress backup: {}", backup.display()),
            )
            .with_source(err)
        })?;

    Ok(compressed)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_compress_backup_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let backup = temp_dir.path().join("app-2024-08-10T12-30-45.123.log");
        let payload = b"some log content\n".repeat(1000);
        fs::write(&backup, &payload).unwrap();

        let compressed = compress_backup(&backup).unwrap();
        assert_eq!(
            compressed,
            temp_dir.path().join("app-2024-08-10T12-30-45.123.log.gz")
        );
        // the original is untouched
        assert_eq!(fs::read(&backup).unwrap(), payload);

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&compressed).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_compress_missing_backup_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = compress_backup(&temp_dir.path().join("gone.log")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compression);
    }
}
