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

//! A rotating log-file engine.
//!
//! [`RotatingWriter`] accepts an opaque byte stream and transparently rotates
//! the backing file once it would grow past a size threshold: the live file
//! is renamed to a timestamped backup, gzip-compressed in the background, and
//! old backups are pruned by age and count per the [`RotationPolicy`].
//!
//! The writer is an `io::Writer`-equivalent for the surrounding logging
//! system; formatting, levels, and transport are explicitly out of its scope.
//!
//! # Example
//!
//! ```
//! use rotafile::RotatingWriter;
//! use rotafile::RotationPolicy;
//!
//! # fn main() -> Result<(), rotafile::Error> {
//! let dir = std::env::temp_dir().join("rotafile-doc");
//! let policy = RotationPolicy::builder()
//!     .filepath(dir.join("app.log"))
//!     .max_size(10 * 1024 * 1024)
//!     .max_backups(5)
//!     .max_age_days(14)
//!     .build()?;
//!
//! let writer = RotatingWriter::new(policy);
//! writer.write(b"hello\n")?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::policy::RotationPolicy;
pub use self::policy::RotationPolicyBuilder;
pub use self::rotator::RotatingWriter;
pub use self::trap::DefaultTrap;
pub use self::trap::Trap;

mod backup;
mod clock;
mod compress;
mod error;
mod policy;
mod rotator;
mod trap;
