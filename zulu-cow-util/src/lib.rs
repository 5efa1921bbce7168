//! Library for exercising copy-on-write image overlays.
//!
//! This crate hosts the randomized differential simulation used to check a
//! [`zulu_cow::BackingStore`] against a flat reference image, along with
//! progress reporting for it.
//!
//! # Overview
//!
//! The main entry point is [`Simulation`], which takes [`SimulateOptions`]
//! and a [`SimulateProgress`] implementation, then runs one or more seeded
//! simulations in parallel.
//!
//! # Example
//!
//! ```no_run
//! use zulu_cow_util::{SilentProgress, SimulateOptions, Simulation};
//!
//! let simulation = Simulation::new(SimulateOptions::default(), SilentProgress);
//! let reports = simulation.run(4).expect("simulation failed");
//!
//! for report in reports {
//!     println!("seed {}: {}", report.seed, report.stats);
//! }
//! ```
//!
//! # Custom progress reporting
//!
//! You can implement the [`SimulateProgress`] trait to receive per-operation
//! updates during a simulation.

pub mod progress;
pub mod simulate;

pub use self::progress::{SilentProgress, SimulateProgress};
pub use self::simulate::{OpKind, SimulateError, SimulateOptions, SimulateReport, Simulation};

#[cfg(feature = "cli")]
pub use self::progress::ConsoleProgress;

use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

/// Errors that can occur when reading a patch file from disk.
#[derive(Debug, Snafu)]
pub enum ReadPatchError {
    #[snafu(display("failed to read patch '{}'", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("patch '{}' is empty", path.display()))]
    EmptyPatch { path: PathBuf },
}

/// A write to apply to a store: the contents of a file at an offset.
#[derive(Debug, Clone)]
pub struct Patch {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Patch {
    /// Reads the patch contents from `path`.
    pub fn from_file(offset: u64, path: &Path) -> Result<Self, ReadPatchError> {
        let data = std::fs::read(path).context(ReadFileSnafu { path })?;

        snafu::ensure!(!data.is_empty(), EmptyPatchSnafu { path });

        Ok(Self { offset, data })
    }
}

/// Parses a byte count or offset, accepting a `0x` prefix for hexadecimal.
pub fn parse_size(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_decimal_and_hex() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("0x1000").unwrap(), 4096);
        assert_eq!(parse_size("0X10").unwrap(), 16);
        assert!(parse_size("0xZZ").is_err());
        assert!(parse_size("-1").is_err());
    }

    #[test]
    fn empty_patch_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();

        assert!(matches!(
            Patch::from_file(0, file.path()),
            Err(ReadPatchError::EmptyPatch { .. })
        ));
    }

    #[test]
    fn patch_keeps_offset_and_contents() {
        let file = tempfile::NamedTempFile::new().unwrap();

        std::fs::write(file.path(), b"abc").unwrap();

        let patch = Patch::from_file(0x200, file.path()).unwrap();

        assert_eq!(patch.offset, 0x200);
        assert_eq!(patch.data, b"abc");
    }
}
