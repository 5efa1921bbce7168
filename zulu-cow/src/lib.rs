//! A copy-on-write overlay for fixed-size block images.
//!
//! This crate lets a read-only image be used as if it were writable: every
//! write is redirected into a sparse overlay file that mirrors the original's
//! layout, and reads transparently stitch together bytes from both files.
//! The original is never modified.
//!
//! # Features
//!
//! - Fixed, caller-chosen bitmap memory regardless of image size: the group
//!   size grows with the image instead of the bitmap
//! - Byte-exact results for unaligned and group-spanning reads and writes
//! - One underlying read per run of groups sharing a source
//! - Read/write amplification counters ([`Stats`])
//! - [`std::io::Read`], [`Write`](std::io::Write) and [`Seek`](std::io::Seek)
//!   on top of a cursor
//!
//! # Example
//!
//! ```no_run
//! use std::io::{Read, Seek, SeekFrom, Write};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = zulu_cow::open("base.img", "overlay.img", Default::default())?;
//!
//! store.seek(SeekFrom::Start(4096))?;
//! store.write_all(b"patched")?;
//!
//! let mut sector = [0u8; 512];
//! store.seek(SeekFrom::Start(4096))?;
//! store.read_exact(&mut sector)?;
//!
//! println!("{}", store.stats());
//! # Ok(())
//! # }
//! ```

use self::image::{OpenMode, StdFile};
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

pub use self::bitmap::{DirtyBitmap, GroupState};
pub use self::geometry::{Geometry, GeometryError};
pub use self::stats::Stats;
pub use self::store::{
    BackingStore, ExportError, OpenError, PromoteError, ReadError, StoreConfig, WriteError,
};

pub mod bitmap;
pub mod geometry;
pub mod image;
pub mod stats;
pub mod store;

/// Errors for [`open()`].
#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum OpenPathsError {
    #[snafu(display("cannot open original image '{}'", path.display()))]
    OpenOriginal {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("cannot open overlay '{}'", path.display()))]
    OpenOverlay {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(transparent)]
    Open { source: OpenError },
}

/// Opens a store over two files on disk.
///
/// `original` is opened read-only. `overlay` is created if missing and
/// resized to the original's length; any data it held is disregarded.
///
/// # Errors
///
/// Returns an [`OpenPathsError`] if either file cannot be opened or the
/// overlay cannot be sized.
pub fn open(
    original: impl AsRef<Path>,
    overlay: impl AsRef<Path>,
    config: StoreConfig,
) -> Result<BackingStore<StdFile, StdFile>, OpenPathsError> {
    let original = original.as_ref();
    let overlay = overlay.as_ref();

    let original_file = StdFile::open(original, OpenMode::ReadOnly)
        .context(open_paths_error::OpenOriginalSnafu { path: original })?;
    let overlay_file = StdFile::open(overlay, OpenMode::ReadWriteCreate)
        .context(open_paths_error::OpenOverlaySnafu { path: overlay })?;

    Ok(BackingStore::new(original_file, overlay_file, config)?)
}
