use crate::bitmap::{DirtyBitmap, GroupState};
use crate::geometry::{Geometry, GeometryError};
use crate::image::BlockFile;
use crate::stats::Stats;
use snafu::{ResultExt, Snafu, ensure};
use std::cmp::min;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace};

/// Tunables for a [`BackingStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    bitmap_capacity: usize,
    scratch_size: usize,
    block_size: u32,
}

impl StoreConfig {
    pub const DEFAULT_BITMAP_CAPACITY: usize = 1024;
    pub const DEFAULT_SCRATCH_SIZE: usize = 2048;
    pub const DEFAULT_BLOCK_SIZE: u32 = 512;

    /// Sets the upper bound on bitmap memory, in bytes.
    #[must_use]
    pub fn with_bitmap_capacity(mut self, bytes: usize) -> Self {
        self.bitmap_capacity = bytes;
        self
    }

    /// Sets the size of the buffer used to copy groups into the overlay.
    #[must_use]
    pub fn with_scratch_size(mut self, bytes: usize) -> Self {
        self.scratch_size = bytes;
        self
    }

    /// Sets the sector size, in bytes.
    #[must_use]
    pub fn with_block_size(mut self, bytes: u32) -> Self {
        self.block_size = bytes;
        self
    }

    #[must_use]
    pub fn bitmap_capacity(&self) -> usize {
        self.bitmap_capacity
    }

    #[must_use]
    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bitmap_capacity: Self::DEFAULT_BITMAP_CAPACITY,
            scratch_size: Self::DEFAULT_SCRATCH_SIZE,
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Errors for [`BackingStore::new()`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum OpenError {
    #[snafu(display("cannot get length of original image"))]
    OriginalLen { source: io::Error },

    #[snafu(display("scratch buffer size must not be zero"))]
    InvalidScratchSize,

    #[snafu(display("invalid geometry"))]
    InvalidGeometry { source: GeometryError },

    #[snafu(display("cannot resize overlay to {len} bytes"))]
    ResizeOverlay { len: u64, source: io::Error },

    #[snafu(display("cannot get length of overlay"))]
    OverlayLen { source: io::Error },

    #[snafu(display("overlay is {actual} bytes after resizing, expected {expected}"))]
    OverlaySizeMismatch { expected: u64, actual: u64 },
}

/// Errors for [`BackingStore::read_at()`] and [`BackingStore::read()`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ReadError {
    #[snafu(display("cannot read original at offset {offset}"))]
    ReadOriginal { offset: u64, source: io::Error },

    #[snafu(display("cannot read overlay at offset {offset}"))]
    ReadOverlay { offset: u64, source: io::Error },
}

/// Errors for [`BackingStore::write_at()`] and [`BackingStore::write()`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum WriteError {
    #[snafu(display("cannot write overlay at offset {offset}"))]
    WriteOverlay { offset: u64, source: io::Error },

    #[snafu(display("cannot promote group #{group}"))]
    Promote { group: u64, source: PromoteError },
}

/// Errors when copying a group from the original into the overlay.
///
/// A failed promotion never marks its group dirty.
#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum PromoteError {
    #[snafu(display("cannot read original at offset {offset}"))]
    ReadOriginal { offset: u64, source: io::Error },

    #[snafu(display("cannot write overlay at offset {offset}"))]
    WriteOverlay { offset: u64, source: io::Error },

    #[snafu(display("short read at offset {offset}: {actual} of {expected} bytes"))]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("short write at offset {offset}: {actual} of {expected} bytes"))]
    ShortWrite {
        offset: u64,
        expected: usize,
        actual: usize,
    },
}

/// Errors for [`BackingStore::export()`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ExportError {
    #[snafu(display("cannot read group #{group}"))]
    ReadGroup { group: u64, source: io::Error },

    #[snafu(display("cannot write to sink"))]
    Sink { source: io::Error },
}

/// A copy-on-write view over a read-only original image.
///
/// All writes land in `overlay`, which mirrors the original's layout byte for
/// byte. A bitmap records which groups the overlay holds; reads are served
/// from whichever file is authoritative for each group. The first write into
/// a clean group copies the bytes of that group it does not cover, so the
/// overlay holds the complete group from then on.
///
/// The bitmap lives only in memory and starts clean, so reopening a store
/// over an existing overlay discards its contents.
///
/// # Example
///
/// ```
/// use zulu_cow::image::MemFile;
/// use zulu_cow::{BackingStore, StoreConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let original = MemFile::from_vec(vec![0xAA; 4096]);
/// let mut store = BackingStore::new(original, MemFile::default(), StoreConfig::default())?;
///
/// store.write_at(100, b"hello")?;
///
/// let mut buf = [0u8; 8];
/// store.read_at(98, &mut buf)?;
/// assert_eq!(&buf, b"\xAA\xAAhello\xAA");
///
/// // The original is untouched.
/// assert!(store.original().as_slice().iter().all(|&b| b == 0xAA));
/// # Ok(())
/// # }
/// ```
pub struct BackingStore<O: BlockFile, D: BlockFile> {
    original: O,
    overlay: D,
    geometry: Geometry,
    bitmap: DirtyBitmap,
    /// Only ever used to stream between the two files.
    scratch: Vec<u8>,
    position: u64,
    stats: Stats,
}

impl<O: BlockFile, D: BlockFile> std::fmt::Debug for BackingStore<O, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStore")
            .field("geometry", &self.geometry)
            .field("bitmap", &self.bitmap)
            .field("scratch_size", &self.scratch.len())
            .field("position", &self.position)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<O: BlockFile, D: BlockFile> BackingStore<O, D> {
    /// Creates a store over `original`, sizing `overlay` to match it.
    ///
    /// The overlay's previous contents are irrelevant: every group starts
    /// clean.
    ///
    /// # Errors
    ///
    /// Returns an [`OpenError`] if the tunables are invalid or the overlay
    /// cannot be sized to exactly the original's length.
    pub fn new(original: O, mut overlay: D, config: StoreConfig) -> Result<Self, OpenError> {
        let image_len = original.len().context(OriginalLenSnafu)?;

        ensure!(config.scratch_size > 0, InvalidScratchSizeSnafu);

        let geometry = Geometry::new(image_len, config.block_size, config.bitmap_capacity)
            .context(InvalidGeometrySnafu)?;

        overlay
            .set_len(image_len)
            .context(ResizeOverlaySnafu { len: image_len })?;

        let actual = overlay.len().context(OverlayLenSnafu)?;

        ensure!(
            actual == image_len,
            OverlaySizeMismatchSnafu {
                expected: image_len,
                actual
            }
        );

        debug!(
            image_len,
            bitmap_len = geometry.bitmap_len(),
            group_size_sectors = geometry.group_size_sectors(),
            group_count = geometry.group_count(),
            block_size = geometry.block_size(),
            scratch_size = config.scratch_size,
            "opened copy-on-write store"
        );

        Ok(Self {
            original,
            overlay,
            bitmap: DirtyBitmap::new(geometry.group_count()),
            geometry,
            scratch: vec![0; config.scratch_size],
            position: 0,
            stats: Stats::default(),
        })
    }

    /// Returns the logical image length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.geometry.image_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn bitmap(&self) -> &DirtyBitmap {
        &self.bitmap
    }

    /// Returns a snapshot of the I/O counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    /// Returns the cursor used by [`read()`](Self::read) and [`write()`](Self::write).
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves the cursor, clamping it to the image length.
    pub fn set_position(&mut self, position: u64) {
        self.position = position.min(self.len());
    }

    /// Returns the state of `group`.
    ///
    /// # Panics
    ///
    /// Panics if `group` is not below [`Geometry::group_count()`].
    #[must_use]
    pub fn group_state(&self, group: u64) -> GroupState {
        self.bitmap.get(group)
    }

    /// Returns the state of the group holding sector `lba`.
    ///
    /// # Panics
    ///
    /// Panics if `lba` is past the last sector of the image.
    #[must_use]
    pub fn sector_state(&self, lba: u64) -> GroupState {
        self.bitmap.get(self.geometry.group_of_sector(lba))
    }

    /// Iterates over the groups held by the overlay.
    pub fn dirty_groups(&self) -> impl Iterator<Item = u64> + '_ {
        self.bitmap.iter_dirty()
    }

    pub fn original(&self) -> &O {
        &self.original
    }

    /// Returns the overlay file.
    ///
    /// Bytes of clean groups in the overlay are stale and must not be
    /// interpreted.
    pub fn overlay(&self) -> &D {
        &self.overlay
    }

    /// Flushes the overlay.
    pub fn flush(&mut self) -> io::Result<()> {
        self.overlay.flush()
    }

    /// Consumes the store and returns the original and overlay files.
    pub fn into_parts(self) -> (O, D) {
        (self.original, self.overlay)
    }

    /// Reads at the cursor and advances it by the number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        let n = self.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Writes at the cursor and advances it by the number of bytes written.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        let n = self.write_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Reads the logical image at `offset` into `buf`.
    ///
    /// Consecutive groups sharing a state are fetched with a single read from
    /// the file that holds them. Returns the number of bytes read, which is
    /// short when the range runs past the end of the image or an underlying
    /// read comes back short. Short reads are not retried.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReadError> {
        self.stats.requested_read += buf.len() as u64;

        let image_len = self.len();

        if buf.is_empty() || offset >= image_len {
            return Ok(0);
        }

        let to = offset.saturating_add(buf.len() as u64).min(image_len);
        let buf = &mut buf[..(to - offset) as usize];
        let mut done = 0;

        while done < buf.len() {
            let pos = offset + done as u64;
            let (state, run_end) = self.run_at(pos, to);
            let chunk = &mut buf[done..(run_end - offset) as usize];

            let n = match state {
                GroupState::Dirty => {
                    let n = self
                        .overlay
                        .read_at(pos, chunk)
                        .context(ReadOverlaySnafu { offset: pos })?;
                    self.stats.overlay_read += n as u64;
                    n
                }
                GroupState::Clean => {
                    let n = self
                        .original
                        .read_at(pos, chunk)
                        .context(ReadOriginalSnafu { offset: pos })?;
                    self.stats.original_read += n as u64;
                    n
                }
            };

            trace!(pos, len = chunk.len(), read = n, ?state, "read run");

            let wanted = chunk.len();

            done += n;

            if n < wanted {
                break;
            }
        }

        Ok(done)
    }

    /// Writes `buf` into the logical image at `offset`.
    ///
    /// Data always lands in the overlay. When the range starts or ends inside
    /// a clean group, the untouched part of that group is copied from the
    /// original first, then every group the write touched is marked dirty.
    ///
    /// Returns the number of bytes written. Bytes past the end of the image
    /// are dropped. `Ok(0)` from the overlay leaves every group as it was.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize, WriteError> {
        self.stats.requested_write += buf.len() as u64;

        let image_len = self.len();

        if buf.is_empty() || offset >= image_len {
            return Ok(0);
        }

        let from = offset;
        let to = from.saturating_add(buf.len() as u64).min(image_len);
        let buf = &buf[..(to - from) as usize];

        let first = self.geometry.group_of(from);
        let first_start = self.geometry.group_start(first);

        if from != first_start && self.bitmap.get(first) == GroupState::Clean {
            self.copy_range(first_start, from)
                .context(PromoteSnafu { group: first })?;
        }

        let n = self
            .overlay
            .write_at(from, buf)
            .context(WriteOverlaySnafu { offset: from })?;

        self.stats.overlay_write += n as u64;

        if n == 0 {
            return Ok(0);
        }

        // A short write only covers [from, from + n).
        let to = from + n as u64;
        let last = self.geometry.group_of(to - 1);
        let last_end = self.geometry.group_end(last);

        if to != last_end && self.bitmap.get(last) == GroupState::Clean {
            self.copy_range(to, last_end)
                .context(PromoteSnafu { group: last })?;
        }

        for group in first..=last {
            self.bitmap.set(group, GroupState::Dirty);
        }

        trace!(from, to, first, last, "write");

        Ok(n)
    }

    /// Copies the whole of `group` into the overlay and marks it dirty.
    ///
    /// Returns `false` without touching either file if the group is already
    /// dirty.
    ///
    /// # Panics
    ///
    /// Panics if `group` is not below [`Geometry::group_count()`].
    pub fn promote_group(&mut self, group: u64) -> Result<bool, PromoteError> {
        if self.bitmap.get(group).is_dirty() {
            return Ok(false);
        }

        let start = self.geometry.group_start(group);
        let end = self.geometry.group_end(group);

        self.copy_range(start, end)?;
        self.bitmap.set(group, GroupState::Dirty);

        Ok(true)
    }

    /// Streams the logical image into `sink`, resolving each group through
    /// the bitmap.
    ///
    /// Statistics and the cursor are left alone. Returns the number of bytes
    /// written to `sink`, which is always the image length.
    pub fn export<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64, ExportError> {
        for group in 0..self.geometry.group_count() {
            let state = self.bitmap.get(group);
            let end = self.geometry.group_end(group);
            let mut pos = self.geometry.group_start(group);

            while pos < end {
                let len = min(self.scratch.len() as u64, end - pos) as usize;
                let chunk = &mut self.scratch[..len];

                let read = match state {
                    GroupState::Dirty => self.overlay.read_exact_at(pos, chunk),
                    GroupState::Clean => self.original.read_exact_at(pos, chunk),
                };

                read.context(ReadGroupSnafu { group })?;

                sink.write_all(chunk).context(SinkSnafu)?;

                pos += len as u64;
            }
        }

        Ok(self.len())
    }

    /// Returns the whole logical image as a vector.
    ///
    /// See [`export()`](Self::export).
    pub fn recreate(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut image = Vec::with_capacity(self.len() as usize);

        self.export(&mut image)?;

        Ok(image)
    }

    /// Returns the state at `pos` and the end of the run of groups sharing it,
    /// clamped to `to`.
    fn run_at(&self, pos: u64, to: u64) -> (GroupState, u64) {
        let mut group = self.geometry.group_of(pos);
        let state = self.bitmap.get(group);
        let mut end = self.geometry.group_end(group);

        while end < to {
            group += 1;

            if self.bitmap.get(group) != state {
                break;
            }

            end = self.geometry.group_end(group);
        }

        (state, end.min(to))
    }

    /// Copies `[from, to)` from the original into the overlay.
    ///
    /// The range must lie within one group. Any short read or write fails the
    /// copy; the caller decides what to mark dirty.
    fn copy_range(&mut self, from: u64, to: u64) -> Result<(), PromoteError> {
        assert!(from < to, "empty promotion range {from}..{to}");
        assert_eq!(
            self.geometry.group_of(from),
            self.geometry.group_of(to - 1),
            "promotion range {from}..{to} spans more than one group"
        );

        trace!(from, to, group = self.geometry.group_of(from), "promote");

        let mut pos = from;

        while pos < to {
            let len = min(self.scratch.len() as u64, to - pos) as usize;
            let chunk = &mut self.scratch[..len];

            let n = self
                .original
                .read_at(pos, chunk)
                .context(promote_error::ReadOriginalSnafu { offset: pos })?;

            self.stats.copy_read += n as u64;

            ensure!(
                n == len,
                promote_error::ShortReadSnafu {
                    offset: pos,
                    expected: len,
                    actual: n
                }
            );

            let n = self
                .overlay
                .write_at(pos, chunk)
                .context(promote_error::WriteOverlaySnafu { offset: pos })?;

            ensure!(
                n == len,
                promote_error::ShortWriteSnafu {
                    offset: pos,
                    expected: len,
                    actual: n
                }
            );

            pos += len as u64;
        }

        Ok(())
    }
}

impl<O: BlockFile, D: BlockFile> Read for BackingStore<O, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BackingStore::read(self, buf).map_err(io::Error::other)
    }
}

impl<O: BlockFile, D: BlockFile> Write for BackingStore<O, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BackingStore::write(self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        BackingStore::flush(self)
    }
}

impl<O: BlockFile, D: BlockFile> Seek for BackingStore<O, D> {
    /// Moves the cursor. Positions past the end are clamped to the image
    /// length.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.len();

        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => len.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };

        let Some(new_pos) = new_pos else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            ));
        };

        self.set_position(new_pos);

        Ok(self.position)
    }
}
