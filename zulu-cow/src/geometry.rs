use snafu::{OptionExt, Snafu, ensure};

/// Errors when deriving a [`Geometry`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum GeometryError {
    #[snafu(display("block size must not be zero"))]
    ZeroBlockSize,

    #[snafu(display("bitmap capacity must not be zero"))]
    ZeroBitmapCapacity,

    #[snafu(display("image of {image_len} bytes overflows group arithmetic"))]
    Overflow { image_len: u64 },
}

/// Group layout of an image.
///
/// The image is split into sectors of `block_size` bytes, and sectors are
/// gathered into groups so that every group gets exactly one bit in a bitmap
/// of at most `bitmap_capacity` bytes. Larger images therefore get larger
/// groups.
///
/// The last group may be shorter than [`group_size_bytes()`](Self::group_size_bytes);
/// every range returned by this type is clamped to [`image_len()`](Self::image_len).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    image_len: u64,
    block_size: u32,
    group_size_sectors: u64,
    group_size_bytes: u64,
    group_count: u64,
}

impl Geometry {
    /// Derives the group layout for an image of `image_len` bytes.
    ///
    /// A trailing partial sector counts as a whole sector, so every byte of
    /// the image belongs to some group.
    pub fn new(
        image_len: u64,
        block_size: u32,
        bitmap_capacity: usize,
    ) -> Result<Self, GeometryError> {
        ensure!(block_size != 0, ZeroBlockSizeSnafu);
        ensure!(bitmap_capacity != 0, ZeroBitmapCapacitySnafu);

        let total_sectors = image_len.div_ceil(block_size as u64);
        let max_groups = (bitmap_capacity as u64)
            .checked_mul(8)
            .context(OverflowSnafu { image_len })?;
        let group_size_sectors = total_sectors.div_ceil(max_groups).max(1);
        let group_size_bytes = group_size_sectors
            .checked_mul(block_size as u64)
            .context(OverflowSnafu { image_len })?;
        let group_count = total_sectors.div_ceil(group_size_sectors);

        debug_assert!(group_count <= max_groups);
        debug_assert!(group_count * group_size_bytes >= image_len);

        Ok(Self {
            image_len,
            block_size,
            group_size_sectors,
            group_size_bytes,
            group_count,
        })
    }

    #[must_use]
    pub fn image_len(&self) -> u64 {
        self.image_len
    }

    /// Returns the sector size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn group_size_sectors(&self) -> u64 {
        self.group_size_sectors
    }

    #[must_use]
    pub fn group_size_bytes(&self) -> u64 {
        self.group_size_bytes
    }

    #[must_use]
    pub fn group_count(&self) -> u64 {
        self.group_count
    }

    /// Returns the number of bitmap bytes needed to track every group.
    #[must_use]
    pub fn bitmap_len(&self) -> usize {
        self.group_count.div_ceil(8) as usize
    }

    /// Returns the group holding the byte at `offset`.
    #[must_use]
    pub fn group_of(&self, offset: u64) -> u64 {
        offset / self.group_size_bytes
    }

    /// Returns the group holding sector `lba`.
    #[must_use]
    pub fn group_of_sector(&self, lba: u64) -> u64 {
        lba / self.group_size_sectors
    }

    /// Returns the first byte of `group`.
    #[must_use]
    pub fn group_start(&self, group: u64) -> u64 {
        group * self.group_size_bytes
    }

    /// Returns one past the last byte of `group`, clamped to the image length.
    #[must_use]
    pub fn group_end(&self, group: u64) -> u64 {
        ((group + 1) * self.group_size_bytes).min(self.image_len)
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Image size          {} bytes", self.image_len)?;
        writeln!(f, "Bitmap size         {} bytes", self.bitmap_len())?;
        writeln!(f, "Group size          {} sectors", self.group_size_sectors)?;
        writeln!(f, "Group count         {} groups", self.group_count)?;
        write!(f, "Block size          {} bytes", self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_mib_image_gets_two_sector_groups() {
        let geometry = Geometry::new(8 * 1024 * 1024, 512, 1024).unwrap();

        assert_eq!(geometry.group_size_sectors(), 2);
        assert_eq!(geometry.group_size_bytes(), 1024);
        assert_eq!(geometry.group_count(), 8192);
        assert_eq!(geometry.bitmap_len(), 1024);
        assert_eq!(geometry.group_of_sector(5), 2);
        assert_eq!(geometry.group_start(2), 2048);
        assert_eq!(geometry.group_end(2), 3072);
    }

    #[test]
    fn small_image_uses_single_sector_groups_and_a_smaller_bitmap() {
        let geometry = Geometry::new(40 * 512, 512, 1024).unwrap();

        assert_eq!(geometry.group_size_sectors(), 1);
        assert_eq!(geometry.group_count(), 40);
        assert_eq!(geometry.bitmap_len(), 5);
    }

    #[test]
    fn uneven_sector_count_leaves_a_short_last_group() {
        // Three sectors past 81920 push the group size from 10 to 11 sectors.
        let geometry = Geometry::new(81920 * 512 + 512 * 3, 512, 1024).unwrap();

        assert_eq!(geometry.group_size_sectors(), 11);
        assert_eq!(geometry.group_count(), 7448);

        let last = geometry.group_count() - 1;

        assert_eq!(geometry.group_end(last), geometry.image_len());
        assert!(geometry.group_end(last) - geometry.group_start(last) < 11 * 512);
    }

    #[test]
    fn trailing_partial_sector_is_covered() {
        let geometry = Geometry::new(1000, 512, 1).unwrap();

        assert_eq!(geometry.group_count(), 2);
        assert_eq!(geometry.group_of(999), 1);
        assert_eq!(geometry.group_end(1), 1000);
    }

    #[test]
    fn group_count_never_exceeds_bitmap_capacity() {
        for len in [0u64, 1, 511, 512, 513, 4 << 20, (8 << 20) + 1, 1 << 34] {
            let geometry = Geometry::new(len, 512, 1024).unwrap();

            assert!(geometry.group_count() <= 8192, "len {len}");
            assert!(geometry.bitmap_len() <= 1024, "len {len}");
            assert!(geometry.group_count() * geometry.group_size_bytes() >= len);
        }
    }

    #[test]
    fn empty_image_has_no_groups() {
        let geometry = Geometry::new(0, 512, 1024).unwrap();

        assert_eq!(geometry.group_count(), 0);
        assert_eq!(geometry.bitmap_len(), 0);
    }

    #[test]
    fn zero_parameters_are_rejected() {
        assert!(matches!(
            Geometry::new(4096, 0, 1024),
            Err(GeometryError::ZeroBlockSize)
        ));
        assert!(matches!(
            Geometry::new(4096, 512, 0),
            Err(GeometryError::ZeroBitmapCapacity)
        ));
    }
}
