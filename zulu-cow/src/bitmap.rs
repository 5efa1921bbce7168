/// Where the authoritative bytes of a group currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupState {
    /// Unmodified; served from the original image.
    Clean,
    /// Promoted or written; served from the overlay.
    Dirty,
}

impl GroupState {
    #[must_use]
    pub fn is_dirty(self) -> bool {
        self == GroupState::Dirty
    }
}

/// One bit per group, set when the group lives in the overlay.
///
/// The bitmap is sized for a fixed number of groups at construction. Every
/// accessor panics when given a group at or past [`len()`](Self::len); such an
/// index can only come from a geometry bug, never from caller input.
#[derive(Clone, PartialEq, Eq)]
pub struct DirtyBitmap {
    bytes: Vec<u8>,
    groups: u64,
}

impl std::fmt::Debug for DirtyBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyBitmap")
            .field("groups", &self.groups)
            .field("dirty", &self.count_dirty())
            .finish()
    }
}

impl DirtyBitmap {
    /// Creates an all-clean bitmap tracking `groups` groups.
    pub fn new(groups: u64) -> Self {
        Self {
            bytes: vec![0; groups.div_ceil(8) as usize],
            groups,
        }
    }

    /// Returns the number of groups tracked.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.groups
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups == 0
    }

    /// Returns the raw bitmap, bit `g % 8` of byte `g / 8` for group `g`.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the state of `group`.
    ///
    /// # Panics
    ///
    /// Panics if `group >= self.len()`.
    #[must_use]
    pub fn get(&self, group: u64) -> GroupState {
        self.check(group);

        if self.bytes[byte_index(group)] & bit_mask(group) != 0 {
            GroupState::Dirty
        } else {
            GroupState::Clean
        }
    }

    /// Sets the state of `group`.
    ///
    /// # Panics
    ///
    /// Panics if `group >= self.len()`.
    pub fn set(&mut self, group: u64, state: GroupState) {
        self.check(group);

        let byte = &mut self.bytes[byte_index(group)];

        match state {
            GroupState::Dirty => *byte |= bit_mask(group),
            GroupState::Clean => *byte &= !bit_mask(group),
        }
    }

    /// Returns the number of dirty groups.
    #[must_use]
    pub fn count_dirty(&self) -> u64 {
        self.bytes.iter().map(|b| b.count_ones() as u64).sum()
    }

    /// Iterates over the indices of dirty groups in ascending order.
    pub fn iter_dirty(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.groups).filter(|&g| self.get(g).is_dirty())
    }

    fn check(&self, group: u64) {
        assert!(
            group < self.groups,
            "group #{group} out of range (bitmap tracks {} groups)",
            self.groups
        );
    }
}

/// Byte of the bitmap holding `group`.
pub(crate) fn byte_index(group: u64) -> usize {
    (group / 8) as usize
}

/// Mask selecting `group` inside its byte.
pub(crate) fn bit_mask(group: u64) -> u8 {
    1 << (group % 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bitmap_is_clean_and_minimal() {
        let bitmap = DirtyBitmap::new(17);

        assert_eq!(bitmap.as_bytes().len(), 3);
        assert!((0..17).all(|g| bitmap.get(g) == GroupState::Clean));
        assert_eq!(bitmap.count_dirty(), 0);
    }

    #[test]
    fn set_flips_exactly_one_bit() {
        let mut bitmap = DirtyBitmap::new(16);

        bitmap.set(9, GroupState::Dirty);
        assert_eq!(bitmap.as_bytes(), &[0x00, 0x02]);

        bitmap.set(0, GroupState::Dirty);
        bitmap.set(7, GroupState::Dirty);
        assert_eq!(bitmap.as_bytes(), &[0x81, 0x02]);

        bitmap.set(7, GroupState::Clean);
        assert_eq!(bitmap.as_bytes(), &[0x01, 0x02]);
        assert_eq!(bitmap.iter_dirty().collect::<Vec<_>>(), vec![0, 9]);
    }

    #[test]
    fn setting_a_dirty_group_twice_is_stable() {
        let mut bitmap = DirtyBitmap::new(4);

        bitmap.set(2, GroupState::Dirty);
        bitmap.set(2, GroupState::Dirty);

        assert_eq!(bitmap.count_dirty(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn get_past_last_group_panics() {
        // The backing byte exists, but group 5 is not tracked.
        let bitmap = DirtyBitmap::new(5);
        let _ = bitmap.get(5);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_past_last_group_panics() {
        let mut bitmap = DirtyBitmap::new(8);
        bitmap.set(8, GroupState::Dirty);
    }
}
