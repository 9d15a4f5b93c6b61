use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Size of a header or footer word in bytes.
pub(crate) const WORD: usize = 4;

/// Double word size in bytes, the alignment unit of the heap.
pub(crate) const DOUBLE: usize = 8;

/// Smallest representable block: header, footer and one aligned payload slot.
pub(crate) const MIN_BLOCK: usize = 16;

/// Number of bytes the heap grows by when a fit cannot be found.
pub(crate) const CHUNK: usize = 1 << 12;

const_assert_eq!(MIN_BLOCK, 2 * DOUBLE);
const_assert_eq!(CHUNK % DOUBLE, 0);

bitflags! {
    /// A boundary tag, the word written both as the header and the footer of
    /// every block. The size is always a multiple of 8, so its 3 low bits are
    /// free to carry metadata; bit 0 marks the block allocated.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub(crate) struct BoundaryTag: u32 {
        /// The block this tag belongs to is allocated.
        const ALLOCATED = 0b1;
    }
}

impl BoundaryTag {
    /// Pack a block size and allocation status into one word.
    pub(crate) fn new(size: usize, allocated: bool) -> Self {
        debug_assert_eq!(size % DOUBLE, 0);
        debug_assert!(size <= u32::MAX as usize);
        let mut tag = Self::from_bits_retain(size as u32);
        tag.set(Self::ALLOCATED, allocated);
        tag
    }

    /// The recorded block size in bytes, header and footer included.
    pub(crate) fn size(self) -> usize {
        (self.bits() & !0b111) as usize
    }

    pub(crate) fn is_allocated(self) -> bool {
        self.contains(Self::ALLOCATED)
    }

    /// True for the zero-size allocated marker terminating the heap.
    pub(crate) fn is_epilogue(self) -> bool {
        self.size() == 0
    }
}

/// Rounds up to the nearest multiple of 8, the heap alignment.
pub(crate) fn round_up_double(value: usize) -> usize {
    (value + (DOUBLE - 1)) & !(DOUBLE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that packing and unpacking a tag preserves size and status
    #[test]
    fn pack_unpack() {
        let tag = BoundaryTag::new(24, true);
        assert_eq!(tag.size(), 24);
        assert!(tag.is_allocated());
        assert!(!tag.is_epilogue());

        let tag = BoundaryTag::new(4096, false);
        assert_eq!(tag.size(), 4096);
        assert!(!tag.is_allocated());
    }

    /// Test that the epilogue marker is a zero size with the allocated bit set
    #[test]
    fn epilogue_marker() {
        let tag = BoundaryTag::new(0, true);
        assert!(tag.is_epilogue());
        assert!(tag.is_allocated());
        assert_eq!(tag.bits(), 0b1);
    }

    /// Test that we always round up to the nearest 8
    #[test]
    fn round_to_double() {
        assert_eq!(8, round_up_double(7));
        assert_eq!(40, round_up_double(33));
        assert_eq!(32, round_up_double(32));
        assert_eq!(0, round_up_double(0));
    }
}
