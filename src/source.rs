use core::ptr::NonNull;

use sptr::Strict;

use crate::tag::DOUBLE;

/// The sbrk-like primitive the heap draws memory from.
///
/// The heap owns exactly one region and only ever asks for more of it, so a
/// source must hand out physically contiguous grants: each successful call
/// returns a span starting where the previous grant ended. The first grant
/// fixes the region's base address, which must be 8-byte aligned. There is no
/// shrink counterpart.
pub trait HeapSource {
    /// Extends the usable region by `bytes` and returns the start of the new
    /// span, or `None` if the region cannot grow any further. A failed call
    /// must leave the region untouched.
    fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>>;
}

/// A source carving grants out of one fixed caller-provided region.
///
/// This is the backing used by the tests and by embedders that reserve a
/// static buffer up front; growth fails once the region is used up.
pub struct ArenaSource {
    base: *mut u8,
    capacity: usize,
    brk: usize,
}

impl ArenaSource {
    /// Creates a source over the `capacity` bytes starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `capacity` bytes for the
    /// whole lifetime of the source and everything allocated from it, must be
    /// 8-byte aligned, and must not be touched by anyone else meanwhile.
    /// This is not checked so it is on you to get it right.
    pub unsafe fn new(base: *mut u8, capacity: usize) -> Self {
        debug_assert!(!base.is_null());
        debug_assert_eq!(base.addr() % DOUBLE, 0);
        Self {
            base,
            capacity,
            brk: 0,
        }
    }
}

impl HeapSource for ArenaSource {
    fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let new_brk = self.brk.checked_add(bytes)?;
        if new_brk > self.capacity {
            return None;
        }
        // in-bounds of the region the caller vouched for
        let span = unsafe { self.base.add(self.brk) };
        self.brk = new_brk;
        NonNull::new(span)
    }
}

/// A source growing the process data segment through `sbrk(2)`.
///
/// POSIX only. The program break moves in one direction here; releasing
/// memory back to the kernel is out of scope.
#[cfg(feature = "sbrk")]
pub struct SbrkSource;

#[cfg(feature = "sbrk")]
impl HeapSource for SbrkSource {
    fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let increment = libc::intptr_t::try_from(bytes).ok()?;
        let address = unsafe { libc::sbrk(increment) };
        if address == usize::MAX as *mut libc::c_void {
            return None;
        }
        NonNull::new(address.cast())
    }
}
