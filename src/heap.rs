use core::{cmp, fmt, ptr};

use sptr::Strict;

use crate::source::HeapSource;
use crate::tag::{round_up_double, BoundaryTag, CHUNK, DOUBLE, MIN_BLOCK, WORD};

/// Errors surfaced by heap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocateError {
    /// The heap source could not grow the region any further.
    OutOfSpace,
    /// The pointer was not one handed out by this heap.
    InvalidPointer,
}

/// A block, identified by the byte offset of its payload from the heap base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block(usize);

/// An implicit free list allocator with boundary tags, after the design in
/// CS:APP (https://csapp.cs.cmu.edu/).
///
/// The heap is one contiguous region drawn from a [`HeapSource`], bounded
/// below by an 8-byte allocated prologue block and above by a zero-size
/// allocated epilogue header that moves to the new end on every extension.
/// Free blocks are found by walking the block chain through the size fields;
/// no separate free list is kept.
pub struct TagHeap<S: HeapSource> {
    source: S,
    base: *mut u8,
    limit: usize,
}

unsafe impl<S: HeapSource + Send> Send for TagHeap<S> {}

impl<S: HeapSource> TagHeap<S> {
    /// Creates a heap over `source` and primes it with one 4 KiB free block.
    ///
    /// Fails with [`AllocateError::OutOfSpace`] if the source cannot grant
    /// the sentinel words or the first extension.
    pub fn init(mut source: S) -> Result<Self, AllocateError> {
        // one padding word, prologue header and footer, epilogue header
        let base = source.grow(4 * WORD).ok_or(AllocateError::OutOfSpace)?;
        let mut heap = Self {
            source,
            base: base.as_ptr(),
            limit: 4 * WORD,
        };
        debug_assert_eq!(heap.base.addr() % DOUBLE, 0);
        heap.set_word(0, BoundaryTag::empty());
        heap.set_word(WORD, BoundaryTag::new(DOUBLE, true));
        heap.set_word(2 * WORD, BoundaryTag::new(DOUBLE, true));
        heap.set_word(3 * WORD, BoundaryTag::new(0, true));
        heap.extend(CHUNK / WORD)?;
        #[cfg(debug_assertions)]
        heap.check();
        Ok(heap)
    }

    /// Hands out at least `size` bytes of 8-byte aligned payload, or null for
    /// a zero `size`. The heap is left untouched when the request cannot be
    /// satisfied.
    pub fn allocate(&mut self, size: usize) -> Result<*mut u8, AllocateError> {
        if size == 0 {
            return Ok(ptr::null_mut());
        }
        // block sizes must fit a 32-bit tag word
        if size > u32::MAX as usize - 2 * DOUBLE {
            return Err(AllocateError::OutOfSpace);
        }
        let adjusted = if size <= DOUBLE {
            MIN_BLOCK
        } else {
            round_up_double(size + DOUBLE)
        };

        let block = match self.find_fit(adjusted) {
            Some(block) => block,
            None => self.extend(cmp::max(adjusted, CHUNK) / WORD)?,
        };
        self.place(block, adjusted);
        #[cfg(debug_assertions)]
        self.check();
        Ok(self.payload_ptr(block))
    }

    /// Returns a block to the heap and merges it with any free neighbor.
    ///
    /// A null pointer is a no-op. A pointer that is misaligned or outside the
    /// heap is rejected; a stale pointer into the heap is not detected.
    pub fn release(&mut self, ptr: *mut u8) -> Result<(), AllocateError> {
        if ptr.is_null() {
            return Ok(());
        }
        let block = self.block_of(ptr)?;
        let size = self.size_of(block);
        self.write_block(block, size, false);
        self.coalesce(block);
        #[cfg(debug_assertions)]
        self.check();
        Ok(())
    }

    /// Resizes an allocation, preserving the payload up to the smaller of the
    /// old and new sizes.
    ///
    /// A null pointer behaves as [`allocate`](Self::allocate); a zero `size`
    /// behaves as [`release`](Self::release) and returns null. The block is
    /// always moved: a fresh block is allocated, the payload copied over and
    /// the old block released.
    pub fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Result<*mut u8, AllocateError> {
        if size == 0 {
            self.release(ptr)?;
            return Ok(ptr::null_mut());
        }
        if ptr.is_null() {
            return self.allocate(size);
        }
        let block = self.block_of(ptr)?;
        let old_payload = self.size_of(block) - DOUBLE;
        let new = self.allocate(size)?;
        unsafe {
            // distinct blocks, the old one stays allocated during the copy
            ptr::copy_nonoverlapping(ptr, new, cmp::min(old_payload, size));
        }
        self.release(ptr)?;
        Ok(new)
    }

    /// Grows the heap by `words` words, rounded up to keep 8-byte alignment,
    /// and installs the grant as one free block followed by a new epilogue.
    fn extend(&mut self, words: usize) -> Result<Block, AllocateError> {
        let words = (words + 1) & !1;
        let bytes = words * WORD;
        let span = self.source.grow(bytes).ok_or(AllocateError::OutOfSpace)?;
        debug_assert_eq!(span.as_ptr().addr(), self.base.addr() + self.limit);

        // the grant begins right after the old epilogue header, so that word
        // becomes the new block's header and the epilogue moves to the end
        let block = Block(self.limit);
        self.limit += bytes;
        self.write_block(block, bytes, false);
        self.set_word(self.limit - WORD, BoundaryTag::new(0, true));
        Ok(self.coalesce(block))
    }

    /// Merges `block` with whichever physical neighbors are free and returns
    /// the start of the merged block. Touches only the two adjacent tags.
    fn coalesce(&mut self, block: Block) -> Block {
        let prev_free = !self.word(block.0 - DOUBLE).is_allocated();
        let next_free = !self.header(self.next_block(block)).is_allocated();
        let size = self.size_of(block);

        match (prev_free, next_free) {
            (false, false) => block,
            (false, true) => {
                let next = self.next_block(block);
                self.write_block(block, size + self.size_of(next), false);
                block
            }
            (true, false) => {
                let prev = self.prev_block(block);
                self.write_block(prev, self.size_of(prev) + size, false);
                prev
            }
            (true, true) => {
                let prev = self.prev_block(block);
                let next = self.next_block(block);
                let combined = self.size_of(prev) + size + self.size_of(next);
                self.write_block(prev, combined, false);
                prev
            }
        }
    }

    /// First-fit scan of the block chain, terminated by the epilogue.
    fn find_fit(&self, size: usize) -> Option<Block> {
        let mut block = Block(DOUBLE);
        loop {
            let header = self.header(block);
            if header.is_epilogue() {
                return None;
            }
            if !header.is_allocated() && header.size() >= size {
                return Some(block);
            }
            block = self.next_block(block);
        }
    }

    /// Marks `size` bytes of a free block allocated, splitting off the
    /// remainder as a new free block when it can hold a block of its own.
    fn place(&mut self, block: Block, size: usize) {
        let whole = self.size_of(block);
        if whole - size >= MIN_BLOCK {
            self.write_block(block, size, true);
            self.write_block(Block(block.0 + size), whole - size, false);
        } else {
            self.write_block(block, whole, true);
        }
    }

    /// Maps a payload pointer back to its block, rejecting pointers this heap
    /// cannot have handed out.
    fn block_of(&self, ptr: *mut u8) -> Result<Block, AllocateError> {
        let offset = ptr.addr().wrapping_sub(self.base.addr());
        if offset % DOUBLE != 0 || offset < 2 * DOUBLE || offset >= self.limit {
            return Err(AllocateError::InvalidPointer);
        }
        Ok(Block(offset))
    }

    fn payload_ptr(&self, block: Block) -> *mut u8 {
        unsafe { self.base.add(block.0) }
    }

    fn word(&self, at: usize) -> BoundaryTag {
        debug_assert!(at % WORD == 0 && at + WORD <= self.limit);
        unsafe { BoundaryTag::from_bits_retain(self.base.add(at).cast::<u32>().read_volatile()) }
    }

    fn set_word(&mut self, at: usize, tag: BoundaryTag) {
        debug_assert!(at % WORD == 0 && at + WORD <= self.limit);
        unsafe { self.base.add(at).cast::<u32>().write_volatile(tag.bits()) }
    }

    fn header(&self, block: Block) -> BoundaryTag {
        self.word(block.0 - WORD)
    }

    #[cfg(any(debug_assertions, test))]
    fn footer(&self, block: Block) -> BoundaryTag {
        self.word(block.0 + self.size_of(block) - DOUBLE)
    }

    fn size_of(&self, block: Block) -> usize {
        self.header(block).size()
    }

    fn next_block(&self, block: Block) -> Block {
        Block(block.0 + self.size_of(block))
    }

    fn prev_block(&self, block: Block) -> Block {
        // the preceding block's footer sits right above our header
        Block(block.0 - self.word(block.0 - DOUBLE).size())
    }

    /// Writes the header and footer tags at the extremities of a block.
    fn write_block(&mut self, block: Block, size: usize, allocated: bool) {
        let tag = BoundaryTag::new(size, allocated);
        self.set_word(block.0 - WORD, tag);
        self.set_word(block.0 + size - DOUBLE, tag);
    }

    /// Walks the whole heap and asserts its structural invariants: sentinel
    /// blocks in place, sizes aligned, tags agreeing on free blocks, no two
    /// adjacent free blocks, and the chain partitioning the region exactly.
    #[cfg(any(debug_assertions, test))]
    fn check(&self) {
        let prologue = Block(DOUBLE);
        assert_eq!(self.header(prologue), BoundaryTag::new(DOUBLE, true));
        assert_eq!(self.footer(prologue), BoundaryTag::new(DOUBLE, true));

        let mut block = self.next_block(prologue);
        let mut prev_free = false;
        loop {
            let header = self.header(block);
            if header.is_epilogue() {
                assert!(header.is_allocated());
                assert_eq!(block.0, self.limit);
                break;
            }
            let size = header.size();
            assert!(size >= MIN_BLOCK);
            assert_eq!(size % DOUBLE, 0);
            if !header.is_allocated() {
                assert!(!prev_free);
                assert_eq!(self.footer(block), header);
            }
            prev_free = !header.is_allocated();
            block = self.next_block(block);
        }
    }
}

impl<S: HeapSource> fmt::Debug for TagHeap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[derive(Debug)]
        struct Entry {
            at: usize,
            size: usize,
            allocated: bool,
        }

        let mut list = f.debug_list();
        let mut block = Block(DOUBLE);
        loop {
            let header = self.header(block);
            list.entry(&Entry {
                at: block.0,
                size: header.size(),
                allocated: header.is_allocated(),
            });
            if header.is_epilogue() {
                break;
            }
            block = self.next_block(block);
        }
        list.finish()
    }
}
