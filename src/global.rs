use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::heap::TagHeap;
use crate::source::HeapSource;
use crate::tag::DOUBLE;

/// Allows putting a type behind a spin mutex.
#[derive(Debug)]
pub struct Locked<T> {
    inner: spin::Mutex<T>,
}

impl<T> Locked<T> {
    /// Wraps a value in a new mutex.
    pub const fn new(inner: T) -> Self {
        Self {
            inner: spin::Mutex::new(inner),
        }
    }

    /// Locks the mutex and hands out the interior.
    pub fn lock(&self) -> spin::MutexGuard<T> {
        self.inner.lock()
    }
}

/// A heap usable as the global allocator, one caller at a time.
pub type Allocator<S> = Locked<TagHeap<S>>;

unsafe impl<S: HeapSource> GlobalAlloc for Locked<TagHeap<S>> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // blocks are only ever 8-byte aligned
        if layout.align() > DOUBLE {
            return ptr::null_mut();
        }
        self.lock()
            .allocate(layout.size())
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if self.lock().release(ptr).is_err() {
            panic!("invalid pointer");
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > DOUBLE {
            return ptr::null_mut();
        }
        self.lock()
            .reallocate(ptr, new_size)
            .unwrap_or(ptr::null_mut())
    }
}
