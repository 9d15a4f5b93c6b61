//! An implicit free list allocator with boundary tags over a growable heap.

#![no_std]
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]
#![allow(unstable_name_collisions)]

/// The global allocator facade
mod global;
/// The heap and its operations
mod heap;
/// The growth primitive the heap draws memory from
mod source;
/// Boundary tag words
mod tag;

pub use global::{Allocator, Locked};
pub use heap::{AllocateError, TagHeap};
#[cfg(feature = "sbrk")]
pub use source::SbrkSource;
pub use source::{ArenaSource, HeapSource};
