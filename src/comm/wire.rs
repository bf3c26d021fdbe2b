//! Fixed, little-endian wire records for the exchange size phase.
//!
//! These are deliberately independent of [`crate::stream`] width policies:
//! size headers must be readable before any format negotiation, so their
//! layout is frozen and checked at compile time.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_from<T: Pod>(v: &[u8]) -> &[T] {
    bytemuck::cast_slice(v)
}

/// Byte count declared during the size phase.
///
/// All multi-byte integers are **little-endian** on the wire: stored pre-LE
/// with `.to_le()` and decoded with `.from_le()`.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireSize {
    n_le: u64,
}

impl WireSize {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// Element count carried inside serialized wave payload batches.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireSize>() == 8);
    assert!(align_of::<WireSize>() == 8);
    assert!(size_of::<WireCount>() == 4);
};

static_assertions::assert_impl_all!(WireSize: Pod, Send, Sync);
static_assertions::assert_impl_all!(WireCount: Pod, Send, Sync);
