//! Typed message tags and the injectable tag-allocation policy.
//!
//! Concurrent unrelated exchanges must not cross-talk: each logical exchange
//! epoch gets its own tag pair. Rather than hard-coding a derivation scheme,
//! allocation is a policy object; the default hands out sequential epochs
//! from a per-process counter.

use std::sync::atomic::{AtomicU16, Ordering};

/// A message tag; wraps the transport-level 16-bit tag space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        CommTag(v)
    }

    /// Raw transport tag.
    #[inline]
    pub fn base(self) -> u16 {
        self.0
    }

    /// A tag displaced by `n`; used to derive the members of a tag family.
    #[inline]
    pub fn offset(self, n: u16) -> CommTag {
        CommTag(self.0.wrapping_add(n))
    }
}

/// The tag pair one buffered exchange consumes: one for the size headers,
/// one for the data phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Policy for allocating collision-free exchange epochs.
pub trait TagAllocator: Send + Sync {
    /// Hand out the tag pair for the next exchange epoch.
    fn next_epoch(&self) -> ExchangeTags;
}

/// Default allocator: sequential pairs from an atomic counter.
///
/// Two pairs per epoch; the counter wraps within the u16 tag space, which is
/// safe as long as ~32k exchanges are never simultaneously in flight.
#[derive(Debug)]
pub struct SequentialTags {
    next: AtomicU16,
}

impl SequentialTags {
    pub const fn starting_at(base: u16) -> Self {
        Self {
            next: AtomicU16::new(base),
        }
    }
}

impl Default for SequentialTags {
    fn default() -> Self {
        // low tags are left free for ad-hoc point-to-point traffic
        Self::starting_at(0x4000)
    }
}

impl TagAllocator for SequentialTags {
    fn next_epoch(&self) -> ExchangeTags {
        let base = self.next.fetch_add(2, Ordering::Relaxed);
        ExchangeTags::from_base(CommTag(base))
    }
}
