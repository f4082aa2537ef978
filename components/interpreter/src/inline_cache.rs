//! Inline caching for property access and global name lookup.
//!
//! A site caches `{shape, slot}` pairs. It starts uninitialized, goes
//! monomorphic on the first fill, holds a small bounded set while
//! polymorphic, and degrades to megamorphic after too many distinct
//! shapes, after which the site always takes the uncached path.

use arrayvec::ArrayVec;

/// Shape identity, as produced by the object model.
pub type ShapeId = u64;

const POLYMORPHIC_LIMIT: usize = 4;

/// One property-access site.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineCache {
    Uninitialized,
    Monomorphic {
        shape: ShapeId,
        slot: u32,
    },
    Polymorphic {
        entries: ArrayVec<(ShapeId, u32), POLYMORPHIC_LIMIT>,
    },
    Megamorphic,
}

impl InlineCache {
    pub fn new() -> Self {
        InlineCache::Uninitialized
    }

    /// Cached slot for `shape`, if this site has seen it.
    pub fn lookup(&self, shape: ShapeId) -> Option<u32> {
        match self {
            InlineCache::Uninitialized | InlineCache::Megamorphic => None,
            InlineCache::Monomorphic {
                shape: cached,
                slot,
            } => (*cached == shape).then_some(*slot),
            InlineCache::Polymorphic { entries } => entries
                .iter()
                .find(|(cached, _)| *cached == shape)
                .map(|&(_, slot)| slot),
        }
    }

    /// Refill after a slow-path lookup.
    pub fn update(&mut self, shape: ShapeId, slot: u32) {
        match self {
            InlineCache::Uninitialized => {
                *self = InlineCache::Monomorphic { shape, slot };
            }
            InlineCache::Monomorphic {
                shape: cached,
                slot: cached_slot,
            } => {
                if *cached == shape {
                    *cached_slot = slot;
                } else {
                    let mut entries = ArrayVec::new();
                    entries.push((*cached, *cached_slot));
                    entries.push((shape, slot));
                    *self = InlineCache::Polymorphic { entries };
                }
            }
            InlineCache::Polymorphic { entries } => {
                if let Some(entry) = entries.iter_mut().find(|(cached, _)| *cached == shape) {
                    entry.1 = slot;
                } else if entries.try_push((shape, slot)).is_err() {
                    *self = InlineCache::Megamorphic;
                }
            }
            InlineCache::Megamorphic => {}
        }
    }

    pub fn is_megamorphic(&self) -> bool {
        matches!(self, InlineCache::Megamorphic)
    }
}

impl Default for InlineCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_misses() {
        assert_eq!(InlineCache::new().lookup(1), None);
    }

    #[test]
    fn test_monomorphic_hit_and_miss() {
        let mut cache = InlineCache::new();
        cache.update(10, 2);
        assert_eq!(cache.lookup(10), Some(2));
        assert_eq!(cache.lookup(11), None);
    }

    #[test]
    fn test_polymorphic_transition() {
        let mut cache = InlineCache::new();
        cache.update(1, 0);
        cache.update(2, 1);
        assert!(matches!(cache, InlineCache::Polymorphic { .. }));
        assert_eq!(cache.lookup(1), Some(0));
        assert_eq!(cache.lookup(2), Some(1));
    }

    #[test]
    fn test_megamorphic_after_limit() {
        let mut cache = InlineCache::new();
        for shape in 0..5 {
            cache.update(shape, shape as u32);
        }
        assert!(cache.is_megamorphic());
        assert_eq!(cache.lookup(0), None);
        // further updates keep it megamorphic
        cache.update(99, 0);
        assert!(cache.is_megamorphic());
    }
}
