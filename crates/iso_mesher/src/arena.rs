//! Lock-free append arena for concurrently emitted vertices.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use glam::Vec3;

use crate::error::{ExtractError, Result};

/// Fixed-capacity vertex arena with a single atomic "next free" counter.
///
/// Writers reserve an exact contiguous range with one `fetch_add` and then
/// own it exclusively. Components are stored as `f32` bits in atomics so
/// the arena can be shared by reference across worker threads without
/// `unsafe`. The counter keeps counting past the capacity, which tells the
/// caller exactly how large the arena needed to be.
pub struct AtomicArena {
    components: Box<[AtomicU32]>,
    capacity: usize,
    next: AtomicUsize,
}

impl AtomicArena {
    /// Allocates room for `vertices` vertices. Fails with
    /// [`ExtractError::ResourceExhausted`] instead of aborting when the
    /// allocation cannot be made.
    pub fn with_capacity(vertices: usize) -> Result<Self> {
        let exhausted = || ExtractError::ResourceExhausted {
            label: "vertex arena".to_string(),
            bytes: (vertices as u64).saturating_mul(12),
            limit: isize::MAX as u64,
        };
        let len = vertices.checked_mul(3).ok_or_else(exhausted)?;
        let mut components = Vec::new();
        components.try_reserve_exact(len).map_err(|_| exhausted())?;
        components.extend((0..len).map(|_| AtomicU32::new(0)));
        Ok(Self {
            components: components.into_boxed_slice(),
            capacity: vertices,
            next: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Vertices claimed so far, including claims that did not fit.
    pub fn demanded(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    pub fn overflowed(&self) -> bool {
        self.demanded() > self.capacity
    }

    /// Reserves `count` vertices. Returns `None` when the range does not fit;
    /// the demand is still recorded.
    pub fn claim(&self, count: usize) -> Option<Range<usize>> {
        let start = self.next.fetch_add(count, Ordering::AcqRel);
        let end = start + count;
        (end <= self.capacity).then_some(start..end)
    }

    /// Writes one vertex into a slot obtained from [`claim`](Self::claim).
    #[inline]
    pub fn write(&self, slot: usize, p: Vec3) {
        let base = slot * 3;
        self.components[base].store(p.x.to_bits(), Ordering::Relaxed);
        self.components[base + 1].store(p.y.to_bits(), Ordering::Relaxed);
        self.components[base + 2].store(p.z.to_bits(), Ordering::Relaxed);
    }

    /// Claims space for `vertices` and writes them. Returns false on overflow.
    pub fn push(&self, vertices: &[Vec3]) -> bool {
        match self.claim(vertices.len()) {
            Some(range) => {
                for (slot, &p) in range.zip(vertices) {
                    self.write(slot, p);
                }
                true
            }
            None => false,
        }
    }

    /// Flattens the occupied prefix, or `None` if some claim did not fit.
    /// Takes `self` by value, so every writer has finished.
    pub fn into_positions(self) -> Option<Vec<f32>> {
        if self.overflowed() {
            return None;
        }
        let used = self.demanded() * 3;
        Some(
            self.components
                .into_vec()
                .into_iter()
                .take(used)
                .map(|c| f32::from_bits(c.into_inner()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn concurrent_claims_are_disjoint() {
        let writers = 2000usize;
        let per_writer = 6usize;
        let arena = AtomicArena::with_capacity(writers * per_writer).expect("arena");

        (0..writers).into_par_iter().for_each(|w| {
            let tag = Vec3::splat(w as f32);
            let verts = vec![tag; per_writer];
            assert!(arena.push(&verts));
        });

        assert_eq!(arena.demanded(), writers * per_writer);
        assert!(!arena.overflowed());
        let positions = arena.into_positions().expect("no overflow");
        assert_eq!(positions.len(), writers * per_writer * 3);

        // Every writer's vertices must land as one contiguous run.
        let mut seen = HashSet::new();
        for run in positions.chunks_exact(per_writer * 3) {
            let tag = run[0];
            assert!(run.iter().all(|&c| c == tag), "interleaved write");
            assert!(seen.insert(tag as u32), "duplicate run");
        }
        assert_eq!(seen.len(), writers);
    }

    #[test]
    fn overflow_records_true_demand() {
        let arena = AtomicArena::with_capacity(4).expect("arena");
        assert!(arena.push(&[Vec3::ONE; 3]));
        assert!(!arena.push(&[Vec3::ONE; 3]));
        assert_eq!(arena.demanded(), 6);
        assert!(arena.overflowed());
        assert!(arena.into_positions().is_none());
    }

    #[test]
    fn zero_capacity_arena() {
        let arena = AtomicArena::with_capacity(0).expect("arena");
        assert!(arena.push(&[]));
        assert_eq!(arena.into_positions(), Some(Vec::new()));
    }

    #[test]
    fn unallocatable_capacity_is_an_error() {
        for vertices in [usize::MAX, usize::MAX / 2, isize::MAX as usize / 4] {
            assert!(matches!(
                AtomicArena::with_capacity(vertices),
                Err(ExtractError::ResourceExhausted { .. })
            ));
        }
    }
}
