//! Per-logical-DB dirty-key tracking (§4.2). `dirty` holds keys mutated
//! since the last flush started; `flushing` holds keys a background
//! flush worker is currently draining to disk. The two sets are always
//! disjoint except during the atomic rotation performed by
//! [`DirtyTracker::rotate`].

use std::collections::HashSet;

/// Tracks `dirty`/`flushing` for a single logical DB.
#[derive(Default)]
pub struct DirtyTracker {
    dirty: HashSet<Vec<u8>>,
    flushing: HashSet<Vec<u8>>,
}

impl DirtyTracker {
    pub fn new() -> DirtyTracker {
        DirtyTracker::default()
    }

    /// Idempotent insert into `dirty`.
    pub fn touch(&mut self, key: &[u8]) {
        self.dirty.insert(key.to_vec());
    }

    /// True iff `key` is shadowing disk, i.e. is in `dirty` or `flushing`.
    pub fn is_dirty(&self, key: &[u8]) -> bool {
        self.dirty.contains(key) || self.flushing.contains(key)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn flushing_count(&self) -> usize {
        self.flushing.len()
    }

    /// Atomic swap: `flushing` (asserted empty) becomes the old `dirty`,
    /// and `dirty` becomes empty. Returns the keys that are now
    /// `flushing`, for the caller to pre-encode.
    ///
    /// # Panics
    ///
    /// Panics if `flushing` is non-empty -- this is the invariant
    /// violation §7 calls a bug assertion, not a recoverable case; the
    /// flush coordinator must check `flushing_count() == 0` itself and
    /// turn this into a reported error before ever calling `rotate`.
    pub fn rotate(&mut self) -> Vec<Vec<u8>> {
        assert!(
            self.flushing.is_empty(),
            "dirty tracker rotated with a non-empty flushing set"
        );
        std::mem::swap(&mut self.dirty, &mut self.flushing);
        self.flushing.iter().cloned().collect()
    }

    /// `dirty ← dirty ∪ flushing`; `flushing ← ∅`. Used when a flush
    /// fails and no progress can be claimed for the in-flight keys.
    pub fn merge_back(&mut self) {
        for key in self.flushing.drain() {
            self.dirty.insert(key);
        }
    }

    /// Empties `flushing` on a successful flush reap.
    pub fn clear_flushing(&mut self) {
        self.flushing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_is_idempotent() {
        let mut t = DirtyTracker::new();
        t.touch(b"a");
        t.touch(b"a");
        assert_eq!(t.dirty_count(), 1);
    }

    #[test]
    fn rotate_moves_dirty_to_flushing() {
        let mut t = DirtyTracker::new();
        t.touch(b"a");
        t.touch(b"b");
        let batch = t.rotate();
        assert_eq!(batch.len(), 2);
        assert_eq!(t.dirty_count(), 0);
        assert_eq!(t.flushing_count(), 2);
        assert!(t.is_dirty(b"a"));
    }

    #[test]
    fn merge_back_restores_dirty_on_failure() {
        let mut t = DirtyTracker::new();
        t.touch(b"a");
        t.rotate();
        t.touch(b"c");
        t.merge_back();
        assert_eq!(t.flushing_count(), 0);
        assert_eq!(t.dirty_count(), 2);
        assert!(t.is_dirty(b"a"));
        assert!(t.is_dirty(b"c"));
    }

    #[test]
    #[should_panic]
    fn rotate_panics_if_flushing_nonempty() {
        let mut t = DirtyTracker::new();
        t.touch(b"a");
        t.rotate();
        t.touch(b"b");
        t.rotate();
    }
}
