// sparse_seqbuffer.rs — per-entity baseline cache: sparse, sequence-keyed,
// answers "latest entry at or before s", FIFO-evicted once full.
// Converted from: myq2-original/client/cl_ents.c's CL_ParseFrame, which
// walks `cl_frames` looking for the newest frame the current delta can
// validly reference; generalized here from a dense ring (one slot per
// possible sequence) to a sparse map since baselines only exist for the
// specific sequences an entity actually appeared in.

use std::collections::BTreeMap;

/// Sparse cache of historical values keyed by sequence number, used to
/// hold the baselines a delta-coded entity can be decoded against. Unlike
/// [`crate::seqbuffer::SequenceBuffer`], entries are not pre-sized to a
/// ring slot — only sequences actually inserted exist — and lookups answer
/// "the newest entry at or before a given sequence" rather than an exact
/// match, since the server may reference any of the last few baselines it
/// knows the client acknowledged.
pub struct SparseSequenceCache<T> {
    entries: BTreeMap<u32, T>,
    capacity: usize,
}

impl<T> SparseSequenceCache<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SparseSequenceCache capacity must be nonzero");
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `value` at `sequence`, evicting the oldest entry (by
    /// sequence) first if the cache is already at capacity. If `sequence`
    /// already exists, this replaces it without evicting anything.
    pub fn insert(&mut self, sequence: u32, value: T) {
        if !self.entries.contains_key(&sequence) && self.entries.len() >= self.capacity {
            if let Some(&oldest) = self.entries.keys().next() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(sequence, value);
    }

    /// Exact lookup.
    pub fn get(&self, sequence: u32) -> Option<&T> {
        self.entries.get(&sequence)
    }

    /// The newest entry whose sequence is `<= sequence`, i.e. the most
    /// recent baseline the decoder is allowed to use for a delta that
    /// claims to reference `sequence` or anything older.
    pub fn find_at_or_before(&self, sequence: u32) -> Option<(u32, &T)> {
        self.entries
            .range(..=sequence)
            .next_back()
            .map(|(&seq, value)| (seq, value))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove and return the entry at an exact sequence, if present.
    pub fn remove(&mut self, sequence: u32) -> Option<T> {
        self.entries.remove(&sequence)
    }

    /// Remove and yield every entry with a sequence strictly less than
    /// `threshold`, oldest first.
    pub fn drain_before(&mut self, threshold: u32) -> Vec<(u32, T)> {
        let tail = self.entries.split_off(&threshold);
        std::mem::replace(&mut self.entries, tail).into_iter().collect()
    }

    /// Every sequence currently resident, ascending.
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_at_or_before_picks_newest_not_exceeding_target() {
        let mut cache: SparseSequenceCache<&str> = SparseSequenceCache::new(8);
        cache.insert(10, "ten");
        cache.insert(20, "twenty");
        cache.insert(30, "thirty");

        assert_eq!(cache.find_at_or_before(25), Some((20, &"twenty")));
        assert_eq!(cache.find_at_or_before(30), Some((30, &"thirty")));
        assert_eq!(cache.find_at_or_before(5), None);
    }

    #[test]
    fn fifo_eviction_drops_oldest_sequence_first() {
        let mut cache: SparseSequenceCache<i32> = SparseSequenceCache::new(2);
        cache.insert(1, 100);
        cache.insert(2, 200);
        cache.insert(3, 300); // evicts sequence 1

        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(2), Some(&200));
        assert_eq!(cache.get(3), Some(&300));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinserting_existing_sequence_does_not_evict() {
        let mut cache: SparseSequenceCache<i32> = SparseSequenceCache::new(2);
        cache.insert(1, 100);
        cache.insert(2, 200);
        cache.insert(2, 999); // replace, no eviction
        assert_eq!(cache.get(1), Some(&100));
        assert_eq!(cache.get(2), Some(&999));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn drain_before_removes_only_older_entries_in_order() {
        let mut cache: SparseSequenceCache<i32> = SparseSequenceCache::new(8);
        cache.insert(1, 10);
        cache.insert(5, 50);
        cache.insert(9, 90);

        let drained = cache.drain_before(6);
        assert_eq!(drained, vec![(1, 10), (5, 50)]);
        assert_eq!(cache.get(9), Some(&90));
        assert_eq!(cache.len(), 1);
    }
}
