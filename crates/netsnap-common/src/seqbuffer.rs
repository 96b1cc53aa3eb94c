// seqbuffer.rs — dense fixed-capacity ring keyed by sequence number.
// Converted from: myq2-original/client/cl_pred.c's `cl.cmds[ack & (CMD_BACKUP-1)]`
// and cl_ents.c's `cl_frames[frame.serverframe & UPDATE_MASK]` ring idiom —
// both index a fixed-size array with `seq & (capacity - 1)` and rely on a
// separately tracked sequence tag to tell a live slot from a stale one.

/// A fixed-capacity ring of `T`, indexed by sequence number modulo
/// capacity. Capacity must be a power of two. Each slot remembers which
/// sequence last wrote it, so a lookup by sequence can tell a live value
/// from one that was since overwritten by wraparound.
pub struct SequenceBuffer<T> {
    slots: Vec<Option<(u32, T)>>,
    capacity_mask: u32,
}

impl<T> SequenceBuffer<T> {
    /// `capacity` must be a power of two (panics otherwise), matching the
    /// `seq & (capacity - 1)` mask trick used throughout.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "SequenceBuffer capacity must be a power of two");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            capacity_mask: (capacity - 1) as u32,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, sequence: u32) -> usize {
        (sequence & self.capacity_mask) as usize
    }

    /// Store `value` under `sequence`, overwriting whatever previously
    /// occupied that slot.
    pub fn insert(&mut self, sequence: u32, value: T) {
        let idx = self.index(sequence);
        self.slots[idx] = Some((sequence, value));
    }

    /// Fetch the value at `sequence`, but only if the slot's tag still
    /// matches — a stale wraparound entry returns `None`.
    pub fn get(&self, sequence: u32) -> Option<&T> {
        let idx = self.index(sequence);
        match &self.slots[idx] {
            Some((tag, value)) if *tag == sequence => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, sequence: u32) -> Option<&mut T> {
        let idx = self.index(sequence);
        match &mut self.slots[idx] {
            Some((tag, value)) if *tag == sequence => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, sequence: u32) -> Option<T> {
        let idx = self.index(sequence);
        match self.slots[idx].take() {
            Some((tag, value)) if tag == sequence => Some(value),
            other => {
                // Tag mismatch: nothing to remove, put back what was there.
                self.slots[idx] = other;
                None
            }
        }
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.get(sequence).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(8);
        buf.insert(3, 300);
        assert_eq!(buf.get(3), Some(&300));
        assert_eq!(buf.get(11), None);
    }

    #[test]
    fn wraparound_overwrite_invalidates_stale_tag() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        buf.insert(1, 10);
        assert_eq!(buf.get(1), Some(&10));
        buf.insert(5, 50); // same slot (1 & 3 == 5 & 3 == 1), different tag
        assert_eq!(buf.get(1), None);
        assert_eq!(buf.get(5), Some(&50));
    }

    #[test]
    fn remove_respects_tag() {
        let mut buf: SequenceBuffer<i32> = SequenceBuffer::new(4);
        buf.insert(2, 20);
        buf.insert(6, 60); // overwrites slot 2's physical slot
        assert_eq!(buf.remove(2), None);
        assert_eq!(buf.remove(6), Some(60));
        assert_eq!(buf.get(6), None);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_capacity() {
        let _: SequenceBuffer<i32> = SequenceBuffer::new(3);
    }
}
