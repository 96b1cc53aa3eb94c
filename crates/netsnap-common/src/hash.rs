// hash.rs — running checksum over decoded field images.
// Converted from: myq2-original/qcommon/crc.c byte-at-a-time digest pattern,
// widened to a 32-bit polynomial since the snapshot hash needs more spread
// than the original 16-bit download checksum.

use crc::{Crc, CRC_32_ISO_HDLC};

static HASH_CALC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// An incremental hash accumulated across a sequence of decoded field
/// images. Order-sensitive: feeding the same bytes in a different order
/// produces a different result, matching the "running hash" the sender
/// accumulates while encoding the same entities in the same order.
pub struct RunningHash(crc::Digest<'static, u32>);

impl RunningHash {
    pub fn new() -> Self {
        Self(HASH_CALC.digest())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot hash of a single buffer, used for the per-snapshot `numEnts`
/// sum-hash the decoder accumulates across all committed entities.
pub fn simple_hash(data: &[u8]) -> u32 {
    HASH_CALC.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_hash_matches_one_shot() {
        let mut running = RunningHash::new();
        running.update(b"hello");
        running.update(b"world");
        let mut combined = Vec::new();
        combined.extend_from_slice(b"hello");
        combined.extend_from_slice(b"world");
        assert_eq!(running.finalize(), simple_hash(&combined));
    }

    #[test]
    fn hash_is_order_sensitive() {
        let mut a = Vec::new();
        a.extend_from_slice(b"AB");
        let mut b = Vec::new();
        b.extend_from_slice(b"BA");
        assert_ne!(simple_hash(&a), simple_hash(&b));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(simple_hash(b"field-image"), simple_hash(b"field-image"));
    }
}
