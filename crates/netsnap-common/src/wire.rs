// wire.rs — shared wire-format constants and small framing helpers used by
// both the package header (package sequence + ack bitfield) and the
// entity-id delta list.
// Converted from: myq2-original/qcommon/net_chan.c's packet header layout
// (outgoing/incoming sequence, ack) and qcommon.c's protocol version/magic
// constants, generalized from fixed 32-bit fields to the packed-delta
// encoding this engine's schema-driven codec uses everywhere else.

/// Starting value for the "previous id" cursor a delta-coded id list is
/// seeded with. Id lists always delta against this before the first real
/// id, rather than 0, so that an id of 0 (reserved/invalid) never collides
/// with "no previous id yet". This is a wire-format magic value: changing
/// it breaks compatibility with anything that already speaks this protocol.
pub const INITIAL_PREVIOUS_ID: i32 = 1;

/// Number of packages tracked in a single ack bitfield.
pub const ACK_BITFIELD_BITS: u32 = 32;

/// Bitfield of which of the last [`ACK_BITFIELD_BITS`] packages (relative
/// to the package this field accompanies) have been acknowledged. Bit 0 is
/// the package immediately prior to the one carrying this field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckBitfield(pub u32);

impl AckBitfield {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn is_acked(&self, bit: u32) -> bool {
        bit < ACK_BITFIELD_BITS && (self.0 & (1 << bit)) != 0
    }

    pub fn set_acked(&mut self, bit: u32) {
        if bit < ACK_BITFIELD_BITS {
            self.0 |= 1 << bit;
        }
    }

    /// Shift the bitfield forward by `n` packages, dropping the oldest `n`
    /// bits and marking the new package (bit 0) as not yet acked.
    pub fn advance(&mut self, n: u32) {
        self.0 = if n >= ACK_BITFIELD_BITS { 0 } else { self.0 << n };
    }
}

/// Delta-encode a strictly-ascending list of entity ids against a running
/// "previous id" cursor, writing each as a zigzag-packed delta. Used for
/// both spawn and despawn id lists in a snapshot package.
pub fn write_id_list(
    writer: &mut crate::stream::EntropyWriter,
    ids: &[i32],
    ctx: crate::stream::DeltaContext,
) {
    writer.write_packed_uint(ids.len() as u32, crate::stream::DeltaContext::Field(0xFFFF));
    let mut prev = INITIAL_PREVIOUS_ID;
    for &id in ids {
        writer.write_packed_int_delta(id, prev, ctx);
        prev = id;
    }
}

/// Inverse of [`write_id_list`].
pub fn read_id_list(reader: &mut crate::stream::EntropyReader, ctx: crate::stream::DeltaContext) -> Vec<i32> {
    let count = reader.read_packed_uint(crate::stream::DeltaContext::Field(0xFFFF)) as usize;
    let mut ids = Vec::with_capacity(count);
    let mut prev = INITIAL_PREVIOUS_ID;
    for _ in 0..count {
        let id = reader.read_packed_int_delta(prev, ctx);
        ids.push(id);
        prev = id;
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{DeltaContext, EntropyReader, EntropyWriter};

    #[test]
    fn ack_bitfield_tracks_individual_bits() {
        let mut acks = AckBitfield::new();
        acks.set_acked(0);
        acks.set_acked(3);
        assert!(acks.is_acked(0));
        assert!(!acks.is_acked(1));
        assert!(acks.is_acked(3));
    }

    #[test]
    fn ack_bitfield_advance_shifts_out_old_bits() {
        let mut acks = AckBitfield::new();
        acks.set_acked(0);
        acks.advance(1);
        // what was bit 0 is now bit 1; bit 0 is the fresh, unacked package.
        assert!(!acks.is_acked(0));
        assert!(acks.is_acked(1));
    }

    #[test]
    fn id_list_roundtrip_preserves_order() {
        let ids = vec![1, 2, 5, 9, 100];
        let mut writer = EntropyWriter::raw();
        write_id_list(&mut writer, &ids, DeltaContext::SpawnId);
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let decoded = read_id_list(&mut reader, DeltaContext::SpawnId);
        assert_eq!(decoded, ids);
    }

    #[test]
    fn empty_id_list_roundtrips() {
        let mut writer = EntropyWriter::raw();
        write_id_list(&mut writer, &[], DeltaContext::DespawnId);
        let bytes = writer.into_bytes();
        let mut reader = EntropyReader::raw(&bytes);
        assert_eq!(read_id_list(&mut reader, DeltaContext::DespawnId), Vec::<i32>::new());
    }
}
