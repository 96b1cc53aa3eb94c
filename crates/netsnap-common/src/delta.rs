// delta.rs — delta field codec: per-field change mask against a baseline,
// gated by the server's fieldMask, folded into the running entity hash.
// Converted from: myq2-original/client/cl_ents.c CL_ParseDelta, which reads
// a bitmask of U_* flags then conditionally reads each changed member.
// Here the mask is schema-driven instead of a fixed struct layout, and a
// field can also be forced back to its baseline value by fieldMask without
// spending any wire bits, per this engine's replication-gating rule.

use crate::hash::RunningHash;
use crate::schema::Schema;
use crate::stream::{EntropyReader, EntropyWriter};

/// Outcome of decoding one entity's delta against a baseline image.
pub struct DecodedDelta {
    /// Canonical byte image after applying the delta.
    pub image: Vec<u8>,
    /// Bitmask of which schema fields actually changed (one bit per field,
    /// LSB = field 0). Consumers use this to know which predicted fields
    /// the client-side simulation is allowed to keep running past.
    pub fields_changed: u64,
}

/// The image `read_delta` will reconstruct from `baseline`/`current` under
/// `field_mask`, without touching a wire stream: `baseline` with every
/// replicated field's current value written in, and every masked-out field
/// left at its baseline value. Both `write_delta` and anything that needs
/// to predict the per-entity hash `write_delta` will produce (e.g. a test
/// double standing in for the server) should hash this, not `current` —
/// they differ exactly when a masked-out field has drifted from baseline.
pub fn gated_image(schema: &Schema, baseline: &[u8], current: &[u8], field_mask: u8) -> Vec<u8> {
    let mut image = baseline.to_vec();
    for (i, field) in schema.fields.iter().enumerate() {
        if field.mask != 0 && field.mask & field_mask == 0 {
            continue;
        }
        let new = schema.load_field(current, i);
        schema.store_field(&mut image, i, new);
    }
    image
}

/// Encode `current` as a delta against `baseline` under `schema`, gated by
/// `field_mask`. Fields whose `descriptor.mask` bit is clear in `field_mask`
/// are forced to the baseline value and cost no wire bits at all — the
/// decoder applies the same rule so both sides agree without a flag bit.
pub fn write_delta(
    writer: &mut EntropyWriter,
    schema: &Schema,
    baseline: &[u8],
    current: &[u8],
    field_mask: u8,
    hash: &mut RunningHash,
) {
    assert_eq!(baseline.len(), schema.byte_size());
    assert_eq!(current.len(), schema.byte_size());

    let effective_image = gated_image(schema, baseline, current, field_mask);
    let mut changed_mask: u64 = 0;
    for (i, field) in schema.fields.iter().enumerate() {
        if field.mask != 0 && field.mask & field_mask == 0 {
            // Not replicated this frame: both sides use the baseline value,
            // so there is nothing to encode and no change bit to set.
            continue;
        }
        let old = schema.load_field(baseline, i);
        let new = schema.load_field(current, i);
        if new != old {
            changed_mask |= 1 << i;
        }
    }

    writer.write_raw_bits((changed_mask & 0xFFFF_FFFF) as u32, 32);
    if schema.fields.len() > 32 {
        writer.write_raw_bits((changed_mask >> 32) as u32, 32);
    }

    for (i, field) in schema.fields.iter().enumerate() {
        if changed_mask & (1 << i) == 0 {
            continue;
        }
        let new = schema.load_field(current, i);
        match field.encoding {
            crate::schema::FieldEncoding::Raw => writer.write_raw_bits(new, field.bit_count as u32),
            crate::schema::FieldEncoding::Packed => writer.write_packed_uint(new, field.delta_context),
        }
    }

    hash.update(&effective_image);
}

/// Decode one entity's delta against `baseline`, applying `field_mask`'s
/// forced-baseline rule identically to the encoder.
pub fn read_delta(
    reader: &mut EntropyReader,
    schema: &Schema,
    baseline: &[u8],
    field_mask: u8,
    hash: &mut RunningHash,
) -> DecodedDelta {
    assert_eq!(baseline.len(), schema.byte_size());

    let mut changed_mask: u64 = reader.read_raw_bits(32) as u64;
    if schema.fields.len() > 32 {
        changed_mask |= (reader.read_raw_bits(32) as u64) << 32;
    }

    let mut image = baseline.to_vec();
    for (i, field) in schema.fields.iter().enumerate() {
        if field.mask != 0 && field.mask & field_mask == 0 {
            // Forced back to baseline; `image` already holds that value.
            continue;
        }
        if changed_mask & (1 << i) == 0 {
            continue;
        }
        let value = match field.encoding {
            crate::schema::FieldEncoding::Raw => reader.read_raw_bits(field.bit_count as u32),
            crate::schema::FieldEncoding::Packed => reader.read_packed_uint(field.delta_context),
        };
        schema.store_field(&mut image, i, value);
    }

    hash.update(&image);

    DecodedDelta {
        image,
        fields_changed: changed_mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use crate::schema::FieldEncoding;
    use crate::stream::DeltaContext;
    use crate::stream::IoStreamKind;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor {
                encoding: FieldEncoding::Raw,
                bit_count: 8,
                delta_context: DeltaContext::Field(0),
                mask: 0x01,
                predicted: false,
            },
            FieldDescriptor {
                encoding: FieldEncoding::Packed,
                bit_count: 16,
                delta_context: DeltaContext::Field(1),
                mask: 0x02,
                predicted: true,
            },
        ])
    }

    #[test]
    fn unchanged_fields_cost_no_bits_and_decode_to_baseline() {
        let schema = schema();
        let mut baseline = vec![0u8; schema.byte_size()];
        schema.store_field(&mut baseline, 0, 5);
        schema.store_field(&mut baseline, 1, 500);
        let current = baseline.clone();

        let mut writer = EntropyWriter::new(IoStreamKind::Raw, None);
        let mut hash_w = RunningHash::new();
        write_delta(&mut writer, &schema, &baseline, &current, 0xFF, &mut hash_w);
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let mut hash_r = RunningHash::new();
        let decoded = read_delta(&mut reader, &schema, &baseline, 0xFF, &mut hash_r);
        assert_eq!(decoded.image, current);
        assert_eq!(decoded.fields_changed, 0);
        assert_eq!(hash_w.finalize(), hash_r.finalize());
    }

    #[test]
    fn changed_field_is_flagged_and_applied() {
        let schema = schema();
        let mut baseline = vec![0u8; schema.byte_size()];
        schema.store_field(&mut baseline, 0, 5);
        schema.store_field(&mut baseline, 1, 500);
        let mut current = baseline.clone();
        schema.store_field(&mut current, 1, 900);

        let mut writer = EntropyWriter::raw();
        let mut hash_w = RunningHash::new();
        write_delta(&mut writer, &schema, &baseline, &current, 0xFF, &mut hash_w);
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let mut hash_r = RunningHash::new();
        let decoded = read_delta(&mut reader, &schema, &baseline, 0xFF, &mut hash_r);
        assert_eq!(decoded.fields_changed, 0b10);
        assert_eq!(schema.load_field(&decoded.image, 1), 900);
        assert_eq!(schema.load_field(&decoded.image, 0), 5);
    }

    #[test]
    fn field_mask_forces_baseline_regardless_of_change() {
        let schema = schema();
        let mut baseline = vec![0u8; schema.byte_size()];
        schema.store_field(&mut baseline, 0, 5);
        schema.store_field(&mut baseline, 1, 500);
        let mut current = baseline.clone();
        schema.store_field(&mut current, 1, 900); // changed, but field 1's mask bit is 0x02

        let mut writer = EntropyWriter::raw();
        let mut hash_w = RunningHash::new();
        // field_mask clears bit 0x02, so field 1 must not replicate.
        write_delta(&mut writer, &schema, &baseline, &current, 0x01, &mut hash_w);
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let mut hash_r = RunningHash::new();
        let decoded = read_delta(&mut reader, &schema, &baseline, 0x01, &mut hash_r);
        assert_eq!(decoded.fields_changed & 0b10, 0);
        assert_eq!(schema.load_field(&decoded.image, 1), 500);
        // The masked-out field differs from baseline on the sender's side,
        // but both ends hash the same reconstructed (baseline) image.
        assert_eq!(hash_w.finalize(), hash_r.finalize());
    }
}
