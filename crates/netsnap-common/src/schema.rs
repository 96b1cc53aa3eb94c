// schema.rs — schema registry and non-delta field codec.
// Converted from: myq2-original/client/cl_ents.c CL_ParseEntityBits/
// CL_ParseDelta, which walk a fixed set of `U_*` bit flags to decide which
// entity_state_t members are present on the wire. Generalized here to an
// arbitrary, server-supplied list of fields instead of a hardcoded struct.

use crate::stream::{DeltaContext, EntropyReader, EntropyWriter};

/// How a field's value is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Fixed-width raw bits, no entropy coding.
    Raw,
    /// Entropy-coded packed unsigned integer.
    Packed,
}

/// One field in a schema: how wide it is, how it's coded, which
/// `fieldMask` bit gates its replication, and whether the client-side
/// predictor is allowed to touch it.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub encoding: FieldEncoding,
    pub bit_count: u8,
    pub delta_context: DeltaContext,
    pub mask: u8,
    pub predicted: bool,
}

impl FieldDescriptor {
    /// Canonical storage width for this field, in whole bytes.
    pub fn byte_size(&self) -> usize {
        (self.bit_count as usize + 7) / 8
    }
}

/// Ordered list of field descriptors the server sent for one entity type.
/// Two fixed operations ride on it: copying a non-delta image in, and
/// skipping the same bits without storing them.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<FieldDescriptor>,
    offsets: Vec<usize>,
    byte_size: usize,
}

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        for f in &fields {
            offsets.push(offset);
            offset += f.byte_size();
        }
        Self {
            fields,
            offsets,
            byte_size: offset,
        }
    }

    /// Fixed size of the canonical byte image this schema describes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn field_offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    fn read_field_value(reader: &mut EntropyReader, field: &FieldDescriptor) -> u32 {
        match field.encoding {
            FieldEncoding::Raw => reader.read_raw_bits(field.bit_count as u32),
            FieldEncoding::Packed => reader.read_packed_uint(field.delta_context),
        }
    }

    fn write_field_value(writer: &mut EntropyWriter, field: &FieldDescriptor, value: u32) {
        match field.encoding {
            FieldEncoding::Raw => writer.write_raw_bits(value, field.bit_count as u32),
            FieldEncoding::Packed => writer.write_packed_uint(value, field.delta_context),
        }
    }

    fn store(dst: &mut [u8], field: &FieldDescriptor, value: u32) {
        let bytes = field.byte_size();
        dst[..bytes].copy_from_slice(&value.to_le_bytes()[..bytes]);
    }

    fn load(src: &[u8], field: &FieldDescriptor) -> u32 {
        let bytes = field.byte_size();
        let mut buf = [0u8; 4];
        buf[..bytes].copy_from_slice(&src[..bytes]);
        u32::from_le_bytes(buf)
    }

    /// Read one non-delta field image into its canonical byte layout.
    pub fn copy_fields_to_buffer(&self, reader: &mut EntropyReader, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.byte_size);
        for (i, field) in self.fields.iter().enumerate() {
            let value = Self::read_field_value(reader, field);
            let off = self.offsets[i];
            Self::store(&mut dst[off..off + field.byte_size()], field, value);
        }
    }

    /// Write one non-delta field image from its canonical byte layout.
    pub fn write_fields_from_buffer(&self, writer: &mut EntropyWriter, src: &[u8]) {
        debug_assert_eq!(src.len(), self.byte_size);
        for (i, field) in self.fields.iter().enumerate() {
            let off = self.offsets[i];
            let value = Self::load(&src[off..off + field.byte_size()], field);
            Self::write_field_value(writer, field, value);
        }
    }

    /// Consume the same bits as `copy_fields_to_buffer` without storing them.
    pub fn skip_fields(&self, reader: &mut EntropyReader) {
        for field in &self.fields {
            Self::read_field_value(reader, field);
        }
    }

    pub(crate) fn load_field(&self, buf: &[u8], index: usize) -> u32 {
        let off = self.offsets[index];
        Self::load(&buf[off..off + self.fields[index].byte_size()], &self.fields[index])
    }

    pub(crate) fn store_field(&self, buf: &mut [u8], index: usize, value: u32) {
        let off = self.offsets[index];
        let field = self.fields[index];
        Self::store(&mut buf[off..off + field.byte_size()], &field, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::IoStreamKind;

    fn two_field_schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor {
                encoding: FieldEncoding::Raw,
                bit_count: 8,
                delta_context: DeltaContext::Field(0),
                mask: 0x01,
                predicted: true,
            },
            FieldDescriptor {
                encoding: FieldEncoding::Packed,
                bit_count: 16,
                delta_context: DeltaContext::Field(1),
                mask: 0x02,
                predicted: false,
            },
        ])
    }

    #[test]
    fn byte_size_sums_field_widths() {
        let schema = two_field_schema();
        assert_eq!(schema.byte_size(), 1 + 2);
    }

    #[test]
    fn copy_fields_roundtrips_through_wire() {
        let schema = two_field_schema();
        let mut writer = EntropyWriter::new(IoStreamKind::Raw, None);
        writer.write_raw_bits(7, 8);
        writer.write_packed_uint(9000, DeltaContext::Field(1));
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let mut dst = vec![0u8; schema.byte_size()];
        schema.copy_fields_to_buffer(&mut reader, &mut dst);

        assert_eq!(schema.load_field(&dst, 0), 7);
        assert_eq!(schema.load_field(&dst, 1), 9000);
    }

    #[test]
    fn skip_fields_consumes_same_bits_as_copy() {
        let schema = two_field_schema();
        let mut writer = EntropyWriter::raw();
        writer.write_raw_bits(7, 8);
        writer.write_packed_uint(9000, DeltaContext::Field(1));
        writer.write_raw_bits(0xAB, 8); // sentinel to confirm position after skip
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        schema.skip_fields(&mut reader);
        assert_eq!(reader.read_raw_bits(8), 0xAB);
    }

    #[test]
    fn write_then_copy_is_identity() {
        let schema = two_field_schema();
        let mut src = vec![0u8; schema.byte_size()];
        schema.store_field(&mut src, 0, 42);
        schema.store_field(&mut src, 1, 1234);

        let mut writer = EntropyWriter::raw();
        schema.write_fields_from_buffer(&mut writer, &src);
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let mut dst = vec![0u8; schema.byte_size()];
        schema.copy_fields_to_buffer(&mut reader, &mut dst);
        assert_eq!(src, dst);
    }
}
