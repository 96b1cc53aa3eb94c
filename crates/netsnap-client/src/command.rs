// command.rs — outbound command ring and delta serialisation.
// Converted from: myq2-original/client/cl_pred.c's `cl.cmds[ack &
// (CMD_BACKUP-1)]` prediction-history ring, but NOT the same capacity:
// that ring holds a long movement-prediction history, while this engine's
// outbound command window is fixed at exactly three slots per the wire
// protocol (§9 Design Notes — the server depends on up to three commands
// being re-sent per package). Since 3 isn't a power of two, this uses a
// plain modulo-indexed array rather than
// [`netsnap_common::seqbuffer::SequenceBuffer`]'s mask trick.

use netsnap_common::stream::{DeltaContext, EntropyReader, EntropyWriter};

pub const COMMAND_RING_SIZE: usize = 3;

/// One queued player input. `data` is the raw, schema-less command body
/// (opaque to this engine beyond its length), bounded per the protocol at
/// 512 bytes.
#[derive(Debug, Clone, Default)]
pub struct CommandRecord {
    pub time: i32,
    pub data: Vec<u8>,
}

fn write_command_delta(writer: &mut EntropyWriter, body: &[u8], prev: &[u8]) {
    writer.write_packed_uint(body.len() as u32, DeltaContext::Field(0xFFFE));
    for (i, &b) in body.iter().enumerate() {
        let prev_byte = prev.get(i).copied().unwrap_or(0);
        writer.write_raw_bits((b ^ prev_byte) as u32, 8);
    }
}

fn read_command_delta(reader: &mut EntropyReader, prev: &[u8]) -> Vec<u8> {
    let len = reader.read_packed_uint(DeltaContext::Field(0xFFFE)) as usize;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let prev_byte = prev.get(i).copied().unwrap_or(0);
        let b = reader.read_raw_bits(8) as u8;
        out.push(b ^ prev_byte);
    }
    out
}

/// The 3-slot outbound command ring plus its ack cursor.
pub struct CommandUploader {
    slots: [Option<(u32, CommandRecord)>; COMMAND_RING_SIZE],
    sequence: u32,
    sequence_ack: u32,
    last_acknowledged_time: i32,
}

impl CommandUploader {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            sequence: 0,
            sequence_ack: 0,
            last_acknowledged_time: 0,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn sequence_ack(&self) -> u32 {
        self.sequence_ack
    }

    /// Append a new command, overwriting whichever slot its sequence maps
    /// to. Older unacked commands simply fall out of the window — the
    /// server tolerates this by delta-chaining (§4.I).
    pub fn queue_command(&mut self, time: i32, data: Vec<u8>) -> u32 {
        self.sequence += 1;
        let idx = (self.sequence as usize) % COMMAND_RING_SIZE;
        self.slots[idx] = Some((self.sequence, CommandRecord { time, data }));
        self.sequence
    }

    /// Serialise the outbound command segment: schema-include bit, the
    /// current sequence, then each resident command from newest to
    /// oldest as a time-delta plus a byte-delta against the previous one
    /// written (the first iteration deltas against an implicit zero
    /// command), terminated by a `0` bit.
    pub fn write_commands(&self, writer: &mut EntropyWriter) {
        let include_schema = self.sequence_ack == 0;
        writer.write_bit(include_schema);
        writer.write_raw_bits(self.sequence & 0xFFFF, 16);

        let mut seq = self.sequence;
        let mut previous_time = 0i32;
        let mut previous_data: Vec<u8> = Vec::new();

        loop {
            let idx = (seq as usize) % COMMAND_RING_SIZE;
            let resident = match &self.slots[idx] {
                Some((tag, record)) if *tag == seq => Some(record),
                _ => None,
            };
            let Some(record) = resident else { break };

            writer.write_bit(true);
            writer.write_packed_int_delta(record.time, previous_time, DeltaContext::CommandTime);
            write_command_delta(writer, &record.data, &previous_data);

            previous_time = record.time;
            previous_data = record.data.clone();

            match seq.checked_sub(1) {
                Some(next) if next != 0 => seq = next,
                _ => break,
            }
        }

        writer.write_bit(false);
    }

    /// Inverse of [`write_commands`], used by anything that needs to
    /// replay what was sent (tests, a loopback transport).
    pub fn read_commands(reader: &mut EntropyReader) -> (bool, u32, Vec<CommandRecord>) {
        let include_schema = reader.read_bit();
        let sequence = reader.read_raw_bits(16);

        let mut commands = Vec::new();
        let mut previous_time = 0i32;
        let mut previous_data: Vec<u8> = Vec::new();

        while reader.read_bit() {
            let time = reader.read_packed_int_delta(previous_time, DeltaContext::CommandTime);
            let data = read_command_delta(reader, &previous_data);
            previous_time = time;
            previous_data = data.clone();
            commands.push(CommandRecord { time, data });
        }

        (include_schema, sequence, commands)
    }

    /// Apply a delivery notification carrying `command_sequence`,
    /// advancing the ack cursor per invariant 6 (§3).
    pub fn apply_ack(&mut self, command_sequence: u32, command_time: i32) {
        if command_sequence > self.sequence_ack {
            self.sequence_ack = command_sequence;
            self.last_acknowledged_time = command_time;
        }
    }

    pub fn last_acknowledged_time(&self) -> i32 {
        self.last_acknowledged_time
    }
}

impl Default for CommandUploader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_three_resident_commands() {
        let mut uploader = CommandUploader::new();
        uploader.queue_command(100, vec![1, 2, 3]);
        uploader.queue_command(116, vec![1, 2, 4]);
        uploader.queue_command(132, vec![9]);

        let mut writer = EntropyWriter::raw();
        uploader.write_commands(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = EntropyReader::raw(&bytes);
        let (include_schema, sequence, commands) = CommandUploader::read_commands(&mut reader);

        assert!(include_schema); // sequence_ack starts at 0
        assert_eq!(sequence, 3);
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].time, 132);
        assert_eq!(commands[0].data, vec![9]);
        assert_eq!(commands[1].time, 116);
        assert_eq!(commands[1].data, vec![1, 2, 4]);
        assert_eq!(commands[2].time, 100);
        assert_eq!(commands[2].data, vec![1, 2, 3]);
    }

    #[test]
    fn fourth_command_overwrites_the_oldest_ring_slot() {
        let mut uploader = CommandUploader::new();
        uploader.queue_command(1, vec![]);
        uploader.queue_command(2, vec![]);
        uploader.queue_command(3, vec![]);
        uploader.queue_command(4, vec![]); // overwrites sequence-1's slot

        let mut writer = EntropyWriter::raw();
        uploader.write_commands(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = EntropyReader::raw(&bytes);
        let (_, _, commands) = CommandUploader::read_commands(&mut reader);

        assert_eq!(commands.len(), COMMAND_RING_SIZE);
        assert_eq!(commands.iter().map(|c| c.time).collect::<Vec<_>>(), vec![4, 3, 2]);
    }

    #[test]
    fn ack_only_advances_forward() {
        let mut uploader = CommandUploader::new();
        uploader.apply_ack(5, 500);
        uploader.apply_ack(3, 300); // stale, ignored
        assert_eq!(uploader.sequence_ack(), 5);
        assert_eq!(uploader.last_acknowledged_time(), 500);
    }
}
