// framing.rs — package framing and delivery tracking.
// Converted from: myq2-original/qcommon/net_chan.c's Netchan_Transmit/
// Netchan_Process (sequence/ack header, reliable-buffer swap on ack),
// generalized from the original's byte-oriented SizeBuf header to the
// packed-delta entropy stream this engine's header rides on, and from a
// single reliable buffer to a per-package outstanding table driving
// NotifyDelivered for several independently-tracked reliable artifacts.

use netsnap_common::sparse_seqbuffer::SparseSequenceCache;
use netsnap_common::stream::{DeltaContext, EntropyReader, EntropyWriter};
use netsnap_common::wire::{AckBitfield, ACK_BITFIELD_BITS};

bitflags::bitflags! {
    /// Which payload segments follow the header on this package. Mirrors
    /// the original's per-message `svc_*`/`clc_*` leading byte, collapsed
    /// into a single bitfield so a package can carry several segments.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContentFlags: u8 {
        const CLIENT_CONFIG = 0x01;
        const COMMANDS      = 0x02;
        const EVENTS        = 0x04;
        const CLIENT_INFO   = 0x08;
        const MAP_INFO      = 0x10;
        const SNAPSHOT      = 0x20;
        const FRAGMENT      = 0x40;
    }
}

/// Decoded package header.
#[derive(Debug, Clone, Copy)]
pub struct PackageHeader {
    pub sequence: u32,
    pub ack_sequence: u32,
    pub ack_bitfield: AckBitfield,
    pub content: ContentFlags,
}

/// An opaque reliable artifact carried by a package: an event payload, or
/// client config bytes. Ownership moves into the outstanding slot on send
/// and either drops (delivered) or moves back to the outbound queue
/// (lost) — replacing the original's explicit refcounted `Release()`.
#[derive(Debug, Clone)]
pub struct ReliableEvent(pub Vec<u8>);

/// What a package sent by this client carried, recorded so
/// [`NotifyDelivered`] knows what to repair on loss.
#[derive(Debug, Clone, Default)]
pub struct OutstandingPackage {
    pub content: ContentFlagsBits,
    pub command_sequence: u32,
    pub command_time: i32,
    pub events: Vec<ReliableEvent>,
    pub carried_client_config: bool,
}

/// Plain-u8 mirror of [`ContentFlags`] so [`OutstandingPackage`] can derive
/// `Default`/`Clone` without depending on bitflags' generated impls.
pub type ContentFlagsBits = u8;

/// Result of walking the ack bitfield against the outstanding table: one
/// entry per outstanding package that was resolved (acked or lost) this
/// pass, in ascending sequence order.
pub struct DeliveryResult {
    pub sequence: u32,
    pub package: OutstandingPackage,
    pub made_it: bool,
}

/// Drives outbound sequencing, the outstanding-package table, and ack
/// processing. Inbound sequencing (duplicate/stale detection) lives
/// alongside it since both directions share the same rolling window idea.
pub struct Framing {
    out_sequence: u32,
    in_sequence: u32,
    in_sequence_time: i32,
    /// Which of the last [`netsnap_common::wire::ACK_BITFIELD_BITS`] inbound
    /// packages before `in_sequence` were actually received, kept up to date
    /// on every accepted header so [`Self::received_bitfield`] has something
    /// real to hand the next outbound header.
    received: AckBitfield,
    outstanding: SparseSequenceCache<OutstandingPackage>,
}

impl Framing {
    pub fn new(outstanding_capacity: usize) -> Self {
        Self {
            out_sequence: 0,
            in_sequence: 0,
            in_sequence_time: 0,
            received: AckBitfield::new(),
            outstanding: SparseSequenceCache::new(outstanding_capacity),
        }
    }

    pub fn out_sequence(&self) -> u32 {
        self.out_sequence
    }

    pub fn in_sequence(&self) -> u32 {
        self.in_sequence
    }

    pub fn in_sequence_time(&self) -> i32 {
        self.in_sequence_time
    }

    /// The ack bitfield to send with the next outbound header, covering the
    /// preceding [`netsnap_common::wire::ACK_BITFIELD_BITS`] packages we've
    /// accepted relative to `in_sequence` (§4.F).
    pub fn received_bitfield(&self) -> AckBitfield {
        self.received
    }

    /// Allocate the next outbound sequence and its outstanding-table slot.
    /// The caller fills in `command_sequence`/`command_time`/`events`
    /// before the package goes out.
    pub fn begin_outbound(&mut self) -> u32 {
        self.out_sequence += 1;
        self.out_sequence
    }

    pub fn write_header(
        &self,
        writer: &mut EntropyWriter,
        sequence: u32,
        ack_sequence: u32,
        ack_bitfield: AckBitfield,
        content: ContentFlags,
    ) {
        writer.write_packed_int_delta(sequence as i32, self.out_sequence.wrapping_sub(1) as i32, DeltaContext::PackageSequence);
        writer.write_raw_bits(ack_sequence, 32);
        writer.write_raw_bits(ack_bitfield.0, 32);
        writer.write_raw_bits(content.bits() as u32, 8);
    }

    pub fn finish_outbound(&mut self, sequence: u32, package: OutstandingPackage) {
        self.outstanding.insert(sequence, package);
    }

    /// Read an inbound header. Returns `None` (per §7, "silently drop the
    /// package") for a duplicate or a sequence outside the rolling window
    /// behind `in_sequence`.
    ///
    /// The sequence is delta-coded against the last *accepted* sequence
    /// (`in_sequence`), mirroring `write_header` encoding against the last
    /// *sent* sequence on the other side — both peers' "previous" is the
    /// other's most recent actual value, not one less than it.
    pub fn read_header(&mut self, reader: &mut EntropyReader, server_time_now: i32) -> Option<PackageHeader> {
        let sequence = reader.read_packed_int_delta(self.in_sequence as i32, DeltaContext::PackageSequence) as u32;
        let ack_sequence = reader.read_raw_bits(32);
        let ack_bitfield = AckBitfield(reader.read_raw_bits(32));
        let content = ContentFlags::from_bits_truncate(reader.read_raw_bits(8) as u8);

        if sequence <= self.in_sequence && self.in_sequence != 0 {
            return None;
        }

        // Record that `sequence` was received before moving `in_sequence`
        // forward, so `received_bitfield()` reflects it on the next send.
        if self.in_sequence != 0 {
            let gap = sequence - self.in_sequence;
            self.received.advance(gap);
            if gap <= ACK_BITFIELD_BITS {
                self.received.set_acked(gap - 1);
            }
        }
        self.in_sequence = sequence;
        self.in_sequence_time = server_time_now;

        Some(PackageHeader {
            sequence,
            ack_sequence,
            ack_bitfield,
            content,
        })
    }

    /// Walk the peer's ack bitfield against the outstanding table. Bit `i`
    /// of `ack_bitfield` (accompanying `ack_sequence`) reports on our
    /// outbound package `ack_sequence - 1 - i`. `ack_sequence` itself is the
    /// peer's last-received package and is implicitly acked regardless of
    /// the bitfield. Anything older than the bitfield's coverage that is
    /// still outstanding is treated as lost.
    pub fn process_acks(&mut self, ack_sequence: u32, ack_bitfield: AckBitfield) -> Vec<DeliveryResult> {
        let mut results = Vec::new();

        if let Some(package) = self.outstanding.remove(ack_sequence) {
            results.push(DeliveryResult {
                sequence: ack_sequence,
                package,
                made_it: true,
            });
        }

        for i in 0..32u32 {
            let seq = match ack_sequence.checked_sub(1 + i) {
                Some(seq) => seq,
                None => break,
            };
            if ack_bitfield.is_acked(i) {
                if let Some(package) = self.outstanding.remove(seq) {
                    results.push(DeliveryResult {
                        sequence: seq,
                        package,
                        made_it: true,
                    });
                }
            }
        }

        let window_floor = ack_sequence.saturating_sub(32);
        for (seq, package) in self.outstanding.drain_before(window_floor) {
            results.push(DeliveryResult {
                sequence: seq,
                package,
                made_it: false,
            });
        }

        results.sort_by_key(|r| r.sequence);
        results
    }
}

/// Default delivery-outcome handling shared by anything riding on
/// [`Framing`]: release reliable events on success, re-queue them on
/// failure. Caller-specific bookkeeping (command ack, client-config
/// resend) layers on top in `session.rs`.
pub fn default_notify_delivered(result: DeliveryResult, requeue: &mut Vec<ReliableEvent>) {
    if !result.made_it {
        requeue.extend(result.package.events);
    }
}
