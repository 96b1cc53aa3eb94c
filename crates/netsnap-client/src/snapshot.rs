// snapshot.rs — the delta-compressed snapshot decoder. The core of this
// engine: turns one inbound package's snapshot segment into spawn/update/
// despawn lists against the entity table.
// Converted from: myq2-original/client/cl_ents.c's CL_ParseFrame and
// CL_ParseDelta, generalized from a fixed `entity_state_t` struct and a
// single previous frame to a server-supplied schema and up to three
// historical baselines feeding an external movement predictor.

use netsnap_common::delta::read_delta;
use netsnap_common::hash::{simple_hash, RunningHash};
use netsnap_common::log::{com_dprintf, com_error, ErrCode};
use netsnap_common::schema::{FieldDescriptor, FieldEncoding, Schema};
use netsnap_common::seqbuffer::SequenceBuffer;
use netsnap_common::stream::{DeltaContext, EntropyReader, EntropyWriter};
use netsnap_common::wire::{read_id_list, write_id_list};

use crate::entity::{EntityTable, EntityType, TypeRegistry};

/// External movement predictor. Given up to three historical baselines
/// (oldest last... no, newest first — see call site) and the current
/// server-simulation time, produces the entity's predicted image ahead of
/// any delta applied on top of it. The actual simulation math is out of
/// scope for this engine (§1) in the same way entropy coding is;
/// [`IdentityPredictor`] stands in when no real predictor is wired up or
/// when the wire disables prediction outright.
pub trait SnapshotPredictor {
    /// `baselines` is ordered newest-first: `baselines[0]` is always the
    /// entity's image at `baseSequence`, with up to two older ones behind
    /// it when network prediction is enabled.
    fn predict(&self, baselines: &[&[u8]], server_sim_time: f32) -> Vec<u8>;
}

/// Copies the newest baseline verbatim — exactly what "prediction
/// disabled" already does, so this is also what a missing real predictor
/// degrades to.
pub struct IdentityPredictor;

impl SnapshotPredictor for IdentityPredictor {
    fn predict(&self, baselines: &[&[u8]], _server_sim_time: f32) -> Vec<u8> {
        baselines.first().map(|image| image.to_vec()).unwrap_or_default()
    }
}

/// The three lists a snapshot decode hands to exactly one
/// [`crate::consumer::SnapshotConsumer`] round. The decoder refuses to
/// start another decode until these have been taken (§7, "decoder
/// re-entered before the previous snapshot's spawns/updates/despawns were
/// drained").
#[derive(Debug, Default)]
pub struct SnapshotDelivery {
    pub sequence: u32,
    pub server_time: i32,
    pub spawns: Vec<(u32, u16)>,
    pub updates: Vec<u32>,
    pub despawns: Vec<u32>,
}

fn read_delta_context(reader: &mut EntropyReader) -> DeltaContext {
    match reader.read_raw_bits(3) {
        0 => DeltaContext::PackageSequence,
        1 => DeltaContext::BaseSequence,
        2 => DeltaContext::ServerTime,
        3 => DeltaContext::CommandTime,
        4 => DeltaContext::SpawnId,
        5 => DeltaContext::DespawnId,
        6 => DeltaContext::UpdateId,
        _ => DeltaContext::Field(reader.read_raw_bits(16) as u16),
    }
}

fn write_delta_context(writer: &mut EntropyWriter, ctx: DeltaContext) {
    match ctx {
        DeltaContext::PackageSequence => writer.write_raw_bits(0, 3),
        DeltaContext::BaseSequence => writer.write_raw_bits(1, 3),
        DeltaContext::ServerTime => writer.write_raw_bits(2, 3),
        DeltaContext::CommandTime => writer.write_raw_bits(3, 3),
        DeltaContext::SpawnId => writer.write_raw_bits(4, 3),
        DeltaContext::DespawnId => writer.write_raw_bits(5, 3),
        DeltaContext::UpdateId => writer.write_raw_bits(6, 3),
        DeltaContext::Field(n) => {
            writer.write_raw_bits(7, 3);
            writer.write_raw_bits(n as u32, 16);
        }
    }
}

fn read_field_descriptor(reader: &mut EntropyReader) -> FieldDescriptor {
    let encoding = if reader.read_bit() { FieldEncoding::Packed } else { FieldEncoding::Raw };
    let bit_count = reader.read_raw_bits(8) as u8;
    let delta_context = read_delta_context(reader);
    let mask = reader.read_raw_bits(8) as u8;
    let predicted = reader.read_bit();
    FieldDescriptor {
        encoding,
        bit_count,
        delta_context,
        mask,
        predicted,
    }
}

fn write_field_descriptor(writer: &mut EntropyWriter, field: &FieldDescriptor) {
    writer.write_bit(matches!(field.encoding, FieldEncoding::Packed));
    writer.write_raw_bits(field.bit_count as u32, 8);
    write_delta_context(writer, field.delta_context);
    writer.write_raw_bits(field.mask as u32, 8);
    writer.write_bit(field.predicted);
}

fn read_schema(reader: &mut EntropyReader) -> Schema {
    let field_count = reader.read_raw_bits(8);
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(read_field_descriptor(reader));
    }
    Schema::new(fields)
}

fn write_schema(writer: &mut EntropyWriter, schema: &Schema) {
    writer.write_raw_bits(schema.fields.len() as u32, 8);
    for field in &schema.fields {
        write_field_descriptor(writer, field);
    }
}

/// Write one schema announcement: type id, field layout, and the baseline
/// image new entities of this type spawn with. Paired with the schema
/// segment [`SnapshotDecoder::decode`] reads in step 7.
pub fn write_schema_announcement(writer: &mut EntropyWriter, type_id: u16, schema: &Schema, baseline: &[u8]) {
    writer.write_raw_bits(type_id as u32, 16);
    write_schema(writer, schema);
    schema.write_fields_from_buffer(writer, baseline);
}

/// Per-sequence bookkeeping the decoder needs to resolve `serverTime`
/// deltas against whichever baseline a later snapshot references.
struct SnapshotRecord {
    server_time: i32,
}

/// Owns the decoder's cross-call state: the per-sequence serverTime
/// history and the one-shot delivery the caller must drain before the
/// next `decode`.
pub struct SnapshotDecoder {
    snapshot_times: SequenceBuffer<SnapshotRecord>,
    pending: bool,
}

impl SnapshotDecoder {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            snapshot_times: SequenceBuffer::new(history_capacity.max(1).next_power_of_two()),
            pending: false,
        }
    }

    /// Mark the current delivery as drained, permitting the next decode.
    /// The caller (`client.rs`) calls this once it has finished replaying
    /// spawns/updates/despawns to a [`crate::consumer::SnapshotConsumer`].
    pub fn acknowledge_delivery(&mut self) {
        self.pending = false;
    }

    /// Decode one snapshot segment per the 13-step algorithm. `sequence`
    /// is this package's sequence number (already read from the package
    /// header); `received_at` is the local clock reading for this package.
    #[allow(clippy::too_many_arguments)]
    pub fn decode(
        &mut self,
        reader: &mut EntropyReader,
        sequence: u32,
        registry: &mut TypeRegistry,
        entities: &mut EntityTable,
        predictor: &dyn SnapshotPredictor,
        server_time: &mut i32,
        snapshot_received_time: &mut i32,
        received_at: i32,
        baseline_cache_capacity: usize,
    ) -> SnapshotDelivery {
        if self.pending {
            com_error(ErrCode::Fatal, "snapshot decoder re-entered before the previous delivery was drained");
        }

        // Step 1: baseSequence, delta-coded against sequence - 1. Zero
        // means "delta against each entity type's schema baseline".
        let base_sequence = reader
            .read_packed_int_delta(sequence as i32 - 1, DeltaContext::BaseSequence)
            .max(0) as u32;

        // Step 2.
        let enable_network_prediction = reader.read_bit();
        let enable_hashing = reader.read_bit();

        // Step 3.
        let mut reference_sequences = vec![base_sequence];
        if enable_network_prediction {
            let base_sequence_1 = reader
                .read_packed_int_delta(base_sequence as i32 - 1, DeltaContext::BaseSequence)
                .max(0) as u32;
            let base_sequence_2 = reader
                .read_packed_int_delta(base_sequence_1 as i32 - 1, DeltaContext::BaseSequence)
                .max(0) as u32;
            reference_sequences.push(base_sequence_1);
            reference_sequences.push(base_sequence_2);
        }

        // Step 4: serverTime, delta-coded against the referenced
        // snapshot's recorded serverTime (0 if base_sequence is 0 or
        // unknown).
        let reference_server_time = if base_sequence == 0 {
            0
        } else {
            self.snapshot_times.get(base_sequence).map(|r| r.server_time).unwrap_or(0)
        };
        let this_server_time = reader.read_packed_int_delta(reference_server_time, DeltaContext::ServerTime);

        // Step 5.
        let server_sim_time = reader.read_raw_bits(8) as f32 * 0.1;

        // Step 6: only advance the clock on an in-order snapshot; an
        // out-of-order one is still fully decoded and cached below.
        if this_server_time > *server_time {
            *server_time = this_server_time;
            *snapshot_received_time = received_at;
        } else {
            com_dprintf(&format!(
                "out-of-order snapshot {sequence} (serverTime {this_server_time} <= current {server_time})\n"
            ));
        }
        self.snapshot_times.insert(sequence, SnapshotRecord { server_time: this_server_time });

        // Step 7: schema announcements. Duplicate type ids are ignored.
        let schema_count = reader.read_raw_bits(8);
        for _ in 0..schema_count {
            let type_id = reader.read_raw_bits(16) as u16;
            let schema = read_schema(reader);
            let mut baseline = vec![0u8; schema.byte_size()];
            schema.copy_fields_to_buffer(reader, &mut baseline);
            registry.intern(EntityType { type_id, schema, baseline });
        }

        // Step 8: finalize despawns whose grace period has elapsed.
        for id in 0..entities.len() {
            if let Some(slot) = entities.get_mut(id) {
                if slot.is_despawn_pending() && slot.despawn_sequence <= base_sequence {
                    slot.reset();
                }
            }
        }

        // Step 9: spawns.
        let spawn_ids = read_id_list(reader, DeltaContext::SpawnId);
        let mut temp_spawn_list = Vec::with_capacity(spawn_ids.len());
        let mut spawns = Vec::with_capacity(spawn_ids.len());
        for &id in &spawn_ids {
            let type_id = reader.read_raw_bits(16) as u16;
            let field_mask = reader.read_raw_bits(8) as u8;
            let entity_type = registry.get(type_id).unwrap_or_else(|| {
                com_error(ErrCode::Fatal, "spawn referenced an unregistered entity type");
                unreachable!()
            });

            let id = id as usize;
            entities.ensure_capacity(id);
            let slot = entities.get_mut(id).expect("just grown to include id");
            if !slot.is_live() {
                slot.spawn(entity_type, field_mask, baseline_cache_capacity);
            }
            temp_spawn_list.push(id);
            spawns.push((id as u32, type_id));
        }

        // Step 10: despawns. An id also spawned this snapshot defers its
        // reset until `despawn_sequence` is reached (step 8, next time);
        // anything else resets immediately. The same id must never appear
        // twice in one snapshot's despawn list.
        let despawn_ids = read_id_list(reader, DeltaContext::DespawnId);
        let mut despawns = Vec::with_capacity(despawn_ids.len());
        for &id in &despawn_ids {
            let id = id as usize;
            let Some(slot) = entities.get_mut(id) else { continue };
            if !slot.is_live() || slot.is_despawn_pending() {
                continue;
            }
            if temp_spawn_list.contains(&id) {
                slot.despawn_sequence = sequence;
            } else {
                slot.reset();
            }
            if despawns.contains(&(id as u32)) {
                com_error(ErrCode::Fatal, "entity despawned twice in one snapshot");
            }
            despawns.push(id as u32);
        }

        // Step 11: predict every live, non-despawn-pending entity from its
        // baseline chain.
        let live_ids: Vec<usize> = entities.iter_live_ids().collect();
        for id in live_ids {
            let slot = entities.get_mut(id).expect("id came from iter_live_ids");
            if slot.is_despawn_pending() {
                continue;
            }
            let entity_type = slot.entity_type.clone().expect("live slot always has a type");

            let use_schema_baseline = base_sequence == 0 || temp_spawn_list.contains(&id);
            let baseline0: Vec<u8> = if use_schema_baseline {
                entity_type.baseline.clone()
            } else {
                slot.baselines
                    .as_ref()
                    .and_then(|cache| cache.find_at_or_before(base_sequence))
                    .map(|(_, image)| image.clone())
                    .unwrap_or_else(|| {
                        com_error(ErrCode::Fatal, "no baseline available at or before baseSequence");
                        unreachable!()
                    })
            };

            let image = if enable_network_prediction {
                let mut chain: Vec<Vec<u8>> = vec![baseline0];
                for &seq in &reference_sequences[1..] {
                    if seq == 0 {
                        continue;
                    }
                    if let Some(cache) = &slot.baselines {
                        if let Some((_, image)) = cache.find_at_or_before(seq) {
                            chain.push(image.clone());
                        }
                    }
                }
                let refs: Vec<&[u8]> = chain.iter().map(|v| v.as_slice()).collect();
                predictor.predict(&refs, server_sim_time)
            } else {
                baseline0
            };

            if !enable_network_prediction {
                slot.fields_changed_prediction = 0;
            }
            slot.prediction = image;
        }

        // Step 12: updates — each is a delta against the just-predicted
        // image, optionally hash-checked.
        let mut running_hash = RunningHash::new();
        let update_ids = read_id_list(reader, DeltaContext::UpdateId);
        for id in update_ids {
            let id = id as usize;
            let Some(slot) = entities.get_mut(id) else {
                com_error(ErrCode::Fatal, "update referenced a non-live entity");
                unreachable!()
            };
            if !slot.is_live() {
                com_error(ErrCode::Fatal, "update referenced a non-live entity");
            }
            let entity_type = slot.entity_type.clone().expect("checked live above");
            let decoded = read_delta(reader, &entity_type.schema, &slot.prediction, slot.field_mask, &mut running_hash);

            if enable_hashing {
                let expected = reader.read_raw_bits(32);
                let actual = simple_hash(&decoded.image);
                if expected != actual {
                    com_dprintf(&format!("hash mismatch on entity {id}: expected {expected:#010x}, got {actual:#010x}\n"));
                    debug_assert_eq!(expected, actual, "hash mismatch on entity {id}");
                }
            }

            slot.prediction = decoded.image;
            slot.fields_changed_prediction = decoded.fields_changed;
        }

        // Step 13: commit. Every live, non-pending entity's prediction
        // becomes its new baseline at this sequence; it's surfaced as an
        // "update" to the consumer if its image actually moved (or it had
        // no prior baseline at all).
        let mut updates = Vec::new();
        let mut num_ents: u32 = 0;
        let mut snapshot_hash = RunningHash::new();

        let live_ids: Vec<usize> = entities.iter_live_ids().collect();
        for id in live_ids {
            let slot = entities.get_mut(id).expect("id came from iter_live_ids");
            if slot.is_despawn_pending() {
                continue;
            }

            let had_baseline = slot.baselines.as_ref().map(|c| !c.is_empty()).unwrap_or(false);
            let changed = slot.prediction != slot.last_update;

            if let Some(cache) = slot.baselines.as_mut() {
                cache.insert(sequence, slot.prediction.clone());
            }

            if sequence > slot.last_update_sequence {
                if !had_baseline || changed {
                    updates.push(id as u32);
                }
                slot.last_update = slot.prediction.clone();
                slot.last_update_sequence = sequence;
            }

            if enable_hashing {
                snapshot_hash.update(&slot.prediction);
                num_ents += 1;
            }
        }

        if enable_hashing {
            let expected_num_ents = reader.read_raw_bits(32);
            if expected_num_ents != num_ents {
                com_error(ErrCode::Fatal, "snapshot entity-count mismatch");
            }
        }

        self.pending = true;
        SnapshotDelivery {
            sequence,
            server_time: this_server_time,
            spawns,
            updates,
            despawns,
        }
    }
}

/// Write side of the snapshot wire format, used by tests (and a loopback
/// server double) to produce input for [`SnapshotDecoder::decode`].
#[allow(clippy::too_many_arguments)]
pub fn write_snapshot(
    writer: &mut EntropyWriter,
    sequence: u32,
    base_sequence: u32,
    enable_network_prediction: bool,
    enable_hashing: bool,
    server_time: i32,
    reference_server_time: i32,
    server_sim_time_tenths: u8,
    schemas: &[(u16, Schema, Vec<u8>)],
    spawns: &[(i32, u16, u8)],
    despawns: &[i32],
    updates: &[(i32, Vec<u8>, Vec<u8>, u8)], // (id, baseline, current, field_mask) — field_mask re-gates as in write_delta
) {
    writer.write_packed_int_delta(base_sequence as i32, sequence as i32 - 1, DeltaContext::BaseSequence);
    writer.write_bit(enable_network_prediction);
    writer.write_bit(enable_hashing);
    if enable_network_prediction {
        writer.write_packed_int_delta(0, base_sequence as i32 - 1, DeltaContext::BaseSequence);
        writer.write_packed_int_delta(0, -1, DeltaContext::BaseSequence);
    }
    writer.write_packed_int_delta(server_time, reference_server_time, DeltaContext::ServerTime);
    writer.write_raw_bits(server_sim_time_tenths as u32, 8);

    writer.write_raw_bits(schemas.len() as u32, 8);
    for (type_id, schema, baseline) in schemas {
        write_schema_announcement(writer, *type_id, schema, baseline);
    }

    write_id_list(writer, &spawns.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(), DeltaContext::SpawnId);
    for (_, type_id, field_mask) in spawns {
        writer.write_raw_bits(*type_id as u32, 16);
        writer.write_raw_bits(*field_mask as u32, 8);
    }

    write_id_list(writer, despawns, DeltaContext::DespawnId);

    write_id_list(writer, &updates.iter().map(|(id, ..)| *id).collect::<Vec<_>>(), DeltaContext::UpdateId);
    let mut hash = RunningHash::new();
    for (_, baseline, current, field_mask) in updates {
        let schema = &schemas.first().expect("updates require at least one announced schema").1;
        netsnap_common::delta::write_delta(writer, schema, baseline, current, *field_mask, &mut hash);
        if enable_hashing {
            // Must match what the decoder will actually reconstruct, not
            // `current` verbatim — they differ when a masked-out field has
            // drifted from baseline (see `delta::gated_image`).
            let reconstructed = netsnap_common::delta::gated_image(schema, baseline, current, *field_mask);
            writer.write_raw_bits(simple_hash(&reconstructed), 32);
        }
    }
    if enable_hashing {
        writer.write_raw_bits(updates.len() as u32, 32);
    }
}
