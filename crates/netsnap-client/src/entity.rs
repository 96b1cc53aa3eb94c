// entity.rs — entity type registry and the per-id entity table.
// Converted from: myq2-original/client/cl_ents.c's `cl_entities` array
// (dense, indexed by entity number) and cl_parse.c's baseline table,
// generalized from the original's fixed `entity_state_t` struct to a
// server-supplied schema and reworked to hold the sparse per-entity
// baseline cache this engine's delta decoding needs.

use std::collections::HashMap;
use std::rc::Rc;

use netsnap_common::schema::Schema;
use netsnap_common::sparse_seqbuffer::SparseSequenceCache;

/// An interned entity type: its wire schema and the "schema zero" image
/// used as the delta baseline for an entity that has never been acked.
/// Immutable once registered — the original's per-type baseline has the
/// same "set once, read forever" lifecycle.
pub struct EntityType {
    pub type_id: u16,
    pub schema: Schema,
    pub baseline: Vec<u8>,
}

/// Interns entity types by id. A duplicate registration for an id already
/// known is silently ignored, matching the decoder's "duplicates are
/// ignored" schema-read rule (§4.H step 7).
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<u16, Rc<EntityType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_id: u16) -> Option<Rc<EntityType>> {
        self.types.get(&type_id).cloned()
    }

    pub fn contains(&self, type_id: u16) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Register `entity_type` if `type_id` is not already known. Returns
    /// `true` if it was newly inserted.
    pub fn intern(&mut self, entity_type: EntityType) -> bool {
        if self.types.contains_key(&entity_type.type_id) {
            return false;
        }
        self.types.insert(entity_type.type_id, Rc::new(entity_type));
        true
    }
}

/// One slot in the entity table. Lifecycle: *free* (`entity_type` absent)
/// → *live* on first spawn → *despawn-pending* (`despawn_sequence > 0`)
/// when a despawn arrives → *free* again once a later snapshot's
/// baseSequence reaches `despawn_sequence`.
#[derive(Default)]
pub struct EntitySlot {
    pub entity_type: Option<Rc<EntityType>>,
    pub field_mask: u8,
    pub last_update: Vec<u8>,
    pub last_update_sequence: u32,
    pub despawn_sequence: u32,
    pub prediction: Vec<u8>,
    pub fields_changed_prediction: u64,
    pub baselines: Option<SparseSequenceCache<Vec<u8>>>,
}

impl EntitySlot {
    pub fn is_live(&self) -> bool {
        self.entity_type.is_some()
    }

    pub fn is_despawn_pending(&self) -> bool {
        self.despawn_sequence > 0
    }

    /// Install a type on a free slot, sizing its scratch buffers to the
    /// schema's canonical image width.
    pub fn spawn(&mut self, entity_type: Rc<EntityType>, field_mask: u8, baseline_cache_capacity: usize) {
        let byte_size = entity_type.schema.byte_size();
        self.last_update = vec![0u8; byte_size];
        self.last_update_sequence = 0;
        self.despawn_sequence = 0;
        self.prediction = vec![0u8; byte_size];
        self.fields_changed_prediction = 0;
        self.baselines = Some(SparseSequenceCache::new(baseline_cache_capacity));
        self.entity_type = Some(entity_type);
        self.field_mask = field_mask;
    }

    /// Free the slot entirely, matching the original's `Entity::Reset()`.
    pub fn reset(&mut self) {
        *self = EntitySlot::default();
    }
}

/// Dense, growable table indexed by entity id. Ids are small and dense per
/// the data model, so a `Vec` amortises to O(1) without the hashing a
/// dictionary would cost on every snapshot access (Design Note, §9).
#[derive(Default)]
pub struct EntityTable {
    slots: Vec<EntitySlot>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Grow the table so `id` is a valid index, matching the decoder's
    /// "grow entities so id < length" rule on spawn (§4.H step 9).
    pub fn ensure_capacity(&mut self, id: usize) {
        if id >= self.slots.len() {
            self.slots.resize_with(id + 1, EntitySlot::default);
        }
    }

    pub fn get(&self, id: usize) -> Option<&EntitySlot> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut EntitySlot> {
        self.slots.get_mut(id)
    }

    pub fn iter_live_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_live())
            .map(|(id, _)| id)
    }

    /// Clear the whole table back to empty, per a map reset (§4.G MapInfo).
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsnap_common::schema::{FieldDescriptor, FieldEncoding};
    use netsnap_common::stream::DeltaContext;

    fn dummy_type(type_id: u16) -> EntityType {
        let schema = Schema::new(vec![FieldDescriptor {
            encoding: FieldEncoding::Raw,
            bit_count: 8,
            delta_context: DeltaContext::Field(0),
            mask: 0x01,
            predicted: false,
        }]);
        let baseline = vec![0u8; schema.byte_size()];
        EntityType {
            type_id,
            schema,
            baseline,
        }
    }

    #[test]
    fn registry_ignores_duplicate_type_ids() {
        let mut reg = TypeRegistry::new();
        assert!(reg.intern(dummy_type(5)));
        assert!(!reg.intern(dummy_type(5)));
        assert!(reg.contains(5));
    }

    #[test]
    fn ensure_capacity_grows_table_and_new_slots_are_free() {
        let mut table = EntityTable::new();
        table.ensure_capacity(3);
        assert_eq!(table.len(), 4);
        assert!(!table.get(3).unwrap().is_live());
    }

    #[test]
    fn spawn_then_reset_returns_slot_to_free() {
        let mut table = EntityTable::new();
        table.ensure_capacity(0);
        let ty = Rc::new(dummy_type(1));
        table.get_mut(0).unwrap().spawn(ty, 0xFF, 8);
        assert!(table.get(0).unwrap().is_live());
        table.get_mut(0).unwrap().reset();
        assert!(!table.get(0).unwrap().is_live());
    }
}
