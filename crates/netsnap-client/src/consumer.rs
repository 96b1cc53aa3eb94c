// consumer.rs — application-level callback contracts.
// Converted from: myq2-original/client/cl_ents.c's direct calls into the
// renderer/game view (CL_AddPacketEntities and friends) on every parsed
// frame; generalized into explicit trait boundaries so this engine has no
// compiled-in dependency on any particular game's presentation layer.

use netsnap_common::stream::EntropyReader;

/// Callbacks invoked once per `processSnapshot`, after the decoder has
/// populated `spawns`/`updates`/`despawns` for the snapshot being
/// delivered. The engine asserts fatally if any of the three lists it
/// handed to the consumer loop are still non-empty afterward (§7).
pub trait SnapshotConsumer {
    fn process_entity_spawn(&mut self, server_time: i32, id: u32, type_id: u16);
    fn process_entity_update(&mut self, server_time: i32, id: u32, image: &[u8]);
    fn process_entity_despawn(&mut self, server_time: i32, id: u32);
    /// Called last, once all spawns/updates/despawns for this snapshot
    /// have been delivered, so the game can swap buffers.
    fn process_snapshot(&mut self, server_time: i32);
}

/// Invoked exactly once when a new map is installed (§4.G MapInfo).
pub trait MapConsumer {
    fn on_map_update(&mut self, reader: &mut EntropyReader);
}
