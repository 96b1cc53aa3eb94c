// session.rs — client connection state machine: handshake, map resets,
// client config push.
// Converted from: myq2-original/client/cl_parse.c's CL_ParseServerData
// (protocol-id comparison, disconnect-on-mismatch) and CL_ParseBaseline /
// the map-change handling around `cl.serverdata` — generalized from the
// original's single global `cl` struct to an explicit state machine with
// its own reset step, and from a fixed Quake2 protocol number to an
// arbitrary dotted protocol-id string compared by its last segment.

use std::sync::Arc;

use netsnap_common::stream::{CompressionModel, EntropyReader, IdentityModel};

use crate::entity::EntityTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handshake payload decoded from the server's first package while
/// Connecting (§4.G ClientInfo).
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: u8,
    pub server_tick_rate: u8,
    pub protocol_id: String,
    pub model_data: Vec<u8>,
}

/// Map-reset payload (§4.G MapInfo).
#[derive(Debug, Clone, Default)]
pub struct MapInfo {
    pub map_sequence: u16,
    pub ack_sequence: u32,
    pub processed: bool,
    pub payload: Vec<u8>,
}

/// Outbound client-configuration values (§4.G ClientConfig), resent every
/// send until a carrying package is acked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_update_rate: u32,
    pub server_update_send_rate: u16,
}

/// Compare only the suffix after the last `.` of two dotted protocol-id
/// strings, per §4.G's handshake rule.
fn protocol_suffix_matches(local: &str, remote: &str) -> bool {
    let local_suffix = local.rsplit('.').next().unwrap_or(local);
    let remote_suffix = remote.rsplit('.').next().unwrap_or(remote);
    local_suffix == remote_suffix
}

/// Full per-connection session state. Owns the entity table and map info;
/// the compression model is constructed exactly once, on ClientInfo
/// receipt, and lives for the rest of the session.
pub struct Session {
    pub connection_state: ConnectionState,
    pub client_id: u8,
    pub server_tick_rate: u8,
    pub server_time: i32,
    pub snapshot_received_time: i32,
    pub server_sim_time: f32,
    pub map_info: MapInfo,
    pub compression_model: Option<Arc<dyn CompressionModel>>,
    pub entities: EntityTable,
    pub client_config: ClientConfig,
    pub send_client_config: bool,
    /// If true, a protocol mismatch disconnects instead of just warning.
    pub verify_protocol: bool,
    expected_protocol_id: String,
}

impl Session {
    pub fn new(expected_protocol_id: impl Into<String>, verify_protocol: bool) -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            client_id: 0,
            server_tick_rate: 0,
            server_time: 0,
            snapshot_received_time: 0,
            server_sim_time: 0.0,
            map_info: MapInfo::default(),
            compression_model: None,
            entities: EntityTable::new(),
            client_config: ClientConfig::default(),
            send_client_config: true,
            verify_protocol,
            expected_protocol_id: expected_protocol_id.into(),
        }
    }

    pub fn begin_connecting(&mut self) {
        self.connection_state = ConnectionState::Connecting;
    }

    /// Handle an inbound ClientInfo. A repeat ClientInfo naming a
    /// different `clientId` once already Connected is a fatal protocol
    /// violation (§4.G); a repeat with the same id, or any ClientInfo
    /// while already Connected, is ignored.
    pub fn handle_client_info(&mut self, info: ClientInfo) {
        if self.connection_state == ConnectionState::Connected {
            if info.client_id != self.client_id {
                netsnap_common::log::com_error(
                    netsnap_common::log::ErrCode::Fatal,
                    "ClientInfo repeated with a different clientId",
                );
            }
            return;
        }

        if self.verify_protocol && !protocol_suffix_matches(&self.expected_protocol_id, &info.protocol_id) {
            netsnap_common::log::com_error(netsnap_common::log::ErrCode::Drop, "protocol mismatch, disconnecting");
            self.connection_state = ConnectionState::Disconnected;
            return;
        }

        // Constructing the real entropy coder from `model_data` is the
        // out-of-scope `CompressionModel` collaborator; `IdentityModel`
        // stands in until one is wired up behind the trait.
        let _ = &info.model_data;
        self.compression_model = Some(Arc::new(IdentityModel));
        self.client_id = info.client_id;
        self.server_tick_rate = info.server_tick_rate;
        self.connection_state = ConnectionState::Connected;
    }

    /// Handle an inbound MapInfo. Stale or repeated map sequences (`<=`
    /// the current one) are skipped.
    pub fn handle_map_info(
        &mut self,
        map_sequence: u16,
        in_sequence: u32,
        schema_reader: Option<&mut EntropyReader>,
        payload: Vec<u8>,
    ) -> bool {
        if map_sequence <= self.map_info.map_sequence && self.map_info.map_sequence != 0 {
            return false;
        }
        let _ = schema_reader; // schema registration happens in the snapshot decoder

        self.map_info = MapInfo {
            map_sequence,
            ack_sequence: in_sequence,
            processed: false,
            payload,
        };

        self.entities.clear();
        self.server_time = 0;
        true
    }

    pub fn disconnect(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_protocol_suffix_connects() {
        let mut session = Session::new("build.42", true);
        session.begin_connecting();
        session.handle_client_info(ClientInfo {
            client_id: 7,
            server_tick_rate: 60,
            protocol_id: "build.42".to_string(),
            model_data: vec![1, 2, 3],
        });
        assert_eq!(session.connection_state, ConnectionState::Connected);
        assert_eq!(session.client_id, 7);
        assert!(session.compression_model.is_some());
    }

    #[test]
    fn mismatched_protocol_suffix_disconnects_when_verifying() {
        let mut session = Session::new("build.42.a", true);
        session.begin_connecting();
        session.handle_client_info(ClientInfo {
            client_id: 7,
            server_tick_rate: 60,
            protocol_id: "build.42.b".to_string(),
            model_data: vec![],
        });
        assert_eq!(session.connection_state, ConnectionState::Disconnected);
        assert_eq!(session.client_id, 0);
    }

    #[test]
    fn mismatched_protocol_suffix_connects_when_not_verifying() {
        let mut session = Session::new("build.42.a", false);
        session.begin_connecting();
        session.handle_client_info(ClientInfo {
            client_id: 1,
            server_tick_rate: 30,
            protocol_id: "build.99.z".to_string(),
            model_data: vec![],
        });
        assert_eq!(session.connection_state, ConnectionState::Connected);
    }

    #[test]
    #[should_panic(expected = "different clientId")]
    fn repeated_client_info_with_different_id_is_fatal() {
        let mut session = Session::new("build.1", true);
        session.begin_connecting();
        session.handle_client_info(ClientInfo {
            client_id: 1,
            server_tick_rate: 60,
            protocol_id: "build.1".to_string(),
            model_data: vec![],
        });
        session.handle_client_info(ClientInfo {
            client_id: 2,
            server_tick_rate: 60,
            protocol_id: "build.1".to_string(),
            model_data: vec![],
        });
    }

    #[test]
    fn new_map_sequence_resets_entities_and_server_time() {
        let mut session = Session::new("build.1", false);
        session.server_time = 5000;
        session.entities.ensure_capacity(3);
        let adopted = session.handle_map_info(1, 10, None, vec![9, 9]);
        assert!(adopted);
        assert_eq!(session.server_time, 0);
        assert_eq!(session.entities.len(), 0);
        assert_eq!(session.map_info.ack_sequence, 10);
    }

    #[test]
    fn stale_map_sequence_is_ignored() {
        let mut session = Session::new("build.1", false);
        session.handle_map_info(5, 1, None, vec![]);
        session.server_time = 123;
        let adopted = session.handle_map_info(5, 2, None, vec![]);
        assert!(!adopted);
        assert_eq!(session.server_time, 123);
    }
}
