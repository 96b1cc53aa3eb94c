// client.rs — top-level facade tying transport, framing, session, command
// upload, and snapshot decode into one per-tick `update`/`send_package`
// pair.
// Converted from: myq2-original/client/cl_main.c's CL_ReadPackets/
// CL_SendCmd tick loop, generalized from the original's fixed UDP socket
// and renderer-driven frame loop to an embedder-supplied [`Transport`] and
// an explicit, render-agnostic per-tick call.

use std::sync::Arc;

use netsnap_common::config::EngineConfig;
use netsnap_common::log::{com_dprintf, com_error, ErrCode};
use netsnap_common::stream::{CompressionModel, EntropyReader, EntropyWriter};

use crate::command::CommandUploader;
use crate::consumer::{MapConsumer, SnapshotConsumer};
use crate::entity::TypeRegistry;
use crate::framing::{ContentFlags, DeliveryResult, Framing, OutstandingPackage, ReliableEvent};
use crate::session::{ClientConfig, ClientInfo, ConnectionState, Session};
use crate::snapshot::{IdentityPredictor, SnapshotDecoder, SnapshotPredictor};
use crate::transport::{ConnectionId, Endpoint, Transport, TransportEvent};

/// Everything the facade needs to drive one connection: the transport,
/// the framing/session/decoder state, and the outbound command ring.
pub struct Client<T: Transport> {
    transport: T,
    connection: ConnectionId,
    framing: Framing,
    session: Session,
    decoder: SnapshotDecoder,
    types: TypeRegistry,
    commands: CommandUploader,
    outbound_events: Vec<ReliableEvent>,
    config: EngineConfig,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, expected_protocol_id: impl Into<String>, verify_protocol: bool, config: EngineConfig) -> Self {
        Self {
            transport,
            connection: ConnectionId::INVALID,
            framing: Framing::new(config.outstanding_package_capacity),
            session: Session::new(expected_protocol_id, verify_protocol),
            decoder: SnapshotDecoder::new(config.baseline_cache_capacity),
            types: TypeRegistry::new(),
            commands: CommandUploader::new(),
            outbound_events: Vec::new(),
            config,
        }
    }

    pub fn connect(&mut self, endpoint: &Endpoint) {
        self.connection = self.transport.connect(endpoint);
        self.session.begin_connecting();
    }

    pub fn disconnect(&mut self) {
        if self.connection.is_valid() {
            self.transport.disconnect(self.connection);
        }
        self.session.disconnect();
        self.connection = ConnectionId::INVALID;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state
    }

    /// Queue a command for the next outbound package.
    pub fn queue_command(&mut self, time: i32, data: Vec<u8>) {
        self.commands.queue_command(time, data);
    }

    /// Queue a reliable event (carried until acked, per [`OutstandingPackage`]).
    pub fn queue_event(&mut self, data: Vec<u8>) {
        self.outbound_events.push(ReliableEvent(data));
    }

    /// Pump the transport, decode any inbound packages, and replay exactly
    /// one drained snapshot delivery (if any arrived) to `consumer`.
    pub fn update(&mut self, server_time_now: i32, consumer: &mut dyn SnapshotConsumer, map_consumer: &mut dyn MapConsumer) {
        self.transport.update();

        while let Some(event) = self.transport.next_event() {
            match event {
                TransportEvent::Connect { connection } if connection == self.connection => {
                    com_dprintf("transport connected\n");
                }
                TransportEvent::Disconnect { connection } if connection == self.connection => {
                    self.session.disconnect();
                }
                TransportEvent::Data { connection, bytes } if connection == self.connection => {
                    self.handle_package(&bytes, server_time_now, consumer, map_consumer);
                }
                _ => {} // event for a connection we didn't hand out; ignore
            }
        }
    }

    fn handle_package(&mut self, bytes: &[u8], server_time_now: i32, consumer: &mut dyn SnapshotConsumer, map_consumer: &mut dyn MapConsumer) {
        let mut reader = EntropyReader::new(bytes, self.config.io_stream_kind, self.compression_model());
        let Some(header) = self.framing.read_header(&mut reader, server_time_now) else {
            return; // duplicate or stale package, silently dropped per §7
        };

        if header.content.contains(ContentFlags::CLIENT_INFO) {
            let info = read_client_info(&mut reader);
            self.session.handle_client_info(info);
            self.config.lock();
        }

        if header.content.contains(ContentFlags::MAP_INFO) {
            let map_sequence = reader.read_raw_bits(16) as u16;
            let payload_len = reader.read_raw_bits(32) as usize;
            let mut payload = vec![0u8; payload_len];
            reader.read_raw_bytes(&mut payload);
            let adopted = self
                .session
                .handle_map_info(map_sequence, self.framing.in_sequence(), None, payload);
            if adopted {
                let mut payload_reader = EntropyReader::raw(&self.session.map_info.payload);
                map_consumer.on_map_update(&mut payload_reader);
            }
        }

        if header.content.contains(ContentFlags::CLIENT_CONFIG) {
            self.session.client_config = ClientConfig {
                server_update_rate: reader.read_raw_bits(32),
                server_update_send_rate: reader.read_raw_bits(16) as u16,
            };
        }

        if header.content.contains(ContentFlags::SNAPSHOT) {
            let delivery = self.decoder.decode(
                &mut reader,
                header.sequence,
                &mut self.types,
                &mut self.session.entities,
                &IdentityPredictor as &dyn SnapshotPredictor,
                &mut self.session.server_time,
                &mut self.session.snapshot_received_time,
                server_time_now,
                self.config.baseline_cache_capacity,
            );

            for &(id, type_id) in &delivery.spawns {
                consumer.process_entity_spawn(delivery.server_time, id, type_id);
            }
            for &id in &delivery.updates {
                if let Some(slot) = self.session.entities.get(id as usize) {
                    consumer.process_entity_update(delivery.server_time, id, &slot.last_update);
                }
            }
            for &id in &delivery.despawns {
                consumer.process_entity_despawn(delivery.server_time, id);
            }
            consumer.process_snapshot(delivery.server_time);
            self.decoder.acknowledge_delivery();
        }

        self.framing.process_acks(header.ack_sequence, header.ack_bitfield).into_iter().for_each(|result| {
            self.notify_delivered(result);
        });
    }

    fn notify_delivered(&mut self, result: DeliveryResult) {
        if result.made_it {
            self.commands.apply_ack(result.package.command_sequence, result.package.command_time);
        } else {
            self.outbound_events.extend(result.package.events.clone());
            if result.package.carried_client_config {
                self.session.send_client_config = true;
            }
        }
    }

    /// Build and send the next outbound package, unless there is nothing
    /// new to say (no pending client config, no commands past the last
    /// ack, and no queued events) — per §4.F, packages aren't sent just to
    /// keep a heartbeat going.
    pub fn send_package(&mut self) {
        if self.framing.in_sequence() == 0 {
            return; // haven't heard from the server yet
        }
        let has_new_commands = self.commands.sequence() > self.commands.sequence_ack();
        if !self.session.send_client_config && !has_new_commands && self.outbound_events.is_empty() {
            return;
        }

        let sequence = self.framing.begin_outbound();
        let mut content = ContentFlags::empty();
        if self.session.send_client_config {
            content |= ContentFlags::CLIENT_CONFIG;
        }
        if has_new_commands {
            content |= ContentFlags::COMMANDS;
        }
        if !self.outbound_events.is_empty() {
            content |= ContentFlags::EVENTS;
        }

        let mut writer = EntropyWriter::new(self.config.io_stream_kind, self.compression_model());
        self.framing.write_header(&mut writer, sequence, self.framing.in_sequence(), self.framing.received_bitfield(), content);

        if content.contains(ContentFlags::COMMANDS) {
            self.commands.write_commands(&mut writer);
        }
        for event in &self.outbound_events {
            writer.write_raw_bits(event.0.len() as u32, 32);
            writer.write_raw_bytes(&event.0);
        }

        writer.align();
        let bytes = writer.into_bytes();

        self.framing.finish_outbound(
            sequence,
            OutstandingPackage {
                content: content.bits(),
                command_sequence: self.commands.sequence(),
                command_time: 0,
                events: std::mem::take(&mut self.outbound_events),
                carried_client_config: self.session.send_client_config,
            },
        );
        self.session.send_client_config = false;

        if self.connection.is_valid() {
            self.transport.send(self.connection, &bytes);
        }
    }

    fn compression_model(&self) -> Option<Arc<dyn CompressionModel>> {
        self.session.compression_model.clone()
    }
}

fn read_client_info(reader: &mut EntropyReader) -> ClientInfo {
    let client_id = reader.read_raw_bits(8) as u8;
    let server_tick_rate = reader.read_raw_bits(8) as u8;
    let protocol_len = reader.read_raw_bits(16) as usize;
    let mut protocol_bytes = vec![0u8; protocol_len];
    reader.read_raw_bytes(&mut protocol_bytes);
    let protocol_id = String::from_utf8(protocol_bytes).unwrap_or_else(|_| {
        com_error(ErrCode::Drop, "ClientInfo protocolId was not valid UTF-8");
        String::new()
    });
    let model_len = reader.read_raw_bits(32) as usize;
    let mut model_data = vec![0u8; model_len];
    reader.read_raw_bytes(&mut model_data);
    ClientInfo {
        client_id,
        server_tick_rate,
        protocol_id,
        model_data,
    }
}
