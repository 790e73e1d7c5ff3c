//! Session orchestration.
//!
//! `ClientSession` wires the whole receive path together: sequencer,
//! codec, framer, clock, histories and the connection state machine.
//! It never touches a socket; incoming datagrams are handed in as byte
//! slices and outgoing ones are queued for the caller to drain, which
//! keeps every scenario testable without a network.

use std::collections::HashMap;

use rkyv::api::high::HighSerializer;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::rancor;

use crate::clock::WorldClock;
use crate::config::SyncConfig;
use crate::history::{EntitySnapshot, History, RenderEntity, RenderSector, SectorSnapshot};
use crate::net::codec::{CodecError, PayloadCodec};
use crate::net::connection::{
    Connection, ConnectionState, DisconnectReason, LifecycleAction,
};
use crate::net::download::{ContentStore, DownloadProgress, DownloadRequest, NullContentStore};
use crate::net::message::{Dispatcher, FramingError, MessageHandler};
use crate::net::protocol::{
    AckMsg, ClientCommand, ClientDisconnectMsg, ConnectMsg, DatagramHeader, PROTOCOL_VERSION,
    RequestStateMsg, ServerMessage, build_datagram, encode_frame,
};
use crate::net::sequence::{SequenceDecision, SequenceWindow};
use crate::net::stats::{self, NetworkStats};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("payload codec: {0}")]
    Codec(#[from] CodecError),
    #[error("framing: {0}")]
    Framing(#[from] FramingError),
}

#[derive(Debug)]
struct EntityTrack {
    history: History<EntitySnapshot>,
    render: RenderEntity,
}

#[derive(Debug)]
struct SectorTrack {
    history: History<SectorSnapshot>,
    render: RenderSector,
}

pub struct ClientSession<C: ContentStore = NullContentStore> {
    config: SyncConfig,
    connection: Connection,
    window: SequenceWindow,
    codec: PayloadCodec,
    dispatcher: Dispatcher,
    clock: WorldClock,
    stats: NetworkStats,
    entities: HashMap<u32, EntityTrack>,
    sectors: HashMap<u32, SectorTrack>,
    download: Option<DownloadRequest>,
    store: C,
    pending: Vec<u8>,
    outgoing: Vec<Vec<u8>>,
    out_sequence: u32,
    player_name: String,
    /// True once `step()` has run since the last dispatch; the next
    /// datagram starts a fresh protocol trace.
    step_boundary: bool,
}

impl ClientSession<NullContentStore> {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_store(config, NullContentStore)
    }
}

impl<C: ContentStore> ClientSession<C> {
    pub fn with_store(config: SyncConfig, store: C) -> Self {
        let clock = WorldClock::new(config.interpolation_depth);
        Self {
            connection: Connection::new(),
            window: SequenceWindow::new(),
            codec: PayloadCodec::new(),
            dispatcher: Dispatcher::new(),
            clock,
            stats: NetworkStats::default(),
            entities: HashMap::new(),
            sectors: HashMap::new(),
            download: None,
            store,
            pending: Vec::new(),
            outgoing: Vec::new(),
            out_sequence: 0,
            player_name: String::new(),
            step_boundary: true,
            config,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.connection.disconnect_reason()
    }

    pub fn world_index(&self) -> i32 {
        self.clock.world_index()
    }

    pub fn map_name(&self) -> Option<&str> {
        self.connection.map_name.as_deref()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn entity(&self, entity_id: u32) -> Option<&RenderEntity> {
        self.entities.get(&entity_id).map(|t| &t.render)
    }

    pub fn entities(&self) -> impl Iterator<Item = &RenderEntity> {
        self.entities.values().map(|t| &t.render)
    }

    pub fn local_entity(&self) -> Option<&RenderEntity> {
        self.connection.local_entity.and_then(|id| self.entity(id))
    }

    pub fn sector(&self, sector_id: u32) -> Option<&RenderSector> {
        self.sectors.get(&sector_id).map(|t| &t.render)
    }

    pub fn sectors(&self) -> impl Iterator<Item = &RenderSector> {
        self.sectors.values().map(|t| &t.render)
    }

    /// Starts the handshake. The first challenge datagram is queued
    /// immediately.
    pub fn connect(&mut self, player_name: &str) {
        self.reset_link();
        self.player_name = player_name.to_owned();
        self.connection.begin_connect(stats::rand_u64());
        self.queue_connect();
        self.flush_pending();
    }

    /// Graceful local disconnect; a courtesy notice is queued for the
    /// server before the state is torn down. The notice stays in the
    /// outgoing queue so the caller can still transmit it.
    pub fn disconnect(&mut self) {
        if self.connection.state() != ConnectionState::Disconnected {
            queue_frame(
                &mut self.pending,
                ClientCommand::Disconnect,
                &ClientDisconnectMsg {
                    reason: "quit".into(),
                },
            );
            self.flush_pending();
            self.connection.disconnect_local();
        }
        self.reset_link_keep_connection();
    }

    /// Queued datagrams for the transport to send, oldest first.
    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    /// Feeds one received datagram through sequencer, codec and
    /// framer. Corrupt or unframeable data is fatal: the connection is
    /// torn down and the error returned for reporting.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Result<(), SessionError> {
        if self.connection.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        let Some((header, body)) = DatagramHeader::decode(datagram) else {
            log::warn!("dropping runt datagram of {} bytes", datagram.len());
            self.stats.decode_errors += 1;
            return Ok(());
        };
        if header.unknown_flag_bits() != 0 {
            log::warn!(
                "datagram {} carries unknown flag bits {:#04x}",
                header.sequence,
                header.unknown_flag_bits()
            );
        }

        self.stats.datagrams_received += 1;
        self.stats.bytes_received += datagram.len() as u64;

        if self.window.accept(header.sequence) == SequenceDecision::Duplicate {
            self.stats.datagrams_duplicate += 1;
            return Ok(());
        }

        if self.step_boundary {
            self.dispatcher.begin_step();
            self.step_boundary = false;
        }

        self.connection.note_traffic();
        queue_frame(
            &mut self.pending,
            ClientCommand::Ack,
            &AckMsg {
                sequence: header.sequence,
            },
        );

        let body = match self.codec.decompress(header.flags, body) {
            Ok(body) => body,
            Err(err) => {
                log::error!("datagram {} failed to decompress: {}", header.sequence, err);
                self.fail_protocol();
                return Err(err.into());
            }
        };

        let state_before = self.connection.state();
        let mut handler = IngestHandler {
            connection: &mut self.connection,
            clock: &mut self.clock,
            entities: &mut self.entities,
            sectors: &mut self.sectors,
            store: &mut self.store,
            download: &mut self.download,
            pending: &mut self.pending,
        };
        let result = self.dispatcher.dispatch(&body, &mut handler);

        if let Err(err) = result {
            log::error!(
                "datagram {} failed to parse: {} (recent: {:?})",
                header.sequence,
                err,
                self.dispatcher.recent_commands()
            );
            self.fail_protocol();
            return Err(err.into());
        }

        if state_before == ConnectionState::InGame {
            match self.connection.state() {
                ConnectionState::Reconnecting => {
                    // The server restarted the session; the link-level
                    // state belongs to the old incarnation.
                    self.reset_link_keep_connection();
                    self.queue_state_request();
                }
                ConnectionState::Downloading => {
                    // Same teardown, but the fetch just started has to
                    // survive it.
                    let download = self.download.take();
                    self.reset_link_keep_connection();
                    self.download = download;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Runs one local simulation tick: lifecycle timers, download
    /// progress, clock advance, history application and the outgoing
    /// flush.
    pub fn step(&mut self) {
        self.step_boundary = true;

        match self.connection.step(&self.config) {
            LifecycleAction::ResendConnect => self.queue_connect(),
            LifecycleAction::ResendStateRequest => self.queue_state_request(),
            LifecycleAction::Abort | LifecycleAction::TimeOut => {
                self.reset_link_keep_connection();
            }
            LifecycleAction::None => {}
        }

        if self.connection.state() == ConnectionState::Downloading {
            self.poll_download();
        }

        if self.connection.is_established() {
            self.clock.step();
            self.apply_histories();
        }

        self.flush_pending();
    }

    fn poll_download(&mut self) {
        let Some(request) = self.download.as_mut() else {
            self.connection.finish_download();
            return;
        };
        match request.poll(&mut self.store) {
            DownloadProgress::Fetching => {}
            DownloadProgress::Complete => {
                self.download = None;
                self.connection.finish_download();
                self.queue_state_request();
            }
            DownloadProgress::Failed => {
                let name = request.name.clone();
                log::error!("unable to obtain {}", name);
                self.download = None;
                self.connection.fail(DisconnectReason::ContentUnavailable);
                self.reset_link_keep_connection();
            }
        }
    }

    fn apply_histories(&mut self) {
        let index = self.clock.world_index();
        let dt = self.config.step_seconds();

        for track in self.entities.values_mut() {
            track.render.advance(&track.history, index, &self.config, dt);
        }

        for track in self.sectors.values_mut() {
            track.render.advance(&track.history, index, dt);
        }
        let horizon = self.config.sector_settle_horizon;
        self.sectors
            .retain(|_, track| !(track.render.settled() && track.history.is_stale(index, horizon)));
    }

    fn queue_connect(&mut self) {
        queue_frame(
            &mut self.pending,
            ClientCommand::Connect,
            &ConnectMsg {
                protocol: PROTOCOL_VERSION,
                session: self.connection.session,
                name: self.player_name.clone(),
            },
        );
    }

    fn queue_state_request(&mut self) {
        let since_tick = self.clock.last_server_tick().unwrap_or(-1);
        queue_frame(
            &mut self.pending,
            ClientCommand::RequestState,
            &RequestStateMsg { since_tick },
        );
    }

    fn fail_protocol(&mut self) {
        self.connection.fail(DisconnectReason::ProtocolError);
        self.reset_link_keep_connection();
    }

    /// Clears every piece of link state: histories, clock, dedup
    /// window, codec model, queued output.
    fn reset_link_keep_connection(&mut self) {
        self.entities.clear();
        self.sectors.clear();
        self.clock.reset();
        self.window.reset();
        self.codec.reset();
        self.download = None;
        self.pending.clear();
        self.step_boundary = true;
    }

    fn reset_link(&mut self) {
        self.reset_link_keep_connection();
        self.outgoing.clear();
        self.out_sequence = 0;
    }

    /// Packs all queued frames into one outgoing datagram.
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let body = std::mem::take(&mut self.pending);
        let (flags, wire) = self.codec.compress(&body);
        let datagram = build_datagram(self.out_sequence, flags, &wire);
        self.out_sequence = self.out_sequence.wrapping_add(1);
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += datagram.len() as u64;
        self.outgoing.push(datagram);
    }
}

fn queue_frame<T>(pending: &mut Vec<u8>, command: ClientCommand, msg: &T)
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    if let Err(err) = encode_frame(pending, command as u8, msg) {
        log::error!("failed to encode {:?} frame: {}", command, err);
    }
}

/// Borrows the session fields the dispatch path mutates, leaving the
/// dispatcher itself free to drive the frame walk.
struct IngestHandler<'a, C: ContentStore> {
    connection: &'a mut Connection,
    clock: &'a mut WorldClock,
    entities: &'a mut HashMap<u32, EntityTrack>,
    sectors: &'a mut HashMap<u32, SectorTrack>,
    store: &'a mut C,
    download: &'a mut Option<DownloadRequest>,
    pending: &'a mut Vec<u8>,
}

impl<C: ContentStore> MessageHandler for IngestHandler<'_, C> {
    fn active(&self) -> bool {
        self.connection.state() != ConnectionState::Disconnected
    }

    fn handle(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome(msg) => {
                let was_in_game = self.connection.state() == ConnectionState::InGame;
                self.connection.on_welcome(msg.client_id, &msg.map_name);
                self.clock.observe_server_tick(msg.server_tick);
                if !was_in_game
                    && self.connection.state() == ConnectionState::AwaitingFullState
                {
                    let since_tick = self.clock.last_server_tick().unwrap_or(-1);
                    queue_frame(
                        self.pending,
                        ClientCommand::RequestState,
                        &RequestStateMsg { since_tick },
                    );
                }
            }
            ServerMessage::EnterGame(msg) => {
                self.connection.on_enter_game(msg.local_entity);
                self.clock.observe_server_tick(msg.server_tick);
                self.clock.resync();
            }
            ServerMessage::Tick(msg) => {
                self.clock.observe_server_tick(msg.server_tick);
            }
            ServerMessage::EntityState(msg) => {
                self.clock.observe_server_tick(msg.world_index);
                if msg.is_teleport() && self.connection.local_entity == Some(msg.entity_id) {
                    // The displayed timeline must not smooth across a
                    // teleport of the local player.
                    self.clock.resync();
                }
                let track = self
                    .entities
                    .entry(msg.entity_id)
                    .or_insert_with(|| EntityTrack {
                        history: History::new(),
                        render: RenderEntity::new(msg.entity_id),
                    });
                track.history.add(EntitySnapshot::from_message(&msg));
            }
            ServerMessage::EntityRemove(msg) => {
                self.entities.remove(&msg.entity_id);
            }
            ServerMessage::SectorState(msg) => {
                self.clock.observe_server_tick(msg.world_index);
                let track = self
                    .sectors
                    .entry(msg.sector_id)
                    .or_insert_with(|| SectorTrack {
                        history: History::new(),
                        render: RenderSector::new(msg.sector_id),
                    });
                track.history.add(SectorSnapshot::from_message(&msg));
            }
            ServerMessage::ContentCheck(msg) => {
                if self.store.has(&msg.name, msg.hash) {
                    log::debug!("content {} already present", msg.name);
                } else {
                    log::info!("missing content {}, downloading", msg.name);
                    *self.download = Some(DownloadRequest::new(&msg));
                    self.connection.begin_download();
                }
            }
            ServerMessage::Print(msg) => {
                if msg.level > 0 {
                    log::warn!("server: {}", msg.text);
                } else {
                    log::info!("server: {}", msg.text);
                }
            }
            ServerMessage::Disconnect(msg) => {
                log::info!("server closed the connection: {}", msg.reason);
                self.connection.fail(DisconnectReason::ServerInitiated);
            }
        }
    }
}
