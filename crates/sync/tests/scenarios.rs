//! End-to-end receive-path scenarios driven through `ClientSession`
//! with fabricated server datagrams.

use rkyv::api::high::HighSerializer;
use rkyv::rancor;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;

use skirmish::net::protocol::{
    ContentCheckMsg, DatagramFlags, EnterGameMsg, EntityStateMsg, ServerCommand, TickMsg,
    WelcomeMsg, build_datagram, write_varint,
};
use skirmish::net::PayloadCodec;
use skirmish::{
    ClientSession, ConnectionState, ContentStore, DisconnectReason, FetchStatus, SyncConfig,
};

fn payload<T>(msg: &T) -> Vec<u8>
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    rkyv::to_bytes::<rancor::Error>(msg).unwrap().to_vec()
}

fn body(frames: &[(ServerCommand, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (command, payload) in frames {
        out.push(*command as u8);
        write_varint(&mut out, payload.len() as u32);
        out.extend_from_slice(payload);
    }
    out
}

fn datagram(sequence: u32, frames: &[(ServerCommand, Vec<u8>)]) -> Vec<u8> {
    build_datagram(sequence, DatagramFlags::empty(), &body(frames))
}

fn welcome(tick: i32) -> (ServerCommand, Vec<u8>) {
    (
        ServerCommand::Welcome,
        payload(&WelcomeMsg {
            client_id: 1,
            session: 7,
            map_name: "e1m1".into(),
            server_tick: tick,
        }),
    )
}

fn enter_game(tick: i32) -> (ServerCommand, Vec<u8>) {
    (
        ServerCommand::EnterGame,
        payload(&EnterGameMsg {
            local_entity: 1,
            server_tick: tick,
        }),
    )
}

fn tick(server_tick: i32) -> (ServerCommand, Vec<u8>) {
    (ServerCommand::Tick, payload(&TickMsg { server_tick }))
}

fn entity(entity_id: u32, world_index: i32) -> (ServerCommand, Vec<u8>) {
    (
        ServerCommand::EntityState,
        payload(&EntityStateMsg::new(entity_id, world_index)),
    )
}

fn in_game_session() -> ClientSession {
    let mut session = ClientSession::new(SyncConfig::default());
    session.connect("tester");
    session.handle_datagram(&datagram(1, &[welcome(100)])).unwrap();
    session
        .handle_datagram(&datagram(2, &[enter_game(100)]))
        .unwrap();
    assert_eq!(session.state(), ConnectionState::InGame);
    session
}

#[test]
fn duplicated_and_reordered_datagrams() {
    let mut session = in_game_session();

    // One duplicate and one reordered pair; every unique datagram must
    // be processed exactly once.
    for (sequence, id) in [(5u32, 10u32), (5, 10), (6, 11), (8, 12), (7, 13)] {
        session
            .handle_datagram(&datagram(sequence, &[tick(101), entity(id, 101)]))
            .unwrap();
    }

    assert_eq!(session.stats().datagrams_duplicate, 1);
    assert_eq!(session.entities().count(), 4);
    assert_eq!(session.state(), ConnectionState::InGame);
}

#[test]
fn truncated_compressed_body_is_fatal() {
    let mut session = in_game_session();

    // A compressible body, then cut the compressed stream short.
    let frames: Vec<_> = (0..40).map(|i| tick(101 + i)).collect();
    let raw = body(&frames);
    let mut codec = PayloadCodec::new();
    let (flags, wire) = codec.compress(&raw);
    assert!(flags.contains(DatagramFlags::COMPRESSED));

    let truncated = build_datagram(9, flags, &wire[..wire.len() / 2]);
    assert!(session.handle_datagram(&truncated).is_err());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(
        session.disconnect_reason(),
        Some(DisconnectReason::ProtocolError)
    );
    // Link state is gone with the connection.
    assert_eq!(session.entities().count(), 0);
}

#[test]
fn unanswered_handshake_gives_up() {
    let cfg = SyncConfig::default();
    let mut session = ClientSession::new(cfg.clone());
    session.connect("tester");
    assert_eq!(session.drain_outgoing().len(), 1);

    let mut challenges = 0;
    for _ in 0..cfg.retry_interval_steps * (cfg.max_connect_attempts + 1) {
        session.step();
        challenges += session.drain_outgoing().len();
        if session.state() == ConnectionState::Disconnected {
            break;
        }
    }

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.disconnect_reason(), Some(DisconnectReason::Aborted));
    assert_eq!(challenges as u32, cfg.max_connect_attempts - 1);
}

/// Store whose fetch succeeds after a fixed number of polls.
struct SlowStore {
    polls_left: u32,
    fetching: bool,
}

impl ContentStore for SlowStore {
    fn has(&self, _name: &str, _hash: u64) -> bool {
        false
    }

    fn begin_fetch(&mut self, _name: &str, _hash: u64, _mirror: &str) -> bool {
        self.fetching = true;
        true
    }

    fn poll_fetch(&mut self) -> FetchStatus {
        assert!(self.fetching);
        if self.polls_left == 0 {
            FetchStatus::Done
        } else {
            self.polls_left -= 1;
            FetchStatus::InProgress
        }
    }
}

#[test]
fn content_download_blocks_then_completes() {
    let store = SlowStore {
        polls_left: 3,
        fetching: false,
    };
    let mut session = ClientSession::with_store(SyncConfig::default(), store);
    session.connect("tester");
    session.handle_datagram(&datagram(1, &[welcome(100)])).unwrap();

    let check = ContentCheckMsg {
        name: "maps/e1m1.pak".into(),
        hash: 0xFEED,
        mirrors: vec!["http://a".into(), "http://b".into()],
    };
    session
        .handle_datagram(&datagram(
            2,
            &[(ServerCommand::ContentCheck, payload(&check))],
        ))
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Downloading);

    for _ in 0..3 {
        session.step();
        assert_eq!(session.state(), ConnectionState::Downloading);
    }
    session.step();
    assert_eq!(session.state(), ConnectionState::AwaitingFullState);

    // The server can now answer the renewed state request.
    session
        .handle_datagram(&datagram(3, &[enter_game(104)]))
        .unwrap();
    assert_eq!(session.state(), ConnectionState::InGame);
}

#[test]
fn content_check_in_game_clears_link_state() {
    let store = SlowStore {
        polls_left: 0,
        fetching: false,
    };
    let mut session = ClientSession::with_store(SyncConfig::default(), store);
    session.connect("tester");
    session.handle_datagram(&datagram(1, &[welcome(100)])).unwrap();
    session
        .handle_datagram(&datagram(2, &[enter_game(100)]))
        .unwrap();
    session
        .handle_datagram(&datagram(3, &[tick(101), entity(10, 93)]))
        .unwrap();
    assert_eq!(session.entities().count(), 1);

    let check = ContentCheckMsg {
        name: "maps/e2m2.pak".into(),
        hash: 1,
        mirrors: vec!["http://a".into()],
    };
    session
        .handle_datagram(&datagram(
            4,
            &[(ServerCommand::ContentCheck, payload(&check))],
        ))
        .unwrap();

    // Leaving the game for the download clears histories, clock and
    // the dedup window.
    assert_eq!(session.state(), ConnectionState::Downloading);
    assert_eq!(session.entities().count(), 0);
    assert_eq!(session.world_index(), 0);

    // The fetch survives the teardown and completes.
    session.step();
    assert_eq!(session.state(), ConnectionState::AwaitingFullState);
}

#[test]
fn download_failure_disconnects_with_reason() {
    let mut session = ClientSession::new(SyncConfig::default());
    session.connect("tester");
    session.handle_datagram(&datagram(1, &[welcome(100)])).unwrap();

    let check = ContentCheckMsg {
        name: "maps/secret.pak".into(),
        hash: 0xBEEF,
        mirrors: vec!["http://a".into()],
    };
    session
        .handle_datagram(&datagram(
            2,
            &[(ServerCommand::ContentCheck, payload(&check))],
        ))
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Downloading);

    session.step();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(
        session.disconnect_reason(),
        Some(DisconnectReason::ContentUnavailable)
    );
}
