//! Connection state machine.
//!
//! Timers are counted in local simulation steps, not wall clock, so the
//! whole lifecycle is deterministic under test. The session owns the
//! transitions; this type only decides what the current step requires.

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Challenge sent, waiting for Welcome.
    Connecting,
    /// Welcomed, waiting for the baseline state burst.
    AwaitingFullState,
    InGame,
    /// Server restarted the session mid-game; handshake runs again but
    /// the user-visible connection survives.
    Reconnecting,
    /// Blocked on a content fetch before entering the game.
    Downloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    UserRequested,
    /// Handshake retry budget exhausted.
    Aborted,
    ProtocolError,
    ServerInitiated,
    ContentUnavailable,
    TimedOut,
}

impl DisconnectReason {
    pub fn describe(self) -> &'static str {
        match self {
            Self::UserRequested => "disconnected by user",
            Self::Aborted => "server did not answer",
            Self::ProtocolError => "protocol error",
            Self::ServerInitiated => "disconnected by server",
            Self::ContentUnavailable => "required content unavailable",
            Self::TimedOut => "connection timed out",
        }
    }
}

/// What the session must do for the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    None,
    /// Retransmit the connect challenge.
    ResendConnect,
    /// Retransmit the baseline state request.
    ResendStateRequest,
    /// Retry budget spent; connection is now Disconnected/Aborted.
    Abort,
    /// No traffic for too long; connection is now Disconnected/TimedOut.
    TimeOut,
}

#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    reason: Option<DisconnectReason>,
    pub session: u64,
    pub client_id: Option<u32>,
    pub local_entity: Option<u32>,
    pub map_name: Option<String>,
    steps_in_state: u32,
    connect_attempts: u32,
    steps_since_traffic: u32,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reason: None,
            session: 0,
            client_id: None,
            local_entity: None,
            map_name: None,
            steps_in_state: 0,
            connect_attempts: 0,
            steps_since_traffic: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.reason
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::InGame
    }

    fn enter(&mut self, state: ConnectionState) {
        if self.state != state {
            log::info!("connection: {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.steps_in_state = 0;
    }

    /// Starts the handshake. The caller sends the first challenge; it
    /// counts against the attempt budget.
    pub fn begin_connect(&mut self, session: u64) {
        self.session = session;
        self.reason = None;
        self.client_id = None;
        self.local_entity = None;
        self.map_name = None;
        self.connect_attempts = 1;
        self.steps_since_traffic = 0;
        self.enter(ConnectionState::Connecting);
    }

    /// A Welcome moves the handshake forward. Receiving one while
    /// already in game means the server restarted the session; the
    /// connection drops back to re-run the baseline exchange.
    pub fn on_welcome(&mut self, client_id: u32, map_name: &str) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.client_id = Some(client_id);
                self.map_name = Some(map_name.to_owned());
                self.enter(ConnectionState::AwaitingFullState);
            }
            ConnectionState::InGame => {
                log::warn!("welcome while in game, server restarted the session");
                self.client_id = Some(client_id);
                self.map_name = Some(map_name.to_owned());
                self.local_entity = None;
                self.enter(ConnectionState::Reconnecting);
            }
            _ => {
                log::debug!("ignoring welcome in state {:?}", self.state);
            }
        }
    }

    pub fn on_enter_game(&mut self, local_entity: u32) {
        match self.state {
            ConnectionState::AwaitingFullState
            | ConnectionState::Reconnecting
            | ConnectionState::Downloading => {
                self.local_entity = Some(local_entity);
                self.enter(ConnectionState::InGame);
            }
            _ => {
                log::debug!("ignoring enter_game in state {:?}", self.state);
            }
        }
    }

    pub fn begin_download(&mut self) {
        self.enter(ConnectionState::Downloading);
    }

    pub fn finish_download(&mut self) {
        // Re-request the baseline; the server held the burst back while
        // content was missing.
        self.enter(ConnectionState::AwaitingFullState);
    }

    pub fn fail(&mut self, reason: DisconnectReason) {
        self.reason = Some(reason);
        self.enter(ConnectionState::Disconnected);
    }

    pub fn disconnect_local(&mut self) {
        self.fail(DisconnectReason::UserRequested);
    }

    /// Any decoded datagram from the server counts as traffic.
    pub fn note_traffic(&mut self) {
        self.steps_since_traffic = 0;
    }

    /// Advances lifecycle timers by one local step.
    pub fn step(&mut self, cfg: &SyncConfig) -> LifecycleAction {
        self.steps_in_state += 1;
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                if self.steps_in_state >= cfg.retry_interval_steps {
                    self.steps_in_state = 0;
                    if self.connect_attempts >= cfg.max_connect_attempts {
                        log::warn!(
                            "no answer after {} attempts, giving up",
                            self.connect_attempts
                        );
                        self.fail(DisconnectReason::Aborted);
                        return LifecycleAction::Abort;
                    }
                    self.connect_attempts += 1;
                    return LifecycleAction::ResendConnect;
                }
                LifecycleAction::None
            }
            ConnectionState::AwaitingFullState => {
                self.steps_since_traffic += 1;
                if self.steps_since_traffic > cfg.timeout_steps {
                    self.fail(DisconnectReason::TimedOut);
                    return LifecycleAction::TimeOut;
                }
                if self.steps_in_state >= cfg.retry_interval_steps {
                    self.steps_in_state = 0;
                    return LifecycleAction::ResendStateRequest;
                }
                LifecycleAction::None
            }
            ConnectionState::InGame | ConnectionState::Downloading => {
                self.steps_since_traffic += 1;
                if self.steps_since_traffic > cfg.timeout_steps {
                    self.fail(DisconnectReason::TimedOut);
                    return LifecycleAction::TimeOut;
                }
                LifecycleAction::None
            }
            ConnectionState::Disconnected => LifecycleAction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SyncConfig {
        SyncConfig::default()
    }

    #[test]
    fn handshake_resends_on_cadence() {
        let cfg = cfg();
        let mut conn = Connection::new();
        conn.begin_connect(99);

        let mut resends = 0;
        for _ in 0..cfg.retry_interval_steps * 2 {
            if conn.step(&cfg) == LifecycleAction::ResendConnect {
                resends += 1;
            }
        }
        assert_eq!(resends, 2);
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn retry_budget_exhaustion_aborts() {
        let cfg = cfg();
        let mut conn = Connection::new();
        conn.begin_connect(99);

        let mut resends = 0;
        let mut aborted = false;
        for _ in 0..cfg.retry_interval_steps * (cfg.max_connect_attempts + 2) {
            match conn.step(&cfg) {
                LifecycleAction::ResendConnect => resends += 1,
                LifecycleAction::Abort => {
                    aborted = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(aborted);
        // The initial challenge plus resends stays within the budget.
        assert_eq!(resends, cfg.max_connect_attempts - 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::Aborted));
    }

    #[test]
    fn welcome_then_enter_game() {
        let mut conn = Connection::new();
        conn.begin_connect(7);
        conn.on_welcome(3, "e1m1");
        assert_eq!(conn.state(), ConnectionState::AwaitingFullState);
        conn.on_enter_game(12);
        assert!(conn.is_established());
        assert_eq!(conn.local_entity, Some(12));
    }

    #[test]
    fn welcome_while_in_game_reconnects() {
        let mut conn = Connection::new();
        conn.begin_connect(7);
        conn.on_welcome(3, "e1m1");
        conn.on_enter_game(12);

        conn.on_welcome(3, "e2m4");
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.local_entity, None);
        assert_eq!(conn.map_name.as_deref(), Some("e2m4"));
    }

    #[test]
    fn silence_in_game_times_out() {
        let cfg = cfg();
        let mut conn = Connection::new();
        conn.begin_connect(7);
        conn.on_welcome(1, "e1m1");
        conn.on_enter_game(2);

        let mut timed_out = false;
        for _ in 0..cfg.timeout_steps + 2 {
            if conn.step(&cfg) == LifecycleAction::TimeOut {
                timed_out = true;
                break;
            }
        }
        assert!(timed_out);
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::TimedOut));
    }

    #[test]
    fn traffic_defers_timeout() {
        let cfg = cfg();
        let mut conn = Connection::new();
        conn.begin_connect(7);
        conn.on_welcome(1, "e1m1");
        conn.on_enter_game(2);

        for _ in 0..cfg.timeout_steps {
            assert_eq!(conn.step(&cfg), LifecycleAction::None);
            conn.note_traffic();
        }
        assert!(conn.is_established());
    }
}
