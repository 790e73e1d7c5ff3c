use bitflags::bitflags;
use rkyv::api::high::HighSerializer;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_DATAGRAM_SIZE: usize = 1400;
pub const PROTOCOL_VERSION: u32 = 3;
pub const DEFAULT_PORT: u16 = 26015;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// `[sequence: u32 LE][flags: u8]` before the frame body.
pub const HEADER_LEN: usize = 5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DatagramFlags: u8 {
        /// Body is compressed; absent means the frames follow raw.
        const COMPRESSED = 1 << 0;
        /// Selects the adaptive entropy coder instead of the dictionary
        /// codec. Only meaningful together with COMPRESSED.
        const CODEC_ADAPTIVE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub sequence: u32,
    pub flags: DatagramFlags,
}

impl DatagramHeader {
    pub fn new(sequence: u32, flags: DatagramFlags) -> Self {
        Self { sequence, flags }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.push(self.flags.bits());
    }

    /// Splits a raw datagram into header and body. Returns `None` for
    /// runts shorter than the header.
    pub fn decode(datagram: &[u8]) -> Option<(Self, &[u8])> {
        if datagram.len() < HEADER_LEN {
            return None;
        }
        let sequence = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        let flags = DatagramFlags::from_bits_retain(datagram[4]);
        Some((Self { sequence, flags }, &datagram[HEADER_LEN..]))
    }

    /// Flag bits this protocol revision does not define.
    pub fn unknown_flag_bits(&self) -> u8 {
        self.flags.bits() & !DatagramFlags::all().bits()
    }
}

pub fn build_datagram(sequence: u32, flags: DatagramFlags, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    DatagramHeader::new(sequence, flags).encode(&mut out);
    out.extend_from_slice(body);
    out
}

/// LEB128, capped at u32 range.
pub fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads a LEB128 u32 at `*pos`, advancing it. `None` on truncation or
/// overflow.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Option<u32> {
    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        if shift == 28 && byte > 0x0F {
            return None;
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift > 28 {
            return None;
        }
    }
}

/// Server-to-client command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerCommand {
    Welcome = 1,
    EnterGame = 2,
    Tick = 3,
    EntityState = 4,
    EntityRemove = 5,
    SectorState = 6,
    ContentCheck = 7,
    Print = 8,
    Disconnect = 9,
}

impl ServerCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Welcome),
            2 => Some(Self::EnterGame),
            3 => Some(Self::Tick),
            4 => Some(Self::EntityState),
            5 => Some(Self::EntityRemove),
            6 => Some(Self::SectorState),
            7 => Some(Self::ContentCheck),
            8 => Some(Self::Print),
            9 => Some(Self::Disconnect),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::EnterGame => "enter_game",
            Self::Tick => "tick",
            Self::EntityState => "entity_state",
            Self::EntityRemove => "entity_remove",
            Self::SectorState => "sector_state",
            Self::ContentCheck => "content_check",
            Self::Print => "print",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Client-to-server command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientCommand {
    Ack = 1,
    Connect = 2,
    RequestState = 3,
    Disconnect = 4,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct WelcomeMsg {
    pub client_id: u32,
    pub session: u64,
    pub map_name: String,
    pub server_tick: i32,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EnterGameMsg {
    pub local_entity: u32,
    pub server_tick: i32,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TickMsg {
    pub server_tick: i32,
}

#[derive(Debug, Clone, Copy, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityStateMsg {
    pub entity_id: u32,
    pub world_index: i32,
    pub position: [f32; 3],
    pub velocity: [i16; 3],
    pub orientation: [i16; 4],
    pub animation_state: u8,
    pub animation_frame: u8,
    pub flags: u16,
}

impl EntityStateMsg {
    pub const MAX_VELOCITY: f32 = 327.67;

    /// Sample is a teleport; interpolation must not cross it.
    pub const FLAG_TELEPORT: u16 = 1 << 0;

    pub fn new(entity_id: u32, world_index: i32) -> Self {
        Self {
            entity_id,
            world_index,
            orientation: [0, 0, 0, 32767],
            ..Self::default()
        }
    }

    pub fn encode_velocity(&mut self, vel: [f32; 3]) {
        self.velocity = [
            (vel[0].clamp(-Self::MAX_VELOCITY, Self::MAX_VELOCITY) * 100.0) as i16,
            (vel[1].clamp(-Self::MAX_VELOCITY, Self::MAX_VELOCITY) * 100.0) as i16,
            (vel[2].clamp(-Self::MAX_VELOCITY, Self::MAX_VELOCITY) * 100.0) as i16,
        ];
    }

    pub fn decode_velocity(&self) -> [f32; 3] {
        [
            self.velocity[0] as f32 / 100.0,
            self.velocity[1] as f32 / 100.0,
            self.velocity[2] as f32 / 100.0,
        ]
    }

    pub fn encode_orientation(&mut self, quat: [f32; 4]) {
        self.orientation = [
            (quat[0].clamp(-1.0, 1.0) * 32767.0) as i16,
            (quat[1].clamp(-1.0, 1.0) * 32767.0) as i16,
            (quat[2].clamp(-1.0, 1.0) * 32767.0) as i16,
            (quat[3].clamp(-1.0, 1.0) * 32767.0) as i16,
        ];
    }

    pub fn decode_orientation(&self) -> [f32; 4] {
        [
            self.orientation[0] as f32 / 32767.0,
            self.orientation[1] as f32 / 32767.0,
            self.orientation[2] as f32 / 32767.0,
            self.orientation[3] as f32 / 32767.0,
        ]
    }

    pub fn is_teleport(&self) -> bool {
        self.flags & Self::FLAG_TELEPORT != 0
    }
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityRemoveMsg {
    pub entity_id: u32,
}

#[derive(Debug, Clone, Copy, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct SectorStateMsg {
    pub sector_id: u32,
    pub world_index: i32,
    pub floor_height: f32,
    pub ceiling_height: f32,
    pub floor_target: f32,
    pub floor_speed: f32,
    pub ceiling_target: f32,
    pub ceiling_speed: f32,
    pub flags: u16,
}

impl SectorStateMsg {
    /// Sector geometry changed instantly (crusher reset, script move).
    pub const FLAG_INSTANT: u16 = 1 << 0;

    pub fn is_instant(&self) -> bool {
        self.flags & Self::FLAG_INSTANT != 0
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ContentCheckMsg {
    pub name: String,
    pub hash: u64,
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PrintMsg {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DisconnectMsg {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct AckMsg {
    pub sequence: u32,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ConnectMsg {
    pub protocol: u32,
    pub session: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct RequestStateMsg {
    pub since_tick: i32,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ClientDisconnectMsg {
    pub reason: String,
}

/// A decoded server-to-client message. Lives only for the duration of
/// one dispatch call.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Welcome(WelcomeMsg),
    EnterGame(EnterGameMsg),
    Tick(TickMsg),
    EntityState(EntityStateMsg),
    EntityRemove(EntityRemoveMsg),
    SectorState(SectorStateMsg),
    ContentCheck(ContentCheckMsg),
    Print(PrintMsg),
    Disconnect(DisconnectMsg),
}

impl ServerMessage {
    pub fn command(&self) -> ServerCommand {
        match self {
            Self::Welcome(_) => ServerCommand::Welcome,
            Self::EnterGame(_) => ServerCommand::EnterGame,
            Self::Tick(_) => ServerCommand::Tick,
            Self::EntityState(_) => ServerCommand::EntityState,
            Self::EntityRemove(_) => ServerCommand::EntityRemove,
            Self::SectorState(_) => ServerCommand::SectorState,
            Self::ContentCheck(_) => ServerCommand::ContentCheck,
            Self::Print(_) => ServerCommand::Print,
            Self::Disconnect(_) => ServerCommand::Disconnect,
        }
    }

    /// One-line digest for the per-step protocol trace.
    pub fn summary(&self) -> String {
        match self {
            Self::Welcome(m) => format!("client_id={} map={}", m.client_id, m.map_name),
            Self::EnterGame(m) => format!("entity={} tick={}", m.local_entity, m.server_tick),
            Self::Tick(m) => format!("tick={}", m.server_tick),
            Self::EntityState(m) => format!("entity={} index={}", m.entity_id, m.world_index),
            Self::EntityRemove(m) => format!("entity={}", m.entity_id),
            Self::SectorState(m) => format!("sector={} index={}", m.sector_id, m.world_index),
            Self::ContentCheck(m) => format!("name={} mirrors={}", m.name, m.mirrors.len()),
            Self::Print(m) => format!("level={}", m.level),
            Self::Disconnect(m) => format!("reason={}", m.reason),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

/// Appends one `[command_id][length varint][payload]` frame.
pub fn encode_frame<T>(out: &mut Vec<u8>, command: u8, msg: &T) -> Result<(), PacketError>
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    let bytes = rkyv::to_bytes::<rancor::Error>(msg).map_err(PacketError::Serialize)?;
    out.push(command);
    write_varint(out, bytes.len() as u32);
    out.extend_from_slice(&bytes);
    Ok(())
}
