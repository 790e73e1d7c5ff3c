pub mod clock;
pub mod config;
pub mod history;
pub mod net;
pub mod timestep;

pub use clock::WorldClock;
pub use config::SyncConfig;
pub use history::{
    EntitySnapshot, History, NUM_SNAPSHOTS, RenderEntity, RenderSector, SectorSnapshot,
    Timestamped,
};
pub use net::{
    ClientSession, CodecError, ConnectionState, ContentStore, DEFAULT_PORT, DEFAULT_TICK_RATE,
    DisconnectReason, FetchStatus, FramingError, NetworkStats, NullContentStore, SessionError,
    UdpTransport,
};
pub use timestep::FixedTimestep;
