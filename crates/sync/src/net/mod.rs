pub mod codec;
pub mod connection;
pub mod download;
pub mod message;
pub mod protocol;
pub mod sequence;
pub mod session;
pub mod stats;
pub mod transport;

pub use codec::{CodecError, PayloadCodec};
pub use connection::{Connection, ConnectionState, DisconnectReason, LifecycleAction};
pub use download::{
    ContentStore, DownloadProgress, DownloadRequest, FetchStatus, NullContentStore,
};
pub use message::{Dispatcher, FrameRecord, FramingError, MessageHandler};
pub use protocol::{
    ClientCommand, DatagramFlags, DatagramHeader, PacketError, ServerCommand, ServerMessage,
    DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
pub use sequence::{SequenceDecision, SequenceWindow};
pub use session::{ClientSession, SessionError};
pub use stats::NetworkStats;
pub use transport::UdpTransport;
