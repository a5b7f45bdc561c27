mod challenge;
mod connection;
mod connectionless;
mod dispatch;
mod endpoint;
mod protocol;
mod stats;
mod tracking;
mod transfer;

pub use challenge::{ChallengeTable, DEFAULT_CHALLENGE_LIFETIME, DEFAULT_MAX_CHALLENGES};
pub use connection::{ClientConnection, ConnectionManager, ConnectionState, PendingTransfer};
pub use connectionless::{
    ConnectionlessPacket, MAX_COMMAND_LENGTH, MAX_HOSTNAME_LENGTH, MAX_LOG_LINE_LENGTH,
    MAX_MAP_LENGTH, MAX_NAME_LENGTH, MAX_PASSWORD_LENGTH, MAX_PRINT_LENGTH, MAX_REASON_LENGTH,
    PlayerInfo, Rule, ServerDetails, ServerFlags, ServerInfo, TableSummary, kind, truncate_to,
};
pub use dispatch::{
    ConnectionlessDispatcher, ConnectionlessHost, DEFAULT_MAX_CONNECTIONLESS_PER_TICK,
    DEFAULT_RCON_BAN, DEFAULT_RCON_MAX_FAILURES, DispatchConfig, DispatchStats, RconGuard,
};
pub use endpoint::{Datagram, NetworkEndpoint};
pub use protocol::{
    ArchivedPacket, CONNECTED_HEADER, CONNECTIONLESS_HEADER, DEFAULT_PORT, DEFAULT_TICK_RATE,
    MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketHeader,
    PacketType, datagram_header, sequence_greater_than,
};
pub use stats::NetworkStats;
pub use tracking::{PacketSequencer, ReceiveTracker};
pub use transfer::{CHUNK_SIZE, ChunkAssembler, ChunkOutcome, MAX_CHUNKS, TransferError, split_chunks};
