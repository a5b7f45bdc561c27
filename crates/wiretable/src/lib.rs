//! Replicated string tables, the connectionless packet layer in front of
//! them, and descriptor-driven byte order conversion.

pub mod buffer;
pub mod fields;
pub mod net;
pub mod stringtable;

pub use buffer::{BufferError, ByteReader, ByteWriter};
pub use fields::{ByteSwap, DataMap, DataMapRegistry, Endian, FieldDescriptor, FieldKind, SwapError};
pub use net::{
    ClientConnection, ConnectionManager, ConnectionState, ConnectionlessDispatcher,
    ConnectionlessHost, ConnectionlessPacket, DEFAULT_PORT, DEFAULT_TICK_RATE, Datagram,
    DispatchConfig, NetworkEndpoint, NetworkStats, Packet, PacketError, PacketHeader, PacketType,
};
pub use stringtable::{
    NetworkStringTable, StringIndex, StringTableContainer, StringTableError, StringTableObserver,
    TableFlags, TableHandle, TableId,
};
