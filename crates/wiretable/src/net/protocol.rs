use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5754_424C;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 30;

/// First four bytes of every datagram sent outside a connection.
pub const CONNECTIONLESS_HEADER: u32 = 0xFFFF_FFFF;
/// First four bytes of every datagram carrying a connected [`Packet`].
pub const CONNECTED_HEADER: u32 = 0xFFFF_FFFE;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Payloads exchanged once a client has been accepted.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    /// One slice of a full string table snapshot taken at `tick`.
    StringTableChunk {
        transfer_id: u32,
        tick: u32,
        index: u16,
        count: u16,
        data: Vec<u8>,
    },
    /// Changes after `since_tick`, written at the tick stored in `data`.
    StringTableUpdate { since_tick: u32, data: Vec<u8> },
    /// The client holds every table change up to `tick`.
    StringTablesAck { tick: u32 },
    /// The client's tables diverged and need a full snapshot.
    ResyncRequest,
    Ping { timestamp: u64 },
    Pong { timestamp: u64 },
    Disconnect { reason: String },
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("malformed packet: {0}")]
    Malformed(#[from] crate::buffer::BufferError),
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),
    #[error("missing or invalid datagram header")]
    BadHeader,
    #[error("packet of {0} bytes exceeds the {MAX_PACKET_SIZE} byte limit")]
    TooLarge(usize),
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    /// Encodes the packet behind [`CONNECTED_HEADER`].
    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        let archived = rkyv::to_bytes::<rancor::Error>(self).map_err(PacketError::Serialize)?;

        let mut data = Vec::with_capacity(archived.len() + 4);
        data.extend_from_slice(&CONNECTED_HEADER.to_le_bytes());
        data.extend_from_slice(&archived);
        Ok(data)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let body = data
            .strip_prefix(&CONNECTED_HEADER.to_le_bytes())
            .ok_or(PacketError::BadHeader)?;

        // Received datagrams carry no alignment guarantee.
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);

        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)
    }
}

/// Peeks at the leading header of a datagram.
pub fn datagram_header(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_packet_serialization() {
        let header = PacketHeader::new(1, 0, 0);
        let payload = PacketType::StringTableChunk {
            transfer_id: 3,
            tick: 40,
            index: 0,
            count: 2,
            data: vec![1, 2, 3, 4],
        };
        let packet = Packet::new(header, payload);

        let serialized = packet.serialize().unwrap();
        assert_eq!(datagram_header(&serialized), Some(CONNECTED_HEADER));

        let deserialized = Packet::deserialize(&serialized).unwrap();
        assert_eq!(packet, deserialized);
    }

    #[test]
    fn test_unaligned_input() {
        let packet = Packet::new(PacketHeader::new(9, 8, 7), PacketType::Ping { timestamp: 5 });
        let serialized = packet.serialize().unwrap();

        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&serialized);
        assert_eq!(Packet::deserialize(&shifted[1..]).unwrap(), packet);
    }

    #[test]
    fn test_connectionless_header_rejected() {
        let mut data = CONNECTIONLESS_HEADER.to_le_bytes().to_vec();
        data.push(b'T');
        assert!(matches!(
            Packet::deserialize(&data),
            Err(PacketError::BadHeader)
        ));
    }
}
