//! Out-of-band datagrams exchanged before a connection exists.
//!
//! Layout: [`CONNECTIONLESS_HEADER`], one type byte, then the body. Queries
//! that could be used for reflection (players, rules, rcon) carry a challenge
//! the sender must have obtained from its own address first.

use bitflags::bitflags;

use super::protocol::{CONNECTIONLESS_HEADER, MAX_PACKET_SIZE, PacketError, datagram_header};
use crate::buffer::{BufferError, ByteReader, ByteWriter};

pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_HOSTNAME_LENGTH: usize = 64;
pub const MAX_MAP_LENGTH: usize = 64;
pub const MAX_REASON_LENGTH: usize = 128;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_COMMAND_LENGTH: usize = 512;
pub const MAX_PRINT_LENGTH: usize = 1024;
pub const MAX_LOG_LINE_LENGTH: usize = 1024;
pub const MAX_RULE_KEY_LENGTH: usize = 64;
pub const MAX_RULE_VALUE_LENGTH: usize = 128;
pub const MAX_TABLE_NAME_LENGTH: usize = crate::stringtable::MAX_TABLE_NAME_LENGTH;

pub mod kind {
    pub const GET_CHALLENGE: u8 = b'q';
    pub const CHALLENGE: u8 = b'A';
    pub const CONNECT: u8 = b'k';
    pub const ACCEPT: u8 = b'B';
    pub const REJECT: u8 = b'9';
    pub const INFO: u8 = b'T';
    pub const INFO_REPLY: u8 = b'I';
    pub const DETAILS: u8 = b'm';
    pub const DETAILS_REPLY: u8 = b'D';
    pub const PLAYERS: u8 = b'U';
    pub const PLAYERS_REPLY: u8 = b'P';
    pub const RULES: u8 = b'V';
    pub const RULES_REPLY: u8 = b'E';
    pub const RCON: u8 = b'r';
    pub const PRINT: u8 = b'l';
    pub const LOG: u8 = b'R';
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServerFlags: u8 {
        const DEDICATED = 1 << 0;
        const RCON = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub protocol: u32,
    pub hostname: String,
    pub map: String,
    pub players: u8,
    pub max_players: u8,
    pub flags: ServerFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub len: u32,
    pub max_entries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetails {
    pub info: ServerInfo,
    pub tick_rate: u32,
    pub tick: u32,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub client_id: u32,
    pub name: String,
    pub connected_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub key: String,
    pub value: String,
}

impl Rule {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionlessPacket {
    GetChallenge,
    Challenge {
        challenge: u32,
    },
    Connect {
        protocol: u32,
        challenge: u32,
        name: String,
    },
    Accept {
        client_id: u32,
    },
    Reject {
        reason: String,
    },
    Info,
    InfoReply(ServerInfo),
    Details,
    DetailsReply(ServerDetails),
    Players {
        challenge: u32,
    },
    PlayersReply(Vec<PlayerInfo>),
    Rules {
        challenge: u32,
    },
    RulesReply(Vec<Rule>),
    Rcon {
        challenge: u32,
        password: String,
        command: String,
    },
    Print {
        text: String,
    },
    Log {
        challenge: u32,
        line: String,
    },
}

impl ConnectionlessPacket {
    pub fn kind(&self) -> u8 {
        match self {
            ConnectionlessPacket::GetChallenge => kind::GET_CHALLENGE,
            ConnectionlessPacket::Challenge { .. } => kind::CHALLENGE,
            ConnectionlessPacket::Connect { .. } => kind::CONNECT,
            ConnectionlessPacket::Accept { .. } => kind::ACCEPT,
            ConnectionlessPacket::Reject { .. } => kind::REJECT,
            ConnectionlessPacket::Info => kind::INFO,
            ConnectionlessPacket::InfoReply(_) => kind::INFO_REPLY,
            ConnectionlessPacket::Details => kind::DETAILS,
            ConnectionlessPacket::DetailsReply(_) => kind::DETAILS_REPLY,
            ConnectionlessPacket::Players { .. } => kind::PLAYERS,
            ConnectionlessPacket::PlayersReply(_) => kind::PLAYERS_REPLY,
            ConnectionlessPacket::Rules { .. } => kind::RULES,
            ConnectionlessPacket::RulesReply(_) => kind::RULES_REPLY,
            ConnectionlessPacket::Rcon { .. } => kind::RCON,
            ConnectionlessPacket::Print { .. } => kind::PRINT,
            ConnectionlessPacket::Log { .. } => kind::LOG,
        }
    }

    /// Whether a server should ever answer this packet type.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ConnectionlessPacket::GetChallenge
                | ConnectionlessPacket::Connect { .. }
                | ConnectionlessPacket::Info
                | ConnectionlessPacket::Details
                | ConnectionlessPacket::Players { .. }
                | ConnectionlessPacket::Rules { .. }
                | ConnectionlessPacket::Rcon { .. }
                | ConnectionlessPacket::Log { .. }
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut writer = ByteWriter::with_capacity(64);
        writer.write_u32(CONNECTIONLESS_HEADER)?;
        writer.write_u8(self.kind())?;

        match self {
            ConnectionlessPacket::GetChallenge
            | ConnectionlessPacket::Info
            | ConnectionlessPacket::Details => {}
            ConnectionlessPacket::Challenge { challenge }
            | ConnectionlessPacket::Players { challenge }
            | ConnectionlessPacket::Rules { challenge } => writer.write_u32(*challenge)?,
            ConnectionlessPacket::Connect {
                protocol,
                challenge,
                name,
            } => {
                writer.write_u32(*protocol)?;
                writer.write_u32(*challenge)?;
                writer.write_str(name)?;
            }
            ConnectionlessPacket::Accept { client_id } => writer.write_u32(*client_id)?,
            ConnectionlessPacket::Reject { reason } => writer.write_str(reason)?,
            ConnectionlessPacket::InfoReply(info) => write_info(&mut writer, info)?,
            ConnectionlessPacket::DetailsReply(details) => {
                write_info(&mut writer, &details.info)?;
                writer.write_u32(details.tick_rate)?;
                writer.write_u32(details.tick)?;
                writer.write_len(details.tables.len())?;
                for table in &details.tables {
                    writer.write_str(&table.name)?;
                    writer.write_u32(table.len)?;
                    writer.write_u32(table.max_entries)?;
                }
            }
            ConnectionlessPacket::PlayersReply(players) => {
                let count =
                    u8::try_from(players.len()).map_err(|_| BufferError::Overflow(players.len()))?;
                writer.write_u8(count)?;
                for player in players {
                    writer.write_u32(player.client_id)?;
                    writer.write_str(&player.name)?;
                    writer.write_u32(player.connected_secs)?;
                }
            }
            ConnectionlessPacket::RulesReply(rules) => {
                writer.write_len(rules.len())?;
                for rule in rules {
                    writer.write_str(&rule.key)?;
                    writer.write_str(&rule.value)?;
                }
            }
            ConnectionlessPacket::Rcon {
                challenge,
                password,
                command,
            } => {
                writer.write_u32(*challenge)?;
                writer.write_str(password)?;
                writer.write_str(command)?;
            }
            ConnectionlessPacket::Print { text } => writer.write_str(text)?,
            ConnectionlessPacket::Log { challenge, line } => {
                writer.write_u32(*challenge)?;
                writer.write_str(line)?;
            }
        }

        if writer.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(writer.len()));
        }
        Ok(writer.into_inner())
    }

    /// Decodes a whole datagram. Every length is checked against its limit
    /// and the body must be consumed exactly.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge(data.len()));
        }
        if datagram_header(data) != Some(CONNECTIONLESS_HEADER) {
            return Err(PacketError::BadHeader);
        }

        let mut reader = ByteReader::new(&data[4..]);
        let packet = match reader.read_u8()? {
            kind::GET_CHALLENGE => ConnectionlessPacket::GetChallenge,
            kind::CHALLENGE => ConnectionlessPacket::Challenge {
                challenge: reader.read_u32()?,
            },
            kind::CONNECT => ConnectionlessPacket::Connect {
                protocol: reader.read_u32()?,
                challenge: reader.read_u32()?,
                name: read_string(&mut reader, MAX_NAME_LENGTH)?,
            },
            kind::ACCEPT => ConnectionlessPacket::Accept {
                client_id: reader.read_u32()?,
            },
            kind::REJECT => ConnectionlessPacket::Reject {
                reason: read_string(&mut reader, MAX_REASON_LENGTH)?,
            },
            kind::INFO => ConnectionlessPacket::Info,
            kind::INFO_REPLY => ConnectionlessPacket::InfoReply(read_info(&mut reader)?),
            kind::DETAILS => ConnectionlessPacket::Details,
            kind::DETAILS_REPLY => {
                let info = read_info(&mut reader)?;
                let tick_rate = reader.read_u32()?;
                let tick = reader.read_u32()?;
                let count = reader.read_len(crate::stringtable::MAX_TABLES)?;
                let mut tables = Vec::with_capacity(count);
                for _ in 0..count {
                    tables.push(TableSummary {
                        name: read_string(&mut reader, MAX_TABLE_NAME_LENGTH)?,
                        len: reader.read_u32()?,
                        max_entries: reader.read_u32()?,
                    });
                }
                ConnectionlessPacket::DetailsReply(ServerDetails {
                    info,
                    tick_rate,
                    tick,
                    tables,
                })
            }
            kind::PLAYERS => ConnectionlessPacket::Players {
                challenge: reader.read_u32()?,
            },
            kind::PLAYERS_REPLY => {
                let count = reader.read_u8()?;
                let mut players = Vec::new();
                for _ in 0..count {
                    players.push(PlayerInfo {
                        client_id: reader.read_u32()?,
                        name: read_string(&mut reader, MAX_NAME_LENGTH)?,
                        connected_secs: reader.read_u32()?,
                    });
                }
                ConnectionlessPacket::PlayersReply(players)
            }
            kind::RULES => ConnectionlessPacket::Rules {
                challenge: reader.read_u32()?,
            },
            kind::RULES_REPLY => {
                let count = reader.read_u16()?;
                let mut rules = Vec::new();
                for _ in 0..count {
                    rules.push(Rule {
                        key: read_string(&mut reader, MAX_RULE_KEY_LENGTH)?,
                        value: read_string(&mut reader, MAX_RULE_VALUE_LENGTH)?,
                    });
                }
                ConnectionlessPacket::RulesReply(rules)
            }
            kind::RCON => ConnectionlessPacket::Rcon {
                challenge: reader.read_u32()?,
                password: read_string(&mut reader, MAX_PASSWORD_LENGTH)?,
                command: read_string(&mut reader, MAX_COMMAND_LENGTH)?,
            },
            kind::PRINT => ConnectionlessPacket::Print {
                text: read_string(&mut reader, MAX_PRINT_LENGTH)?,
            },
            kind::LOG => ConnectionlessPacket::Log {
                challenge: reader.read_u32()?,
                line: read_string(&mut reader, MAX_LOG_LINE_LENGTH)?,
            },
            other => return Err(PacketError::UnknownType(other)),
        };

        if !reader.is_empty() {
            return Err(PacketError::TrailingBytes(reader.remaining()));
        }
        Ok(packet)
    }
}

fn read_string(reader: &mut ByteReader<'_>, max: usize) -> Result<String, PacketError> {
    Ok(reader.read_str(max)?.to_owned())
}

fn write_info(writer: &mut ByteWriter, info: &ServerInfo) -> Result<(), BufferError> {
    writer.write_u32(info.protocol)?;
    writer.write_str(&info.hostname)?;
    writer.write_str(&info.map)?;
    writer.write_u8(info.players)?;
    writer.write_u8(info.max_players)?;
    writer.write_u8(info.flags.bits())
}

fn read_info(reader: &mut ByteReader<'_>) -> Result<ServerInfo, PacketError> {
    Ok(ServerInfo {
        protocol: reader.read_u32()?,
        hostname: read_string(reader, MAX_HOSTNAME_LENGTH)?,
        map: read_string(reader, MAX_MAP_LENGTH)?,
        players: reader.read_u8()?,
        max_players: reader.read_u8()?,
        flags: ServerFlags::from_bits_truncate(reader.read_u8()?),
    })
}

/// Cuts `text` to at most `max` bytes on a character boundary.
pub fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
