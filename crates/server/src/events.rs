use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: u32,
        addr: SocketAddr,
        name: String,
    },
    ClientDisconnected {
        client_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    TablesAcknowledged {
        client_id: u32,
        tick: u32,
    },
    ResyncRequested {
        client_id: u32,
    },
    LevelLoaded {
        map: String,
        strings: usize,
    },
    Rcon {
        addr: SocketAddr,
        command: String,
    },
    RemoteLog {
        addr: SocketAddr,
        line: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    Reconnected,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Reconnected => "reconnected",
            DisconnectReason::Shutdown => "server shutting down",
        }
    }
}

impl ServerEvent {
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ServerEvent::ConnectionDenied { .. } | ServerEvent::ResyncRequested { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::ClientConnected {
                client_id,
                addr,
                name,
            } => write!(f, "Client {} ({}) connected from {}", client_id, name, addr),
            ServerEvent::ClientDisconnected { client_id, reason } => {
                write!(f, "Client {} {}", client_id, reason.as_str())
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                write!(f, "Connection denied to {}: {}", addr, reason)
            }
            ServerEvent::TablesAcknowledged { client_id, tick } => {
                write!(f, "Client {} holds string tables at tick {}", client_id, tick)
            }
            ServerEvent::ResyncRequested { client_id } => {
                write!(f, "Client {} requested a full table resync", client_id)
            }
            ServerEvent::LevelLoaded { map, strings } => {
                write!(f, "Loaded level '{}' ({} strings)", map, strings)
            }
            ServerEvent::Rcon { addr, command } => write!(f, "rcon from {}: {}", addr, command),
            ServerEvent::RemoteLog { addr, line } => write!(f, "log from {}: {}", addr, line),
            ServerEvent::Error { message } => f.write_str(message),
        }
    }
}
