use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use wiretable::net::{
    ConnectionlessPacket, Datagram, NetworkEndpoint, PacketError, PlayerInfo, Rule, ServerDetails,
    ServerInfo,
};

use super::config::ClientConfig;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("no reply from {0}")]
    Timeout(SocketAddr),
    #[error("server kept answering with a new challenge")]
    ChallengeLoop,
    #[error("unexpected '{0}' reply")]
    Unexpected(char),
}

/// One-shot connectionless queries against a server.
pub struct QueryClient {
    endpoint: NetworkEndpoint,
    server: SocketAddr,
    retry_interval: Duration,
    max_attempts: u32,
    challenge: u32,
}

impl QueryClient {
    pub fn new(server: SocketAddr, config: &ClientConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(any_addr(server))?;
        endpoint.set_remote(server);
        Ok(Self {
            endpoint,
            server,
            retry_interval: config.retry_interval(),
            max_attempts: config.max_attempts.max(1),
            challenge: 0,
        })
    }

    pub fn info(&mut self) -> Result<ServerInfo, QueryError> {
        match self.request(&ConnectionlessPacket::Info)? {
            ConnectionlessPacket::InfoReply(info) => Ok(info),
            other => Err(QueryError::Unexpected(other.kind() as char)),
        }
    }

    pub fn details(&mut self) -> Result<ServerDetails, QueryError> {
        match self.request(&ConnectionlessPacket::Details)? {
            ConnectionlessPacket::DetailsReply(details) => Ok(details),
            other => Err(QueryError::Unexpected(other.kind() as char)),
        }
    }

    pub fn players(&mut self) -> Result<Vec<PlayerInfo>, QueryError> {
        let reply = self.challenged(|challenge| ConnectionlessPacket::Players { challenge })?;
        match reply {
            ConnectionlessPacket::PlayersReply(players) => Ok(players),
            other => Err(QueryError::Unexpected(other.kind() as char)),
        }
    }

    pub fn rules(&mut self) -> Result<Vec<Rule>, QueryError> {
        let reply = self.challenged(|challenge| ConnectionlessPacket::Rules { challenge })?;
        match reply {
            ConnectionlessPacket::RulesReply(rules) => Ok(rules),
            other => Err(QueryError::Unexpected(other.kind() as char)),
        }
    }

    /// Runs a remote console command and returns its output. A server with
    /// rcon disabled never answers, which surfaces as a timeout.
    pub fn rcon(&mut self, password: &str, command: &str) -> Result<String, QueryError> {
        let reply = self.challenged(|challenge| ConnectionlessPacket::Rcon {
            challenge,
            password: password.to_string(),
            command: command.to_string(),
        })?;
        match reply {
            ConnectionlessPacket::Print { text } => Ok(text),
            other => Err(QueryError::Unexpected(other.kind() as char)),
        }
    }

    /// Sends a challenge-guarded request, picking up a fresh challenge from
    /// the server whenever it answers with one instead.
    fn challenged<F>(&mut self, build: F) -> Result<ConnectionlessPacket, QueryError>
    where
        F: Fn(u32) -> ConnectionlessPacket,
    {
        for _ in 0..self.max_attempts {
            match self.request(&build(self.challenge))? {
                ConnectionlessPacket::Challenge { challenge } => {
                    log::debug!("Got challenge {:#010x} from {}", challenge, self.server);
                    self.challenge = challenge;
                }
                reply => return Ok(reply),
            }
        }
        Err(QueryError::ChallengeLoop)
    }

    fn request(&mut self, packet: &ConnectionlessPacket) -> Result<ConnectionlessPacket, QueryError> {
        let bytes = packet.encode()?;

        for attempt in 1..=self.max_attempts {
            self.endpoint.send_raw_remote(&bytes)?;
            if attempt > 1 {
                log::debug!("Retrying request to {} (attempt {})", self.server, attempt);
            }

            for (datagram, addr) in self.endpoint.receive_timeout(self.retry_interval)? {
                if addr != self.server {
                    continue;
                }
                let Datagram::Connectionless(data) = datagram else {
                    continue;
                };
                match ConnectionlessPacket::decode(&data) {
                    Ok(reply) if !reply.is_request() => return Ok(reply),
                    Ok(_) => {}
                    Err(e) => log::debug!("Ignoring malformed reply from {}: {}", addr, e),
                }
            }
        }

        Err(QueryError::Timeout(self.server))
    }
}

/// Wildcard bind address of the same family as `server`.
pub(crate) fn any_addr(server: SocketAddr) -> SocketAddr {
    match server {
        SocketAddr::V4(_) if server.ip().is_loopback() => SocketAddr::from(([127, 0, 0, 1], 0)),
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
