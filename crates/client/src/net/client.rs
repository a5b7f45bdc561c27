use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use wiretable::buffer::ByteReader;
use wiretable::net::{
    ChunkAssembler, ChunkOutcome, ConnectionState, ConnectionlessPacket, Datagram,
    NetworkEndpoint, NetworkStats, PROTOCOL_VERSION, Packet, PacketSequencer, PacketType,
};
use wiretable::{StringTableContainer, StringTableObserver};

use super::config::ClientConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { client_id: u32 },
    Rejected { reason: String },
    TablesSynced { tick: u32, strings: usize },
    TablesUpdated { tick: u32 },
    Disconnected { reason: String },
}

/// Connects to a server and keeps a replica of its string tables.
pub struct TableClient {
    endpoint: NetworkEndpoint,
    config: ClientConfig,
    state: ConnectionState,
    server: Option<SocketAddr>,
    client_id: Option<u32>,
    challenge: u32,
    sequencer: PacketSequencer,
    tables: StringTableContainer,
    assembler: ChunkAssembler,
    synced: bool,
    last_request: Instant,
    attempts: u32,
    last_ping: Instant,
    last_receive: Instant,
    epoch: Instant,
    running: Arc<AtomicBool>,
    events: VecDeque<ClientEvent>,
}

impl TableClient {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind("0.0.0.0:0")?;
        endpoint.set_timeout(Duration::from_secs(config.connection_timeout_secs));

        let now = Instant::now();
        Ok(Self {
            endpoint,
            config,
            state: ConnectionState::Disconnected,
            server: None,
            client_id: None,
            challenge: 0,
            sequencer: PacketSequencer::new(),
            tables: StringTableContainer::new(),
            assembler: ChunkAssembler::new(),
            synced: false,
            last_request: now,
            attempts: 0,
            last_ping: now,
            last_receive: now,
            epoch: now,
            running: Arc::new(AtomicBool::new(true)),
            events: VecDeque::new(),
        })
    }

    pub fn connect(&mut self, server: SocketAddr) -> io::Result<()> {
        log::info!("Connecting to {} as '{}'", server, self.config.name);

        self.reset();
        self.endpoint.set_remote(server);
        self.server = Some(server);
        self.state = ConnectionState::ChallengeRequested;
        self.attempts = 0;
        self.send_request()
    }

    pub fn disconnect(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Connected {
            let packet = Packet::new(
                self.sequencer.next_header(),
                PacketType::Disconnect {
                    reason: "client quit".to_string(),
                },
            );
            let _ = self.endpoint.send(&packet);
        }

        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.client_id = None;
        self.challenge = 0;
        self.sequencer = PacketSequencer::new();
        self.assembler.reset();
        self.synced = false;
    }

    fn drop_connection(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("Disconnected: {}", reason);
        self.reset();
        self.events.push_back(ClientEvent::Disconnected { reason });
    }

    /// Sends the handshake step for the current state.
    fn send_request(&mut self) -> io::Result<()> {
        let packet = match self.state {
            ConnectionState::ChallengeRequested => ConnectionlessPacket::GetChallenge,
            ConnectionState::Connecting => ConnectionlessPacket::Connect {
                protocol: PROTOCOL_VERSION,
                challenge: self.challenge,
                name: self.config.name.clone(),
            },
            _ => return Ok(()),
        };

        let bytes = packet
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.endpoint.send_raw_remote(&bytes)?;
        self.last_request = Instant::now();
        self.attempts += 1;
        Ok(())
    }

    pub fn update(&mut self) -> io::Result<()> {
        if self.server.is_none() {
            return Ok(());
        }

        self.process_network()?;

        match self.state {
            ConnectionState::ChallengeRequested | ConnectionState::Connecting => {
                if self.last_request.elapsed() >= self.config.retry_interval() {
                    if self.attempts >= self.config.max_attempts {
                        self.drop_connection("no response from server");
                    } else {
                        self.send_request()?;
                    }
                }
            }
            ConnectionState::Connected => {
                if self.last_ping.elapsed().as_secs_f32() >= self.config.ping_interval_secs {
                    self.send(PacketType::Ping {
                        timestamp: self.now_ms(),
                    })?;
                    self.last_ping = Instant::now();
                }

                if self.last_receive.elapsed()
                    > Duration::from_secs(self.config.connection_timeout_secs)
                {
                    self.drop_connection("server connection lost");
                }
            }
            ConnectionState::Disconnected => {}
        }

        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn send(&mut self, payload: PacketType) -> io::Result<()> {
        let packet = Packet::new(self.sequencer.next_header(), payload);
        self.endpoint.send(&packet)?;
        Ok(())
    }

    fn process_network(&mut self) -> io::Result<()> {
        let datagrams = self.endpoint.receive()?;

        for (datagram, addr) in datagrams {
            if Some(addr) != self.server {
                log::trace!("Ignoring datagram from stranger {}", addr);
                continue;
            }
            match datagram {
                Datagram::Connectionless(data) => match ConnectionlessPacket::decode(&data) {
                    Ok(packet) => self.handle_connectionless(packet)?,
                    Err(e) => log::debug!("Dropping malformed packet from {}: {}", addr, e),
                },
                Datagram::Connected(packet) => {
                    if self.state != ConnectionState::Connected
                        || !self.sequencer.process_header(&packet.header)
                    {
                        continue;
                    }
                    self.last_receive = Instant::now();
                    self.handle_payload(packet.payload)?;
                }
            }
        }

        Ok(())
    }

    fn handle_connectionless(&mut self, packet: ConnectionlessPacket) -> io::Result<()> {
        match (self.state, packet) {
            (ConnectionState::ChallengeRequested, ConnectionlessPacket::Challenge { challenge })
            | (ConnectionState::Connecting, ConnectionlessPacket::Challenge { challenge }) => {
                log::debug!("Received challenge {:#010x}", challenge);
                self.challenge = challenge;
                self.state = ConnectionState::Connecting;
                self.attempts = 0;
                self.send_request()?;
            }
            (ConnectionState::Connecting, ConnectionlessPacket::Accept { client_id }) => {
                log::info!("Connected with client id {}", client_id);
                self.client_id = Some(client_id);
                self.state = ConnectionState::Connected;
                self.last_receive = Instant::now();
                self.last_ping = Instant::now();
                self.events.push_back(ClientEvent::Connected { client_id });
            }
            (ConnectionState::Connecting, ConnectionlessPacket::Reject { reason }) => {
                log::warn!("Connection rejected: {}", reason);
                self.reset();
                self.events.push_back(ClientEvent::Rejected { reason });
            }
            (_, ConnectionlessPacket::Print { text }) => log::info!("{}", text),
            (state, other) => {
                log::debug!("Ignoring '{}' packet in state {:?}", other.kind() as char, state);
            }
        }
        Ok(())
    }

    fn handle_payload(&mut self, payload: PacketType) -> io::Result<()> {
        match payload {
            PacketType::StringTableChunk {
                transfer_id,
                tick,
                index,
                count,
                data,
            } => self.handle_chunk(transfer_id, tick, index, count, &data)?,
            PacketType::StringTableUpdate { since_tick, data } => {
                self.handle_update(since_tick, &data)?
            }
            PacketType::Ping { timestamp } => self.send(PacketType::Pong { timestamp })?,
            PacketType::Pong { timestamp } => {
                let rtt = self.now_ms().saturating_sub(timestamp);
                self.endpoint.stats_mut().record_rtt(rtt as f32);
                log::trace!("Ping RTT: {} ms", rtt);
            }
            PacketType::Disconnect { reason } => self.drop_connection(reason),
            other => log::debug!("Unexpected packet from server: {:?}", other),
        }
        Ok(())
    }

    fn handle_chunk(
        &mut self,
        transfer_id: u32,
        tick: u32,
        index: u16,
        count: u16,
        data: &[u8],
    ) -> io::Result<()> {
        let outcome = match self.assembler.accept(transfer_id, tick, index, count, data) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Bad snapshot chunk: {}", e);
                return Ok(());
            }
        };

        match outcome {
            ChunkOutcome::Pending | ChunkOutcome::Stale => Ok(()),
            // Our ack was lost; the server is still resending.
            ChunkOutcome::AlreadyComplete { tick } => {
                if self.synced && self.tables.tick() == tick {
                    self.send(PacketType::StringTablesAck { tick })?;
                }
                Ok(())
            }
            ChunkOutcome::Complete { tick, data } => {
                let mut reader = ByteReader::new(&data);
                match self.tables.read_string_tables(&mut reader) {
                    Ok(()) => {
                        self.tables.set_tick(tick);
                        self.synced = true;
                        let strings = self.tables.total_strings();
                        log::info!(
                            "Received {} tables with {} strings at tick {}",
                            self.tables.num_tables(),
                            strings,
                            tick
                        );
                        self.events
                            .push_back(ClientEvent::TablesSynced { tick, strings });
                        self.send(PacketType::StringTablesAck { tick })
                    }
                    Err(e) => {
                        log::warn!("Rejected snapshot at tick {}: {}", tick, e);
                        self.request_resync()
                    }
                }
            }
        }
    }

    fn handle_update(&mut self, since_tick: u32, data: &[u8]) -> io::Result<()> {
        if !self.synced {
            return Ok(());
        }

        let update_tick = match ByteReader::new(data).read_u32() {
            Ok(tick) => tick,
            Err(e) => {
                log::debug!("Dropping truncated update: {}", e);
                return Ok(());
            }
        };

        let current = self.tables.tick();
        if update_tick <= current {
            // Already applied; the ack must have been lost.
            return self.send(PacketType::StringTablesAck { tick: current });
        }
        if current < since_tick {
            log::warn!(
                "Update builds on tick {} but we hold tick {}",
                since_tick,
                current
            );
            return self.request_resync();
        }

        match self.tables.read_updates(&mut ByteReader::new(data)) {
            Ok(tick) => {
                log::debug!("Applied table update for tick {}", tick);
                self.events.push_back(ClientEvent::TablesUpdated { tick });
                self.send(PacketType::StringTablesAck { tick })
            }
            Err(e) => {
                log::warn!("Failed to apply table update: {}", e);
                self.request_resync()
            }
        }
    }

    fn request_resync(&mut self) -> io::Result<()> {
        self.synced = false;
        self.assembler.reset();
        self.send(PacketType::ResyncRequest)
    }

    pub fn set_observer(&mut self, observer: Box<dyn StringTableObserver>) {
        self.tables.set_observer(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True once a full snapshot has been applied.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn tables(&self) -> &StringTableContainer {
        &self.tables
    }

    /// Chunks received of the snapshot in flight, as (received, total).
    pub fn sync_progress(&self) -> Option<(usize, usize)> {
        self.assembler.progress()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.disconnect();
    }
}
