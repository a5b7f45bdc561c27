use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use wiretable::buffer::ByteWriter;
use wiretable::net::{
    ConnectionManager, ConnectionlessDispatcher, ConnectionlessHost, Datagram, DispatchStats,
    MAX_PRINT_LENGTH, NetworkEndpoint, NetworkStats, PROTOCOL_VERSION, Packet, PacketType,
    PendingTransfer, PlayerInfo, Rule, ServerDetails, ServerFlags, ServerInfo, TableSummary,
    split_chunks,
};
use wiretable::stringtable::StringTableError;

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::manifest::Manifest;
use crate::rcon::{HELP, RconCommand};
use crate::session::Session;

/// Incremental updates larger than this are replaced by a full snapshot.
const MAX_UPDATE_BYTES: usize = 1024;

pub struct TableServer {
    endpoint: NetworkEndpoint,
    connections: ConnectionManager,
    dispatcher: ConnectionlessDispatcher,
    session: Session,
    manifest: Option<Manifest>,
    config: ServerConfig,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    next_transfer_id: u32,
    pending_kicks: Vec<u32>,
    running: Arc<AtomicBool>,
    start_time: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl TableServer {
    pub fn new(bind_addr: &str, config: ServerConfig, manifest: Option<Manifest>) -> Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(bind_addr)
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        endpoint.set_timeout(Duration::from_secs(config.client_timeout_secs));

        let mut session = Session::new();
        let strings = session
            .load_level(&config.map, manifest.as_ref())
            .context("failed to load initial level")?;

        let mut pending_events = VecDeque::new();
        pending_events.push_back(ServerEvent::LevelLoaded {
            map: config.map.clone(),
            strings,
        });

        Ok(Self {
            endpoint,
            connections: ConnectionManager::with_timeout(
                config.max_clients,
                config.client_timeout_secs,
            ),
            dispatcher: ConnectionlessDispatcher::new(config.dispatch_config()),
            session,
            manifest,
            tick_duration: config.tick_duration(),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            next_transfer_id: 1,
            pending_kicks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
            pending_events,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                if event.is_error() {
                    log::error!("{}", event);
                } else if event.is_warning() {
                    log::warn!("{}", event);
                } else {
                    log::info!("{}", event);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    pub fn shutdown_connections(&mut self) {
        for client_id in self.connections.ids() {
            self.disconnect_client(client_id, DisconnectReason::Shutdown);
        }
    }

    pub fn kick_client(&mut self, client_id: u32) -> bool {
        self.disconnect_client(client_id, DisconnectReason::Kicked)
    }

    fn disconnect_client(&mut self, client_id: u32, reason: DisconnectReason) -> bool {
        let Some(mut client) = self.connections.remove(client_id) else {
            return false;
        };

        if matches!(reason, DisconnectReason::Kicked | DisconnectReason::Shutdown) {
            let packet = Packet::new(
                client.next_header(),
                PacketType::Disconnect {
                    reason: reason.as_str().to_string(),
                },
            );
            let _ = self.endpoint.send_to(&packet, client.addr);
        }

        self.session.remove_user(client_id);
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { client_id, reason });
        true
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick();
        }
    }

    fn tick(&mut self) {
        self.dispatcher.begin_tick();

        for client in self.connections.cleanup_timed_out() {
            self.session.remove_user(client.client_id);
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    client_id: client.client_id,
                    reason: DisconnectReason::Timeout,
                });
        }

        self.replicate_tables();
        self.session.advance_tick();
    }

    /// Sends every client what it is missing as of the closing tick: a
    /// chunked snapshot until one is acknowledged, then incremental updates.
    fn replicate_tables(&mut self) {
        let tick = self.session.tick();
        let mut snapshot = None;

        for client_id in self.connections.ids() {
            if let Err(e) = self.replicate_to(client_id, tick, &mut snapshot) {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("Failed to replicate tables to client {}: {:#}", client_id, e),
                });
            }
        }
    }

    fn replicate_to(
        &mut self,
        client_id: u32,
        tick: u32,
        snapshot: &mut Option<Vec<Vec<u8>>>,
    ) -> Result<()> {
        let resend = self.config.resend_interval();
        let Some(client) = self.connections.get_mut(client_id) else {
            return Ok(());
        };

        if client.transfer.is_none() && client.acked_table_tick.is_none() {
            if snapshot.is_none() {
                *snapshot = Some(build_snapshot(&self.session, tick)?);
            }
            let chunks = snapshot.clone().unwrap_or_default();

            let transfer_id = self.next_transfer_id;
            self.next_transfer_id = self.next_transfer_id.wrapping_add(1).max(1);
            client.transfer = Some(PendingTransfer::new(transfer_id, tick, chunks));
        }

        if let Some(transfer) = client.transfer.as_mut() {
            if !transfer.is_due(resend) {
                return Ok(());
            }
            if transfer.sends > 0 {
                log::debug!(
                    "Resending snapshot {} to client {} (attempt {})",
                    transfer.transfer_id,
                    client_id,
                    transfer.sends + 1
                );
            }
            transfer.mark_sent();

            let count = transfer.chunks.len() as u16;
            for (index, chunk) in transfer.chunks.iter().enumerate() {
                let packet = Packet::new(
                    client.sequencer.next_header(),
                    PacketType::StringTableChunk {
                        transfer_id: transfer.transfer_id,
                        tick: transfer.tick,
                        index: index as u16,
                        count,
                        data: chunk.clone(),
                    },
                );
                self.endpoint.send_to(&packet, client.addr)?;
            }
            return Ok(());
        }

        let Some(acked) = client.acked_table_tick else {
            return Ok(());
        };
        let tables = self.session.tables();
        if !tables.changed_since(acked) {
            return Ok(());
        }
        let due = match client.last_update_sent {
            Some((sent_tick, sent_at)) => {
                tables.changed_since(sent_tick) || sent_at.elapsed() >= resend
            }
            None => true,
        };
        if !due {
            return Ok(());
        }

        let mut writer = ByteWriter::new();
        tables.write_updates(&mut writer, acked)?;
        if writer.len() > MAX_UPDATE_BYTES {
            log::debug!(
                "Update for client {} is {} bytes, falling back to a snapshot",
                client_id,
                writer.len()
            );
            client.require_full_snapshot();
            return Ok(());
        }

        let packet = Packet::new(
            client.next_header(),
            PacketType::StringTableUpdate {
                since_tick: acked,
                data: writer.into_inner(),
            },
        );
        self.endpoint.send_to(&packet, client.addr)?;
        client.last_update_sent = Some((tick, Instant::now()));
        Ok(())
    }

    fn process_network(&mut self) -> std::io::Result<()> {
        let datagrams = self.endpoint.receive()?;

        for (datagram, addr) in datagrams {
            match datagram {
                Datagram::Connectionless(data) => self.handle_connectionless(addr, &data)?,
                Datagram::Connected(packet) => self.handle_packet(packet, addr)?,
            }
        }

        for client_id in std::mem::take(&mut self.pending_kicks) {
            self.kick_client(client_id);
        }

        Ok(())
    }

    fn handle_connectionless(&mut self, addr: SocketAddr, data: &[u8]) -> std::io::Result<()> {
        let rcon_enabled = self.dispatcher.rcon_enabled();
        let mut host = ServerHost {
            connections: &mut self.connections,
            session: &mut self.session,
            manifest: self.manifest.as_ref(),
            config: &self.config,
            events: &mut self.pending_events,
            kicks: &mut self.pending_kicks,
            rcon_enabled,
            uptime: self.start_time.elapsed(),
        };

        if let Some(reply) = self.dispatcher.dispatch(&mut host, addr, data) {
            self.endpoint.send_raw(&reply, addr)?;
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> std::io::Result<()> {
        let Some(client) = self.connections.get_by_addr_mut(&addr) else {
            log::trace!("Ignoring connected packet from unknown address {}", addr);
            return Ok(());
        };
        if !client.process_header(&packet.header) {
            return Ok(());
        }
        let client_id = client.client_id;

        match packet.payload {
            PacketType::StringTablesAck { tick } => {
                let settles_transfer = client.transfer.is_some();
                if client.acknowledge_tables(tick) && settles_transfer {
                    self.pending_events
                        .push_back(ServerEvent::TablesAcknowledged { client_id, tick });
                }
            }
            PacketType::ResyncRequest => {
                client.require_full_snapshot();
                self.pending_events
                    .push_back(ServerEvent::ResyncRequested { client_id });
            }
            PacketType::Ping { timestamp } => {
                let packet = Packet::new(client.next_header(), PacketType::Pong { timestamp });
                self.endpoint.send_to(&packet, addr)?;
            }
            PacketType::Disconnect { reason } => {
                log::debug!("Client {} left: {}", client_id, reason);
                self.disconnect_client(client_id, DisconnectReason::Graceful);
            }
            PacketType::Pong { .. } => {}
            other => {
                log::debug!("Unexpected packet from client {}: {:?}", client_id, other);
            }
        }

        Ok(())
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.session.tick(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            hostname: self.config.hostname.clone(),
            map: self.session.map().to_string(),
            client_count: self.connections.connected_count(),
            max_clients: self.config.max_clients,
            tables: table_summaries(&self.session),
            network_stats: self.endpoint.stats().clone(),
            dispatch_stats: self.dispatcher.stats().clone(),
        }
    }
}

fn build_snapshot(session: &Session, tick: u32) -> Result<Vec<Vec<u8>>> {
    let mut writer = ByteWriter::new();
    session.tables().write_string_tables(&mut writer)?;
    let chunks = split_chunks(writer.as_slice())?;
    log::debug!(
        "Snapshot at tick {}: {} bytes in {} chunks",
        tick,
        writer.len(),
        chunks.len()
    );
    Ok(chunks)
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u32,
    pub uptime_secs: u64,
    pub hostname: String,
    pub map: String,
    pub client_count: usize,
    pub max_clients: usize,
    pub tables: Vec<TableSummary>,
    pub network_stats: NetworkStats,
    pub dispatch_stats: DispatchStats,
}

fn table_summaries(session: &Session) -> Vec<TableSummary> {
    session
        .tables()
        .tables()
        .map(|table| TableSummary {
            name: table.name().to_string(),
            len: table.len() as u32,
            max_entries: table.max_entries() as u32,
        })
        .collect()
}

/// The parts of the server the connectionless dispatcher may touch.
struct ServerHost<'a> {
    connections: &'a mut ConnectionManager,
    session: &'a mut Session,
    manifest: Option<&'a Manifest>,
    config: &'a ServerConfig,
    events: &'a mut VecDeque<ServerEvent>,
    kicks: &'a mut Vec<u32>,
    rcon_enabled: bool,
    uptime: Duration,
}

impl ServerHost<'_> {
    fn run_rcon(&mut self, command: RconCommand) -> String {
        match command {
            RconCommand::Help => HELP.to_string(),
            RconCommand::Status => {
                let mut out = format!(
                    "hostname: {}\nmap: {} (level {})\ntick: {}\nuptime: {}s\nplayers: {}/{}\n",
                    self.config.hostname,
                    self.session.map(),
                    self.session.level_loads(),
                    self.session.tick(),
                    self.uptime.as_secs(),
                    self.connections.total_count(),
                    self.config.max_clients
                );
                for player in self.players() {
                    out.push_str(&format!(
                        "#{} {} {}s\n",
                        player.client_id, player.name, player.connected_secs
                    ));
                }
                out
            }
            RconCommand::Tables => {
                let mut out = String::new();
                for table in self.session.tables().tables() {
                    out.push_str(&format!(
                        "{} {} {}/{}\n",
                        table.id(),
                        table.name(),
                        table.len(),
                        table.max_entries()
                    ));
                }
                out
            }
            RconCommand::Dump { table } => {
                let Some(table) = self.session.tables().find_table(&table) else {
                    return format!("no table named '{}'", table);
                };
                let mut out = String::new();
                for (index, entry) in table.iter() {
                    if out.len() >= MAX_PRINT_LENGTH {
                        break;
                    }
                    match entry.user_data() {
                        Some(data) => out.push_str(&format!(
                            "{}: {} ({} bytes)\n",
                            index,
                            entry.string(),
                            data.len()
                        )),
                        None => out.push_str(&format!("{}: {}\n", index, entry.string())),
                    }
                }
                if out.is_empty() {
                    out = format!("'{}' is empty", table.name());
                }
                out
            }
            RconCommand::Add { table, value } => match self.session.add_string(&table, &value) {
                Ok(index) => format!("'{}' is {} in {}", value, index, table),
                Err(e) => format!("add failed: {}", e),
            },
            RconCommand::ChangeLevel { map } => match self.change_level(&map) {
                Ok(strings) => format!("changed level to {} ({} strings)", map, strings),
                Err(e) => format!("changelevel failed: {}", e),
            },
            RconCommand::Kick { client_id } => {
                if self.connections.get(client_id).is_some() {
                    self.kicks.push(client_id);
                    format!("kicking client {}", client_id)
                } else {
                    format!("no client {}", client_id)
                }
            }
        }
    }

    /// Rebuilds the tables for `map` and sends every client a fresh snapshot.
    fn change_level(&mut self, map: &str) -> Result<usize, StringTableError> {
        let strings = self.session.load_level(map, self.manifest)?;

        for client in self.connections.iter_mut() {
            client.require_full_snapshot();
            if let Err(e) = self.session.add_user(client.client_id, &client.name) {
                log::warn!("Failed to restore userinfo for client {}: {}", client.client_id, e);
            }
        }

        self.events.push_back(ServerEvent::LevelLoaded {
            map: map.to_string(),
            strings,
        });
        Ok(strings)
    }
}

impl ConnectionlessHost for ServerHost<'_> {
    fn server_info(&self) -> ServerInfo {
        let mut flags = ServerFlags::empty();
        if self.config.dedicated {
            flags |= ServerFlags::DEDICATED;
        }
        if self.rcon_enabled {
            flags |= ServerFlags::RCON;
        }

        ServerInfo {
            protocol: PROTOCOL_VERSION,
            hostname: self.config.hostname.clone(),
            map: self.session.map().to_string(),
            players: self.connections.total_count().min(u8::MAX as usize) as u8,
            max_players: self.config.max_clients.min(u8::MAX as usize) as u8,
            flags,
        }
    }

    fn server_details(&self) -> ServerDetails {
        ServerDetails {
            info: self.server_info(),
            tick_rate: self.config.tick_rate,
            tick: self.session.tick(),
            tables: table_summaries(self.session),
        }
    }

    fn players(&self) -> Vec<PlayerInfo> {
        self.connections
            .ids()
            .into_iter()
            .filter_map(|id| self.connections.get(id))
            .map(|client| PlayerInfo {
                client_id: client.client_id,
                name: client.name.clone(),
                connected_secs: client.connected_secs(),
            })
            .collect()
    }

    fn rules(&self) -> Vec<Rule> {
        vec![
            Rule::new("sv_tickrate", self.config.tick_rate.to_string()),
            Rule::new("sv_maxclients", self.config.max_clients.to_string()),
            Rule::new("sv_timeout", self.config.client_timeout_secs.to_string()),
            Rule::new("sv_rcon", if self.rcon_enabled { "1" } else { "0" }),
            Rule::new("protocol", PROTOCOL_VERSION.to_string()),
            Rule::new(
                "stringtables",
                self.session.tables().num_tables().to_string(),
            ),
        ]
    }

    fn accept_connection(&mut self, addr: SocketAddr, name: &str) -> Result<u32, String> {
        if let Some(previous) = self.connections.get_by_addr(&addr) {
            let client_id = previous.client_id;
            self.session.remove_user(client_id);
            self.events.push_back(ServerEvent::ClientDisconnected {
                client_id,
                reason: DisconnectReason::Reconnected,
            });
        }

        let client_id = match self.connections.add(addr, name) {
            Ok(client) => client.client_id,
            Err(reason) => {
                self.events.push_back(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return Err(reason.to_string());
            }
        };

        if let Err(e) = self.session.add_user(client_id, name) {
            log::warn!("No userinfo entry for client {}: {}", client_id, e);
        }
        self.events.push_back(ServerEvent::ClientConnected {
            client_id,
            addr,
            name: name.to_string(),
        });
        Ok(client_id)
    }

    fn execute_rcon(&mut self, addr: SocketAddr, command: &str) -> String {
        self.events.push_back(ServerEvent::Rcon {
            addr,
            command: command.to_string(),
        });
        match RconCommand::parse(command) {
            Ok(command) => self.run_rcon(command),
            Err(message) => message,
        }
    }

    fn log_line(&mut self, addr: SocketAddr, line: &str) {
        self.events.push_back(ServerEvent::RemoteLog {
            addr,
            line: line.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiretable::buffer::ByteReader;
    use wiretable::net::{ChunkAssembler, ChunkOutcome, ConnectionlessPacket, PacketSequencer};
    use wiretable::{StringIndex, StringTableContainer};

    use crate::session::{DOWNLOADABLES, USERINFO};

    struct TestClient {
        endpoint: NetworkEndpoint,
        sequencer: PacketSequencer,
        assembler: ChunkAssembler,
        tables: StringTableContainer,
    }

    impl TestClient {
        fn new(server: SocketAddr) -> Self {
            let mut endpoint = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
            endpoint.set_remote(server);
            Self {
                endpoint,
                sequencer: PacketSequencer::new(),
                assembler: ChunkAssembler::new(),
                tables: StringTableContainer::new(),
            }
        }

        fn send_oob(&mut self, packet: ConnectionlessPacket) {
            self.endpoint
                .send_raw_remote(&packet.encode().unwrap())
                .unwrap();
        }

        fn send(&mut self, payload: PacketType) {
            let packet = Packet::new(self.sequencer.next_header(), payload);
            self.endpoint.send(&packet).unwrap();
        }

        /// Runs the server until the client sees a connectionless reply.
        fn reply(&mut self, server: &mut TableServer) -> ConnectionlessPacket {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                server.tick_once();
                for (datagram, _) in self.endpoint.receive().unwrap() {
                    if let Datagram::Connectionless(data) = datagram {
                        return ConnectionlessPacket::decode(&data).unwrap();
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            panic!("no connectionless reply");
        }

        fn challenge(&mut self, server: &mut TableServer) -> u32 {
            self.send_oob(ConnectionlessPacket::GetChallenge);
            match self.reply(server) {
                ConnectionlessPacket::Challenge { challenge } => challenge,
                other => panic!("expected challenge, got {:?}", other),
            }
        }

        /// Runs the server until `done` holds, applying table traffic.
        fn sync_until(
            &mut self,
            server: &mut TableServer,
            done: impl Fn(&StringTableContainer) -> bool,
        ) {
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                server.tick_once();
                for (datagram, _) in self.endpoint.receive().unwrap() {
                    let Datagram::Connected(packet) = datagram else {
                        continue;
                    };
                    if !self.sequencer.process_header(&packet.header) {
                        continue;
                    }
                    match packet.payload {
                        PacketType::StringTableChunk {
                            transfer_id,
                            tick,
                            index,
                            count,
                            data,
                        } => {
                            let outcome = self
                                .assembler
                                .accept(transfer_id, tick, index, count, &data)
                                .unwrap();
                            if let ChunkOutcome::Complete { tick, data } = outcome {
                                self.tables
                                    .read_string_tables(&mut ByteReader::new(&data))
                                    .unwrap();
                                self.tables.set_tick(tick);
                                self.send(PacketType::StringTablesAck { tick });
                            }
                        }
                        PacketType::StringTableUpdate { data, .. } => {
                            let tick = self
                                .tables
                                .read_updates(&mut ByteReader::new(&data))
                                .unwrap();
                            self.send(PacketType::StringTablesAck { tick });
                        }
                        _ => {}
                    }
                }
                if done(&self.tables) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            panic!("tables never reached the expected state");
        }
    }

    fn test_server() -> TableServer {
        let config = ServerConfig {
            tick_rate: 100,
            map: "de_test".into(),
            rcon_password: Some("secret".into()),
            resend_interval_ms: 50,
            ..ServerConfig::default()
        };
        let manifest = Manifest::parse("downloadables materials/x.vmt\n").unwrap();
        TableServer::new("127.0.0.1:0", config, Some(manifest)).unwrap()
    }

    #[test]
    fn test_connect_and_replicate() {
        let mut server = test_server();
        let mut client = TestClient::new(server.local_addr());

        let challenge = client.challenge(&mut server);
        client.send_oob(ConnectionlessPacket::Connect {
            protocol: PROTOCOL_VERSION,
            challenge,
            name: "alice".into(),
        });
        let client_id = match client.reply(&mut server) {
            ConnectionlessPacket::Accept { client_id } => client_id,
            other => panic!("expected accept, got {:?}", other),
        };

        client.sync_until(&mut server, |tables| {
            tables
                .find_table(USERINFO)
                .is_some_and(|table| !table.is_empty())
        });
        let userinfo = client.tables.find_table(USERINFO).unwrap();
        assert_eq!(userinfo.string(StringIndex(0)), Some(format!("client{}", client_id).as_str()));
        assert_eq!(userinfo.user_data(StringIndex(0)), Some(&b"alice"[..]));
        assert_eq!(
            client
                .tables
                .find_table(DOWNLOADABLES)
                .unwrap()
                .string(StringIndex(0)),
            Some("materials/x.vmt")
        );

        // An rcon add reaches the client as an incremental update.
        let challenge = client.challenge(&mut server);
        client.send_oob(ConnectionlessPacket::Rcon {
            challenge,
            password: "secret".into(),
            command: "add downloadables models/y.mdl".into(),
        });
        match client.reply(&mut server) {
            ConnectionlessPacket::Print { text } => assert!(text.contains("models/y.mdl")),
            other => panic!("expected print, got {:?}", other),
        }

        client.sync_until(&mut server, |tables| {
            tables
                .find_table(DOWNLOADABLES)
                .is_some_and(|table| table.len() == 2)
        });
        assert_eq!(
            client
                .tables
                .find_table(DOWNLOADABLES)
                .unwrap()
                .find_index("models/y.mdl"),
            Some(StringIndex(1))
        );

        let events: Vec<ServerEvent> = server.drain_events().collect();
        assert!(events.iter().any(|e| matches!(e, ServerEvent::ClientConnected { .. })));
        assert!(events.iter().any(|e| matches!(e, ServerEvent::Rcon { .. })));
    }

    #[test]
    fn test_changelevel_resnapshots_clients() {
        let mut server = test_server();
        let mut client = TestClient::new(server.local_addr());

        let challenge = client.challenge(&mut server);
        client.send_oob(ConnectionlessPacket::Connect {
            protocol: PROTOCOL_VERSION,
            challenge,
            name: "bob".into(),
        });
        assert!(matches!(
            client.reply(&mut server),
            ConnectionlessPacket::Accept { .. }
        ));
        client.sync_until(&mut server, |tables| tables.num_tables() == 4);
        let before = client.tables.tick();

        let challenge = client.challenge(&mut server);
        client.send_oob(ConnectionlessPacket::Rcon {
            challenge,
            password: "secret".into(),
            command: "changelevel de_next".into(),
        });
        assert!(matches!(
            client.reply(&mut server),
            ConnectionlessPacket::Print { .. }
        ));
        assert_eq!(server.session().map(), "de_next");

        // The manifest is reloaded and userinfo restored on the new level.
        client.sync_until(&mut server, move |tables| {
            tables.tick() > before
                && tables.find_table(USERINFO).is_some_and(|t| t.len() == 1)
                && tables.find_table(DOWNLOADABLES).is_some_and(|t| t.len() == 1)
        });
        assert_eq!(server.session().level_loads(), 2);
    }

    #[test]
    fn test_rcon_status_and_bad_password() {
        let mut server = test_server();
        let mut client = TestClient::new(server.local_addr());

        let challenge = client.challenge(&mut server);
        client.send_oob(ConnectionlessPacket::Rcon {
            challenge,
            password: "wrong".into(),
            command: "status".into(),
        });
        assert_eq!(
            client.reply(&mut server),
            ConnectionlessPacket::Print {
                text: "Bad rcon password.".into()
            }
        );

        client.send_oob(ConnectionlessPacket::Rcon {
            challenge,
            password: "secret".into(),
            command: "status".into(),
        });
        match client.reply(&mut server) {
            ConnectionlessPacket::Print { text } => {
                assert!(text.contains("map: de_test (level 1)"));
                assert!(text.contains("players: 0/32"));
            }
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_log_needs_challenge() {
        let mut server = test_server();
        let mut client = TestClient::new(server.local_addr());

        client.send_oob(ConnectionlessPacket::Log {
            challenge: 0,
            line: "spoofed".into(),
        });
        let challenge = match client.reply(&mut server) {
            ConnectionlessPacket::Challenge { challenge } => challenge,
            other => panic!("expected challenge, got {:?}", other),
        };
        let remote_logs = |server: &mut TableServer| {
            server
                .drain_events()
                .filter_map(|event| match event {
                    ServerEvent::RemoteLog { line, .. } => Some(line),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert!(remote_logs(&mut server).is_empty());

        client.send_oob(ConnectionlessPacket::Log {
            challenge,
            line: "hello".into(),
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut lines = Vec::new();
        while lines.is_empty() && Instant::now() < deadline {
            server.tick_once();
            lines = remote_logs(&mut server);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(lines, vec!["hello".to_string()]);
    }

    #[test]
    fn test_details_lists_tables() {
        let mut server = test_server();
        let mut client = TestClient::new(server.local_addr());

        client.send_oob(ConnectionlessPacket::Details);
        match client.reply(&mut server) {
            ConnectionlessPacket::DetailsReply(details) => {
                assert_eq!(details.info.map, "de_test");
                assert!(details.info.flags.contains(ServerFlags::RCON));
                let names: Vec<&str> = details.tables.iter().map(|t| t.name.as_str()).collect();
                assert_eq!(
                    names,
                    ["downloadables", "modelprecache", "soundprecache", "userinfo"]
                );
                assert_eq!(details.tables[0].len, 1);
            }
            other => panic!("expected details, got {:?}", other),
        }
    }
}
