use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::PacketHeader;
use super::tracking::PacketSequencer;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    ChallengeRequested,
    Connecting,
    Connected,
}

/// A full snapshot being delivered in chunks until the client acknowledges
/// its tick.
#[derive(Debug)]
pub struct PendingTransfer {
    pub transfer_id: u32,
    pub tick: u32,
    pub chunks: Vec<Vec<u8>>,
    pub last_sent: Option<Instant>,
    pub sends: u32,
}

impl PendingTransfer {
    pub fn new(transfer_id: u32, tick: u32, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            transfer_id,
            tick,
            chunks,
            last_sent: None,
            sends: 0,
        }
    }

    pub fn is_due(&self, resend_interval: Duration) -> bool {
        self.last_sent
            .is_none_or(|sent| sent.elapsed() >= resend_interval)
    }

    pub fn mark_sent(&mut self) {
        self.last_sent = Some(Instant::now());
        self.sends += 1;
    }
}

#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub client_id: u32,
    pub name: String,
    pub state: ConnectionState,
    pub connected_at: Instant,
    pub last_receive_time: Instant,
    pub sequencer: PacketSequencer,
    /// Newest table tick the client confirmed holding. `None` until a full
    /// snapshot has been acknowledged.
    pub acked_table_tick: Option<u32>,
    pub transfer: Option<PendingTransfer>,
    /// Tick and send time of the last incremental update, for resends.
    pub last_update_sent: Option<(u32, Instant)>,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, client_id: u32, name: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            addr,
            client_id,
            name: name.into(),
            state: ConnectionState::Connected,
            connected_at: now,
            last_receive_time: now,
            sequencer: PacketSequencer::new(),
            acked_table_tick: None,
            transfer: None,
            last_update_sent: None,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn next_header(&mut self) -> PacketHeader {
        self.sequencer.next_header()
    }

    /// Returns false for duplicate packets.
    pub fn process_header(&mut self, header: &PacketHeader) -> bool {
        if !self.sequencer.process_header(header) {
            return false;
        }
        self.touch();
        true
    }

    /// Forgets replicated state so the next tick starts a fresh snapshot.
    pub fn require_full_snapshot(&mut self) {
        self.acked_table_tick = None;
        self.transfer = None;
        self.last_update_sent = None;
    }

    /// Applies an acknowledgement of `tick`. A pending snapshot is only
    /// settled by an ack at or after its own tick.
    pub fn acknowledge_tables(&mut self, tick: u32) -> bool {
        if let Some(transfer) = &self.transfer {
            if tick < transfer.tick {
                return false;
            }
            self.transfer = None;
            self.acked_table_tick = Some(tick);
            return true;
        }

        match self.acked_table_tick {
            Some(acked) if tick > acked => {
                self.acked_table_tick = Some(tick);
                true
            }
            _ => false,
        }
    }

    pub fn connected_secs(&self) -> u32 {
        self.connected_at.elapsed().as_secs().min(u32::MAX as u64) as u32
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    clients_by_addr: HashMap<SocketAddr, u32>,
    clients: HashMap<u32, ClientConnection>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(max_clients: usize, timeout_secs: u64) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Admits a client. A second connect from a known address replaces the
    /// old session.
    pub fn add(&mut self, addr: SocketAddr, name: &str) -> Result<&mut ClientConnection, &'static str> {
        if let Some(previous) = self.remove_by_addr(&addr) {
            log::info!(
                "Client {} reconnected from {}, dropping old session",
                previous.client_id,
                addr
            );
        }

        if self.clients.len() >= self.max_clients {
            return Err("Server is full");
        }

        let client_id = self.next_client_id;
        self.next_client_id = self.next_client_id.wrapping_add(1).max(1);

        self.clients_by_addr.insert(addr, client_id);
        match self.clients.entry(client_id) {
            Entry::Occupied(_) => {
                self.clients_by_addr.remove(&addr);
                Err("Client id space exhausted")
            }
            Entry::Vacant(slot) => Ok(slot.insert(ClientConnection::new(addr, client_id, name))),
        }
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientConnection> {
        self.clients_by_addr
            .get(addr)
            .and_then(|id| self.clients.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientConnection> {
        if let Some(&id) = self.clients_by_addr.get(addr) {
            self.clients.get_mut(&id)
        } else {
            None
        }
    }

    pub fn get(&self, client_id: u32) -> Option<&ClientConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: u32) -> Option<ClientConnection> {
        if let Some(conn) = self.clients.remove(&client_id) {
            self.clients_by_addr.remove(&conn.addr);
            Some(conn)
        } else {
            None
        }
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ClientConnection> {
        if let Some(client_id) = self.clients_by_addr.remove(addr) {
            self.clients.remove(&client_id)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientConnection> {
        self.clients.values_mut()
    }

    /// Client ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<ClientConnection> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.clients.len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }
}
