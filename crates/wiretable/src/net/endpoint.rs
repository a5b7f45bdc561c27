use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::protocol::{CONNECTED_HEADER, CONNECTIONLESS_HEADER, MAX_PACKET_SIZE, Packet, datagram_header};
use super::stats::NetworkStats;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Datagrams drained per `receive` call so a flood cannot starve the tick.
const MAX_DATAGRAMS_PER_POLL: usize = 256;

/// A received datagram, classified by its leading header.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// Raw bytes, header included, for the connectionless dispatcher.
    Connectionless(Vec<u8>),
    Connected(Packet),
}

pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    timeout: Duration,
    last_receive_time: Instant,
    running: Arc<AtomicBool>,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            last_receive_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    /// Sends already encoded bytes, e.g. a connectionless reply.
    pub fn send_raw(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds MTU",
            ));
        }

        let bytes = self.socket.send_to(data, addr)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let data = packet.serialize().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )
        })?;

        self.send_raw(&data, addr)
    }

    pub fn send(&mut self, packet: &Packet) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;
        self.send_to(packet, addr)
    }

    pub fn send_raw_remote(&mut self, data: &[u8]) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;
        self.send_raw(data, addr)
    }

    /// Drains pending datagrams. Anything without a known header, and
    /// connected packets that fail to decode, are dropped here.
    pub fn receive(&mut self) -> io::Result<Vec<(Datagram, SocketAddr)>> {
        let mut datagrams = Vec::new();

        while datagrams.len() < MAX_DATAGRAMS_PER_POLL {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let data = &self.recv_buffer[..size];

                    let datagram = match datagram_header(data) {
                        Some(CONNECTIONLESS_HEADER) => Datagram::Connectionless(data.to_vec()),
                        Some(CONNECTED_HEADER) => match Packet::deserialize(data) {
                            Ok(packet) if packet.header.is_valid() => Datagram::Connected(packet),
                            Ok(_) => {
                                self.stats.packets_dropped += 1;
                                continue;
                            }
                            Err(e) => {
                                log::trace!("Dropping undecodable packet from {}: {}", addr, e);
                                self.stats.packets_dropped += 1;
                                continue;
                            }
                        },
                        _ => {
                            self.stats.packets_dropped += 1;
                            continue;
                        }
                    };

                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;

                    self.last_receive_time = Instant::now();
                    datagrams.push((datagram, addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a departed peer surfaces here on
                // some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }

    /// Waits up to `timeout` for at least one datagram.
    pub fn receive_timeout(&mut self, timeout: Duration) -> io::Result<Vec<(Datagram, SocketAddr)>> {
        let deadline = Instant::now() + timeout;
        loop {
            let datagrams = self.receive()?;
            if !datagrams.is_empty() || Instant::now() >= deadline {
                return Ok(datagrams);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_receive_time.elapsed() > self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn reset(&mut self) {
        self.stats = NetworkStats::default();
        self.last_receive_time = Instant::now();
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
