use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

use wiretable::buffer::{ByteReader, ByteWriter};
use wiretable::net::{
    ChunkAssembler, ChunkOutcome, ConnectionManager, ConnectionlessDispatcher, ConnectionlessHost,
    ConnectionlessPacket, Datagram, DispatchConfig, NetworkEndpoint, Packet, PacketType,
    PlayerInfo, PROTOCOL_VERSION, Rule, ServerDetails, ServerFlags, ServerInfo, split_chunks,
};
use wiretable::{StringIndex, StringTableContainer};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn bind_pair() -> (NetworkEndpoint, NetworkEndpoint, SocketAddr, SocketAddr) {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let client_addr: SocketAddr = format!("127.0.0.1:{}", port + 1).parse().unwrap();

    let server = NetworkEndpoint::bind(server_addr).unwrap();
    let mut client = NetworkEndpoint::bind(client_addr).unwrap();
    client.set_remote(server_addr);
    (server, client, server_addr, client_addr)
}

fn wait_for_datagrams(
    endpoint: &mut NetworkEndpoint,
    timeout_ms: u64,
) -> Option<Vec<(Datagram, SocketAddr)>> {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        let received = endpoint.receive().unwrap();
        if !received.is_empty() {
            return Some(received);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

fn expect_connectionless(endpoint: &mut NetworkEndpoint) -> (ConnectionlessPacket, SocketAddr) {
    let received = wait_for_datagrams(endpoint, 500).expect("No datagram received");
    match &received[0] {
        (Datagram::Connectionless(data), from) => {
            (ConnectionlessPacket::decode(data).unwrap(), *from)
        }
        (other, _) => panic!("Expected connectionless datagram, got {:?}", other),
    }
}

struct TestServer {
    connections: ConnectionManager,
}

impl ConnectionlessHost for TestServer {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol: PROTOCOL_VERSION,
            hostname: "integration".into(),
            map: "de_test".into(),
            players: self.connections.total_count() as u8,
            max_players: self.connections.max_clients() as u8,
            flags: ServerFlags::DEDICATED,
        }
    }

    fn server_details(&self) -> ServerDetails {
        ServerDetails {
            info: self.server_info(),
            tick_rate: 30,
            tick: 1,
            tables: Vec::new(),
        }
    }

    fn players(&self) -> Vec<PlayerInfo> {
        self.connections
            .iter()
            .map(|c| PlayerInfo {
                client_id: c.client_id,
                name: c.name.clone(),
                connected_secs: c.connected_secs(),
            })
            .collect()
    }

    fn rules(&self) -> Vec<Rule> {
        vec![Rule::new("sv_tickrate", "30")]
    }

    fn accept_connection(&mut self, addr: SocketAddr, name: &str) -> Result<u32, String> {
        self.connections
            .add(addr, name)
            .map(|client| client.client_id)
            .map_err(str::to_string)
    }

    fn execute_rcon(&mut self, _addr: SocketAddr, command: &str) -> String {
        format!("unknown command: {}", command)
    }
}

/// Reads what arrived at the server and sends the dispatcher's replies.
fn pump_server(
    endpoint: &mut NetworkEndpoint,
    dispatcher: &mut ConnectionlessDispatcher,
    host: &mut TestServer,
) -> usize {
    let Some(received) = wait_for_datagrams(endpoint, 500) else {
        return 0;
    };
    let mut handled = 0;
    for (datagram, from) in received {
        if let Datagram::Connectionless(data) = datagram {
            if let Some(reply) = dispatcher.dispatch(host, from, &data) {
                endpoint.send_raw(&reply, from).unwrap();
            }
            handled += 1;
        }
    }
    handled
}

#[test]
fn test_challenge_handshake_over_udp() {
    let (mut server_endpoint, mut client_endpoint, server_addr, client_addr) = bind_pair();
    let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
    let mut host = TestServer {
        connections: ConnectionManager::new(4),
    };

    let request = ConnectionlessPacket::GetChallenge.encode().unwrap();
    client_endpoint.send_raw_remote(&request).unwrap();
    assert_eq!(pump_server(&mut server_endpoint, &mut dispatcher, &mut host), 1);

    let (reply, from) = expect_connectionless(&mut client_endpoint);
    assert_eq!(from, server_addr);
    let challenge = match reply {
        ConnectionlessPacket::Challenge { challenge } => challenge,
        other => panic!("Expected challenge, got {:?}", other),
    };

    let connect = ConnectionlessPacket::Connect {
        protocol: PROTOCOL_VERSION,
        challenge,
        name: "alice".into(),
    };
    client_endpoint
        .send_raw_remote(&connect.encode().unwrap())
        .unwrap();
    pump_server(&mut server_endpoint, &mut dispatcher, &mut host);

    let (reply, _) = expect_connectionless(&mut client_endpoint);
    let client_id = match reply {
        ConnectionlessPacket::Accept { client_id } => client_id,
        other => panic!("Expected accept, got {:?}", other),
    };

    let connection = host.connections.get(client_id).unwrap();
    assert_eq!(connection.addr, client_addr);
    assert_eq!(connection.name, "alice");
    assert_eq!(dispatcher.stats().connects_accepted, 1);
}

#[test]
fn test_unknown_packet_type_gets_no_reply() {
    let (mut server_endpoint, mut client_endpoint, _, _) = bind_pair();
    let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
    let mut host = TestServer {
        connections: ConnectionManager::new(4),
    };

    client_endpoint
        .send_raw_remote(&[0xFF, 0xFF, 0xFF, 0xFF, b'?', 1, 2, 3])
        .unwrap();
    assert_eq!(pump_server(&mut server_endpoint, &mut dispatcher, &mut host), 1);

    assert!(wait_for_datagrams(&mut client_endpoint, 100).is_none());
    assert_eq!(client_endpoint.stats().packets_received, 0);
    assert_eq!(dispatcher.stats().dropped_malformed, 1);
}

#[test]
fn test_headerless_datagrams_dropped_by_endpoint() {
    let (mut server_endpoint, mut client_endpoint, _, _) = bind_pair();

    client_endpoint.send_raw_remote(&[1, 2, 3, 4, 5]).unwrap();
    client_endpoint.send_raw_remote(&[0xFE]).unwrap();

    assert!(wait_for_datagrams(&mut server_endpoint, 100).is_none());
    assert_eq!(server_endpoint.stats().packets_dropped, 2);
}

#[test]
fn test_chunked_snapshot_replication() {
    let (mut server_endpoint, mut client_endpoint, _, client_addr) = bind_pair();

    let mut server_tables = StringTableContainer::new();
    server_tables.set_tick(12);
    let handle = server_tables.create_table("modelprecache", 4096).unwrap();
    let table = server_tables.resolve_mut(handle).unwrap();
    for i in 0..300 {
        table
            .add_string(&format!("models/props/crate_{i:03}.mdl"), None)
            .unwrap();
    }

    let mut writer = ByteWriter::new();
    server_tables.write_string_tables(&mut writer).unwrap();
    let chunks = split_chunks(writer.as_slice()).unwrap();
    assert!(chunks.len() > 1);

    // Deliver in reverse to exercise reassembly.
    let mut sequence = 1;
    for (index, chunk) in chunks.iter().enumerate().rev() {
        let packet = Packet::new(
            wiretable::PacketHeader::new(sequence, 0, 0),
            PacketType::StringTableChunk {
                transfer_id: 1,
                tick: 12,
                index: index as u16,
                count: chunks.len() as u16,
                data: chunk.clone(),
            },
        );
        server_endpoint.send_to(&packet, client_addr).unwrap();
        sequence += 1;
    }

    let mut assembler = ChunkAssembler::new();
    let mut snapshot = None;
    let start = std::time::Instant::now();
    while snapshot.is_none() && start.elapsed() < Duration::from_secs(2) {
        for (datagram, _) in client_endpoint.receive().unwrap() {
            let Datagram::Connected(packet) = datagram else {
                continue;
            };
            if let PacketType::StringTableChunk {
                transfer_id,
                tick,
                index,
                count,
                data,
            } = packet.payload
            {
                if let ChunkOutcome::Complete { tick, data } = assembler
                    .accept(transfer_id, tick, index, count, &data)
                    .unwrap()
                {
                    snapshot = Some((tick, data));
                }
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    let (tick, data) = snapshot.expect("Snapshot never completed");
    assert_eq!(tick, 12);

    let mut client_tables = StringTableContainer::new();
    client_tables
        .read_string_tables(&mut ByteReader::new(&data))
        .unwrap();
    client_tables.set_tick(tick);

    let table = client_tables.find_table("modelprecache").unwrap();
    assert_eq!(table.len(), 300);
    assert_eq!(
        table.string(StringIndex(299)),
        Some("models/props/crate_299.mdl")
    );
}
