use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use super::challenge::{ChallengeTable, DEFAULT_CHALLENGE_LIFETIME, DEFAULT_MAX_CHALLENGES};
use super::connectionless::{
    ConnectionlessPacket, MAX_HOSTNAME_LENGTH, MAX_MAP_LENGTH, MAX_NAME_LENGTH, MAX_PRINT_LENGTH,
    MAX_REASON_LENGTH, MAX_RULE_KEY_LENGTH, MAX_RULE_VALUE_LENGTH, MAX_TABLE_NAME_LENGTH,
    PlayerInfo, Rule, ServerDetails, ServerInfo, truncate_to,
};
use super::protocol::{PROTOCOL_VERSION, PacketError};

pub const DEFAULT_MAX_CONNECTIONLESS_PER_TICK: usize = 64;
pub const DEFAULT_RCON_MAX_FAILURES: u32 = 5;
pub const DEFAULT_RCON_BAN: Duration = Duration::from_secs(30);
const MAX_TRACKED_RCON_ADDRS: usize = 1024;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_per_tick: usize,
    pub challenge_lifetime: Duration,
    pub max_challenges: usize,
    /// Remote console is disabled unless a non-empty password is set.
    pub rcon_password: Option<String>,
    pub rcon_max_failures: u32,
    pub rcon_ban: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_per_tick: DEFAULT_MAX_CONNECTIONLESS_PER_TICK,
            challenge_lifetime: DEFAULT_CHALLENGE_LIFETIME,
            max_challenges: DEFAULT_MAX_CHALLENGES,
            rcon_password: None,
            rcon_max_failures: DEFAULT_RCON_MAX_FAILURES,
            rcon_ban: DEFAULT_RCON_BAN,
        }
    }
}

/// What a server exposes to unconnected peers.
pub trait ConnectionlessHost {
    fn server_info(&self) -> ServerInfo;

    fn server_details(&self) -> ServerDetails;

    fn players(&self) -> Vec<PlayerInfo>;

    fn rules(&self) -> Vec<Rule>;

    /// Admits a peer that proved its address. `Err` carries the reason sent
    /// back in the reject.
    fn accept_connection(&mut self, addr: SocketAddr, name: &str) -> Result<u32, String>;

    /// Runs an authenticated console command and returns its output.
    fn execute_rcon(&mut self, addr: SocketAddr, command: &str) -> String;

    fn log_line(&mut self, addr: SocketAddr, line: &str) {
        let _ = (addr, line);
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub received: u64,
    pub replied: u64,
    pub dropped_malformed: u64,
    pub dropped_budget: u64,
    pub dropped_unsolicited: u64,
    pub challenges_issued: u64,
    pub connects_accepted: u64,
    pub connects_rejected: u64,
    pub rcon_accepted: u64,
    pub rcon_rejected: u64,
}

#[derive(Debug, Clone, Copy)]
struct RconFailures {
    count: u32,
    last_failure: Instant,
    banned_until: Option<Instant>,
}

/// Per-address failure counter for remote console logins.
#[derive(Debug)]
pub struct RconGuard {
    failures: HashMap<IpAddr, RconFailures>,
    max_failures: u32,
    ban: Duration,
}

impl RconGuard {
    pub fn new(max_failures: u32, ban: Duration) -> Self {
        Self {
            failures: HashMap::new(),
            max_failures: max_failures.max(1),
            ban,
        }
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.failures
            .get(&ip)
            .and_then(|f| f.banned_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Returns true when this failure started a ban.
    pub fn record_failure(&mut self, ip: IpAddr) -> bool {
        let now = Instant::now();
        if self.failures.len() >= MAX_TRACKED_RCON_ADDRS && !self.failures.contains_key(&ip) {
            self.purge();
            if self.failures.len() >= MAX_TRACKED_RCON_ADDRS {
                let oldest = self
                    .failures
                    .iter()
                    .min_by_key(|(_, f)| f.last_failure)
                    .map(|(ip, _)| *ip);
                if let Some(oldest) = oldest {
                    self.failures.remove(&oldest);
                }
            }
        }

        let entry = self.failures.entry(ip).or_insert(RconFailures {
            count: 0,
            last_failure: now,
            banned_until: None,
        });
        entry.count += 1;
        entry.last_failure = now;
        if entry.count >= self.max_failures {
            entry.count = 0;
            entry.banned_until = Some(now + self.ban);
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self, ip: IpAddr) {
        self.failures.remove(&ip);
    }

    /// Forgets bans that ran out and counters idle for a full ban period.
    pub fn purge(&mut self) {
        let now = Instant::now();
        let ban = self.ban;
        self.failures.retain(|_, f| match f.banned_until {
            Some(until) => now < until,
            None => now.duration_since(f.last_failure) < ban,
        });
    }
}

/// Routes pre-handshake datagrams to one handler per packet type.
///
/// Holds no per-peer state besides issued challenges and rcon failure
/// counters, both bounded. Anything that does not decode is dropped without
/// a reply.
#[derive(Debug)]
pub struct ConnectionlessDispatcher {
    config: DispatchConfig,
    challenges: ChallengeTable,
    rcon: RconGuard,
    stats: DispatchStats,
    handled_this_tick: usize,
}

impl ConnectionlessDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            challenges: ChallengeTable::new(config.challenge_lifetime, config.max_challenges),
            rcon: RconGuard::new(config.rcon_max_failures, config.rcon_ban),
            stats: DispatchStats::default(),
            handled_this_tick: 0,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn rcon_enabled(&self) -> bool {
        self.config
            .rcon_password
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }

    pub fn set_rcon_password(&mut self, password: Option<String>) {
        self.config.rcon_password = password;
    }

    /// Resets the per-tick budget and expires stale state.
    pub fn begin_tick(&mut self) {
        self.handled_this_tick = 0;
        self.challenges.purge_expired();
        self.rcon.purge();
    }

    /// Handles one datagram and returns the bytes to send back, if any.
    pub fn dispatch<H>(&mut self, host: &mut H, addr: SocketAddr, data: &[u8]) -> Option<Vec<u8>>
    where
        H: ConnectionlessHost + ?Sized,
    {
        self.stats.received += 1;

        if self.handled_this_tick >= self.config.max_per_tick {
            self.stats.dropped_budget += 1;
            log::trace!("Connectionless budget exhausted, dropping packet from {}", addr);
            return None;
        }
        self.handled_this_tick += 1;

        let packet = match ConnectionlessPacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.dropped_malformed += 1;
                log::debug!("Dropping connectionless packet from {}: {}", addr, e);
                return None;
            }
        };

        let mut reply = self.handle(host, addr, packet)?;
        loop {
            match reply.encode() {
                Ok(bytes) => {
                    self.stats.replied += 1;
                    return Some(bytes);
                }
                Err(PacketError::TooLarge(_)) if shrink(&mut reply) => continue,
                Err(e) => {
                    log::warn!("Failed to encode reply to {}: {}", addr, e);
                    return None;
                }
            }
        }
    }

    fn handle<H>(
        &mut self,
        host: &mut H,
        addr: SocketAddr,
        packet: ConnectionlessPacket,
    ) -> Option<ConnectionlessPacket>
    where
        H: ConnectionlessHost + ?Sized,
    {
        match packet {
            ConnectionlessPacket::GetChallenge => self.challenge_reply(addr),
            ConnectionlessPacket::Connect {
                protocol,
                challenge,
                name,
            } => Some(self.handle_connect(host, addr, protocol, challenge, &name)),
            ConnectionlessPacket::Info => Some(ConnectionlessPacket::InfoReply(sanitize_info(
                host.server_info(),
            ))),
            ConnectionlessPacket::Details => {
                let mut details = host.server_details();
                details.info = sanitize_info(details.info);
                for table in &mut details.tables {
                    table.name = truncate_to(&table.name, MAX_TABLE_NAME_LENGTH).to_owned();
                }
                Some(ConnectionlessPacket::DetailsReply(details))
            }
            ConnectionlessPacket::Players { challenge } => {
                if !self.challenges.validate(addr, challenge) {
                    return self.challenge_reply(addr);
                }
                let mut players = host.players();
                players.truncate(u8::MAX as usize);
                for player in &mut players {
                    player.name = truncate_to(&player.name, MAX_NAME_LENGTH).to_owned();
                }
                Some(ConnectionlessPacket::PlayersReply(players))
            }
            ConnectionlessPacket::Rules { challenge } => {
                if !self.challenges.validate(addr, challenge) {
                    return self.challenge_reply(addr);
                }
                let rules = host
                    .rules()
                    .into_iter()
                    .map(|rule| {
                        Rule::new(
                            truncate_to(&rule.key, MAX_RULE_KEY_LENGTH),
                            truncate_to(&rule.value, MAX_RULE_VALUE_LENGTH),
                        )
                    })
                    .collect();
                Some(ConnectionlessPacket::RulesReply(rules))
            }
            ConnectionlessPacket::Rcon {
                challenge,
                password,
                command,
            } => self.handle_rcon(host, addr, challenge, &password, &command),
            ConnectionlessPacket::Log { challenge, line } => {
                if !self.challenges.validate(addr, challenge) {
                    return self.challenge_reply(addr);
                }
                host.log_line(addr, &line);
                None
            }
            other => {
                self.stats.dropped_unsolicited += 1;
                log::debug!(
                    "Ignoring unsolicited {:?} packet from {}",
                    other.kind() as char,
                    addr
                );
                None
            }
        }
    }

    fn challenge_reply(&mut self, addr: SocketAddr) -> Option<ConnectionlessPacket> {
        match self.challenges.issue(addr) {
            Ok(challenge) => {
                self.stats.challenges_issued += 1;
                Some(ConnectionlessPacket::Challenge { challenge })
            }
            Err(e) => {
                log::error!("Cannot issue a challenge to {}: {}", addr, e);
                None
            }
        }
    }

    fn handle_connect<H>(
        &mut self,
        host: &mut H,
        addr: SocketAddr,
        protocol: u32,
        challenge: u32,
        name: &str,
    ) -> ConnectionlessPacket
    where
        H: ConnectionlessHost + ?Sized,
    {
        let result = if protocol != PROTOCOL_VERSION {
            Err(format!(
                "Protocol mismatch: server uses {}, client sent {}",
                PROTOCOL_VERSION, protocol
            ))
        } else if !self.challenges.consume(addr, challenge) {
            Err("Invalid or expired challenge".to_string())
        } else if name.trim().is_empty() {
            Err("Empty player name".to_string())
        } else {
            host.accept_connection(addr, name.trim())
        };

        match result {
            Ok(client_id) => {
                self.stats.connects_accepted += 1;
                ConnectionlessPacket::Accept { client_id }
            }
            Err(reason) => {
                self.stats.connects_rejected += 1;
                log::info!("Rejected connection from {}: {}", addr, reason);
                ConnectionlessPacket::Reject {
                    reason: truncate_to(&reason, MAX_REASON_LENGTH).to_owned(),
                }
            }
        }
    }

    fn handle_rcon<H>(
        &mut self,
        host: &mut H,
        addr: SocketAddr,
        challenge: u32,
        password: &str,
        command: &str,
    ) -> Option<ConnectionlessPacket>
    where
        H: ConnectionlessHost + ?Sized,
    {
        let expected = match self.config.rcon_password.as_deref() {
            Some(expected) if !expected.is_empty() => expected,
            _ => {
                log::debug!("Ignoring rcon from {}: remote console disabled", addr);
                return None;
            }
        };

        if self.rcon.is_banned(addr.ip()) {
            self.stats.rcon_rejected += 1;
            log::debug!("Ignoring rcon from banned address {}", addr.ip());
            return None;
        }

        if !self.challenges.validate(addr, challenge) {
            return self.challenge_reply(addr);
        }

        if !constant_time_eq(password.as_bytes(), expected.as_bytes()) {
            self.stats.rcon_rejected += 1;
            if self.rcon.record_failure(addr.ip()) {
                log::warn!(
                    "Banning {} from rcon for {}s after repeated failures",
                    addr.ip(),
                    self.config.rcon_ban.as_secs()
                );
            } else {
                log::warn!("Bad rcon password from {}", addr);
            }
            return Some(ConnectionlessPacket::Print {
                text: "Bad rcon password.".to_string(),
            });
        }

        self.rcon.record_success(addr.ip());
        self.stats.rcon_accepted += 1;
        log::info!("Rcon from {}: {}", addr, command);

        let output = host.execute_rcon(addr, command);
        Some(ConnectionlessPacket::Print {
            text: truncate_to(&output, MAX_PRINT_LENGTH).to_owned(),
        })
    }
}

fn sanitize_info(mut info: ServerInfo) -> ServerInfo {
    info.hostname = truncate_to(&info.hostname, MAX_HOSTNAME_LENGTH).to_owned();
    info.map = truncate_to(&info.map, MAX_MAP_LENGTH).to_owned();
    info
}

/// Drops the last list item of a reply that does not fit in one datagram.
fn shrink(reply: &mut ConnectionlessPacket) -> bool {
    match reply {
        ConnectionlessPacket::PlayersReply(players) => players.pop().is_some(),
        ConnectionlessPacket::RulesReply(rules) => rules.pop().is_some(),
        ConnectionlessPacket::DetailsReply(details) => details.tables.pop().is_some(),
        _ => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connectionless::{ServerFlags, TableSummary};

    #[derive(Default)]
    struct TestHost {
        next_id: u32,
        accepted: Vec<(SocketAddr, String)>,
        commands: Vec<String>,
        logs: Vec<String>,
        rules: Vec<Rule>,
    }

    impl ConnectionlessHost for TestHost {
        fn server_info(&self) -> ServerInfo {
            ServerInfo {
                protocol: PROTOCOL_VERSION,
                hostname: "test".into(),
                map: "de_test".into(),
                players: self.accepted.len() as u8,
                max_players: 8,
                flags: ServerFlags::DEDICATED,
            }
        }

        fn server_details(&self) -> ServerDetails {
            ServerDetails {
                info: self.server_info(),
                tick_rate: 30,
                tick: 1,
                tables: vec![TableSummary {
                    name: "downloadables".into(),
                    len: 0,
                    max_entries: 8192,
                }],
            }
        }

        fn players(&self) -> Vec<PlayerInfo> {
            self.accepted
                .iter()
                .enumerate()
                .map(|(i, (_, name))| PlayerInfo {
                    client_id: i as u32 + 1,
                    name: name.clone(),
                    connected_secs: 0,
                })
                .collect()
        }

        fn rules(&self) -> Vec<Rule> {
            self.rules.clone()
        }

        fn accept_connection(&mut self, addr: SocketAddr, name: &str) -> Result<u32, String> {
            if self.accepted.len() >= 2 {
                return Err("Server is full".into());
            }
            self.next_id += 1;
            self.accepted.push((addr, name.to_string()));
            Ok(self.next_id)
        }

        fn execute_rcon(&mut self, _addr: SocketAddr, command: &str) -> String {
            self.commands.push(command.to_string());
            format!("ran {}", command)
        }

        fn log_line(&mut self, _addr: SocketAddr, line: &str) {
            self.logs.push(line.to_string());
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn send(
        dispatcher: &mut ConnectionlessDispatcher,
        host: &mut TestHost,
        from: SocketAddr,
        packet: ConnectionlessPacket,
    ) -> Option<ConnectionlessPacket> {
        let data = packet.encode().unwrap();
        dispatcher
            .dispatch(host, from, &data)
            .map(|reply| ConnectionlessPacket::decode(&reply).unwrap())
    }

    fn challenge(
        dispatcher: &mut ConnectionlessDispatcher,
        host: &mut TestHost,
        from: SocketAddr,
    ) -> u32 {
        match send(dispatcher, host, from, ConnectionlessPacket::GetChallenge) {
            Some(ConnectionlessPacket::Challenge { challenge }) => challenge,
            other => panic!("expected challenge, got {:?}", other),
        }
    }

    fn rcon_dispatcher() -> ConnectionlessDispatcher {
        ConnectionlessDispatcher::new(DispatchConfig {
            rcon_password: Some("hunter2".into()),
            rcon_max_failures: 2,
            ..DispatchConfig::default()
        })
    }

    #[test]
    fn test_unknown_type_produces_no_reply() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        let reply = dispatcher.dispatch(&mut host, addr(1), &[0xFF, 0xFF, 0xFF, 0xFF, b'Z']);
        assert!(reply.is_none());
        assert_eq!(dispatcher.stats().dropped_malformed, 1);
        assert_eq!(dispatcher.stats().replied, 0);
    }

    #[test]
    fn test_garbage_dropped() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        for data in [&[][..], &[0xFF][..], &[1, 2, 3, 4, 5, 6][..]] {
            assert!(dispatcher.dispatch(&mut host, addr(1), data).is_none());
        }
        assert_eq!(dispatcher.stats().dropped_malformed, 3);
    }

    #[test]
    fn test_handshake_accepts_valid_challenge() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        let value = challenge(&mut dispatcher, &mut host, addr(1));
        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Connect {
                protocol: PROTOCOL_VERSION,
                challenge: value,
                name: " alice ".into(),
            },
        );
        assert_eq!(reply, Some(ConnectionlessPacket::Accept { client_id: 1 }));
        assert_eq!(host.accepted[0].1, "alice");

        // The challenge was consumed.
        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Connect {
                protocol: PROTOCOL_VERSION,
                challenge: value,
                name: "alice".into(),
            },
        );
        assert!(matches!(reply, Some(ConnectionlessPacket::Reject { .. })));
    }

    #[test]
    fn test_connect_rejections() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        let value = challenge(&mut dispatcher, &mut host, addr(1));
        let wrong_addr = send(
            &mut dispatcher,
            &mut host,
            addr(2),
            ConnectionlessPacket::Connect {
                protocol: PROTOCOL_VERSION,
                challenge: value,
                name: "mallory".into(),
            },
        );
        assert!(matches!(wrong_addr, Some(ConnectionlessPacket::Reject { .. })));

        let wrong_protocol = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Connect {
                protocol: PROTOCOL_VERSION + 1,
                challenge: value,
                name: "bob".into(),
            },
        );
        match wrong_protocol {
            Some(ConnectionlessPacket::Reject { reason }) => assert!(reason.contains("Protocol")),
            other => panic!("expected reject, got {:?}", other),
        }
        assert!(host.accepted.is_empty());
        assert_eq!(dispatcher.stats().connects_rejected, 2);
    }

    #[test]
    fn test_host_reject_reason_forwarded() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        for port in 1..=3 {
            let value = challenge(&mut dispatcher, &mut host, addr(port));
            let reply = send(
                &mut dispatcher,
                &mut host,
                addr(port),
                ConnectionlessPacket::Connect {
                    protocol: PROTOCOL_VERSION,
                    challenge: value,
                    name: format!("p{}", port),
                },
            );
            if port == 3 {
                assert_eq!(
                    reply,
                    Some(ConnectionlessPacket::Reject {
                        reason: "Server is full".into()
                    })
                );
            }
        }
    }

    #[test]
    fn test_players_require_challenge() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Players { challenge: 0 },
        );
        let value = match reply {
            Some(ConnectionlessPacket::Challenge { challenge }) => challenge,
            other => panic!("expected challenge, got {:?}", other),
        };

        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Players { challenge: value },
        );
        assert_eq!(reply, Some(ConnectionlessPacket::PlayersReply(Vec::new())));
    }

    #[test]
    fn test_info_and_details() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        match send(&mut dispatcher, &mut host, addr(1), ConnectionlessPacket::Info) {
            Some(ConnectionlessPacket::InfoReply(info)) => assert_eq!(info.map, "de_test"),
            other => panic!("expected info, got {:?}", other),
        }
        match send(&mut dispatcher, &mut host, addr(1), ConnectionlessPacket::Details) {
            Some(ConnectionlessPacket::DetailsReply(details)) => {
                assert_eq!(details.tables[0].name, "downloadables");
            }
            other => panic!("expected details, got {:?}", other),
        }
    }

    #[test]
    fn test_rules_trimmed_to_datagram() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost {
            rules: (0..200)
                .map(|i| Rule::new(format!("sv_rule_{}", i), "1234567890"))
                .collect(),
            ..TestHost::default()
        };

        let value = challenge(&mut dispatcher, &mut host, addr(1));
        let data = ConnectionlessPacket::Rules { challenge: value }
            .encode()
            .unwrap();
        let reply = dispatcher.dispatch(&mut host, addr(1), &data).unwrap();
        assert!(reply.len() <= crate::net::MAX_PACKET_SIZE);
        match ConnectionlessPacket::decode(&reply).unwrap() {
            ConnectionlessPacket::RulesReply(rules) => {
                assert!(!rules.is_empty() && rules.len() < 200);
                assert_eq!(rules[0].key, "sv_rule_0");
            }
            other => panic!("expected rules, got {:?}", other),
        }
    }

    #[test]
    fn test_rcon_disabled_without_password() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        let value = challenge(&mut dispatcher, &mut host, addr(1));
        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Rcon {
                challenge: value,
                password: String::new(),
                command: "status".into(),
            },
        );
        assert!(reply.is_none());
        assert!(host.commands.is_empty());
    }

    #[test]
    fn test_rcon_executes_with_password() {
        let mut dispatcher = rcon_dispatcher();
        let mut host = TestHost::default();

        let value = challenge(&mut dispatcher, &mut host, addr(1));
        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Rcon {
                challenge: value,
                password: "hunter2".into(),
                command: "status".into(),
            },
        );
        assert_eq!(
            reply,
            Some(ConnectionlessPacket::Print {
                text: "ran status".into()
            })
        );
        assert_eq!(host.commands, vec!["status".to_string()]);
    }

    #[test]
    fn test_rcon_lockout() {
        let mut dispatcher = rcon_dispatcher();
        let mut host = TestHost::default();

        let value = challenge(&mut dispatcher, &mut host, addr(1));
        for _ in 0..2 {
            let reply = send(
                &mut dispatcher,
                &mut host,
                addr(1),
                ConnectionlessPacket::Rcon {
                    challenge: value,
                    password: "wrong".into(),
                    command: "status".into(),
                },
            );
            assert!(matches!(reply, Some(ConnectionlessPacket::Print { .. })));
        }

        // Banned now, even with the right password and from another port.
        let value = challenge(&mut dispatcher, &mut host, addr(2));
        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(2),
            ConnectionlessPacket::Rcon {
                challenge: value,
                password: "hunter2".into(),
                command: "status".into(),
            },
        );
        assert!(reply.is_none());
        assert!(host.commands.is_empty());
        assert_eq!(dispatcher.stats().rcon_rejected, 3);
    }

    #[test]
    fn test_per_tick_budget() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig {
            max_per_tick: 3,
            ..DispatchConfig::default()
        });
        let mut host = TestHost::default();
        let data = ConnectionlessPacket::Info.encode().unwrap();

        let replies = (0..5)
            .filter_map(|_| dispatcher.dispatch(&mut host, addr(1), &data))
            .count();
        assert_eq!(replies, 3);
        assert_eq!(dispatcher.stats().dropped_budget, 2);

        dispatcher.begin_tick();
        assert!(dispatcher.dispatch(&mut host, addr(1), &data).is_some());
    }

    #[test]
    fn test_log_requires_challenge_and_unsolicited_dropped() {
        let mut dispatcher = ConnectionlessDispatcher::new(DispatchConfig::default());
        let mut host = TestHost::default();

        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Log {
                challenge: 0,
                line: "spoofed".into(),
            },
        );
        let Some(ConnectionlessPacket::Challenge { challenge }) = reply else {
            panic!("expected challenge, got {:?}", reply);
        };
        assert!(host.logs.is_empty());

        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(2),
            ConnectionlessPacket::Log {
                challenge,
                line: "wrong address".into(),
            },
        );
        assert!(matches!(reply, Some(ConnectionlessPacket::Challenge { .. })));
        assert!(host.logs.is_empty());

        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Log {
                challenge,
                line: "hello".into(),
            },
        );
        assert!(reply.is_none());
        assert_eq!(host.logs, vec!["hello".to_string()]);

        let reply = send(
            &mut dispatcher,
            &mut host,
            addr(1),
            ConnectionlessPacket::Accept { client_id: 4 },
        );
        assert!(reply.is_none());
        assert_eq!(dispatcher.stats().dropped_unsolicited, 1);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
