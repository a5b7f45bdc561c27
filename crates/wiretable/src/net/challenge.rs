use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const DEFAULT_CHALLENGE_LIFETIME: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CHALLENGES: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct IssuedChallenge {
    value: u32,
    issued_at: Instant,
}

/// Challenges handed out to addresses that asked for one. Proves a sender
/// can receive at the address it claims before any costly reply is made.
#[derive(Debug)]
pub struct ChallengeTable {
    issued: HashMap<SocketAddr, IssuedChallenge>,
    lifetime: Duration,
    capacity: usize,
}

impl Default for ChallengeTable {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_LIFETIME, DEFAULT_MAX_CHALLENGES)
    }
}

impl ChallengeTable {
    pub fn new(lifetime: Duration, capacity: usize) -> Self {
        Self {
            issued: HashMap::new(),
            lifetime,
            capacity: capacity.max(1),
        }
    }

    /// Returns the live challenge for `addr`, issuing a fresh one when it
    /// has none. A full table evicts its oldest entry first. Fails only when
    /// the OS entropy source does.
    pub fn issue(&mut self, addr: SocketAddr) -> Result<u32, getrandom::Error> {
        let now = Instant::now();
        if let Some(existing) = self.issued.get(&addr)
            && now.duration_since(existing.issued_at) <= self.lifetime
        {
            return Ok(existing.value);
        }

        if self.issued.len() >= self.capacity && !self.issued.contains_key(&addr) {
            self.purge_expired();
            if self.issued.len() >= self.capacity {
                self.evict_oldest();
            }
        }

        let value = random_challenge()?;
        self.issued.insert(
            addr,
            IssuedChallenge {
                value,
                issued_at: now,
            },
        );
        Ok(value)
    }

    pub fn validate(&self, addr: SocketAddr, challenge: u32) -> bool {
        self.issued.get(&addr).is_some_and(|issued| {
            issued.value == challenge && issued.issued_at.elapsed() <= self.lifetime
        })
    }

    /// Validates and forgets the challenge so it cannot be replayed.
    pub fn consume(&mut self, addr: SocketAddr, challenge: u32) -> bool {
        if self.validate(addr, challenge) {
            self.issued.remove(&addr);
            true
        } else {
            false
        }
    }

    pub fn purge_expired(&mut self) -> usize {
        let before = self.issued.len();
        let lifetime = self.lifetime;
        self.issued
            .retain(|_, issued| issued.issued_at.elapsed() <= lifetime);
        before - self.issued.len()
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .issued
            .iter()
            .min_by_key(|(_, issued)| issued.issued_at)
            .map(|(addr, _)| *addr);
        if let Some(addr) = oldest {
            self.issued.remove(&addr);
        }
    }
}

fn random_challenge() -> Result<u32, getrandom::Error> {
    let mut bytes = [0u8; 4];
    loop {
        getrandom::getrandom(&mut bytes)?;
        // Zero is what a client sends before it holds a challenge.
        match u32::from_le_bytes(bytes) {
            0 => continue,
            value => return Ok(value),
        }
    }
}
