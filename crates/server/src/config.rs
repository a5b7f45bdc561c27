use std::time::Duration;

use wiretable::DEFAULT_TICK_RATE;
use wiretable::net::{
    DEFAULT_CHALLENGE_LIFETIME, DEFAULT_MAX_CHALLENGES, DEFAULT_MAX_CONNECTIONLESS_PER_TICK,
    DEFAULT_RCON_BAN, DEFAULT_RCON_MAX_FAILURES, DispatchConfig,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub hostname: String,
    pub map: String,
    pub rcon_password: Option<String>,
    pub dedicated: bool,
    pub client_timeout_secs: u64,
    pub challenge_lifetime_secs: u64,
    pub max_connectionless_per_tick: usize,
    /// How long to wait for a table acknowledgement before resending.
    pub resend_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            hostname: "wiretable server".to_string(),
            map: "default".to_string(),
            rcon_password: None,
            dedicated: true,
            client_timeout_secs: 30,
            challenge_lifetime_secs: DEFAULT_CHALLENGE_LIFETIME.as_secs(),
            max_connectionless_per_tick: DEFAULT_MAX_CONNECTIONLESS_PER_TICK,
            resend_interval_ms: 250,
        }
    }
}

impl ServerConfig {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_per_tick: self.max_connectionless_per_tick,
            challenge_lifetime: Duration::from_secs(self.challenge_lifetime_secs),
            max_challenges: DEFAULT_MAX_CHALLENGES,
            rcon_password: self.rcon_password.clone().filter(|p| !p.is_empty()),
            rcon_max_failures: DEFAULT_RCON_MAX_FAILURES,
            rcon_ban: DEFAULT_RCON_BAN,
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }
}
