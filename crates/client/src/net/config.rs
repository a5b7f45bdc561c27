#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    /// Seconds without a packet from the server before giving up.
    pub connection_timeout_secs: u64,
    pub ping_interval_secs: f32,
    /// Delay before a connectionless request is sent again.
    pub retry_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "player".to_string(),
            connection_timeout_secs: 30,
            ping_interval_secs: 1.0,
            retry_interval_ms: 500,
            max_attempts: 5,
        }
    }
}

impl ClientConfig {
    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_interval_ms)
    }
}
