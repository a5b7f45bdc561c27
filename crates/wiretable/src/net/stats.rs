#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
}

impl NetworkStats {
    pub fn record_rtt(&mut self, rtt_ms: f32) {
        self.rtt_ms = rtt_ms;
    }
}
