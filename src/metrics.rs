//! Process-wide counters and feature toggles shared by the reactor's
//! connection handlers and the UDP control-plane.
//!
//! The server is single-threaded, so this registry needs no
//! synchronization: it is owned by `smtp::Server` and mutated only from
//! reactor-thread code paths, per `spec.md` §3.

/// Total connections accepted, current connections in flight, bytes
/// transferred, and the two control-plane toggles.
#[derive(Debug, Default)]
pub struct Metrics {
    total_connections: u64,
    current_connections: u64,
    bytes_transferred: u64,
    transform_enabled: bool,
    verify_enabled: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted connection. Call exactly once per accept.
    pub fn record_connect(&mut self) {
        self.total_connections = self.total_connections.saturating_add(1);
        self.current_connections = self.current_connections.saturating_add(1);
    }

    /// Records a connection teardown. Call exactly once per destroy.
    pub fn record_disconnect(&mut self) {
        self.current_connections = self.current_connections.saturating_sub(1);
    }

    pub fn record_bytes(&mut self, n: u64) {
        self.bytes_transferred = self.bytes_transferred.saturating_add(n);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections
    }

    pub fn current_connections(&self) -> u64 {
        self.current_connections
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn transform_enabled(&self) -> bool {
        self.transform_enabled
    }

    pub fn set_transform_enabled(&mut self, enabled: bool) {
        self.transform_enabled = enabled;
    }

    pub fn verify_enabled(&self) -> bool {
        self.verify_enabled
    }

    pub fn set_verify_enabled(&mut self, enabled: bool) {
        self.verify_enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_disconnect_keeps_invariants() {
        let mut m = Metrics::new();
        m.record_connect();
        m.record_connect();
        m.record_disconnect();
        assert_eq!(m.total_connections(), 2);
        assert_eq!(m.current_connections(), 1);
        assert!(m.total_connections() >= m.current_connections());
    }

    #[test]
    fn toggles_default_off() {
        let m = Metrics::new();
        assert!(!m.transform_enabled());
        assert!(!m.verify_enabled());
    }

    #[test]
    fn bytes_accumulate() {
        let mut m = Metrics::new();
        m.record_bytes(100);
        m.record_bytes(50);
        assert_eq!(m.bytes_transferred(), 150);
    }
}
