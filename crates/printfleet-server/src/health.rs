//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: &'static str,
    /// Seconds since the server was built.
    pub uptime_secs: u64,
    /// Open client sessions.
    pub connections: usize,
    /// Registered machines.
    pub machines: usize,
    /// Machines with a live link.
    pub connected_machines: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, machines: usize, connected_machines: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        machines,
        connected_machines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, 0, 0).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let json = serde_json::to_value(health_check(Instant::now(), 2, 3, 1)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 2);
        assert_eq!(json["machines"], 3);
        assert_eq!(json["connected_machines"], 1);
        assert!(json["uptime_secs"].is_number());
    }
}
