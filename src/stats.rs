use std::time::Duration;

/// A point-in-time view of the session counters and latency aggregates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    /// The number of successful probe sends.
    pub probes_sent: u64,
    /// The number of matched responses.
    pub responses_received: u64,
    /// The number of probes which timed out.
    pub timeouts: u64,
    /// Percentage of sent probes with no matched response.
    pub loss_pct: f64,
    /// The smallest observed round-trip time.
    pub min_latency: Option<Duration>,
    /// The mean observed round-trip time.
    pub avg_latency: Option<Duration>,
    /// The largest observed round-trip time.
    pub max_latency: Option<Duration>,
}

/// Accumulates counters and valid latencies for a session.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    probes_sent: u64,
    responses_received: u64,
    timeouts: u64,
    latencies: Vec<Duration>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful `sendto`.
    pub fn record_sent(&mut self) {
        self.probes_sent += 1;
    }

    /// Record a matched response and its round-trip time.
    pub fn record_response(&mut self, rtt: Duration) {
        self.responses_received += 1;
        self.latencies.push(rtt);
    }

    /// Record a probe timeout.
    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    /// Discard all recorded state.
    pub fn reset(&mut self) {
        self.probes_sent = 0;
        self.responses_received = 0;
        self.timeouts = 0;
        self.latencies.clear();
    }

    /// Derive a `Statistics` view of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> Statistics {
        let loss_pct = if self.probes_sent == 0 {
            0.0
        } else {
            let lost = self.probes_sent - self.responses_received.min(self.probes_sent);
            lost as f64 / self.probes_sent as f64 * 100.0
        };
        let avg_latency = if self.latencies.is_empty() {
            None
        } else {
            let total: Duration = self.latencies.iter().sum();
            Some(total / self.latencies.len() as u32)
        };
        Statistics {
            probes_sent: self.probes_sent,
            responses_received: self.responses_received,
            timeouts: self.timeouts,
            loss_pct,
            min_latency: self.latencies.iter().min().copied(),
            avg_latency,
            max_latency: self.latencies.iter().max().copied(),
        }
    }
}
