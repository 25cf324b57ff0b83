use crate::config::defaults::MAX_PROBES_PER_HOP;
use crate::types::{ProbeIndex, Sequence, TimeToLive};
use arrayvec::ArrayVec;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant, SystemTime};

/// A probe which has been sent and is awaiting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRecord {
    /// The sequence of the probe.
    pub sequence: Sequence,
    /// The hop the probe was sent for.
    pub hop: TimeToLive,
    /// The index of the probe within its hop.
    pub probe_index: ProbeIndex,
    /// Timestamp when the probe was sent.
    pub sent_at: Instant,
}

impl ProbeRecord {
    #[must_use]
    pub const fn new(
        sequence: Sequence,
        hop: TimeToLive,
        probe_index: ProbeIndex,
        sent_at: Instant,
    ) -> Self {
        Self {
            sequence,
            hop,
            probe_index,
            sent_at,
        }
    }
}

/// The authoritative result for a single hop probe.
///
/// Exactly one is created per matched reply, or one per set of timed out
/// probes for a hop; never mutated after emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopResult {
    /// The hop number (1-based).
    pub hop_number: u8,
    /// The router which answered, if any.
    pub router: Option<IpAddr>,
    /// The round-trip time, if measured.
    pub rtt: Option<Duration>,
    /// Did the target itself answer?
    pub is_destination: bool,
    /// Did the hop time out?
    pub is_timeout: bool,
    /// The sequence of the probe which produced this result.
    pub sequence: Sequence,
    /// The index of the probe within its hop.
    pub probe_index: ProbeIndex,
    /// Wallclock timestamp of the observation.
    pub observed_at: SystemTime,
}

/// The classification of an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// An `EchoReply` whose identifier matched the session.
    EchoReply { identifier: u16, sequence: u16 },
    /// A `TimeExceeded` whose embedded probe matched the session.
    TimeExceeded {
        identifier: u16,
        sequence: u16,
        code: u8,
    },
    /// A `DestinationUnreachable` whose embedded probe matched the session.
    Unreachable {
        identifier: u16,
        sequence: u16,
        code: u8,
    },
    /// A well formed datagram which is not for this session.
    Other,
    /// A datagram too short or inconsistent to interpret.
    Malformed,
}

/// The set of probes currently awaiting a response, keyed by sequence.
#[derive(Debug, Default)]
pub struct ProbeTable {
    records: HashMap<u16, ProbeRecord>,
}

impl ProbeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for an outstanding probe.
    ///
    /// A record already present under the same sequence (which can only
    /// happen after sequence wrap) is evicted.
    pub fn record(&mut self, record: ProbeRecord) {
        if let Some(stale) = self.records.insert(record.sequence.0, record) {
            tracing::warn!(sequence = stale.sequence.0, "evicted stale probe record");
        }
    }

    /// Remove and return the record for a sequence, if present.
    pub fn take(&mut self, sequence: Sequence) -> Option<ProbeRecord> {
        self.records.remove(&sequence.0)
    }

    /// Remove and return every record belonging to a hop, ordered by probe
    /// index.
    pub fn collect_for_hop(
        &mut self,
        hop: TimeToLive,
    ) -> ArrayVec<ProbeRecord, { MAX_PROBES_PER_HOP as usize }> {
        let mut collected: ArrayVec<ProbeRecord, { MAX_PROBES_PER_HOP as usize }> = self
            .records
            .values()
            .filter(|record| record.hop == hop)
            .take(MAX_PROBES_PER_HOP as usize)
            .copied()
            .collect();
        collected.sort_unstable_by_key(|record| record.probe_index);
        for record in &collected {
            self.records.remove(&record.sequence.0);
        }
        collected
    }

    /// Remove every record older than `max_age` and return how many were
    /// removed.
    ///
    /// This bounds the table when a probe never elicits any classification
    /// at all.
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> Vec<ProbeRecord> {
        let mut swept = Vec::new();
        self.records.retain(|_, record| {
            if now.saturating_duration_since(record.sent_at) > max_age {
                swept.push(*record);
                false
            } else {
                true
            }
        });
        swept.sort_unstable_by_key(|record| (record.hop, record.probe_index));
        swept
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
