//! Clock Synchronization
//!
//! Round-trip offset estimation between the host and each connected peer.
//!
//! ```text
//!   host                       peer
//!    | -- probe(sent_at) -----> |
//!    |                          | echo = peer clock on receipt
//!    | <-- reply(sent_at,echo)- |
//!   now
//!
//!   round_trip = now - sent_at
//!   offset     = (echo + round_trip / 2) - now      (peer minus host)
//! ```
//!
//! All arithmetic is modulo 2^32 so it survives counter wraparound. The
//! estimate is off by at most half the round trip when the two legs are
//! asymmetric.

use std::collections::BTreeMap;

use crate::core::clock::{IntervalTimer, Timestamp};
use crate::network::peer::PeerTable;
use crate::network::record::EventMessage;

/// A probe waiting for its reply. Used once, then discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSyncProbe {
    /// Local time the probe left
    pub sent_at: Timestamp,
}

/// Result of one completed round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSample {
    /// Peer measured
    pub node_id: u8,
    /// Round trip (µs)
    pub round_trip_us: u32,
    /// Peer clock minus local clock (µs)
    pub offset_us: i64,
}

/// Offset from one probe/reply pair. Returns `(round_trip_us, offset_us)`.
pub fn compute_offset(sent_at: Timestamp, echo: Timestamp, now: Timestamp) -> (u32, i64) {
    let round_trip = now.elapsed_since(sent_at);
    let midpoint = echo.add_micros(round_trip / 2);
    (round_trip, midpoint.signed_diff(now) as i64)
}

/// The reply a peer sends when probed: echo its own clock at receipt.
pub fn answer_probe(self_id: u8, sent_at: Timestamp, now: Timestamp) -> EventMessage {
    EventMessage::SyncReply {
        source_id: self_id,
        sent_at,
        echo: now,
    }
}

/// Probe scheduling and reply matching for every peer.
#[derive(Debug, Clone)]
pub struct ClockSync {
    sync_interval_ms: u32,
    outstanding: BTreeMap<u8, ClockSyncProbe>,
    timers: BTreeMap<u8, IntervalTimer>,
}

impl ClockSync {
    /// At most one probe per peer per `sync_interval_ms`.
    pub fn new(sync_interval_ms: u32) -> Self {
        Self {
            sync_interval_ms,
            outstanding: BTreeMap::new(),
            timers: BTreeMap::new(),
        }
    }

    /// Probes due at `now`, one per connected peer whose interval elapsed.
    pub fn due_probes(&mut self, now: Timestamp, peers: &PeerTable) -> Vec<(u8, EventMessage)> {
        let mut probes = Vec::new();
        for id in peers.connected_ids() {
            let interval = self.sync_interval_ms;
            let timer = self
                .timers
                .entry(id)
                .or_insert_with(|| IntervalTimer::from_millis(interval));
            if timer.poll(now) {
                self.outstanding.insert(id, ClockSyncProbe { sent_at: now });
                probes.push((id, EventMessage::SyncProbe { sent_at: now }));
            }
        }
        probes
    }

    /// Whether a probe to `node_id` is awaiting its reply.
    pub fn is_outstanding(&self, node_id: u8) -> bool {
        self.outstanding.contains_key(&node_id)
    }

    /// Handle a reply.
    ///
    /// Ignored unless the peer is connected right now and the reply echoes
    /// the outstanding probe. On success the offset is stored in `peers`.
    pub fn on_reply(
        &mut self,
        node_id: u8,
        sent_at: Timestamp,
        echo: Timestamp,
        now: Timestamp,
        peers: &mut PeerTable,
    ) -> Option<SyncSample> {
        if !peers.is_connected(node_id) {
            return None;
        }
        match self.outstanding.get(&node_id) {
            Some(probe) if probe.sent_at == sent_at => {}
            _ => return None,
        }
        self.outstanding.remove(&node_id);

        let (round_trip_us, offset_us) = compute_offset(sent_at, echo, now);
        peers.set_clock_offset(node_id, offset_us);
        Some(SyncSample { node_id, round_trip_us, offset_us })
    }

    /// Forget the probe in flight to a peer that disconnected. The next
    /// connection gets a fresh probe on its first tick.
    pub fn abandon(&mut self, node_id: u8) {
        self.outstanding.remove(&node_id);
        self.timers.remove(&node_id);
    }
}
