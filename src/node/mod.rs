//! Node Roles
//!
//! Each physical node runs one of three roles in a cooperative loop:
//!
//! ```text
//!   loop {
//!       for datagram in mailbox.drain() { node.handle_datagram(..) }
//!       node.tick(now)
//!       for out in node.take_outgoing() { radio.send(out.to, &out.bytes) }
//!       for n in node.take_notifications() { .. }
//!   }
//! ```
//!
//! Nodes never touch the radio or the wall clock. Sends are queued as
//! [`Outgoing`] values and time is passed in, which keeps every role
//! testable without sockets.

pub mod host;
pub mod player;
pub mod display;

use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::clock::Timestamp;
use crate::game::events::Notification;
use crate::game::hit::HitConfig;
use crate::game::mode::{GameMode, Player, SwapRule, Track};
use crate::game::render::is_valid_color;
use crate::game::state::PlayerColors;
use crate::network::mailbox::{MailboxReceiver, DEFAULT_MAILBOX_CAPACITY};
use crate::network::peer::{PeerRole, PeerTable};
use crate::network::record::{
    EventMessage, StateMessage, DISPLAY_ID, HOST_ID, PLAYER_A_ID, PLAYER_B_ID,
};
use crate::network::transport::{HardwareAddr, TransportError};

pub use host::HostNode;
pub use player::PlayerNode;
pub use display::DisplayNode;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How the display replica follows the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationModel {
    /// Host sends full snapshots; the display only renders them.
    #[default]
    FullState,
    /// Host sends score, mode and reset events; the display re-derives
    /// positions with the same rules.
    ScoreEvents,
}

/// A peer known at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Node id
    pub node_id: u8,
    /// Fixed address (`AA:BB:CC:DD:EE:FF`). Without one the address is
    /// learned from the peer's first datagram.
    #[serde(default)]
    pub address: Option<String>,
}

/// Node configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Own node id
    pub node_id: u8,
    /// Number of LEDs
    pub track_len: u8,
    /// Heartbeat period (ms)
    pub heartbeat_interval_ms: u32,
    /// Silence after which a peer is disconnected (ms)
    pub heartbeat_timeout_ms: u32,
    /// Clock-sync probe period per peer (ms)
    pub sync_interval_ms: u32,
    /// Host: periodic full-state broadcast (ms)
    pub state_broadcast_ms: u32,
    /// Display: periodic restore request in score-event mode (ms)
    pub restore_interval_ms: u32,
    /// Host: how long a won game stays in celebration (ms)
    pub celebration_hold_ms: u32,
    /// Player: extra copies sent per hit
    pub hit_repeat_count: u8,
    /// Player: spacing of the extra copies (ms)
    pub hit_repeat_interval_ms: u32,
    /// Display replication model
    pub replication: ReplicationModel,
    /// Swap Sides collision rule
    pub swap_rule: SwapRule,
    /// Mode at startup
    pub initial_mode: GameMode,
    /// Colours at startup
    pub colors: PlayerColors,
    /// Hit processing (host)
    pub hit: HitConfig,
    /// Peers known at startup
    pub peers: Vec<PeerConfig>,
    /// Receive mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: HOST_ID,
            track_len: crate::game::mode::DEFAULT_TRACK_LEN,
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 2000,
            sync_interval_ms: 5000,
            state_broadcast_ms: 1000,
            restore_interval_ms: 10_000,
            celebration_hold_ms: crate::game::celebration::Pattern::longest_ms(),
            hit_repeat_count: 2,
            hit_repeat_interval_ms: 20,
            replication: ReplicationModel::default(),
            swap_rule: SwapRule::default(),
            initial_mode: GameMode::Territory,
            colors: PlayerColors::default(),
            hit: HitConfig::default(),
            peers: Vec::new(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Defaults for a role: the host learns everyone, the others need the
    /// host's address.
    pub fn for_node(node_id: u8, host_address: Option<HardwareAddr>) -> Self {
        let peers = if node_id == HOST_ID {
            [PLAYER_A_ID, PLAYER_B_ID, DISPLAY_ID]
                .into_iter()
                .map(|id| PeerConfig { node_id: id, address: None })
                .collect()
        } else {
            vec![PeerConfig {
                node_id: HOST_ID,
                address: host_address.map(|a| a.to_string()),
            }]
        };
        Self { node_id, peers, ..Self::default() }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, NodeError> {
        let text = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Track geometry.
    pub fn track(&self) -> Result<Track, NodeError> {
        Track::new(self.track_len)
            .ok_or_else(|| NodeError::Invalid(format!("track length {} out of range", self.track_len)))
    }

    /// Check values that cannot be represented on the wire or the strip.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.track()?;
        for c in [self.colors.a, self.colors.b] {
            if !is_valid_color(c) {
                return Err(NodeError::Invalid(format!("colour index {} out of range", c)));
            }
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(NodeError::Invalid("heartbeat timeout must exceed the interval".into()));
        }
        for peer in &self.peers {
            role_of(peer.node_id)
                .ok_or_else(|| NodeError::Invalid(format!("unknown peer id {}", peer.node_id)))?;
            if let Some(addr) = &peer.address {
                HardwareAddr::parse(addr)
                    .ok_or_else(|| NodeError::Invalid(format!("bad address {:?}", addr)))?;
            }
        }
        Ok(())
    }

    /// Peer table for this configuration.
    pub fn peer_table(&self) -> Result<PeerTable, NodeError> {
        let mut table = PeerTable::new(self.heartbeat_timeout_ms);
        for peer in &self.peers {
            let role = role_of(peer.node_id)
                .ok_or_else(|| NodeError::Invalid(format!("unknown peer id {}", peer.node_id)))?;
            match &peer.address {
                Some(text) => {
                    let addr = HardwareAddr::parse(text)
                        .ok_or_else(|| NodeError::Invalid(format!("bad address {:?}", text)))?;
                    table.add_static(peer.node_id, role, addr);
                }
                None => table.add_dynamic(peer.node_id, role),
            }
        }
        Ok(table)
    }
}

/// Role implied by a node id.
pub fn role_of(node_id: u8) -> Option<PeerRole> {
    match node_id {
        HOST_ID => Some(PeerRole::Host),
        DISPLAY_ID => Some(PeerRole::Display),
        id => Player::from_id(id).map(PeerRole::Player),
    }
}

/// Node errors. Only construction can fail.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Config file unreadable.
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `NodeConfig`.
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config values out of range.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Radio could not start.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

// =============================================================================
// OUTBOX
// =============================================================================

/// A datagram waiting to be handed to the radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    /// Destination node id
    pub node_id: u8,
    /// Destination address
    pub to: HardwareAddr,
    /// Encoded record
    pub bytes: Vec<u8>,
}

/// Queue of encoded datagrams. Peers without an address are skipped; the
/// next heartbeat from them makes them reachable again.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    /// Queue an event record for `node_id`.
    pub fn send_event(&mut self, peers: &PeerTable, node_id: u8, msg: &EventMessage) {
        match msg.to_bytes() {
            Ok(bytes) => self.push(peers, node_id, bytes),
            Err(e) => debug!("Failed to encode {:?}: {}", msg, e),
        }
    }

    /// Queue a state record for `node_id`.
    pub fn send_state(&mut self, peers: &PeerTable, node_id: u8, msg: &StateMessage) {
        match msg.to_bytes() {
            Ok(bytes) => self.push(peers, node_id, bytes),
            Err(e) => debug!("Failed to encode {:?}: {}", msg, e),
        }
    }

    fn push(&mut self, peers: &PeerTable, node_id: u8, bytes: Vec<u8>) {
        match peers.address_of(node_id) {
            Some(to) => self.queue.push(Outgoing { node_id, to, bytes }),
            None => debug!("No address for node {}, dropping send", node_id),
        }
    }

    /// Take everything queued.
    pub fn take(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.queue)
    }
}

// =============================================================================
// NODE
// =============================================================================

/// The protocol surface shared by every role.
pub trait Node {
    /// Own node id.
    fn node_id(&self) -> u8;

    /// Interpret one datagram received from `from`.
    fn handle_datagram(&mut self, from: HardwareAddr, bytes: &[u8], now: Timestamp);

    /// Run timers: liveness, heartbeats, probes, re-sends.
    fn tick(&mut self, now: Timestamp);

    /// Datagrams queued since the last call.
    fn take_outgoing(&mut self) -> Vec<Outgoing>;

    /// Notifications raised since the last call.
    fn take_notifications(&mut self) -> Vec<Notification>;
}

/// Feed everything in the mailbox to `node`. Runs at the top of each tick.
pub fn drain_mailbox<N: Node + ?Sized>(node: &mut N, mailbox: &mut MailboxReceiver, now: Timestamp) -> usize {
    let inbound = mailbox.drain();
    for datagram in &inbound {
        node.handle_datagram(datagram.from, datagram.bytes(), now);
    }
    inbound.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.heartbeat_timeout_ms, 2000);
        assert_eq!(config.hit.dedup_window_ms, 250);
        assert_eq!(config.celebration_hold_ms, 3000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{"node_id": 3, "replication": "score_events", "peers": [{"node_id": 0, "address": "0A:00:00:01:1F:90"}]}"#,
        )
        .unwrap();
        assert_eq!(config.node_id, 3);
        assert_eq!(config.replication, ReplicationModel::ScoreEvents);
        assert_eq!(config.sync_interval_ms, 5000);
        let table = config.peer_table().unwrap();
        assert!(table.get(HOST_ID).unwrap().learned);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let bad_track = NodeConfig { track_len: 41, ..NodeConfig::default() };
        assert!(bad_track.validate().is_err());

        let bad_color = NodeConfig { colors: PlayerColors { a: 0, b: 9 }, ..NodeConfig::default() };
        assert!(bad_color.validate().is_err());

        let bad_peer = NodeConfig {
            peers: vec![PeerConfig { node_id: 9, address: None }],
            ..NodeConfig::default()
        };
        assert!(bad_peer.validate().is_err());

        let bad_addr = NodeConfig {
            peers: vec![PeerConfig { node_id: 0, address: Some("nope".into()) }],
            ..NodeConfig::default()
        };
        assert!(bad_addr.validate().is_err());
    }

    #[test]
    fn test_for_node_peers() {
        let host = NodeConfig::for_node(HOST_ID, None);
        assert_eq!(host.peers.len(), 3);
        assert!(host.peers.iter().all(|p| p.address.is_none()));

        let addr = HardwareAddr([10, 0, 0, 1, 0x1F, 0x90]);
        let player = NodeConfig::for_node(PLAYER_A_ID, Some(addr));
        let table = player.peer_table().unwrap();
        assert_eq!(table.address_of(HOST_ID), Some(addr));
    }

    #[test]
    fn test_outbox_skips_unknown_addresses() {
        let mut peers = PeerTable::new(2000);
        peers.add_dynamic(1, PeerRole::Player(Player::A));
        peers.add_static(3, PeerRole::Display, HardwareAddr([3; 6]));

        let mut outbox = Outbox::default();
        outbox.send_event(&peers, 1, &EventMessage::Heartbeat { source_id: 0 });
        outbox.send_state(&peers, 3, &StateMessage::Heartbeat { device_id: 0 });
        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].node_id, 3);
        assert_eq!(sent[0].bytes.len(), 13);
        assert!(outbox.take().is_empty());
    }
}
