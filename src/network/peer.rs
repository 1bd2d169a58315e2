//! Peer Link Table
//!
//! Who is out there, where to send to them, and whether they are alive.
//!
//! Entries are created at start and never removed. A peer becomes connected
//! on any datagram and drops back to disconnected when it has been silent
//! for the heartbeat timeout. A timeout also forgets the learned address
//! and the clock offset, so a node that rejoins with a new address (or a
//! rebooted clock) is relearned from scratch.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::clock::{Timestamp, MICROS_PER_MILLI};
use crate::game::mode::Player;
use crate::network::transport::HardwareAddr;

/// What a peer does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Host/bridge, owns the game state
    Host,
    /// A player's sensor node
    Player(Player),
    /// The LED display
    Display,
}

/// One row of the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerLink {
    /// Node id
    pub node_id: u8,
    /// Role
    pub role: PeerRole,
    /// Send target. Kept after a timeout until the next datagram replaces it.
    pub address: Option<HardwareAddr>,
    /// Whether `address` came from (or was confirmed by) the current link
    pub learned: bool,
    /// Heard from within the heartbeat timeout
    pub connected: bool,
    /// Last datagram receipt
    pub last_seen_at: Timestamp,
    /// Peer clock minus local clock (µs)
    pub clock_offset: i64,
    /// `clock_offset` is valid for the current link
    pub clock_synced: bool,
}

impl PeerLink {
    fn new(node_id: u8, role: PeerRole, address: Option<HardwareAddr>) -> Self {
        Self {
            node_id,
            role,
            learned: address.is_some(),
            address,
            connected: false,
            last_seen_at: Timestamp::ZERO,
            clock_offset: 0,
            clock_synced: false,
        }
    }
}

/// Liveness and addressing for every known peer.
#[derive(Debug, Clone)]
pub struct PeerTable {
    peers: BTreeMap<u8, PeerLink>,
    heartbeat_timeout_us: u32,
}

impl PeerTable {
    /// Empty table.
    pub fn new(heartbeat_timeout_ms: u32) -> Self {
        Self {
            peers: BTreeMap::new(),
            heartbeat_timeout_us: heartbeat_timeout_ms.saturating_mul(MICROS_PER_MILLI),
        }
    }

    /// Register a peer whose address is learned from its first datagram.
    pub fn add_dynamic(&mut self, node_id: u8, role: PeerRole) {
        self.peers.insert(node_id, PeerLink::new(node_id, role, None));
    }

    /// Register a peer with a configured address.
    pub fn add_static(&mut self, node_id: u8, role: PeerRole, address: HardwareAddr) {
        self.peers.insert(node_id, PeerLink::new(node_id, role, Some(address)));
    }

    /// Look up a peer.
    pub fn get(&self, node_id: u8) -> Option<&PeerLink> {
        self.peers.get(&node_id)
    }

    /// All peers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerLink> {
        self.peers.values()
    }

    /// Whether `node_id` is a known peer.
    pub fn contains(&self, node_id: u8) -> bool {
        self.peers.contains_key(&node_id)
    }

    /// Whether `node_id` is connected.
    pub fn is_connected(&self, node_id: u8) -> bool {
        self.peers.get(&node_id).is_some_and(|p| p.connected)
    }

    /// Ids of connected peers.
    pub fn connected_ids(&self) -> Vec<u8> {
        self.peers.values().filter(|p| p.connected).map(|p| p.node_id).collect()
    }

    /// Current send target.
    pub fn address_of(&self, node_id: u8) -> Option<HardwareAddr> {
        self.peers.get(&node_id).and_then(|p| p.address)
    }

    /// Clock offset if synchronized on the current link, otherwise 0.
    pub fn clock_offset(&self, node_id: u8) -> i64 {
        match self.peers.get(&node_id) {
            Some(p) if p.clock_synced => p.clock_offset,
            _ => 0,
        }
    }

    /// Learn the sender's address if it is not already learned.
    ///
    /// Returns `true` when the address was (re)learned.
    pub fn on_datagram_from(&mut self, declared_id: u8, address_hint: HardwareAddr) -> bool {
        match self.peers.get_mut(&declared_id) {
            Some(peer) if !peer.learned => {
                peer.address = Some(address_hint);
                peer.learned = true;
                true
            }
            _ => false,
        }
    }

    /// Record a datagram from `node_id`.
    ///
    /// Returns `true` on a disconnected → connected transition.
    pub fn mark_seen(&mut self, node_id: u8, now: Timestamp) -> bool {
        match self.peers.get_mut(&node_id) {
            Some(peer) => {
                let was_connected = peer.connected;
                peer.connected = true;
                peer.last_seen_at = now;
                !was_connected
            }
            None => false,
        }
    }

    /// Store a measured offset.
    pub fn set_clock_offset(&mut self, node_id: u8, offset: i64) {
        if let Some(peer) = self.peers.get_mut(&node_id) {
            peer.clock_offset = offset;
            peer.clock_synced = true;
        }
    }

    /// Time out silent peers. Returns the ids that just disconnected.
    pub fn tick(&mut self, now: Timestamp) -> Vec<u8> {
        let timeout = self.heartbeat_timeout_us;
        let mut dropped = Vec::new();

        for peer in self.peers.values_mut() {
            if peer.connected && now.elapsed_since(peer.last_seen_at) >= timeout {
                peer.connected = false;
                peer.clock_synced = false;
                peer.learned = false;
                dropped.push(peer.node_id);
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> HardwareAddr {
        HardwareAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    fn table() -> PeerTable {
        let mut t = PeerTable::new(2000);
        t.add_static(0, PeerRole::Host, addr(0));
        t.add_dynamic(1, PeerRole::Player(Player::A));
        t
    }

    #[test]
    fn test_initial_states() {
        let t = table();
        let host = t.get(0).unwrap();
        assert!(host.learned && !host.connected);
        let player = t.get(1).unwrap();
        assert!(!player.learned && !player.connected);
        assert_eq!(player.address, None);
    }

    #[test]
    fn test_learn_then_connect() {
        let mut t = table();
        assert!(t.on_datagram_from(1, addr(1)));
        assert!(!t.on_datagram_from(1, addr(9)));
        assert_eq!(t.address_of(1), Some(addr(1)));

        assert!(t.mark_seen(1, Timestamp::from_millis(10)));
        assert!(!t.mark_seen(1, Timestamp::from_millis(20)));
        assert!(t.is_connected(1));
    }

    #[test]
    fn test_unknown_ids_ignored() {
        let mut t = table();
        assert!(!t.on_datagram_from(42, addr(42)));
        assert!(!t.mark_seen(42, Timestamp::ZERO));
        assert!(t.get(42).is_none());
    }

    #[test]
    fn test_timeout_resets_learning() {
        let mut t = table();
        t.on_datagram_from(1, addr(1));
        t.mark_seen(1, Timestamp::from_millis(100));
        t.set_clock_offset(1, -1234);
        assert_eq!(t.clock_offset(1), -1234);

        assert!(t.tick(Timestamp::from_millis(2099)).is_empty());
        assert_eq!(t.tick(Timestamp::from_millis(2100)), vec![1]);

        let peer = t.get(1).unwrap();
        assert!(!peer.connected && !peer.clock_synced && !peer.learned);
        assert_eq!(t.clock_offset(1), 0);
        // Old address remains a send target until replaced
        assert_eq!(peer.address, Some(addr(1)));

        // Rejoins from a new address
        assert!(t.on_datagram_from(1, addr(2)));
        assert!(t.mark_seen(1, Timestamp::from_millis(3000)));
        assert_eq!(t.address_of(1), Some(addr(2)));
    }

    #[test]
    fn test_timeout_across_counter_wrap() {
        let mut t = table();
        let seen = Timestamp(u32::MAX - 500_000);
        t.mark_seen(0, seen);
        assert!(t.tick(seen.add_millis(1999)).is_empty());
        assert_eq!(t.tick(seen.add_millis(2000)), vec![0]);
    }

    #[test]
    fn test_disconnect_reported_once() {
        let mut t = table();
        t.mark_seen(0, Timestamp::ZERO);
        assert_eq!(t.tick(Timestamp::from_millis(5000)), vec![0]);
        assert!(t.tick(Timestamp::from_millis(9000)).is_empty());
    }
}
