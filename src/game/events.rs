//! Node Notifications
//!
//! Things a node reports to the outside world: link changes, hits, round
//! results, game transitions. Nodes queue them; the owner drains them with
//! `take_notifications` and forwards whatever the console cares about.

use serde::{Serialize, Deserialize};

use crate::core::clock::Timestamp;
use crate::game::hit::RoundOutcome;
use crate::game::mode::{GameMode, Player};
use crate::game::state::PlayerColors;

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationData {
    /// A peer's first datagram after being disconnected.
    PeerConnected {
        /// Node id
        node_id: u8,
    },

    /// A peer stopped sending within the heartbeat timeout.
    PeerDisconnected {
        /// Node id
        node_id: u8,
    },

    /// A clock-sync round trip completed.
    ClockSynced {
        /// Node id
        node_id: u8,
        /// Peer clock minus local clock (µs)
        offset_us: i64,
        /// Measured round trip (µs)
        round_trip_us: u32,
    },

    /// A new logical hit.
    Hit {
        /// Who hit
        player: Player,
        /// Adjusted hit time
        time: Timestamp,
        /// Sensor strength
        strength: u16,
    },

    /// A round was decided.
    RoundDecided {
        /// Result
        outcome: RoundOutcome,
    },

    /// Points were applied to the board.
    PointAwarded {
        /// Scorer
        player: Player,
        /// Points applied
        multiplier: u8,
    },

    /// A game was won; celebration starts.
    GameWon {
        /// Winner
        winner: Player,
    },

    /// Mode or colours changed.
    SettingsChanged {
        /// Mode now in force
        mode: GameMode,
        /// Colours now in force
        colors: PlayerColors,
        /// Whether the board was reset
        reset: bool,
    },

    /// Board back at initial positions.
    GameReset,

    /// The node wants an authoritative snapshot.
    StateRequested,

    /// A command or record was rejected.
    Rejected {
        /// Human-readable reason
        message: String,
    },
}

/// A notification with the local time it was raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Local time
    pub at: Timestamp,

    /// Player involved, if any
    pub player: Option<Player>,

    /// Payload
    pub data: NotificationData,
}

impl Notification {
    /// Create a notification.
    pub fn new(at: Timestamp, data: NotificationData) -> Self {
        let player = match &data {
            NotificationData::Hit { player, .. } => Some(*player),
            NotificationData::RoundDecided { outcome } => outcome.winner(),
            NotificationData::PointAwarded { player, .. } => Some(*player),
            NotificationData::GameWon { winner } => Some(*winner),
            _ => None,
        };

        Self { at, player, data }
    }

    /// Peer connected.
    pub fn peer_connected(at: Timestamp, node_id: u8) -> Self {
        Self::new(at, NotificationData::PeerConnected { node_id })
    }

    /// Peer timed out.
    pub fn peer_disconnected(at: Timestamp, node_id: u8) -> Self {
        Self::new(at, NotificationData::PeerDisconnected { node_id })
    }

    /// New logical hit.
    pub fn hit(at: Timestamp, player: Player, time: Timestamp, strength: u16) -> Self {
        Self::new(at, NotificationData::Hit { player, time, strength })
    }

    /// Round decided.
    pub fn round_decided(at: Timestamp, outcome: RoundOutcome) -> Self {
        Self::new(at, NotificationData::RoundDecided { outcome })
    }

    /// Game won.
    pub fn game_won(at: Timestamp, winner: Player) -> Self {
        Self::new(at, NotificationData::GameWon { winner })
    }

    /// Rejected input.
    pub fn rejected(at: Timestamp, message: impl Into<String>) -> Self {
        Self::new(at, NotificationData::Rejected { message: message.into() })
    }
}
