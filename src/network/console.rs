//! Console Adapter
//!
//! Line-delimited JSON between the host and an operator console. Commands
//! come in, notifications go out. This module only translates; the host node
//! decides what a command does.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::StateHash;
use crate::game::events::{Notification, NotificationData};
use crate::game::hit::RoundOutcome;
use crate::game::mode::{GameMode, Player};
use crate::game::state::{Board, GameSnapshot, GameState, PlayerColors};
use crate::network::peer::{PeerLink, PeerRole};

// =============================================================================
// CONSOLE -> HOST
// =============================================================================

/// Commands accepted from the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConsoleCommand {
    /// Console liveness; answered with a status report.
    Heartbeat,

    /// Reset the board and re-arm the round.
    Reset,

    /// Award points directly.
    AwardPoint {
        /// 1 = player A, 2 = player B
        player: u8,
        /// 1..=10
        multiplier: u8,
    },

    /// Change mode and colours.
    #[serde(rename_all = "camelCase")]
    SettingsUpdate {
        /// Game mode 1..=6
        mode: u8,
        /// Player A colour index
        color_a: u8,
        /// Player B colour index
        color_b: u8,
    },

    /// Overwrite the whole game state.
    StateSnapshot(SnapshotFields),

    /// Arrow-key navigation.
    NavAction {
        /// Which arrow
        direction: NavDirection,
    },
}

/// Arrow keys on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    /// Previous mode
    Left,
    /// Next mode
    Right,
    /// Cycle player A's colour
    Up,
    /// Cycle player B's colour
    Down,
}

/// Flat game state as the console sends and receives it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotFields {
    /// Game mode 1..=6
    pub mode: u8,
    /// Player A colour index
    pub color_a: u8,
    /// Player B colour index
    pub color_b: u8,
    /// Player A position (pair modes)
    pub pos_a: i8,
    /// Player B position (pair modes)
    pub pos_b: i8,
    /// Tug O War boundary
    pub boundary: u8,
    /// Race counter A
    pub race_a: u8,
    /// Race counter B
    pub race_b: u8,
    /// Score Order slots, 1 = A, 2 = B
    pub sequence: Vec<u8>,
    /// Celebration flag
    pub celebrating: bool,
    /// 0 none, 1 A, 2 B
    pub winner: u8,
}

/// Why a console snapshot could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotFieldsError {
    /// Mode outside 1..=6.
    #[error("invalid mode {0}")]
    Mode(u8),
    /// Player id outside 1..=2.
    #[error("invalid player id {0}")]
    Player(u8),
}

impl SnapshotFields {
    /// Flatten a game state.
    pub fn from_state(state: &GameState) -> Self {
        let colors = state.colors();
        let mut fields = SnapshotFields {
            mode: state.mode().as_u8(),
            color_a: colors.a,
            color_b: colors.b,
            celebrating: state.is_celebrating(),
            winner: state.winner().map(Player::id).unwrap_or(0),
            ..SnapshotFields::default()
        };
        match state.board() {
            Board::Pair { a, b } => {
                fields.pos_a = *a;
                fields.pos_b = *b;
            }
            Board::Sequence(tags) => fields.sequence = tags.iter().map(|t| t.id()).collect(),
            Board::Race { a, b } => {
                fields.race_a = *a;
                fields.race_b = *b;
            }
            Board::Boundary(x) => fields.boundary = *x,
        }
        fields
    }

    /// Typed snapshot. Bounds are checked later by `GameState::restore`.
    pub fn to_snapshot(&self) -> Result<GameSnapshot, SnapshotFieldsError> {
        let mode = GameMode::from_u8(self.mode).ok_or(SnapshotFieldsError::Mode(self.mode))?;
        let winner = match self.winner {
            0 => None,
            id => Some(Player::from_id(id).ok_or(SnapshotFieldsError::Player(id))?),
        };
        let board = match mode {
            GameMode::Territory | GameMode::SwapSides | GameMode::SplitScoring => Board::Pair {
                a: self.pos_a,
                b: self.pos_b,
            },
            GameMode::ScoreOrder => Board::Sequence(
                self.sequence
                    .iter()
                    .map(|id| Player::from_id(*id).ok_or(SnapshotFieldsError::Player(*id)))
                    .collect::<Result<_, _>>()?,
            ),
            GameMode::Race => Board::Race { a: self.race_a, b: self.race_b },
            GameMode::TugOWar => Board::Boundary(self.boundary),
        };
        Ok(GameSnapshot {
            mode,
            colors: PlayerColors { a: self.color_a, b: self.color_b },
            board,
            celebrating: self.celebrating,
            winner,
        })
    }
}

impl ConsoleCommand {
    /// Parse one console line.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to one console line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// HOST -> CONSOLE
// =============================================================================

/// Notifications sent to the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConsoleEvent {
    /// Full status report.
    Status(StatusReport),

    /// A round winner.
    Winner {
        /// Who won
        who: Who,
    },

    /// A game won outright; the celebration follows.
    GameWon {
        /// Who won
        who: Who,
    },

    /// A peer link came up or went down.
    #[serde(rename_all = "camelCase")]
    Link {
        /// Peer node id
        node_id: u8,
        /// Link state after the change
        connected: bool,
    },

    /// A new logical hit.
    Hit {
        /// 1 = A, 2 = B
        player: u8,
        /// Adjusted time (µs, host clock)
        time: u32,
        /// Sensor strength
        strength: u16,
    },

    /// A rejected command or record.
    Error {
        /// Reason
        message: String,
    },

    /// The host wants the console to resend its state.
    StateRequest,
}

/// Winner designation on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Who {
    /// Player A
    A,
    /// Player B
    B,
    /// Round tied
    Tie,
}

impl From<Player> for Who {
    fn from(p: Player) -> Who {
        match p {
            Player::A => Who::A,
            Player::B => Who::B,
        }
    }
}

impl From<RoundOutcome> for Who {
    fn from(outcome: RoundOutcome) -> Who {
        match outcome {
            RoundOutcome::Winner(p) => p.into(),
            RoundOutcome::Tie => Who::Tie,
        }
    }
}

/// Link summary for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    /// Node id
    pub node_id: u8,
    /// Role
    pub role: PeerRole,
    /// Send target, `AA:BB:..` form
    pub address: Option<String>,
    /// Link up
    pub connected: bool,
    /// Clock offset valid
    pub clock_synced: bool,
    /// Peer minus host clock (µs)
    pub clock_offset_us: i64,
}

impl From<&PeerLink> for PeerStatus {
    fn from(p: &PeerLink) -> Self {
        Self {
            node_id: p.node_id,
            role: p.role,
            address: p.address.map(|a| a.to_string()),
            connected: p.connected,
            clock_synced: p.clock_synced,
            clock_offset_us: p.clock_offset,
        }
    }
}

/// Status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Game state
    #[serde(flatten)]
    pub game: SnapshotFields,
    /// Mode name
    pub mode_name: String,
    /// Whether the hit round is armed
    pub round_armed: bool,
    /// Peer links
    pub peers: Vec<PeerStatus>,
    /// State fingerprint, hex
    pub state_hash: String,
    /// Wall-clock time of the report
    pub at: DateTime<Utc>,
}

impl StatusReport {
    /// Build a report.
    pub fn new<'a>(
        state: &GameState,
        round_armed: bool,
        peers: impl Iterator<Item = &'a PeerLink>,
        hash: &StateHash,
    ) -> Self {
        Self {
            game: SnapshotFields::from_state(state),
            mode_name: state.mode().name().to_string(),
            round_armed,
            peers: peers.map(PeerStatus::from).collect(),
            state_hash: hex::encode(hash),
            at: Utc::now(),
        }
    }
}

impl ConsoleEvent {
    /// Serialize to one console line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one console line.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Console view of a node notification. Internal notifications map to
/// `None`.
pub fn convert_notification(n: &Notification) -> Option<ConsoleEvent> {
    match &n.data {
        NotificationData::Hit { player, time, strength } => Some(ConsoleEvent::Hit {
            player: player.id(),
            time: time.micros(),
            strength: *strength,
        }),
        NotificationData::RoundDecided { outcome } => Some(ConsoleEvent::Winner { who: (*outcome).into() }),
        NotificationData::GameWon { winner } => Some(ConsoleEvent::GameWon { who: (*winner).into() }),
        NotificationData::PeerConnected { node_id } => Some(ConsoleEvent::Link { node_id: *node_id, connected: true }),
        NotificationData::PeerDisconnected { node_id } => {
            Some(ConsoleEvent::Link { node_id: *node_id, connected: false })
        }
        NotificationData::Rejected { message } => Some(ConsoleEvent::Error { message: message.clone() }),
        NotificationData::StateRequested => Some(ConsoleEvent::StateRequest),
        NotificationData::ClockSynced { .. }
        | NotificationData::PointAwarded { .. }
        | NotificationData::SettingsChanged { .. }
        | NotificationData::GameReset => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::Timestamp;
    use crate::game::mode::Track;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::from_json(r#"{"type":"reset"}"#).unwrap(), ConsoleCommand::Reset);
        assert_eq!(
            ConsoleCommand::from_json(r#"{"type":"awardPoint","player":2,"multiplier":3}"#).unwrap(),
            ConsoleCommand::AwardPoint { player: 2, multiplier: 3 }
        );
        assert_eq!(
            ConsoleCommand::from_json(r#"{"type":"settingsUpdate","mode":4,"colorA":1,"colorB":2}"#).unwrap(),
            ConsoleCommand::SettingsUpdate { mode: 4, color_a: 1, color_b: 2 }
        );
        assert_eq!(
            ConsoleCommand::from_json(r#"{"type":"navAction","direction":"left"}"#).unwrap(),
            ConsoleCommand::NavAction { direction: NavDirection::Left }
        );
        assert!(ConsoleCommand::from_json(r#"{"type":"launchMissiles"}"#).is_err());
        assert!(ConsoleCommand::from_json("not json").is_err());
    }

    #[test]
    fn test_state_snapshot_command() {
        let line = r#"{"type":"stateSnapshot","mode":6,"colorA":2,"colorB":3,"boundary":25}"#;
        let cmd = ConsoleCommand::from_json(line).unwrap();
        let ConsoleCommand::StateSnapshot(fields) = cmd else {
            panic!("wrong command");
        };
        let snapshot = fields.to_snapshot().unwrap();
        assert_eq!(snapshot.mode, GameMode::TugOWar);
        assert_eq!(snapshot.board, Board::Boundary(25));
        assert_eq!(snapshot.colors, PlayerColors { a: 2, b: 3 });
    }

    #[test]
    fn test_snapshot_fields_roundtrip_through_state() {
        let mut state = GameState::new(GameMode::ScoreOrder, Track::default());
        state.award_point(Player::B, 2).unwrap();
        state.award_point(Player::A, 1).unwrap();
        let fields = SnapshotFields::from_state(&state);
        assert_eq!(fields.sequence, vec![2, 2, 1]);

        let mut other = GameState::default();
        other.restore(&fields.to_snapshot().unwrap()).unwrap();
        assert_eq!(other, state);
    }

    #[test]
    fn test_snapshot_fields_reject_bad_ids() {
        let fields = SnapshotFields { mode: 4, sequence: vec![1, 5], ..SnapshotFields::default() };
        assert_eq!(fields.to_snapshot(), Err(SnapshotFieldsError::Player(5)));
        let fields = SnapshotFields { mode: 0, ..SnapshotFields::default() };
        assert_eq!(fields.to_snapshot(), Err(SnapshotFieldsError::Mode(0)));
    }

    #[test]
    fn test_event_json_shapes() {
        let json = ConsoleEvent::Winner { who: Who::Tie }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"winner","who":"tie"}"#);

        let json = ConsoleEvent::GameWon { who: Who::B }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"gameWon","who":"b"}"#);

        let json = ConsoleEvent::Link { node_id: 3, connected: false }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"link","nodeId":3,"connected":false}"#);

        let json = ConsoleEvent::StateRequest.to_json().unwrap();
        assert_eq!(json, r#"{"type":"stateRequest"}"#);

        let json = ConsoleEvent::Hit { player: 1, time: 5, strength: 9 }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"hit","player":1,"time":5,"strength":9}"#);
    }

    #[test]
    fn test_status_report_is_flat() {
        let state = GameState::default();
        let report = StatusReport::new(&state, true, std::iter::empty(), &state.compute_hash());
        let json = ConsoleEvent::Status(report).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["mode"], 1);
        assert_eq!(value["posA"], -1);
        assert_eq!(value["modeName"], "Territory");
        assert_eq!(value["stateHash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_convert_notifications() {
        let t = Timestamp(10);
        assert_eq!(
            convert_notification(&Notification::hit(t, Player::A, Timestamp(99), 4)),
            Some(ConsoleEvent::Hit { player: 1, time: 99, strength: 4 })
        );
        assert_eq!(
            convert_notification(&Notification::round_decided(t, RoundOutcome::Tie)),
            Some(ConsoleEvent::Winner { who: Who::Tie })
        );
        assert_eq!(
            convert_notification(&Notification::game_won(t, Player::A)),
            Some(ConsoleEvent::GameWon { who: Who::A })
        );
        assert_eq!(
            convert_notification(&Notification::peer_connected(t, 1)),
            Some(ConsoleEvent::Link { node_id: 1, connected: true })
        );
        assert_eq!(
            convert_notification(&Notification::peer_disconnected(t, 3)),
            Some(ConsoleEvent::Link { node_id: 3, connected: false })
        );
        assert_eq!(convert_notification(&Notification::new(t, NotificationData::GameReset)), None);
    }
}
