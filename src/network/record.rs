//! Wire Records
//!
//! Two fixed-size, packed, little-endian record layouts travel over the
//! radio. A datagram is classified by its exact length and decoded once at
//! the boundary into a tagged message; nothing downstream looks at raw
//! fields.
//!
//! | Record | Size | Sent by |
//! |--------|------|---------|
//! | Event  | 16 B | players (hits, heartbeats, sync replies), host (sync probes) |
//! | State  | 13 B | host and display (game state, score events, requests) |
//!
//! Both layouts are plain structs encoded with bincode's fixed-int
//! little-endian format, which matches the packed C layout byte for byte.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::clock::Timestamp;
use crate::game::mode::{winner_from_wire, winner_to_wire, GameMode, Player, MAX_MULTIPLIER};
use crate::game::state::{Board, GameSnapshot, PlayerColors};

/// Event record size in bytes.
pub const EVENT_RECORD_LEN: usize = 16;

/// State record size in bytes.
pub const STATE_RECORD_LEN: usize = 13;

/// Node id of the host/bridge.
pub const HOST_ID: u8 = 0;
/// Node id of player A.
pub const PLAYER_A_ID: u8 = 1;
/// Node id of player B.
pub const PLAYER_B_ID: u8 = 2;
/// Node id of the display.
pub const DISPLAY_ID: u8 = 3;

/// Score Order tags carried per state record (five bitmap bytes).
pub const SEQUENCE_BITMAP_SLOTS: usize = 40;

// =============================================================================
// RAW LAYOUTS
// =============================================================================

/// Event record as it appears on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Sender node id
    pub source_id: u8,
    /// 1 heartbeat, 2 hit, 3 reset request, 4 clock sync
    pub action: u8,
    /// Sender clock at the hit (µs)
    pub raw_time: u32,
    /// Hit strength
    pub strength: u16,
    /// Probe send time (host clock)
    pub sync_sent_time: u32,
    /// Replier's clock on probe receipt
    pub sync_echo_value: u32,
}

/// State record as it appears on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Sender node id
    pub device_id: u8,
    /// 1..=7, see [`StateMessage`]
    pub action: u8,
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
    /// Filled slots (Score Order) or multiplier (score events)
    pub sequence_cursor: u8,
    /// Tug O War boundary
    pub boundary: u8,
    /// Race counter A
    pub race_a: u8,
    /// Race counter B
    pub race_b: u8,
    /// Celebration flag
    pub celebrating: u8,
    /// Winner (0 none) or scorer (score events)
    pub winner: u8,
}

/// Event record actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventAction {
    /// Liveness beacon
    Heartbeat = 1,
    /// Sensor hit
    Hit = 2,
    /// Player asks for the round to be re-armed
    ResetRequest = 3,
    /// Clock-sync probe (from host) or reply (from anyone else)
    ClockSync = 4,
}

/// State record actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StateAction {
    /// Liveness beacon
    Heartbeat = 1,
    /// Periodic full state
    State = 2,
    /// One award
    Score = 3,
    /// Mode or colours changed
    ModeChange = 4,
    /// Board reset
    Reset = 5,
    /// Full state sent in answer to a request
    StateRestore = 6,
    /// Ask the host for a restore
    StateRequest = 7,
}

impl StateAction {
    fn from_u8(value: u8) -> Option<StateAction> {
        match value {
            1 => Some(StateAction::Heartbeat),
            2 => Some(StateAction::State),
            3 => Some(StateAction::Score),
            4 => Some(StateAction::ModeChange),
            5 => Some(StateAction::Reset),
            6 => Some(StateAction::StateRestore),
            7 => Some(StateAction::StateRequest),
            _ => None,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Record decode/encode errors. Malformed datagrams are dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Length matches neither record.
    #[error("unexpected datagram length {0}")]
    WrongLength(usize),

    /// Action byte outside the record's action set.
    #[error("unknown {record} action {action}")]
    UnknownAction {
        /// Which record
        record: &'static str,
        /// Raw action byte
        action: u8,
    },

    /// A field holds a value its type cannot represent.
    #[error("invalid {field} value {value}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw value
        value: u8,
    },

    /// Bincode failure.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

// =============================================================================
// TYPED MESSAGES
// =============================================================================

/// Decoded event record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventMessage {
    /// Liveness beacon.
    Heartbeat {
        /// Sender
        source_id: u8,
    },
    /// Sensor hit.
    Hit {
        /// Sender
        source_id: u8,
        /// Sender clock at the hit
        raw_time: Timestamp,
        /// Hit strength
        strength: u16,
    },
    /// Re-arm request from a player.
    ResetRequest {
        /// Sender
        source_id: u8,
    },
    /// Host asks a peer for its clock.
    SyncProbe {
        /// Host clock at send
        sent_at: Timestamp,
    },
    /// Peer answers a probe.
    SyncReply {
        /// Sender
        source_id: u8,
        /// Probe send time, echoed
        sent_at: Timestamp,
        /// Sender clock on probe receipt
        echo: Timestamp,
    },
}

impl EventMessage {
    /// Node that sent the record.
    pub fn source_id(&self) -> u8 {
        match *self {
            EventMessage::Heartbeat { source_id }
            | EventMessage::Hit { source_id, .. }
            | EventMessage::ResetRequest { source_id }
            | EventMessage::SyncReply { source_id, .. } => source_id,
            EventMessage::SyncProbe { .. } => HOST_ID,
        }
    }

    /// Raw layout.
    pub fn to_record(&self) -> EventRecord {
        match *self {
            EventMessage::Heartbeat { source_id } => EventRecord {
                source_id,
                action: EventAction::Heartbeat as u8,
                ..EventRecord::default()
            },
            EventMessage::Hit { source_id, raw_time, strength } => EventRecord {
                source_id,
                action: EventAction::Hit as u8,
                raw_time: raw_time.micros(),
                strength,
                ..EventRecord::default()
            },
            EventMessage::ResetRequest { source_id } => EventRecord {
                source_id,
                action: EventAction::ResetRequest as u8,
                ..EventRecord::default()
            },
            EventMessage::SyncProbe { sent_at } => EventRecord {
                source_id: HOST_ID,
                action: EventAction::ClockSync as u8,
                sync_sent_time: sent_at.micros(),
                ..EventRecord::default()
            },
            EventMessage::SyncReply { source_id, sent_at, echo } => EventRecord {
                source_id,
                action: EventAction::ClockSync as u8,
                sync_sent_time: sent_at.micros(),
                sync_echo_value: echo.micros(),
                ..EventRecord::default()
            },
        }
    }

    /// Interpret a raw record.
    pub fn from_record(r: &EventRecord) -> Result<Self, FrameError> {
        let msg = match r.action {
            1 => EventMessage::Heartbeat { source_id: r.source_id },
            2 => EventMessage::Hit {
                source_id: r.source_id,
                raw_time: Timestamp(r.raw_time),
                strength: r.strength,
            },
            3 => EventMessage::ResetRequest { source_id: r.source_id },
            4 if r.source_id == HOST_ID => EventMessage::SyncProbe {
                sent_at: Timestamp(r.sync_sent_time),
            },
            4 => EventMessage::SyncReply {
                source_id: r.source_id,
                sent_at: Timestamp(r.sync_sent_time),
                echo: Timestamp(r.sync_echo_value),
            },
            action => return Err(FrameError::UnknownAction { record: "event", action }),
        };
        Ok(msg)
    }

    /// Encode to 16 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        Ok(bincode::serialize(&self.to_record())?)
    }
}

/// Decoded state record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateMessage {
    /// Liveness beacon.
    Heartbeat {
        /// Sender
        device_id: u8,
    },
    /// Periodic full state broadcast.
    State {
        /// Sender
        device_id: u8,
        /// Authoritative state
        snapshot: GameSnapshot,
    },
    /// One award, replayed by score-event replicas.
    Score {
        /// Sender
        device_id: u8,
        /// Scorer
        player: Player,
        /// Points
        multiplier: u8,
    },
    /// Settings changed.
    ModeChange {
        /// Sender
        device_id: u8,
        /// New mode
        mode: GameMode,
        /// New colours
        colors: PlayerColors,
    },
    /// Board reset.
    Reset {
        /// Sender
        device_id: u8,
    },
    /// Full state answering a request.
    StateRestore {
        /// Sender
        device_id: u8,
        /// Authoritative state
        snapshot: GameSnapshot,
    },
    /// Ask for a restore.
    StateRequest {
        /// Sender
        device_id: u8,
    },
}

impl StateMessage {
    /// Node that sent the record.
    pub fn device_id(&self) -> u8 {
        match *self {
            StateMessage::Heartbeat { device_id }
            | StateMessage::State { device_id, .. }
            | StateMessage::Score { device_id, .. }
            | StateMessage::ModeChange { device_id, .. }
            | StateMessage::Reset { device_id }
            | StateMessage::StateRestore { device_id, .. }
            | StateMessage::StateRequest { device_id } => device_id,
        }
    }

    /// Raw layout.
    pub fn to_record(&self) -> StateRecord {
        match self {
            StateMessage::Heartbeat { device_id } => bare(*device_id, StateAction::Heartbeat),
            StateMessage::Reset { device_id } => bare(*device_id, StateAction::Reset),
            StateMessage::StateRequest { device_id } => bare(*device_id, StateAction::StateRequest),
            StateMessage::State { device_id, snapshot } => {
                snapshot_record(*device_id, StateAction::State, snapshot)
            }
            StateMessage::StateRestore { device_id, snapshot } => {
                snapshot_record(*device_id, StateAction::StateRestore, snapshot)
            }
            StateMessage::Score { device_id, player, multiplier } => StateRecord {
                winner: player.id(),
                sequence_cursor: *multiplier,
                ..bare(*device_id, StateAction::Score)
            },
            StateMessage::ModeChange { device_id, mode, colors } => StateRecord {
                mode: mode.as_u8(),
                color_a: colors.a,
                color_b: colors.b,
                ..bare(*device_id, StateAction::ModeChange)
            },
        }
    }

    /// Interpret a raw record.
    pub fn from_record(r: &StateRecord) -> Result<Self, FrameError> {
        let action = StateAction::from_u8(r.action)
            .ok_or(FrameError::UnknownAction { record: "state", action: r.action })?;
        let device_id = r.device_id;

        let msg = match action {
            StateAction::Heartbeat => StateMessage::Heartbeat { device_id },
            StateAction::Reset => StateMessage::Reset { device_id },
            StateAction::StateRequest => StateMessage::StateRequest { device_id },
            StateAction::State => StateMessage::State { device_id, snapshot: snapshot_from(r)? },
            StateAction::StateRestore => StateMessage::StateRestore { device_id, snapshot: snapshot_from(r)? },
            StateAction::Score => {
                let player = Player::from_id(r.winner)
                    .ok_or(FrameError::InvalidField { field: "scorer", value: r.winner })?;
                if !(1..=MAX_MULTIPLIER).contains(&r.sequence_cursor) {
                    return Err(FrameError::InvalidField { field: "multiplier", value: r.sequence_cursor });
                }
                StateMessage::Score { device_id, player, multiplier: r.sequence_cursor }
            }
            StateAction::ModeChange => StateMessage::ModeChange {
                device_id,
                mode: mode_from(r.mode)?,
                colors: PlayerColors { a: r.color_a, b: r.color_b },
            },
        };
        Ok(msg)
    }

    /// Encode to 13 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        Ok(bincode::serialize(&self.to_record())?)
    }
}

fn bare(device_id: u8, action: StateAction) -> StateRecord {
    StateRecord {
        device_id,
        action: action as u8,
        ..StateRecord::default()
    }
}

fn mode_from(value: u8) -> Result<GameMode, FrameError> {
    GameMode::from_u8(value).ok_or(FrameError::InvalidField { field: "mode", value })
}

fn snapshot_record(device_id: u8, action: StateAction, s: &GameSnapshot) -> StateRecord {
    let mut r = StateRecord {
        mode: s.mode.as_u8(),
        color_a: s.colors.a,
        color_b: s.colors.b,
        celebrating: s.celebrating as u8,
        winner: winner_to_wire(s.winner),
        ..bare(device_id, action)
    };

    match &s.board {
        Board::Pair { a, b } => {
            r.pos_a = *a;
            r.pos_b = *b;
        }
        Board::Race { a, b } => {
            r.race_a = *a;
            r.race_b = *b;
        }
        Board::Boundary(x) => r.boundary = *x,
        Board::Sequence(tags) => {
            let bits = pack_sequence(tags);
            r.sequence_cursor = tags.len().min(SEQUENCE_BITMAP_SLOTS) as u8;
            r.pos_a = bits[0] as i8;
            r.pos_b = bits[1] as i8;
            r.boundary = bits[2];
            r.race_a = bits[3];
            r.race_b = bits[4];
        }
    }
    r
}

fn snapshot_from(r: &StateRecord) -> Result<GameSnapshot, FrameError> {
    let mode = mode_from(r.mode)?;
    let winner = winner_from_wire(r.winner)
        .map_err(|value| FrameError::InvalidField { field: "winner", value })?;

    let board = match mode {
        GameMode::Territory | GameMode::SwapSides | GameMode::SplitScoring => Board::Pair {
            a: r.pos_a,
            b: r.pos_b,
        },
        GameMode::Race => Board::Race { a: r.race_a, b: r.race_b },
        GameMode::TugOWar => Board::Boundary(r.boundary),
        GameMode::ScoreOrder => {
            if r.sequence_cursor as usize > SEQUENCE_BITMAP_SLOTS {
                return Err(FrameError::InvalidField { field: "sequence_cursor", value: r.sequence_cursor });
            }
            let bits = [r.pos_a as u8, r.pos_b as u8, r.boundary, r.race_a, r.race_b];
            Board::Sequence(unpack_sequence(bits, r.sequence_cursor as usize))
        }
    };

    Ok(GameSnapshot {
        mode,
        colors: PlayerColors { a: r.color_a, b: r.color_b },
        board,
        celebrating: r.celebrating != 0,
        winner,
    })
}

/// Pack Score Order tags: bit `i` set means slot `i` went to player B.
pub fn pack_sequence(tags: &[Player]) -> [u8; 5] {
    let mut bits = [0u8; 5];
    for (i, tag) in tags.iter().take(SEQUENCE_BITMAP_SLOTS).enumerate() {
        if *tag == Player::B {
            bits[i / 8] |= 1 << (i % 8);
        }
    }
    bits
}

/// Inverse of [`pack_sequence`] for the first `count` slots.
pub fn unpack_sequence(bits: [u8; 5], count: usize) -> Vec<Player> {
    (0..count.min(SEQUENCE_BITMAP_SLOTS))
        .map(|i| {
            if bits[i / 8] & (1 << (i % 8)) != 0 {
                Player::B
            } else {
                Player::A
            }
        })
        .collect()
}

// =============================================================================
// DATAGRAM
// =============================================================================

/// A classified, decoded datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datagram {
    /// 16-byte event record
    Event(EventMessage),
    /// 13-byte state record
    State(StateMessage),
}

impl Datagram {
    /// Classify by exact length and decode.
    pub fn decode(bytes: &[u8]) -> Result<Datagram, FrameError> {
        match bytes.len() {
            EVENT_RECORD_LEN => {
                let record: EventRecord = bincode::deserialize(bytes)?;
                Ok(Datagram::Event(EventMessage::from_record(&record)?))
            }
            STATE_RECORD_LEN => {
                let record: StateRecord = bincode::deserialize(bytes)?;
                Ok(Datagram::State(StateMessage::from_record(&record)?))
            }
            len => Err(FrameError::WrongLength(len)),
        }
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            Datagram::Event(msg) => msg.to_bytes(),
            Datagram::State(msg) => msg.to_bytes(),
        }
    }

    /// Node that sent it.
    pub fn sender_id(&self) -> u8 {
        match self {
            Datagram::Event(msg) => msg.source_id(),
            Datagram::State(msg) => msg.device_id(),
        }
    }
}

/// Whether `len` is one of the two record sizes. Cheap enough for the
/// receive callback.
#[inline]
pub fn is_record_len(len: usize) -> bool {
    len == EVENT_RECORD_LEN || len == STATE_RECORD_LEN
}
