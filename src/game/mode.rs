//! Players, Game Modes and the Track
//!
//! Closed enumerations shared by the state machine, the wire codec and the
//! console adapter. Conversions from raw bytes are fallible so an
//! out-of-range value never reaches game logic.

use serde::{Serialize, Deserialize};

/// Default number of LEDs on the strip.
pub const DEFAULT_TRACK_LEN: u8 = 38;

/// Largest supported track (Score Order tags travel as a 40-bit bitmap).
pub const MAX_TRACK_LEN: u8 = 40;

/// Smallest track that still has distinct ends and a centre.
pub const MIN_TRACK_LEN: u8 = 4;

/// Largest point multiplier accepted by a single award.
pub const MAX_MULTIPLIER: u8 = 10;

// =============================================================================
// PLAYER
// =============================================================================

/// One of the two competing players.
///
/// The discriminant doubles as the player's node id and as the wire value of
/// the `winner` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Player {
    /// Left-hand player, owns the low end of the strip.
    A = 1,
    /// Right-hand player, owns the high end of the strip.
    B = 2,
}

impl Player {
    /// Both players in id order.
    pub const ALL: [Player; 2] = [Player::A, Player::B];

    /// Player for a wire/node id.
    pub fn from_id(id: u8) -> Option<Player> {
        match id {
            1 => Some(Player::A),
            2 => Some(Player::B),
            _ => None,
        }
    }

    /// Wire/node id.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// The other player.
    #[inline]
    pub fn opponent(self) -> Player {
        match self {
            Player::A => Player::B,
            Player::B => Player::A,
        }
    }
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Player::A => write!(f, "player A"),
            Player::B => write!(f, "player B"),
        }
    }
}

/// Encode an optional winner for the wire (0 = none).
pub fn winner_to_wire(winner: Option<Player>) -> u8 {
    winner.map(Player::id).unwrap_or(0)
}

/// Decode the wire `winner` byte. `Err` for values other than 0, 1, 2.
pub fn winner_from_wire(value: u8) -> Result<Option<Player>, u8> {
    match value {
        0 => Ok(None),
        v => Player::from_id(v).map(Some).ok_or(v),
    }
}

// =============================================================================
// GAME MODE
// =============================================================================

/// The six scoring topologies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameMode {
    /// Each player's territory grows from their own end.
    Territory = 1,
    /// Single dots walk toward the far end and may pass each other.
    SwapSides = 2,
    /// Trails grow outward from the centre.
    SplitScoring = 3,
    /// Every point fills the next LED in the scorer's colour.
    ScoreOrder = 4,
    /// Independent counters racing up the strip.
    Race = 5,
    /// One shared boundary pushed back and forth.
    TugOWar = 6,
}

impl GameMode {
    /// All modes in wire order.
    pub const ALL: [GameMode; 6] = [
        GameMode::Territory,
        GameMode::SwapSides,
        GameMode::SplitScoring,
        GameMode::ScoreOrder,
        GameMode::Race,
        GameMode::TugOWar,
    ];

    /// Mode for a wire value (1..=6).
    pub fn from_u8(value: u8) -> Option<GameMode> {
        match value {
            1 => Some(GameMode::Territory),
            2 => Some(GameMode::SwapSides),
            3 => Some(GameMode::SplitScoring),
            4 => Some(GameMode::ScoreOrder),
            5 => Some(GameMode::Race),
            6 => Some(GameMode::TugOWar),
            _ => None,
        }
    }

    /// Wire value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Next mode, wrapping 6 → 1.
    pub fn next(self) -> GameMode {
        GameMode::ALL[(self as usize) % GameMode::ALL.len()]
    }

    /// Previous mode, wrapping 1 → 6.
    pub fn previous(self) -> GameMode {
        let len = GameMode::ALL.len();
        GameMode::ALL[(self as usize + len - 2) % len]
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            GameMode::Territory => "Territory",
            GameMode::SwapSides => "Swap Sides",
            GameMode::SplitScoring => "Split Scoring",
            GameMode::ScoreOrder => "Score Order",
            GameMode::Race => "Race",
            GameMode::TugOWar => "Tug O War",
        }
    }
}

/// How Swap Sides handles two dots meeting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapRule {
    /// Same stepping as Territory; dots may share an LED.
    #[default]
    Simple,
    /// A step that would land on the opponent jumps to the LED beyond it.
    LeapFrog,
}

// =============================================================================
// TRACK
// =============================================================================

/// The 1-D position space: LEDs `0..len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    len: u8,
}

impl Track {
    /// Track of `len` LEDs, or `None` outside `MIN_TRACK_LEN..=MAX_TRACK_LEN`.
    pub fn new(len: u8) -> Option<Track> {
        (MIN_TRACK_LEN..=MAX_TRACK_LEN)
            .contains(&len)
            .then_some(Track { len })
    }

    /// Number of LEDs.
    #[inline]
    pub fn len(self) -> u8 {
        self.len
    }

    /// Index of the last LED.
    #[inline]
    pub fn last(self) -> u8 {
        self.len - 1
    }

    /// Left LED of the centre pair (18 on a 38-LED strip).
    #[inline]
    pub fn center_left(self) -> u8 {
        self.len / 2 - 1
    }

    /// Right LED of the centre pair (19 on a 38-LED strip).
    #[inline]
    pub fn center_right(self) -> u8 {
        self.len / 2
    }
}

impl Default for Track {
    fn default() -> Self {
        Track { len: DEFAULT_TRACK_LEN }
    }
}
