//! Game State Machine
//!
//! The authoritative scoreboard. Six mutually exclusive modes share one
//! `GameState`; each mode is an update rule applied per point plus a win
//! predicate checked after every award.
//!
//! The host owns the authoritative copy. The display keeps a replica that is
//! either overwritten by snapshots or driven through the same `award_point`
//! rules, depending on the replication model.

use serde::{Serialize, Deserialize};

use crate::core::hash::{compute_state_hash, StateHash};
use crate::game::mode::{GameMode, Player, SwapRule, Track, MAX_MULTIPLIER};
use crate::game::render::is_valid_color;

// =============================================================================
// BOARD
// =============================================================================

/// Mode-specific positions on the track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Board {
    /// Two absolute LED positions (Territory, Swap Sides, Split Scoring).
    /// `a` may sit at -1 and `b` at `len` to mean "nothing lit yet".
    Pair {
        /// Player A position
        a: i8,
        /// Player B position
        b: i8,
    },
    /// Scorer of each filled slot, in order (Score Order). Append-only.
    Sequence(Vec<Player>),
    /// Points scored by each player, `0..=len` (Race).
    Race {
        /// Player A counter
        a: u8,
        /// Player B counter
        b: u8,
    },
    /// Last LED owned by player A (Tug O War).
    Boundary(u8),
}

impl Board {
    /// Starting board for `mode` on `track`.
    pub fn initial(mode: GameMode, track: Track) -> Board {
        match mode {
            GameMode::Territory | GameMode::SwapSides => Board::Pair {
                a: -1,
                b: track.len() as i8,
            },
            GameMode::SplitScoring => Board::Pair {
                a: track.center_left() as i8 + 1,
                b: track.center_right() as i8 - 1,
            },
            GameMode::ScoreOrder => Board::Sequence(Vec::with_capacity(track.len() as usize)),
            GameMode::Race => Board::Race { a: 0, b: 0 },
            GameMode::TugOWar => Board::Boundary(track.center_left()),
        }
    }

    /// Whether this board shape belongs to `mode`.
    pub fn fits_mode(&self, mode: GameMode) -> bool {
        matches!(
            (self, mode),
            (Board::Pair { .. }, GameMode::Territory | GameMode::SwapSides | GameMode::SplitScoring)
                | (Board::Sequence(_), GameMode::ScoreOrder)
                | (Board::Race { .. }, GameMode::Race)
                | (Board::Boundary(_), GameMode::TugOWar)
        )
    }

    /// Whether every position lies inside the bounds of `track`.
    pub fn within(&self, track: Track) -> bool {
        let len = track.len();
        match self {
            Board::Pair { a, b } => {
                (-1..=len as i8 - 1).contains(a) && (0..=len as i8).contains(b)
            }
            Board::Sequence(tags) => tags.len() <= len as usize,
            Board::Race { a, b } => *a <= len && *b <= len,
            Board::Boundary(x) => *x < len,
        }
    }
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Palette indices chosen for each player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerColors {
    /// Player A palette index
    pub a: u8,
    /// Player B palette index
    pub b: u8,
}

impl Default for PlayerColors {
    fn default() -> Self {
        // red vs blue
        Self { a: 0, b: 1 }
    }
}

impl PlayerColors {
    /// Palette index for `player`.
    pub fn of(&self, player: Player) -> u8 {
        match player {
            Player::A => self.a,
            Player::B => self.b,
        }
    }
}

/// What a settings update did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsChange {
    /// Same mode and colours.
    Unchanged,
    /// Only colours changed; positions kept.
    ColorsChanged,
    /// Mode changed; board reset.
    ModeChanged,
}

/// Rejected game operations. None of these change state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Mode outside 1..=6.
    #[error("invalid game mode {0}")]
    InvalidMode(u8),

    /// Colour index outside the palette.
    #[error("invalid colour index {0}")]
    InvalidColor(u8),

    /// Multiplier outside 1..=10.
    #[error("multiplier {0} outside 1..=10")]
    InvalidMultiplier(u8),

    /// Awards are ignored while a win is being celebrated.
    #[error("celebration in progress")]
    Celebrating,

    /// Snapshot does not describe a reachable state.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(&'static str),
}

/// Everything a replica needs to reproduce the authoritative state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Active mode
    pub mode: GameMode,
    /// Player colours
    pub colors: PlayerColors,
    /// Positions
    pub board: Board,
    /// Celebration flag
    pub celebrating: bool,
    /// Winner of the finished game, if any
    pub winner: Option<Player>,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Complete scoreboard state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    mode: GameMode,
    track: Track,
    board: Board,
    winner: Option<Player>,
    celebrating: bool,
    colors: PlayerColors,
    swap_rule: SwapRule,
}

impl GameState {
    /// Fresh state for `mode` with default colours.
    pub fn new(mode: GameMode, track: Track) -> Self {
        Self {
            mode,
            track,
            board: Board::initial(mode, track),
            winner: None,
            celebrating: false,
            colors: PlayerColors::default(),
            swap_rule: SwapRule::default(),
        }
    }

    /// Builder: Swap Sides collision rule.
    pub fn with_swap_rule(mut self, rule: SwapRule) -> Self {
        self.swap_rule = rule;
        self
    }

    /// Builder: initial colours (unchecked; config is validated at load).
    pub fn with_colors(mut self, colors: PlayerColors) -> Self {
        self.colors = colors;
        self
    }

    /// Active mode.
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Track geometry.
    pub fn track(&self) -> Track {
        self.track
    }

    /// Current positions.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Winner of the finished game.
    pub fn winner(&self) -> Option<Player> {
        self.winner
    }

    /// Whether a win is being celebrated.
    pub fn is_celebrating(&self) -> bool {
        self.celebrating
    }

    /// Player colours.
    pub fn colors(&self) -> PlayerColors {
        self.colors
    }

    /// Swap Sides rule in force.
    pub fn swap_rule(&self) -> SwapRule {
        self.swap_rule
    }

    /// Back to the mode's initial positions; clears winner and celebration.
    pub fn reset(&mut self) {
        self.board = Board::initial(self.mode, self.track);
        self.winner = None;
        self.celebrating = false;
    }

    /// Award `multiplier` points to `player`.
    ///
    /// Applies the mode's step rule `multiplier` times, each step clamped to
    /// the track, then checks for a win once. Returns the winner if this
    /// award ended the game.
    pub fn award_point(&mut self, player: Player, multiplier: u8) -> Result<Option<Player>, GameError> {
        if !(1..=MAX_MULTIPLIER).contains(&multiplier) {
            return Err(GameError::InvalidMultiplier(multiplier));
        }
        if self.celebrating {
            return Err(GameError::Celebrating);
        }

        for _ in 0..multiplier {
            self.step(player);
        }

        let winner = self.check_winner();
        if let Some(w) = winner {
            self.winner = Some(w);
            self.celebrating = true;
        }
        Ok(winner)
    }

    /// One clamped unit of the mode's update rule.
    fn step(&mut self, player: Player) {
        let last = self.track.last();
        let len = self.track.len();
        let mode = self.mode;
        let leap = self.swap_rule == SwapRule::LeapFrog;

        match &mut self.board {
            Board::Pair { a, b } => {
                let last = last as i8;
                match (mode, player) {
                    (GameMode::SplitScoring, Player::A) => *a = (*a - 1).max(0),
                    (GameMode::SplitScoring, Player::B) => *b = (*b + 1).min(last),
                    (GameMode::SwapSides, Player::A) if leap && *a + 1 == *b => {
                        *a = (*b + 1).min(last)
                    }
                    (GameMode::SwapSides, Player::B) if leap && *b - 1 == *a => {
                        *b = (*a - 1).max(0)
                    }
                    (_, Player::A) => *a = (*a + 1).min(last),
                    (_, Player::B) => *b = (*b - 1).max(0),
                }
            }
            Board::Sequence(tags) => {
                if tags.len() < len as usize {
                    tags.push(player);
                }
            }
            Board::Race { a, b } => {
                let counter = match player {
                    Player::A => a,
                    Player::B => b,
                };
                *counter = (*counter + 1).min(len);
            }
            Board::Boundary(x) => {
                *x = match player {
                    Player::A => (*x + 1).min(last),
                    Player::B => x.saturating_sub(1),
                };
            }
        }
    }

    /// Win predicate for the current board.
    pub fn check_winner(&self) -> Option<Player> {
        let last = self.track.last();
        let len = self.track.len();

        match &self.board {
            Board::Pair { a, b } if self.mode == GameMode::SplitScoring => {
                if *a <= 0 {
                    Some(Player::A)
                } else if *b >= last as i8 {
                    Some(Player::B)
                } else {
                    None
                }
            }
            Board::Pair { a, b } => {
                if *a >= last as i8 {
                    Some(Player::A)
                } else if *b <= 0 {
                    Some(Player::B)
                } else {
                    None
                }
            }
            Board::Sequence(tags) => {
                if tags.len() < len as usize {
                    return None;
                }
                let count_a = tags.iter().filter(|t| **t == Player::A).count();
                let count_b = tags.len() - count_a;
                match count_a.cmp(&count_b) {
                    std::cmp::Ordering::Greater => Some(Player::A),
                    std::cmp::Ordering::Less => Some(Player::B),
                    // Tie goes to whoever filled the last slot
                    std::cmp::Ordering::Equal => tags.last().copied(),
                }
            }
            Board::Race { a, b } => {
                if *a >= len {
                    Some(Player::A)
                } else if *b >= len {
                    Some(Player::B)
                } else {
                    None
                }
            }
            Board::Boundary(x) => {
                if *x >= last {
                    Some(Player::A)
                } else if *x == 0 {
                    Some(Player::B)
                } else {
                    None
                }
            }
        }
    }

    /// Apply a settings update.
    ///
    /// A different mode resets the board. Colour-only changes never touch
    /// positions. Invalid values are rejected before anything changes.
    pub fn apply_settings(&mut self, mode: u8, color_a: u8, color_b: u8) -> Result<SettingsChange, GameError> {
        let mode = GameMode::from_u8(mode).ok_or(GameError::InvalidMode(mode))?;
        for c in [color_a, color_b] {
            if !is_valid_color(c) {
                return Err(GameError::InvalidColor(c));
            }
        }

        let colors = PlayerColors { a: color_a, b: color_b };
        let colors_changed = colors != self.colors;
        self.colors = colors;

        if mode != self.mode {
            self.mode = mode;
            self.reset();
            Ok(SettingsChange::ModeChanged)
        } else if colors_changed {
            Ok(SettingsChange::ColorsChanged)
        } else {
            Ok(SettingsChange::Unchanged)
        }
    }

    /// End of the celebration: perform the pending reset.
    pub fn finish_celebration(&mut self) {
        if self.celebrating {
            self.reset();
        }
    }

    /// Capture a snapshot for replication.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            mode: self.mode,
            colors: self.colors,
            board: self.board.clone(),
            celebrating: self.celebrating,
            winner: self.winner,
        }
    }

    /// Overwrite this state from a snapshot. Rejected snapshots change nothing.
    pub fn restore(&mut self, snapshot: &GameSnapshot) -> Result<(), GameError> {
        if !is_valid_color(snapshot.colors.a) {
            return Err(GameError::InvalidColor(snapshot.colors.a));
        }
        if !is_valid_color(snapshot.colors.b) {
            return Err(GameError::InvalidColor(snapshot.colors.b));
        }
        if !snapshot.board.fits_mode(snapshot.mode) {
            return Err(GameError::InvalidSnapshot("board does not match mode"));
        }
        if !snapshot.board.within(self.track) {
            return Err(GameError::InvalidSnapshot("position outside track"));
        }
        if snapshot.celebrating && snapshot.winner.is_none() {
            return Err(GameError::InvalidSnapshot("celebrating without a winner"));
        }

        self.mode = snapshot.mode;
        self.colors = snapshot.colors;
        self.board = snapshot.board.clone();
        self.celebrating = snapshot.celebrating;
        self.winner = snapshot.winner;
        Ok(())
    }

    /// SHA-256 fingerprint of everything a replica must agree on.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(|h| {
            h.update_u8(self.mode.as_u8());
            h.update_u8(self.track.len());
            h.update_u8(self.colors.a);
            h.update_u8(self.colors.b);
            match &self.board {
                Board::Pair { a, b } => {
                    h.update_u8(0);
                    h.update_i8(*a);
                    h.update_i8(*b);
                }
                Board::Sequence(tags) => {
                    h.update_u8(1);
                    h.update_u32(tags.len() as u32);
                    for t in tags {
                        h.update_u8(t.id());
                    }
                }
                Board::Race { a, b } => {
                    h.update_u8(2);
                    h.update_u8(*a);
                    h.update_u8(*b);
                }
                Board::Boundary(x) => {
                    h.update_u8(3);
                    h.update_u8(*x);
                }
            }
            h.update_u8(self.winner.map(Player::id).unwrap_or(0));
            h.update_bool(self.celebrating);
        })
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(GameMode::Territory, Track::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
