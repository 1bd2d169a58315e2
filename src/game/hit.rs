//! Hit Processor
//!
//! Turns hit records from player nodes into logical hits and round results.
//!
//! ## Pipeline
//!
//! 1. Reject sources outside the roster (no side effects)
//! 2. Translate the player's raw timestamp into the local clock
//! 3. Drop radio duplicates: same player, same adjusted time, inside the
//!    dedup window of the last processed hit
//! 4. Record the hit and decide the round with the selected strategy
//!
//! Player nodes send each hit several times, so step 3 is the normal path
//! rather than an error.

use serde::{Serialize, Deserialize};

use crate::core::clock::{Deadline, Timestamp};
use crate::game::mode::Player;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How a round winner is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WinnerStrategy {
    /// The first valid hit of an armed round wins.
    #[default]
    FirstHit,
    /// Wait for both players' first hits and compare adjusted times.
    /// Differences up to `tie_tolerance_us` are a tie.
    Buffered {
        /// Largest difference still called a tie
        tie_tolerance_us: u32,
    },
}

/// Hit processing parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitConfig {
    /// Winner determination
    pub strategy: WinnerStrategy,
    /// Players allowed to report hits
    pub roster: Vec<Player>,
    /// Duplicate suppression window (ms)
    pub dedup_window_ms: u32,
    /// Buffered strategy: how long to wait for the second player (ms)
    pub pair_window_ms: u32,
    /// Delay before a decided round re-arms on its own (ms)
    pub round_rearm_ms: u32,
    /// Award one point to each round winner
    pub auto_award: bool,
}

impl Default for HitConfig {
    fn default() -> Self {
        Self {
            strategy: WinnerStrategy::FirstHit,
            roster: Player::ALL.to_vec(),
            dedup_window_ms: 250,
            pair_window_ms: 500,
            round_rearm_ms: 1500,
            auto_award: true,
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// A hit after offset translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitEvent {
    /// Who hit
    pub player: Player,
    /// Timestamp in the player's clock
    pub raw_time: Timestamp,
    /// Timestamp translated into the local clock
    pub adjusted_time: Timestamp,
    /// Sensor strength
    pub strength: u16,
    /// Local receipt time
    pub received_at: Timestamp,
}

/// How a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// One player won.
    Winner(Player),
    /// Both hit within the tie tolerance.
    Tie,
}

impl RoundOutcome {
    /// The winning player, if not a tie.
    pub fn winner(self) -> Option<Player> {
        match self {
            RoundOutcome::Winner(p) => Some(p),
            RoundOutcome::Tie => None,
        }
    }
}

/// Result of processing one hit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitOutcome {
    /// Radio duplicate of the last processed hit. Nothing happened.
    Duplicate,
    /// A new logical hit.
    Accepted {
        /// The recorded hit
        hit: HitEvent,
        /// Set when this hit decided the round
        decided: Option<RoundOutcome>,
    },
}

/// Hit processing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HitError {
    /// Source id is not a rostered player.
    #[error("unknown player id {0}")]
    UnknownPlayer(u8),
}

// =============================================================================
// PROCESSOR
// =============================================================================

/// Hit deduplication and round decisions.
#[derive(Debug, Clone)]
pub struct HitProcessor {
    config: HitConfig,
    game_active: bool,
    last_processed: [Option<HitEvent>; 2],
    buffered: [Option<HitEvent>; 2],
    pair_deadline: Deadline,
    rearm_deadline: Deadline,
    history: Vec<HitEvent>,
}

/// Recorded hits kept for status reports.
const HISTORY_LEN: usize = 16;

impl HitProcessor {
    /// Armed processor.
    pub fn new(config: HitConfig) -> Self {
        Self {
            config,
            game_active: true,
            last_processed: [None, None],
            buffered: [None, None],
            pair_deadline: Deadline::default(),
            rearm_deadline: Deadline::default(),
            history: Vec::with_capacity(HISTORY_LEN),
        }
    }

    /// Configuration in force.
    pub fn config(&self) -> &HitConfig {
        &self.config
    }

    /// Whether the round is still open.
    pub fn is_armed(&self) -> bool {
        self.game_active
    }

    /// Most recent hits, oldest first.
    pub fn history(&self) -> &[HitEvent] {
        &self.history
    }

    /// Open a new round.
    pub fn rearm(&mut self) {
        self.game_active = true;
        self.buffered = [None, None];
        self.pair_deadline.cancel();
        self.rearm_deadline.cancel();
    }

    /// Process one hit record.
    ///
    /// `clock_offset` is the sender's offset (sender clock minus local clock)
    /// or 0 when its clock has not been synchronized yet.
    pub fn process(
        &mut self,
        source_id: u8,
        raw_time: Timestamp,
        strength: u16,
        clock_offset: i64,
        now: Timestamp,
    ) -> Result<HitOutcome, HitError> {
        let player = Player::from_id(source_id)
            .filter(|p| self.config.roster.contains(p))
            .ok_or(HitError::UnknownPlayer(source_id))?;

        let adjusted_time = raw_time.offset_by(-clock_offset);

        // Compared per player so interleaved copies from both sides collapse
        let slot = player.id() as usize - 1;
        if let Some(last) = &self.last_processed[slot] {
            if last.adjusted_time == adjusted_time
                && now.millis_since(last.received_at) < self.config.dedup_window_ms
            {
                return Ok(HitOutcome::Duplicate);
            }
        }

        let hit = HitEvent {
            player,
            raw_time,
            adjusted_time,
            strength,
            received_at: now,
        };
        self.last_processed[slot] = Some(hit);
        if self.history.len() == HISTORY_LEN {
            self.history.remove(0);
        }
        self.history.push(hit);

        let decided = if self.game_active { self.decide(hit, now) } else { None };
        Ok(HitOutcome::Accepted { hit, decided })
    }

    fn decide(&mut self, hit: HitEvent, now: Timestamp) -> Option<RoundOutcome> {
        match self.config.strategy {
            WinnerStrategy::FirstHit => Some(self.close_round(RoundOutcome::Winner(hit.player), now)),
            WinnerStrategy::Buffered { tie_tolerance_us } => {
                let slot = &mut self.buffered[hit.player.id() as usize - 1];
                if slot.is_none() {
                    *slot = Some(hit);
                }
                match self.buffered {
                    [Some(a), Some(b)] => {
                        let outcome = compare_hits(a.adjusted_time, b.adjusted_time, tie_tolerance_us);
                        Some(self.close_round(outcome, now))
                    }
                    _ => {
                        if !self.pair_deadline.is_armed() {
                            self.pair_deadline.arm(now, self.config.pair_window_ms);
                        }
                        None
                    }
                }
            }
        }
    }

    fn close_round(&mut self, outcome: RoundOutcome, now: Timestamp) -> RoundOutcome {
        self.game_active = false;
        self.buffered = [None, None];
        self.pair_deadline.cancel();
        self.rearm_deadline.arm(now, self.config.round_rearm_ms);
        outcome
    }

    /// Advance timers.
    ///
    /// Returns a round result when a buffered round times out with a single
    /// hitter. Re-arms the round once the rearm delay has passed.
    pub fn poll(&mut self, now: Timestamp) -> Option<RoundOutcome> {
        if self.rearm_deadline.expired(now) {
            self.rearm();
            return None;
        }

        if self.pair_deadline.expired(now) && self.game_active {
            let lone = self.buffered.iter().flatten().next().map(|h| h.player);
            if let Some(player) = lone {
                return Some(self.close_round(RoundOutcome::Winner(player), now));
            }
        }
        None
    }
}

/// Compare two adjusted hit times: `diff = a - b`.
pub fn compare_hits(a: Timestamp, b: Timestamp, tie_tolerance_us: u32) -> RoundOutcome {
    let diff = a.signed_diff(b) as i64;
    if diff.unsigned_abs() <= tie_tolerance_us as u64 {
        RoundOutcome::Tie
    } else if diff < 0 {
        RoundOutcome::Winner(Player::A)
    } else {
        RoundOutcome::Winner(Player::B)
    }
}
