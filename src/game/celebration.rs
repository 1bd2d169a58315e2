//! Celebration Scheduler
//!
//! Plays a short, self-terminating win animation without ever blocking the
//! main loop. The caller polls every tick; frames are throttled to roughly
//! 60 Hz internally so the loop can spin as fast as it likes.
//!
//! A session only paints LEDs. It never touches `GameState`; the owner runs
//! the pending reset when `poll` reports `Finished`.

use crate::core::clock::{IntervalTimer, Timestamp};
use crate::core::rng::SparkRng;
use crate::game::mode::{Player, Track};
use crate::game::render::{Renderer, Rgb};

/// Minimum spacing between rendered frames.
pub const FRAME_INTERVAL_MS: u32 = 16;

/// Per-frame brightness kept by confetti sparks.
const CONFETTI_DECAY: f32 = 0.85;

/// Percentage of confetti sparks that are white.
const WHITE_SPARK_PERCENT: u32 = 30;

/// Length of the winner chase tail, head included.
const CHASE_TAIL: usize = 6;

// =============================================================================
// PATTERNS
// =============================================================================

/// Win animations, played in round-robin order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Fading comet in the winner's colour with a flashing white head.
    WinnerChase,
    /// Sine ripples spreading out from the centre pair.
    CenterRipple,
    /// Random decaying sparks.
    Confetti,
    /// Whole strip breathing between the winner's colour and white.
    Breathe,
}

impl Pattern {
    /// Round-robin order.
    pub const ALL: [Pattern; 4] = [
        Pattern::WinnerChase,
        Pattern::CenterRipple,
        Pattern::Confetti,
        Pattern::Breathe,
    ];

    /// How long the pattern plays.
    pub const fn duration_ms(self) -> u32 {
        match self {
            Pattern::WinnerChase => 2500,
            Pattern::CenterRipple => 2500,
            Pattern::Confetti => 2000,
            Pattern::Breathe => 3000,
        }
    }

    /// Longest pattern duration. Hosts hold the celebrating flag this long.
    pub fn longest_ms() -> u32 {
        Pattern::ALL.iter().map(|p| p.duration_ms()).max().unwrap_or(0)
    }
}

/// One running celebration.
#[derive(Clone, Debug, PartialEq)]
pub struct CelebrationSession {
    /// Pattern being played
    pub pattern: Pattern,
    /// When it started
    pub started_at: Timestamp,
    /// Duration in milliseconds
    pub duration_ms: u32,
    /// Winning player
    pub winner: Player,
    /// Colour of the winning player
    pub winner_color: Rgb,
}

impl CelebrationSession {
    /// Progress in `[0, 1)` while running, `>= 1` once over.
    pub fn progress(&self, now: Timestamp) -> f32 {
        now.millis_since(self.started_at) as f32 / self.duration_ms as f32
    }
}

/// Result of polling the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePoll {
    /// No celebration running; normal rendering applies.
    Idle,
    /// Celebration running but too soon for another frame.
    Skipped,
    /// A frame was pushed to the renderer.
    Rendered,
    /// The celebration just ended. Run the pending reset.
    Finished,
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// `Idle → Active(pattern, start, duration) → Idle`.
#[derive(Debug, Clone)]
pub struct CelebrationScheduler {
    track: Track,
    session: Option<CelebrationSession>,
    next_pattern: usize,
    frame_timer: IntervalTimer,
    frame: Vec<Rgb>,
    sparks: Vec<Rgb>,
    rng: SparkRng,
}

impl CelebrationScheduler {
    /// Idle scheduler for a strip of `track.len()` LEDs.
    pub fn new(track: Track) -> Self {
        let len = track.len() as usize;
        Self {
            track,
            session: None,
            next_pattern: 0,
            frame_timer: IntervalTimer::from_millis(FRAME_INTERVAL_MS),
            frame: vec![Rgb::OFF; len],
            sparks: vec![Rgb::OFF; len],
            rng: SparkRng::default(),
        }
    }

    /// Whether a session is running.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<&CelebrationSession> {
        self.session.as_ref()
    }

    /// Start the next pattern in rotation. Replaces any running session.
    pub fn start(&mut self, winner: Player, winner_color: Rgb, now: Timestamp) -> Pattern {
        let pattern = Pattern::ALL[self.next_pattern % Pattern::ALL.len()];
        self.next_pattern = self.next_pattern.wrapping_add(1);

        self.session = Some(CelebrationSession {
            pattern,
            started_at: now,
            duration_ms: pattern.duration_ms(),
            winner,
            winner_color,
        });
        self.frame_timer.clear();
        self.sparks.fill(Rgb::OFF);
        self.rng = SparkRng::new(now.micros() as u64);
        pattern
    }

    /// Drop the running session without finishing it.
    pub fn cancel(&mut self) {
        self.session = None;
    }

    /// Advance the animation.
    pub fn poll<R: Renderer + ?Sized>(&mut self, now: Timestamp, renderer: &mut R) -> FramePoll {
        let Some(session) = self.session.clone() else {
            return FramePoll::Idle;
        };

        let t = session.progress(now);
        if t >= 1.0 {
            self.session = None;
            return FramePoll::Finished;
        }

        if !self.frame_timer.poll(now) {
            return FramePoll::Skipped;
        }

        let elapsed_ms = now.millis_since(session.started_at);
        self.frame.fill(Rgb::OFF);
        match session.pattern {
            Pattern::WinnerChase => self.paint_chase(session.winner_color, elapsed_ms),
            Pattern::CenterRipple => self.paint_ripple(session.winner_color, t),
            Pattern::Confetti => self.paint_confetti(session.winner_color),
            Pattern::Breathe => self.paint_breathe(session.winner_color, t),
        }
        renderer.set_strip(&self.frame);
        FramePoll::Rendered
    }

    fn paint_chase(&mut self, color: Rgb, elapsed_ms: u32) {
        let len = self.frame.len();
        let head = (elapsed_ms / 20) as usize % len;
        let flash = (elapsed_ms / 200) % 2 == 0;

        for k in 0..CHASE_TAIL.min(len) {
            let idx = (head + len - k) % len;
            self.frame[idx] = if k == 0 && flash {
                Rgb::WHITE
            } else {
                color.scale(0.75f32.powi(k as i32))
            };
        }
    }

    fn paint_ripple(&mut self, color: Rgb, t: f32) {
        let cl = self.track.center_left() as i32;
        let cr = self.track.center_right() as i32;
        let tint = color.mix(Rgb::WHITE, 0.3);

        for (i, px) in self.frame.iter_mut().enumerate() {
            let i = i as i32;
            let d = (i - cl).abs().min((i - cr).abs()) as f32;
            let phase = d * 0.55 - t * 10.0;
            *px = tint.scale(0.5 + 0.5 * phase.sin());
        }
    }

    fn paint_confetti(&mut self, color: Rgb) {
        for spark in self.sparks.iter_mut() {
            *spark = spark.scale(CONFETTI_DECAY);
        }

        let len = self.sparks.len() as u32;
        let count = 2 + self.rng.next_below(3);
        for _ in 0..count {
            let i = self.rng.next_below(len) as usize;
            let c = if self.rng.chance(WHITE_SPARK_PERCENT) { Rgb::WHITE } else { color };
            self.sparks[i] = self.sparks[i].max(c);
        }

        self.frame.copy_from_slice(&self.sparks);
    }

    fn paint_breathe(&mut self, color: Rgb, t: f32) {
        let s = 0.5 + 0.5 * (t * 2.0 * std::f32::consts::TAU).sin();
        self.frame.fill(color.mix(Rgb::WHITE, s));
    }
}
