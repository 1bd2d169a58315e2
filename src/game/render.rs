//! Rendering
//!
//! Turns game state into a frame of LED colours. The LED driver itself is an
//! external collaborator reached through [`Renderer`]; nothing here talks to
//! hardware.

use serde::{Serialize, Deserialize};

use crate::game::mode::{GameMode, Player};
use crate::game::state::{Board, GameState};

/// 24-bit colour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
}

impl Rgb {
    /// Unlit LED.
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    /// Full white.
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    /// Construct from components.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale brightness by `s`, clamped to `[0, 1]`.
    pub fn scale(self, s: f32) -> Rgb {
        let s = s.clamp(0.0, 1.0);
        Rgb::new(
            (self.r as f32 * s) as u8,
            (self.g as f32 * s) as u8,
            (self.b as f32 * s) as u8,
        )
    }

    /// Linear blend toward `other` by `t`, clamped to `[0, 1]`.
    pub fn mix(self, other: Rgb, t: f32) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (a as f32 * (1.0 - t) + b as f32 * t) as u8;
        Rgb::new(lerp(self.r, other.r), lerp(self.g, other.g), lerp(self.b, other.b))
    }

    /// Per-channel average of two colours.
    pub fn average(self, other: Rgb) -> Rgb {
        Rgb::new(
            ((self.r as u16 + other.r as u16) / 2) as u8,
            ((self.g as u16 + other.g as u16) / 2) as u8,
            ((self.b as u16 + other.b as u16) / 2) as u8,
        )
    }

    /// Per-channel maximum.
    pub fn max(self, other: Rgb) -> Rgb {
        Rgb::new(self.r.max(other.r), self.g.max(other.g), self.b.max(other.b))
    }
}

/// Selectable player colours. Colour settings are indices into this table.
pub const PALETTE: [Rgb; 5] = [
    Rgb::new(255, 0, 0),   // red
    Rgb::new(0, 80, 255),  // blue
    Rgb::new(0, 255, 0),   // green
    Rgb::new(255, 0, 255), // magenta
    Rgb::new(255, 80, 0),  // orange
];

/// Whether `index` names a palette entry.
#[inline]
pub fn is_valid_color(index: u8) -> bool {
    (index as usize) < PALETTE.len()
}

/// Palette lookup; out-of-range indices render as the first entry.
#[inline]
pub fn palette_color(index: u8) -> Rgb {
    PALETTE.get(index as usize).copied().unwrap_or(PALETTE[0])
}

/// The LED strip collaborator.
pub trait Renderer {
    /// Replace the whole strip.
    fn set_strip(&mut self, colors: &[Rgb]);

    /// Set one LED.
    fn set_pixel(&mut self, index: usize, color: Rgb);
}

/// In-memory strip. Used by tests and by headless nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStrip {
    /// Current LED colours.
    pub pixels: Vec<Rgb>,
    /// Number of `set_strip` calls seen.
    pub frames: u64,
}

impl MemoryStrip {
    /// Strip of `len` unlit LEDs.
    pub fn new(len: usize) -> Self {
        Self { pixels: vec![Rgb::OFF; len], frames: 0 }
    }

    /// Number of lit LEDs.
    pub fn lit(&self) -> usize {
        self.pixels.iter().filter(|p| **p != Rgb::OFF).count()
    }
}

impl Renderer for MemoryStrip {
    fn set_strip(&mut self, colors: &[Rgb]) {
        self.pixels.clear();
        self.pixels.extend_from_slice(colors);
        self.frames += 1;
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(p) = self.pixels.get_mut(index) {
            *p = color;
        }
    }
}

/// Paint the normal (non-celebration) view of `state` into `frame`.
///
/// `frame` must be `state.track().len()` long.
pub fn paint_progress(state: &GameState, frame: &mut [Rgb]) {
    frame.fill(Rgb::OFF);
    let len = frame.len() as i16;
    let color_a = palette_color(state.colors().a);
    let color_b = palette_color(state.colors().b);
    let track = state.track();

    match (state.mode(), state.board()) {
        (GameMode::SwapSides, Board::Pair { a, b }) => {
            for (pos, color) in [(*a, color_a), (*b, color_b)] {
                if (0..len).contains(&(pos as i16)) {
                    frame[pos as usize] = color;
                }
            }
        }
        (GameMode::SplitScoring, Board::Pair { a, b }) => {
            let (cl, cr) = (track.center_left() as i16, track.center_right() as i16);
            if (*a as i16) <= cl {
                for i in (*a as i16).max(0)..=cl {
                    frame[i as usize] = color_a;
                }
            }
            if (*b as i16) >= cr {
                for i in cr..=(*b as i16).min(len - 1) {
                    frame[i as usize] = color_b;
                }
            }
        }
        (_, Board::Pair { a, b }) => {
            for i in 0..=(*a as i16).min(len - 1) {
                frame[i as usize] = color_a;
            }
            for i in (*b as i16).max(0)..len {
                frame[i as usize] = color_b;
            }
        }
        (_, Board::Sequence(tags)) => {
            for (slot, tag) in frame.iter_mut().zip(tags) {
                *slot = match tag {
                    Player::A => color_a,
                    Player::B => color_b,
                };
            }
        }
        (_, Board::Race { a, b }) => {
            let dot = |count: u8| (count > 0).then(|| count as usize - 1);
            match (dot(*a), dot(*b)) {
                (Some(ia), Some(ib)) if ia == ib => frame[ia] = color_a.average(color_b),
                (da, db) => {
                    if let Some(i) = da {
                        frame[i] = color_a;
                    }
                    if let Some(i) = db {
                        frame[i] = color_b;
                    }
                }
            }
        }
        (_, Board::Boundary(boundary)) => {
            for (i, slot) in frame.iter_mut().enumerate() {
                *slot = if i <= *boundary as usize { color_a } else { color_b };
            }
        }
    }
}

/// Colour wheel: 0..255 around red → green → blue.
pub fn wheel(pos: u8) -> Rgb {
    let pos = 255 - pos;
    if pos < 85 {
        Rgb::new(255 - pos * 3, 0, pos * 3)
    } else if pos < 170 {
        let p = pos - 85;
        Rgb::new(0, p * 3, 255 - p * 3)
    } else {
        let p = pos - 170;
        Rgb::new(p * 3, 255 - p * 3, 0)
    }
}

/// Rainbow chase shown by the display while it has no host link.
#[derive(Debug, Clone)]
pub struct IdleAnimation {
    offset: u8,
}

impl IdleAnimation {
    /// Frame period in milliseconds.
    pub const FRAME_MS: u32 = 50;

    /// Start at hue 0.
    pub fn new() -> Self {
        Self { offset: 0 }
    }

    /// Advance one step and paint.
    pub fn step(&mut self, frame: &mut [Rgb]) {
        self.offset = self.offset.wrapping_add(1);
        let len = frame.len().max(1);
        for (i, slot) in frame.iter_mut().enumerate() {
            let hue = (self.offset as usize + i * 256 / len) % 256;
            *slot = wheel(hue as u8);
        }
    }
}

impl Default for IdleAnimation {
    fn default() -> Self {
        Self::new()
    }
}
