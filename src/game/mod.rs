//! Game Logic Module
//!
//! Scoring, round decisions and animation. Pure and clock-driven: every
//! operation takes `now` explicitly, nothing reads the wall clock or touches
//! the radio.
//!
//! ## Module Structure
//!
//! - `mode`: Players, the six game modes, track geometry
//! - `state`: Authoritative game state machine
//! - `hit`: Hit deduplication and round winner determination
//! - `celebration`: Non-blocking win animations
//! - `render`: Colours, the LED collaborator, progress painting
//! - `events`: Notifications raised by nodes

pub mod mode;
pub mod state;
pub mod hit;
pub mod celebration;
pub mod render;
pub mod events;

// Re-export key types
pub use mode::{GameMode, Player, SwapRule, Track};
pub use state::{Board, GameError, GameSnapshot, GameState, PlayerColors, SettingsChange};
pub use hit::{HitConfig, HitError, HitOutcome, HitProcessor, RoundOutcome, WinnerStrategy};
pub use celebration::{CelebrationScheduler, FramePoll, Pattern};
pub use render::{MemoryStrip, Renderer, Rgb};
pub use events::{Notification, NotificationData};
