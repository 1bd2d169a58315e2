//! # Lightduel
//!
//! Inter-node sync protocol, replicated game state and celebration
//! scheduler for a two-player LED reaction game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         LIGHTDUEL                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Clock-driven primitives                  │
//! │  ├── clock.rs     - Wrapping µs timestamps, timers           │
//! │  ├── rng.rs       - Seeded spark RNG for confetti            │
//! │  └── hash.rs      - Replica state fingerprints               │
//! │                                                              │
//! │  game/            - Game logic (no I/O)                      │
//! │  ├── mode.rs      - Players, modes, track geometry           │
//! │  ├── state.rs     - Six-mode game state machine              │
//! │  ├── hit.rs       - Hit dedup and round decisions            │
//! │  ├── celebration.rs - Non-blocking win animations            │
//! │  ├── render.rs    - Colours and progress painting            │
//! │  └── events.rs    - Node notifications                       │
//! │                                                              │
//! │  network/         - Radio protocol                           │
//! │  ├── record.rs    - 16/13-byte wire records                  │
//! │  ├── peer.rs      - Address learning and liveness            │
//! │  ├── clock_sync.rs- Round-trip clock offsets                 │
//! │  ├── mailbox.rs   - Receive callback → main loop hand-off    │
//! │  ├── transport.rs - Radio trait, UDP stand-in                │
//! │  └── console.rs   - Host console JSON                        │
//! │                                                              │
//! │  node/            - Host, player and display roles           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Node Ids
//!
//! | Id | Role |
//! |----|------|
//! | 0  | Host / bridge (owns the game) |
//! | 1  | Player A sensor |
//! | 2  | Player B sensor |
//! | 3  | Display |
//!
//! ## Time
//!
//! Everything below `node/` takes `now` as an argument. Timestamps are
//! 32-bit microsecond counters that wrap; all comparisons go through
//! wrapping subtraction, so behaviour is unchanged across the wrap.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod node;

// Re-export commonly used types
pub use core::clock::{Clock, MonotonicClock, Timestamp};
pub use game::mode::{GameMode, Player, Track};
pub use game::state::{GameSnapshot, GameState};
pub use network::record::{Datagram, DISPLAY_ID, HOST_ID, PLAYER_A_ID, PLAYER_B_ID};
pub use node::{DisplayNode, HostNode, Node, NodeConfig, PlayerNode};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main loop period (ms). Frames, timers and mailbox draining all run at
/// this granularity.
pub const TICK_INTERVAL_MS: u64 = 5;
