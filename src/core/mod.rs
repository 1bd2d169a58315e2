//! Core primitives shared by every node role.
//!
//! Nothing in here knows about the radio or the game rules.

pub mod clock;
pub mod hash;
pub mod rng;

// Re-export core types
pub use clock::{Clock, Deadline, IntervalTimer, MonotonicClock, Timestamp};
pub use hash::{compute_state_hash, StateHash, StateHasher};
pub use rng::SparkRng;
