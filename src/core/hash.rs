//! State Hashing
//!
//! SHA-256 fingerprints of game state. The host and the display compute the
//! same fingerprint over their copies, which makes replica divergence visible
//! in status reports and tests.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain separator for game-state fingerprints.
const GAME_STATE_DOMAIN: &[u8] = b"LIGHTDUEL_STATE_V1";

/// Deterministic hasher for game state.
///
/// Order of updates is part of the fingerprint.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for game state.
    pub fn for_game_state() -> Self {
        Self::new(GAME_STATE_DOMAIN)
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with an i8 value.
    #[inline]
    pub fn update_i8(&mut self, value: i8) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Hash state through a closure that feeds the hasher.
pub fn compute_state_hash<F>(add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_game_state();
    add_state(&mut hasher);
    hasher.finalize()
}

/// Short hex form for logs (first 8 bytes).
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_input_same_hash() {
        let a = compute_state_hash(|h| {
            h.update_u8(4);
            h.update_i8(-1);
            h.update_bool(true);
        });
        let b = compute_state_hash(|h| {
            h.update_u8(4);
            h.update_i8(-1);
            h.update_bool(true);
        });
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_matters() {
        let a = compute_state_hash(|h| {
            h.update_u8(1);
            h.update_u8(2);
        });
        let b = compute_state_hash(|h| {
            h.update_u8(2);
            h.update_u8(1);
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_domain_separation() {
        let mut plain = StateHasher::new(b"OTHER");
        plain.update_u32(7);
        let other = plain.finalize();
        let ours = compute_state_hash(|h| h.update_u32(7));
        assert_ne!(other, ours);
        assert_eq!(short_hex(&ours).len(), 16);
    }
}
