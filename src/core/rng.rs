//! Sparkle Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Used by the confetti pattern to
//! place sparks; seeded from the node clock at celebration start so two
//! celebrations rarely look identical, while tests stay reproducible.

/// Xorshift128+ PRNG.
#[derive(Clone, Debug)]
pub struct SparkRng {
    state: [u64; 2],
}

impl Default for SparkRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SparkRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Random integer in `[0, max)`. Returns 0 when `max` is 0.
    #[inline]
    pub fn next_below(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// `true` with probability `percent / 100`.
    #[inline]
    pub fn chance(&mut self, percent: u32) -> bool {
        self.next_below(100) < percent
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
