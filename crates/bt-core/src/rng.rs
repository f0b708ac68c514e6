//! Deterministic random numbers for service scheduling.
//!
//! Not cryptographic. The only consumer that matters for determinism is the
//! service interval deviation, so the API stays small.

pub trait DeterministicRng {
    fn next_u64(&mut self) -> u64;

    /// Uniform value in `[0, 1)` built from the top 24 bits.
    fn next_unit_f32(&mut self) -> f32 {
        let bits = (self.next_u64() >> 40) as u32;
        bits as f32 / (1u32 << 24) as f32
    }

    /// Uniform value in `[low, high)`; returns `low` for an empty range.
    fn range_f32(&mut self, low: f32, high: f32) -> f32 {
        if high <= low {
            return low;
        }
        low + (high - low) * self.next_unit_f32()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl DeterministicRng for SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        mix64(self.state)
    }
}

pub fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Combine a global seed, an agent id and a stream id into one seed.
pub fn derive_seed(global_seed: u64, agent_id: u64, stream: u64) -> u64 {
    mix64(global_seed ^ mix64(agent_id.wrapping_add(0x9E37_79B9_7F4A_7C15)) ^ mix64(stream))
}
