use crate::{rng, AgentId, SplitMix64};

/// Frame information handed to the tree component and to every node call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub tick: u64,
    pub dt_seconds: f32,
    pub seed: u64,
}

impl TickContext {
    pub fn new(tick: u64, dt_seconds: f32, seed: u64) -> Self {
        Self {
            tick,
            dt_seconds,
            seed,
        }
    }

    /// Context for the following frame, keeping the seed.
    pub fn advance(&self, dt_seconds: f32) -> Self {
        Self {
            tick: self.tick.wrapping_add(1),
            dt_seconds,
            seed: self.seed,
        }
    }

    /// Per-agent random stream; identical inputs always yield the same sequence.
    pub fn rng_for_agent<A: AgentId>(&self, agent: A, stream: u64) -> SplitMix64 {
        SplitMix64::new(rng::derive_seed(self.seed, agent.stable_id(), stream))
    }
}
