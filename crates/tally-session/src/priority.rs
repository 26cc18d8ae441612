//! Round-robin submission priority.

/// Decides which sources may submit in a round, and in which preference order.
pub trait RoundPriority: Send + Sync {
    /// Priority of `src` in `round`; lower is preferred. `None` if `src` may
    /// not submit in this round.
    fn priority(&self, src: u32, round: u32) -> Option<u32>;

    /// Largest priority value `priority` can return.
    fn max_priority(&self) -> u32;
}

/// Rotates the first `round_candidates` submitters by one source per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobin {
    total_nodes: u32,
    round_candidates: u32,
}

impl RoundRobin {
    /// Creates the rotation for `total_nodes` sources.
    pub fn new(total_nodes: u32, round_candidates: u32) -> Self {
        Self {
            total_nodes: total_nodes.max(1),
            round_candidates: round_candidates.clamp(1, total_nodes.max(1)),
        }
    }
}

impl RoundPriority for RoundRobin {
    fn priority(&self, src: u32, round: u32) -> Option<u32> {
        if src >= self.total_nodes {
            return None;
        }
        let start = round % self.total_nodes;
        let offset = (src + self.total_nodes - start) % self.total_nodes;
        (offset < self.round_candidates).then_some(offset)
    }

    fn max_priority(&self) -> u32 {
        self.round_candidates - 1
    }
}
