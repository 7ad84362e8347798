use std::time::Duration;
use std::time::Instant;

/// A fixed point in the future against which blocking waits are budgeted.
///
/// Every timeout in the harness is per-call and host-clock based; a
/// `Deadline` turns "wait up to N" into "how much budget is left right now"
/// so that a sequence of reads can share one overall bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Remaining budget, `Duration::ZERO` once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// True while more than `margin` of budget is left.
    pub fn has_margin(&self, margin: Duration) -> bool {
        self.remaining() > margin
    }
}
