//! Lockstep (default) distribution

use crate::config::DistributionMode;
use crate::error::Result;
use crate::transport::{StepAvailability, Timeout, Transport};

use super::DistributionPolicy;

/// Every reader receives every step in production order
#[derive(Debug, Default)]
pub struct LockstepPolicy {
    next: u64,
}

impl LockstepPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionPolicy for LockstepPolicy {
    fn mode(&self) -> DistributionMode {
        DistributionMode::Default
    }

    fn next_step(&mut self, transport: &dyn Transport, timeout: Timeout) -> Result<StepAvailability> {
        let outcome = transport.wait_for_step(self.next, timeout)?;
        if let StepAvailability::Ready(step) = outcome {
            self.next = step + 1;
        }
        Ok(outcome)
    }
}
