//! On-demand distribution
//!
//! Published steps wait in one queue shared by all readers; each BeginStep
//! claims the oldest. A slow reader simply claims less often: nothing is
//! dropped and claimed steps stay held until released.

use crate::config::DistributionMode;
use crate::error::{Result, StageError};
use crate::transport::{StepAvailability, Timeout, Transport};

use super::DistributionPolicy;

#[derive(Debug, Default)]
pub struct OnDemandPolicy {
    last: Option<u64>,
}

impl OnDemandPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionPolicy for OnDemandPolicy {
    fn mode(&self) -> DistributionMode {
        DistributionMode::OnDemand
    }

    fn next_step(&mut self, transport: &dyn Transport, timeout: Timeout) -> Result<StepAvailability> {
        let outcome = transport.claim_next_step(timeout)?;
        if let StepAvailability::Ready(step) = outcome {
            if self.last.map_or(false, |last| step <= last) {
                return Err(StageError::Transport(format!(
                    "Claimed step {} after step {}; claim queue out of order",
                    step,
                    self.last.unwrap_or_default()
                )));
            }
            self.last = Some(step);
        }
        Ok(outcome)
    }
}
