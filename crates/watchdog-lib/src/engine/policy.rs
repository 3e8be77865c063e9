//! Downscale policy
//!
//! Only idle offers are touched, and only down to the floor the platform
//! itself reports for them.

use crate::error::{Result, WatchdogError};
use crate::models::Offer;
use crate::providers::DatabaseSession;
use serde::{Deserialize, Serialize};

/// Lowest throughput the platform accepts for any offer
pub const PLATFORM_MIN_THROUGHPUT: u32 = 400;

/// Why an offer was left alone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already at the absolute platform minimum
    AtPlatformMinimum,
    /// Consumption was observed in the sampled windows
    Active { max_consumed: f64 },
    /// Already at the provider reported floor
    AtProviderFloor,
    /// The provider floor is above the current throughput; that would be a scale up
    FloorAboveCurrent { floor: u32 },
}

/// Outcome of the policy for one offer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Skip(SkipReason),
    DownscaleTo(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct DownscalePolicy {
    platform_minimum: u32,
}

impl Default for DownscalePolicy {
    fn default() -> Self {
        Self {
            platform_minimum: PLATFORM_MIN_THROUGHPUT,
        }
    }
}

impl DownscalePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that need no metrics: offers already at the platform minimum
    /// are not worth aggregating
    pub fn screen(&self, current: u32) -> Option<SkipReason> {
        (current == self.platform_minimum).then_some(SkipReason::AtPlatformMinimum)
    }

    /// Decide given the provider floor
    pub fn decide_with_floor(&self, current: u32, max_consumed: f64, floor: u32) -> Decision {
        if let Some(reason) = self.screen(current) {
            return Decision::Skip(reason);
        }
        if max_consumed > 0.0 {
            return Decision::Skip(SkipReason::Active { max_consumed });
        }
        if floor == current {
            return Decision::Skip(SkipReason::AtProviderFloor);
        }
        if floor > current {
            return Decision::Skip(SkipReason::FloorAboveCurrent { floor });
        }
        Decision::DownscaleTo(floor)
    }

    /// Decide for an offer, reading its floor only when it is idle
    pub async fn decide(
        &self,
        offer: &Offer,
        max_consumed: f64,
        session: &dyn DatabaseSession,
    ) -> Result<Decision> {
        if let Some(reason) = self.screen(offer.throughput) {
            return Ok(Decision::Skip(reason));
        }
        if max_consumed > 0.0 {
            return Ok(Decision::Skip(SkipReason::Active { max_consumed }));
        }

        let detail = session
            .read_offer(offer)
            .await
            .map_err(|source| WatchdogError::provider("read offer", source))?;

        Ok(self.decide_with_floor(offer.throughput, max_consumed, detail.min_throughput))
    }
}
