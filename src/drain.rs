// Battery drain estimation
// Turns sparse battery-fraction samples into a smoothed percent-per-hour rate

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{DRAIN_EMA_WEIGHT, MIN_DRAIN_INTERVAL_SECS};
use crate::fix::seconds_between;

/// Snapshot of the estimator's output
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DrainEstimate {
    /// Most recent battery fraction seen, clamped to [0, 1]
    pub last_battery_fraction: Option<f64>,
    /// Drain over the latest valid interval (% per hour, >= 0)
    pub instantaneous_percent_per_hour: Option<f64>,
    /// Exponential moving average of `instantaneous` (% per hour, >= 0)
    pub smoothed_percent_per_hour: Option<f64>,
}

/// Streaming drain-rate estimator
///
/// Keeps one anchor sample, the latest instantaneous value and the EMA;
/// no history beyond that.
#[derive(Debug, Clone)]
pub struct BatteryDrainEstimator {
    anchor: Option<(f64, DateTime<Utc>)>,
    last_battery: Option<f64>,
    instantaneous: Option<f64>,
    smoothed: Option<f64>,
    min_interval_secs: f64,
    weight: f64,
}

const MIN_INTERVAL_FLOOR_SECS: f64 = 1e-3;

impl Default for BatteryDrainEstimator {
    fn default() -> Self {
        Self::new(MIN_DRAIN_INTERVAL_SECS, DRAIN_EMA_WEIGHT)
    }
}

impl BatteryDrainEstimator {
    pub fn new(min_interval_secs: f64, weight: f64) -> Self {
        BatteryDrainEstimator {
            anchor: None,
            last_battery: None,
            instantaneous: None,
            smoothed: None,
            // Zero would let equal timestamps divide 0 by 0
            min_interval_secs: min_interval_secs.max(MIN_INTERVAL_FLOOR_SECS),
            weight: weight.clamp(0.0, 1.0),
        }
    }

    /// Feed one sample; returns true when the drain estimate changed
    ///
    /// Samples closer than the minimum interval to the anchor only update
    /// the displayed battery level. Rising levels (charging) count as zero
    /// drain rather than negative.
    pub fn record(&mut self, battery_fraction: f64, timestamp: DateTime<Utc>) -> bool {
        let battery = if battery_fraction.is_nan() {
            0.0
        } else {
            battery_fraction.clamp(0.0, 1.0)
        };
        self.last_battery = Some(battery);

        let (prior, prior_ts) = match self.anchor {
            None => {
                self.anchor = Some((battery, timestamp));
                return false;
            }
            Some(anchor) => anchor,
        };

        let elapsed = seconds_between(prior_ts, timestamp);
        if elapsed < self.min_interval_secs {
            return false;
        }

        let delta = (prior - battery).max(0.0);
        // Fraction per second -> percent per hour
        let instantaneous = delta / elapsed * 3600.0 * 100.0;
        let smoothed = match self.smoothed {
            None => instantaneous,
            Some(prev) => (1.0 - self.weight) * prev + self.weight * instantaneous,
        };

        self.instantaneous = Some(instantaneous);
        self.smoothed = Some(smoothed);
        self.anchor = Some((battery, timestamp));
        true
    }

    pub fn estimate(&self) -> DrainEstimate {
        DrainEstimate {
            last_battery_fraction: self.last_battery,
            instantaneous_percent_per_hour: self.instantaneous,
            smoothed_percent_per_hour: self.smoothed,
        }
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.last_battery = None;
        self.instantaneous = None;
        self.smoothed = None;
    }
}
