// Tracking mode policies
// Named threshold sets that govern which fixes are trusted

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Acceptance thresholds for one tracking mode
///
/// Fields are private so an instance always satisfies the construction
/// checks; swapping the active policy never touches existing history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingModePolicy {
    name: String,
    max_horizontal_accuracy_meters: f64,
    max_plausible_jump_meters: f64,
    max_plausible_jump_window_seconds: f64,
    max_fix_staleness_seconds: f64,
}

impl TrackingModePolicy {
    pub fn new(
        name: impl Into<String>,
        max_horizontal_accuracy_meters: f64,
        max_plausible_jump_meters: f64,
        max_plausible_jump_window_seconds: f64,
        max_fix_staleness_seconds: f64,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        positive("max_horizontal_accuracy_meters", max_horizontal_accuracy_meters)?;
        positive("max_plausible_jump_meters", max_plausible_jump_meters)?;
        positive("max_plausible_jump_window_seconds", max_plausible_jump_window_seconds)?;
        positive("max_fix_staleness_seconds", max_fix_staleness_seconds)?;

        Ok(TrackingModePolicy {
            name,
            max_horizontal_accuracy_meters,
            max_plausible_jump_meters,
            max_plausible_jump_window_seconds,
            max_fix_staleness_seconds,
        })
    }

    /// Everyday walking: moderate accuracy, 5 km jump cap
    pub fn balanced() -> Self {
        Self::preset(Preset::Balanced)
    }

    /// Lost-pet mode: take noisier fixes, the dog may be running
    pub fn emergency() -> Self {
        Self::preset(Preset::Emergency)
    }

    /// Battery saver: sparse but clean fixes
    pub fn saver() -> Self {
        Self::preset(Preset::Saver)
    }

    pub fn preset(preset: Preset) -> Self {
        let (acc, jump, window, stale) = match preset {
            Preset::Balanced => (75.0, 5_000.0, 120.0, 300.0),
            Preset::Emergency => (150.0, 10_000.0, 60.0, 120.0),
            Preset::Saver => (50.0, 2_000.0, 300.0, 900.0),
        };
        TrackingModePolicy {
            name: preset.to_string(),
            max_horizontal_accuracy_meters: acc,
            max_plausible_jump_meters: jump,
            max_plausible_jump_window_seconds: window,
            max_fix_staleness_seconds: stale,
        }
    }

    /// Copy of this policy with selected thresholds replaced, re-validated
    pub fn with_overrides(
        &self,
        max_horizontal_accuracy_meters: Option<f64>,
        max_plausible_jump_meters: Option<f64>,
        max_plausible_jump_window_seconds: Option<f64>,
        max_fix_staleness_seconds: Option<f64>,
    ) -> Result<Self, PolicyError> {
        Self::new(
            self.name.clone(),
            max_horizontal_accuracy_meters.unwrap_or(self.max_horizontal_accuracy_meters),
            max_plausible_jump_meters.unwrap_or(self.max_plausible_jump_meters),
            max_plausible_jump_window_seconds.unwrap_or(self.max_plausible_jump_window_seconds),
            max_fix_staleness_seconds.unwrap_or(self.max_fix_staleness_seconds),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_horizontal_accuracy_meters(&self) -> f64 {
        self.max_horizontal_accuracy_meters
    }

    pub fn max_plausible_jump_meters(&self) -> f64 {
        self.max_plausible_jump_meters
    }

    pub fn max_plausible_jump_window_seconds(&self) -> f64 {
        self.max_plausible_jump_window_seconds
    }

    pub fn max_fix_staleness_seconds(&self) -> f64 {
        self.max_fix_staleness_seconds
    }
}

impl Default for TrackingModePolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Policies read from files go through the same checks as `new`
impl<'de> Deserialize<'de> for TrackingModePolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            max_horizontal_accuracy_meters: f64,
            max_plausible_jump_meters: f64,
            max_plausible_jump_window_seconds: f64,
            max_fix_staleness_seconds: f64,
        }

        let raw = Raw::deserialize(deserializer)?;
        TrackingModePolicy::new(
            raw.name,
            raw.max_horizontal_accuracy_meters,
            raw.max_plausible_jump_meters,
            raw.max_plausible_jump_window_seconds,
            raw.max_fix_staleness_seconds,
        )
        .map_err(serde::de::Error::custom)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), PolicyError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PolicyError::NonPositive { field, value })
    }
}

/// Built-in policy names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Balanced,
    Emergency,
    Saver,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Preset::Balanced => "balanced",
            Preset::Emergency => "emergency",
            Preset::Saver => "saver",
        })
    }
}

impl FromStr for Preset {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Preset::Balanced),
            "emergency" => Ok(Preset::Emergency),
            "saver" | "battery_saver" => Ok(Preset::Saver),
            other => Err(PolicyError::UnknownPreset(other.to_string())),
        }
    }
}
