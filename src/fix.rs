// Location fixes
// One GPS sample with accuracy, motion and battery metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geodesy;

/// Which side of the link produced a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixSource {
    /// The collar (watch) worn by the pet
    SensorDevice,
    /// The owner's phone
    DisplayDevice,
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinate { latitude, longitude }
    }

    /// Great-circle distance to another coordinate in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        geodesy::haversine(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// A single accepted-or-candidate GPS sample
///
/// Fixes are values: nothing mutates one after construction, the history
/// only changes which fix it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Capture time on the producing device's clock
    pub timestamp: DateTime<Utc>,
    pub source: FixSource,
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_meters: Option<f64>,
    pub horizontal_accuracy_meters: f64,
    pub vertical_accuracy_meters: f64,
    pub speed_meters_per_second: f64,
    /// Direction of travel, 0-360
    pub course_degrees: f64,
    /// Direction the device is pointing, 0-360
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    /// Producer battery at capture time. May be out of range on the wire;
    /// read it through `battery()`.
    pub battery_fraction: f64,
    /// Strictly increasing per producing device
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_preset: Option<String>,
}

impl LocationFix {
    /// Create a fix with zeroed motion fields and unknown altitude/heading
    pub fn new(
        source: FixSource,
        sequence: u64,
        timestamp: DateTime<Utc>,
        coordinate: Coordinate,
        horizontal_accuracy_meters: f64,
    ) -> Self {
        LocationFix {
            timestamp,
            source,
            coordinate,
            altitude_meters: None,
            horizontal_accuracy_meters,
            vertical_accuracy_meters: 0.0,
            speed_meters_per_second: 0.0,
            course_degrees: 0.0,
            heading_degrees: None,
            battery_fraction: 1.0,
            sequence,
            tracking_preset: None,
        }
    }

    pub fn with_battery(mut self, fraction: f64) -> Self {
        self.battery_fraction = fraction;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_altitude(mut self, meters: f64, vertical_accuracy: f64) -> Self {
        self.altitude_meters = Some(meters);
        self.vertical_accuracy_meters = vertical_accuracy;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_motion(mut self, speed: f64, course: f64) -> Self {
        self.speed_meters_per_second = speed;
        self.course_degrees = course;
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.tracking_preset = Some(preset.into());
        self
    }

    /// Duplicate-suppression key
    pub fn key(&self) -> (FixSource, u64) {
        (self.source, self.sequence)
    }

    /// Battery fraction clamped to [0, 1]; NaN reads as empty
    pub fn battery(&self) -> f64 {
        if self.battery_fraction.is_nan() {
            0.0
        } else {
            self.battery_fraction.clamp(0.0, 1.0)
        }
    }

    /// Signed seconds from `earlier` to this fix
    pub fn seconds_since(&self, earlier: &LocationFix) -> f64 {
        seconds_between(earlier.timestamp, self.timestamp)
    }

    /// Copy with non-finite auxiliary fields normalised so it survives JSON
    /// (serde_json writes NaN as null, which the receiver cannot parse)
    pub fn wire_safe(&self) -> LocationFix {
        let finite_or = |v: f64, d: f64| if v.is_finite() { v } else { d };
        LocationFix {
            altitude_meters: self.altitude_meters.filter(|v| v.is_finite()),
            heading_degrees: self.heading_degrees.filter(|v| v.is_finite()),
            vertical_accuracy_meters: finite_or(self.vertical_accuracy_meters, 0.0),
            speed_meters_per_second: finite_or(self.speed_meters_per_second, 0.0),
            course_degrees: finite_or(self.course_degrees, 0.0),
            battery_fraction: self.battery(),
            ..self.clone()
        }
    }

    /// Structural checks applied to fixes arriving over the wire
    pub fn check(&self) -> Result<(), String> {
        let c = &self.coordinate;
        if !c.latitude.is_finite() || !(-90.0..=90.0).contains(&c.latitude) {
            return Err(format!("latitude out of range: {}", c.latitude));
        }
        if !c.longitude.is_finite() || !(-180.0..=180.0).contains(&c.longitude) {
            return Err(format!("longitude out of range: {}", c.longitude));
        }
        if !(self.horizontal_accuracy_meters >= 0.0) {
            return Err(format!("horizontal accuracy invalid: {}", self.horizontal_accuracy_meters));
        }
        // NaN is tolerated here; `wire_safe` zeroes it before sending
        if self.vertical_accuracy_meters < 0.0 {
            return Err(format!("vertical accuracy invalid: {}", self.vertical_accuracy_meters));
        }
        Ok(())
    }
}

/// Signed seconds between two instants (positive when `to` is later)
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().map(|us| us as f64 / 1e6).unwrap_or_else(|| {
        // Only reachable for spans beyond ~292k years
        (to - from).num_seconds() as f64
    })
}
