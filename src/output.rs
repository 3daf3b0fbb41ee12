// Observers
// Callbacks fired by the coordinator for accepted fixes and relay trouble

use std::io::Write;

use tracing::{error, info, warn};

use crate::error::DecodeError;
use crate::fix::LocationFix;

/// Receives coordinator notifications
///
/// Called after the state lock is released, in registration order.
pub trait FixObserver: Send + Sync {
    /// A fix passed validation and was added to the trail
    fn on_fix_accepted(&mut self, fix: &LocationFix);

    /// A payload could not be decoded; `consecutive` counts the current streak
    fn on_decode_failure(&mut self, _error: &DecodeError, _consecutive: u32) {}

    /// Decode failures reached the escalation threshold
    fn on_escalation(&mut self, _consecutive: u32) {}
}

/// Logs notifications through tracing
pub struct LogOutput;

impl FixObserver for LogOutput {
    fn on_fix_accepted(&mut self, fix: &LocationFix) {
        info!(
            sequence = fix.sequence,
            lat = fix.coordinate.latitude,
            lon = fix.coordinate.longitude,
            accuracy = fix.horizontal_accuracy_meters,
            "Fix accepted"
        );
    }

    fn on_decode_failure(&mut self, err: &DecodeError, consecutive: u32) {
        warn!(consecutive, "Dropped undecodable payload: {}", err);
    }

    fn on_escalation(&mut self, consecutive: u32) {
        error!(consecutive, "Repeated decode failures, peer may be running an incompatible version");
    }
}

/// Appends accepted fixes to a CSV file
pub struct CsvOutput {
    writer: std::io::BufWriter<std::fs::File>,
}

impl CsvOutput {
    pub const HEADER: &'static str = "timestamp,source,sequence,lat,lon,accuracy_m,speed_mps,course_deg,battery";

    /// Open (append) `path`, writing the header if the file is new/empty
    pub fn new(path: &str) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;
        let mut writer = std::io::BufWriter::new(file);
        if empty {
            writeln!(writer, "{}", Self::HEADER)?;
        }
        Ok(CsvOutput { writer })
    }

    pub fn format_row(fix: &LocationFix) -> String {
        let source = match fix.source {
            crate::fix::FixSource::SensorDevice => "sensor",
            crate::fix::FixSource::DisplayDevice => "display",
        };
        format!(
            "{},{},{},{:.6},{:.6},{:.1},{:.2},{:.1},{:.2}",
            fix.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            source,
            fix.sequence,
            fix.coordinate.latitude,
            fix.coordinate.longitude,
            fix.horizontal_accuracy_meters,
            fix.speed_meters_per_second,
            fix.course_degrees,
            fix.battery(),
        )
    }
}

impl FixObserver for CsvOutput {
    fn on_fix_accepted(&mut self, fix: &LocationFix) {
        let row = Self::format_row(fix);
        if let Err(e) = writeln!(self.writer, "{}", row).and_then(|_| self.writer.flush()) {
            error!("Failed to write CSV: {}", e);
        }
    }
}
