// Wire payloads
// Tagged JSON carried over the three delivery tiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::fix::LocationFix;

/// Delivery tier a payload travelled over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier A: low latency, only when reachable, may silently fail
    BestEffort,
    /// Tier B: mailbox of one, each push overwrites the last
    LatestOnly,
    /// Tier C: FIFO, at-least-once, retried
    Durable,
}

/// Lightweight producer state pushed over the latest-only tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub captured_at: DateTime<Utc>,
    pub battery_fraction: Option<f64>,
    pub reachable: bool,
    pub last_sequence: Option<u64>,
    /// Fixes waiting for durable delivery
    pub queued_fixes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_preset: Option<String>,
}

impl StatusSummary {
    /// Same state apart from capture time; battery compared at 1% resolution
    pub fn same_state(&self, other: &StatusSummary) -> bool {
        let pct = |b: Option<f64>| b.map(|v| (v.clamp(0.0, 1.0) * 100.0).round() as i64);
        pct(self.battery_fraction) == pct(other.battery_fraction)
            && self.reachable == other.reachable
            && self.last_sequence == other.last_sequence
            && self.queued_fixes == other.queued_fixes
            && self.tracking_preset == other.tracking_preset
    }
}

/// Everything that can arrive from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// One fix, sent over the best-effort tier
    Fix { fix: LocationFix },
    /// Several fixes, sent over the durable tier
    Batch { fixes: Vec<LocationFix> },
    /// Producer status, sent over the latest-only tier
    Status { status: StatusSummary },
}

impl Payload {
    pub fn fix_count(&self) -> usize {
        match self {
            Payload::Fix { .. } => 1,
            Payload::Batch { fixes } => fixes.len(),
            Payload::Status { .. } => 0,
        }
    }

    pub fn into_fixes(self) -> Vec<LocationFix> {
        match self {
            Payload::Fix { fix } => vec![fix],
            Payload::Batch { fixes } => fixes,
            Payload::Status { .. } => Vec::new(),
        }
    }
}

/// Encoded payload for the latest-only tier
///
/// Only constructible from a `StatusSummary`: the mailbox overwrites on
/// every push, so trail data sent this way would be lost between reads.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestOnlyFrame {
    bytes: Vec<u8>,
}

impl LatestOnlyFrame {
    pub fn from_status(status: &StatusSummary) -> Result<Self, serde_json::Error> {
        let payload = Payload::Status { status: status.clone() };
        Ok(LatestOnlyFrame { bytes: encode(&payload)? })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn encode(payload: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

/// A parsed payload plus the batch entries that failed shape checks
#[derive(Debug)]
pub struct Decoded {
    pub payload: Payload,
    /// Dropped from a batch; the rest of the batch is still delivered
    pub invalid: Vec<DecodeError>,
}

fn invalid_fix(fix: &LocationFix, reason: String) -> DecodeError {
    DecodeError::InvalidFix { sequence: fix.sequence, reason }
}

/// Parse a payload and run shape checks on every fix it carries
///
/// A bad single fix fails the payload. A bad entry in a batch only costs
/// that entry.
pub fn decode(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DecodeError::Empty);
    }
    let mut invalid = Vec::new();
    let payload = match serde_json::from_slice::<Payload>(bytes)? {
        Payload::Fix { fix } => {
            fix.check().map_err(|reason| invalid_fix(&fix, reason))?;
            Payload::Fix { fix }
        }
        Payload::Batch { fixes } => {
            let fixes = fixes
                .into_iter()
                .filter(|fix| match fix.check() {
                    Ok(()) => true,
                    Err(reason) => {
                        invalid.push(invalid_fix(fix, reason));
                        false
                    }
                })
                .collect();
            Payload::Batch { fixes }
        }
        status @ Payload::Status { .. } => status,
    };
    Ok(Decoded { payload, invalid })
}
