// Consumer relay
// Display-side ingestion of payloads arriving over any tier

use std::sync::Arc;

use tracing::{debug, warn};

use crate::coordinator::Coordinator;
use crate::net::messages::{decode, Payload, Tier};
use crate::validator::Decision;

/// What one payload contributed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    /// Already delivered via another tier
    pub duplicates: usize,
    pub rejected: usize,
    /// Batch entries dropped for failing shape checks
    pub invalid: usize,
    pub status_updated: bool,
    pub decode_failed: bool,
}

/// Decodes inbound payloads and feeds their fixes to the coordinator
///
/// Owned by a single receive loop; `&mut self` keeps the failure streak
/// single-writer.
pub struct ConsumerRelay {
    coordinator: Arc<Coordinator>,
    escalation_threshold: u32,
    consecutive_failures: u32,
}

impl ConsumerRelay {
    pub fn new(coordinator: Arc<Coordinator>, escalation_threshold: u32) -> Self {
        ConsumerRelay {
            coordinator,
            escalation_threshold: escalation_threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Handle one payload. Never fails: bad input is counted and dropped.
    pub async fn ingest(&mut self, tier: Tier, bytes: &[u8]) -> IngestReport {
        let mut report = IngestReport::default();

        let payload = match decode(bytes) {
            Ok(decoded) => {
                self.consecutive_failures = 0;
                for err in &decoded.invalid {
                    warn!(?tier, "Dropping batch entry: {}", err);
                    self.coordinator.note_decode_failure(err, 0).await;
                }
                report.invalid = decoded.invalid.len();
                decoded.payload
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(?tier, consecutive = self.consecutive_failures, "Dropping payload: {}", e);
                self.coordinator.note_decode_failure(&e, self.consecutive_failures).await;
                // Once per streak
                if self.consecutive_failures == self.escalation_threshold {
                    self.coordinator.escalate(self.consecutive_failures).await;
                }
                report.decode_failed = true;
                return report;
            }
        };

        let fixes = match payload {
            Payload::Status { status } => {
                self.coordinator.update_peer_status(status).await;
                report.status_updated = true;
                return report;
            }
            other => {
                if tier == Tier::LatestOnly {
                    warn!(fixes = other.fix_count(), "Fix data received on latest-only tier");
                }
                other.into_fixes()
            }
        };

        for fix in fixes {
            if self.coordinator.is_duplicate(&fix).await {
                self.coordinator.note_duplicate().await;
                report.duplicates += 1;
                continue;
            }
            match self.coordinator.ingest_fix(fix).await {
                Decision::Accept => report.accepted += 1,
                // Lost a race with another tier between the check and the write
                Decision::Reject(crate::validator::RejectReason::DuplicateSequence) => {
                    report.duplicates += 1
                }
                Decision::Reject(_) => report.rejected += 1,
            }
        }

        debug!(
            ?tier,
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "Payload ingested"
        );
        report
    }
}
