// Coordinator - the fix pipeline instance shared by the sensor and display sides
//
// Owns history, drain estimate and statistics behind a single RwLock so
// every mutation goes through one writer at a time. Validation is pure and
// runs under the same write lock as the mutation it gates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::config::RelayConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::drain::{BatteryDrainEstimator, DrainEstimate};
use crate::error::DecodeError;
use crate::fix::LocationFix;
use crate::history::FixHistoryStore;
use crate::net::messages::StatusSummary;
use crate::net::producer::ProducerHandle;
use crate::output::FixObserver;
use crate::policy::TrackingModePolicy;
use crate::validator::{self, Decision, RejectReason};

/// State change notifications for display-side subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    LatestChanged(LocationFix),
    TrailChanged { len: usize },
    DrainChanged(DrainEstimate),
    PeerStatus(StatusSummary),
    PolicyChanged(String),
    Escalation { consecutive_failures: u32 },
    Reset,
}

/// Aggregate acceptance counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub accuracy_rejected: u64,
    pub jump_rejected: u64,
    pub decode_failures: u64,
    pub escalations: u64,
}

impl PipelineStats {
    /// Rejected / considered, ignoring duplicates (they are expected)
    pub fn rejection_rate(&self) -> f64 {
        let rejected = self.malformed + self.accuracy_rejected + self.jump_rejected;
        let considered = self.accepted + rejected;
        if considered == 0 {
            0.0
        } else {
            rejected as f64 / considered as f64
        }
    }

    fn count(&mut self, decision: Decision) {
        match decision {
            Decision::Accept => self.accepted += 1,
            Decision::Reject(RejectReason::DuplicateSequence) => self.duplicates += 1,
            Decision::Reject(RejectReason::Malformed) => self.malformed += 1,
            Decision::Reject(RejectReason::AccuracyTooLow) => self.accuracy_rejected += 1,
            Decision::Reject(RejectReason::ImplausibleJump) => self.jump_rejected += 1,
        }
    }
}

/// Freshness of the latest fix for a "stale connection" indicator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionHealth {
    NoFix,
    Fresh { age_seconds: f64 },
    Stale { age_seconds: f64 },
}

struct TrackingState {
    history: FixHistoryStore,
    drain: BatteryDrainEstimator,
    stats: PipelineStats,
    peer_status: Option<StatusSummary>,
}

/// One fix pipeline instance
///
/// Constructed explicitly and shared via `Arc`; there is no global state.
pub struct Coordinator {
    state: RwLock<TrackingState>,
    policy: RwLock<TrackingModePolicy>,
    observers: RwLock<Vec<Box<dyn FixObserver>>>,
    producer: RwLock<Option<ProducerHandle>>,
    events: broadcast::Sender<TrackingEvent>,
}

impl Coordinator {
    pub fn new(config: &RelayConfig, policy: TrackingModePolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Coordinator {
            state: RwLock::new(TrackingState {
                history: FixHistoryStore::new(config.trail_capacity, config.sequence_window),
                drain: BatteryDrainEstimator::default(),
                stats: PipelineStats::default(),
                peer_status: None,
            }),
            policy: RwLock::new(policy),
            observers: RwLock::new(Vec::new()),
            producer: RwLock::new(None),
            events,
        }
    }

    /// Register an observer; called in registration order
    pub async fn add_observer(&self, observer: Box<dyn FixObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    /// Hand accepted fixes from `submit` to a producer relay
    pub async fn attach_producer(&self, producer: ProducerHandle) {
        *self.producer.write().await = Some(producer);
    }

    /// Stop forwarding to the producer, returning its handle for shutdown
    pub async fn detach_producer(&self) -> Option<ProducerHandle> {
        self.producer.write().await.take()
    }

    /// Sensor side: screen a locally captured candidate and, if accepted,
    /// queue it for delivery
    pub async fn submit(&self, candidate: LocationFix) -> Decision {
        let candidate = match candidate.tracking_preset {
            Some(_) => candidate,
            None => {
                let preset = self.policy.read().await.name().to_string();
                candidate.with_preset(preset)
            }
        };
        let decision = self.apply(candidate.clone()).await;
        if decision.is_accept() {
            let producer = self.producer.read().await.clone();
            if let Some(producer) = producer {
                if let Err(e) = producer.enqueue(candidate).await {
                    warn!("Accepted fix not queued for delivery: {}", e);
                }
            }
        }
        decision
    }

    /// Cheap duplicate check run before full validation on receipt
    pub async fn is_duplicate(&self, fix: &LocationFix) -> bool {
        validator::is_duplicate(fix, &self.state.read().await.history)
    }

    /// Count a copy dropped by the `is_duplicate` check
    pub async fn note_duplicate(&self) {
        self.state.write().await.stats.duplicates += 1;
    }

    /// Display side: validate and record a fix that arrived over the relay
    pub async fn ingest_fix(&self, fix: LocationFix) -> Decision {
        self.apply(fix).await
    }

    async fn apply(&self, fix: LocationFix) -> Decision {
        let policy = self.policy.read().await.clone();
        let mut events = Vec::new();

        let decision = {
            let mut state = self.state.write().await;
            let decision = validator::should_accept(&fix, &policy, &state.history);
            state.stats.count(decision);

            match decision {
                Decision::Reject(RejectReason::DuplicateSequence) => {
                    trace!(sequence = fix.sequence, "Duplicate fix ignored");
                }
                Decision::Reject(reason) => {
                    debug!(
                        sequence = fix.sequence,
                        accuracy = fix.horizontal_accuracy_meters,
                        policy = policy.name(),
                        "Fix rejected: {}",
                        reason
                    );
                }
                Decision::Accept => {
                    state.history.record_sequence(fix.source, fix.sequence);
                    if state.history.insert(fix.clone()) {
                        events.push(TrackingEvent::TrailChanged { len: state.history.trail().len() });
                    }
                    if state.history.update_latest_if_newer(&fix) {
                        events.push(TrackingEvent::LatestChanged(fix.clone()));
                        // Out-of-order fixes would run the drain clock backwards
                        if state.drain.record(fix.battery(), fix.timestamp) {
                            events.push(TrackingEvent::DrainChanged(state.drain.estimate()));
                        }
                    }
                }
            }
            decision
        };

        if decision.is_accept() {
            for observer in self.observers.write().await.iter_mut() {
                observer.on_fix_accepted(&fix);
            }
        }
        self.emit(events);
        decision
    }

    /// Count a payload (or batch entry) that failed to decode and tell observers
    pub async fn note_decode_failure(&self, err: &DecodeError, consecutive: u32) {
        self.state.write().await.stats.decode_failures += 1;
        for observer in self.observers.write().await.iter_mut() {
            observer.on_decode_failure(err, consecutive);
        }
    }

    /// Surface a run of decode failures to observers and subscribers
    pub async fn escalate(&self, consecutive: u32) {
        self.state.write().await.stats.escalations += 1;
        error!(consecutive, "Decode failure threshold reached");
        for observer in self.observers.write().await.iter_mut() {
            observer.on_escalation(consecutive);
        }
        self.emit(vec![TrackingEvent::Escalation { consecutive_failures: consecutive }]);
    }

    /// Store the producer's latest status; never touches the trail
    pub async fn update_peer_status(&self, status: StatusSummary) {
        let changed = {
            let mut state = self.state.write().await;
            let changed = state.peer_status.as_ref() != Some(&status);
            state.peer_status = Some(status.clone());
            changed
        };
        if changed {
            self.emit(vec![TrackingEvent::PeerStatus(status)]);
        }
    }

    /// Explicit "new session": clears trail, sequence window, latest fix and drain
    pub async fn reset(&self) {
        {
            let mut state = self.state.write().await;
            state.history.reset();
            state.drain.reset();
        }
        info!("Tracking history reset");
        self.emit(vec![TrackingEvent::Reset]);
    }

    /// Swap thresholds for future decisions; history is left untouched
    pub async fn set_active_policy(&self, policy: TrackingModePolicy) {
        let name = policy.name().to_string();
        *self.policy.write().await = policy;
        info!(policy = %name, "Active tracking policy changed");
        self.emit(vec![TrackingEvent::PolicyChanged(name)]);
    }

    /// Re-seed an empty history from persisted fixes
    ///
    /// Fixes bypass validation (they were accepted when first seen). Returns
    /// the number retained, or 0 if history was not empty.
    pub async fn restore_trail(&self, fixes: Vec<LocationFix>) -> usize {
        let len = {
            let mut state = self.state.write().await;
            if state.history.latest().is_some() || !state.history.trail().is_empty() {
                warn!("Refusing to restore trail over existing history");
                return 0;
            }
            if fixes.len() > state.history.capacity() {
                warn!(
                    fixes = fixes.len(),
                    capacity = state.history.capacity(),
                    "Restored trail exceeds capacity, keeping the newest fixes"
                );
            }
            for fix in fixes {
                state.history.record_sequence(fix.source, fix.sequence);
                state.history.update_latest_if_newer(&fix);
                state.history.insert(fix);
            }
            state.history.trail().len()
        };
        self.emit(vec![TrackingEvent::TrailChanged { len }]);
        len
    }

    pub async fn latest_fix(&self) -> Option<LocationFix> {
        self.state.read().await.history.latest().cloned()
    }

    /// Trail snapshot, oldest first
    pub async fn trail(&self) -> Vec<LocationFix> {
        self.state.read().await.history.trail_snapshot()
    }

    pub async fn drain_estimate(&self) -> DrainEstimate {
        self.state.read().await.drain.estimate()
    }

    pub async fn stats(&self) -> PipelineStats {
        self.state.read().await.stats
    }

    pub async fn peer_status(&self) -> Option<StatusSummary> {
        self.state.read().await.peer_status.clone()
    }

    pub async fn active_policy(&self) -> TrackingModePolicy {
        self.policy.read().await.clone()
    }

    /// Whether the latest fix is older than the policy's staleness limit times `margin`
    pub async fn connection_health(&self, now: DateTime<Utc>, margin: f64) -> ConnectionHealth {
        let policy = self.policy.read().await.clone();
        let state = self.state.read().await;
        match state.history.latest() {
            None => ConnectionHealth::NoFix,
            Some(latest) => {
                let s = validator::staleness(latest, &policy, now, margin);
                if s.stale {
                    ConnectionHealth::Stale { age_seconds: s.age_seconds }
                } else {
                    ConnectionHealth::Fresh { age_seconds: s.age_seconds }
                }
            }
        }
    }

    fn emit(&self, events: Vec<TrackingEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}
