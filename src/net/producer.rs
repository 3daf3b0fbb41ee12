// Producer relay
// Sensor-side delivery task: best-effort sends, durable batching with retry, status pushes

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, SendError};
use crate::fix::LocationFix;
use crate::net::messages::{encode, LatestOnlyFrame, Payload, StatusSummary};
use crate::net::transport::Transport;

/// Random value in [0.9*d, 1.1*d] so retrying producers don't align
fn fuzzy(d: Duration) -> Duration {
    d.mul_f64(rand::thread_rng().gen_range(0.9..=1.1))
}

#[derive(Debug, Default)]
struct ProducerCounters {
    best_effort_sent: AtomicU64,
    best_effort_failed: AtomicU64,
    batches_sent: AtomicU64,
    batch_retries: AtomicU64,
    batches_dropped: AtomicU64,
    fixes_dropped: AtomicU64,
    status_pushes: AtomicU64,
}

/// Snapshot of producer delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub best_effort_sent: u64,
    pub best_effort_failed: u64,
    pub batches_sent: u64,
    pub batch_retries: u64,
    pub batches_dropped: u64,
    pub fixes_dropped: u64,
    pub status_pushes: u64,
}

#[derive(Debug)]
enum ProducerCommand {
    Fix(LocationFix),
    Flush,
    Shutdown(oneshot::Sender<Vec<LocationFix>>),
}

/// Cloneable handle to a running producer task
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    tx: mpsc::Sender<ProducerCommand>,
    counters: Arc<ProducerCounters>,
}

impl ProducerHandle {
    /// Queue an accepted fix for delivery. Waits only if the command queue is full.
    pub async fn enqueue(&self, fix: LocationFix) -> Result<(), RelayError> {
        self.tx.send(ProducerCommand::Fix(fix)).await.map_err(|_| RelayError::Stopped)
    }

    /// Seal the current batch and try the durable queue now
    pub async fn flush(&self) -> Result<(), RelayError> {
        self.tx.send(ProducerCommand::Flush).await.map_err(|_| RelayError::Stopped)
    }

    /// Stop timers, let in-flight sends finish, make a final durable attempt
    ///
    /// Returns the fixes the durable tier did not accept; they are handed
    /// back rather than discarded.
    pub async fn shutdown(self) -> Result<Vec<LocationFix>, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ProducerCommand::Shutdown(reply_tx))
            .await
            .map_err(|_| RelayError::Stopped)?;
        reply_rx.await.map_err(|_| RelayError::Stopped)
    }

    pub fn stats(&self) -> ProducerStats {
        let c = &self.counters;
        ProducerStats {
            best_effort_sent: c.best_effort_sent.load(Ordering::Relaxed),
            best_effort_failed: c.best_effort_failed.load(Ordering::Relaxed),
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            batch_retries: c.batch_retries.load(Ordering::Relaxed),
            batches_dropped: c.batches_dropped.load(Ordering::Relaxed),
            fixes_dropped: c.fixes_dropped.load(Ordering::Relaxed),
            status_pushes: c.status_pushes.load(Ordering::Relaxed),
        }
    }
}

struct PendingBatch {
    fixes: Vec<LocationFix>,
    attempts: u32,
    not_before: Instant,
}

/// Sensor-side relay state; lives inside its own task
///
/// Every accepted fix goes to the durable batch. When the peer looks
/// reachable it is also sent best-effort; the receiver drops whichever copy
/// arrives second. Status summaries go over the latest-only tier and never
/// carry fixes.
///
/// Sends run as tasks so a slow transport never holds up the loop. At most
/// one durable send is in flight, always for the head of the outbox.
pub struct ProducerRelay<T: Transport> {
    transport: Arc<T>,
    config: RelayConfig,
    counters: Arc<ProducerCounters>,
    batch: Vec<LocationFix>,
    batch_started: Option<Instant>,
    outbox: VecDeque<PendingBatch>,
    best_effort: JoinSet<BestEffortResult>,
    durable: JoinSet<Result<(), SendError>>,
    /// A best-effort send failed; flush the batch at the next tick
    fallback_pending: bool,
    last_fix: Option<LocationFix>,
    last_status: Option<StatusSummary>,
}

type BestEffortResult = (u64, Result<(), SendError>);

/// Retry delays stop doubling after this many attempts
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

impl<T: Transport> ProducerRelay<T> {
    /// Start the relay task and return its handle
    pub fn spawn(transport: Arc<T>, config: RelayConfig) -> ProducerHandle {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let counters = Arc::new(ProducerCounters::default());
        let relay = ProducerRelay {
            transport,
            config,
            counters: Arc::clone(&counters),
            batch: Vec::new(),
            batch_started: None,
            outbox: VecDeque::new(),
            best_effort: JoinSet::new(),
            durable: JoinSet::new(),
            fallback_pending: false,
            last_fix: None,
            last_status: None,
        };
        tokio::spawn(relay.run(rx));
        ProducerHandle { tx, counters }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ProducerCommand>) {
        // interval() panics on a zero period
        let period = self.config.status_interval.max(Duration::from_millis(1));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            batch_max_fixes = self.config.batch_max_fixes,
            batch_max_age_secs = self.config.batch_max_age.as_secs_f64(),
            "Producer relay started"
        );

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(ProducerCommand::Fix(fix)) => self.handle_fix(fix),
                    Some(ProducerCommand::Flush) => {
                        self.seal_batch();
                        self.pump_durable();
                    }
                    Some(ProducerCommand::Shutdown(reply)) => {
                        let unsent = self.finish().await;
                        let _ = reply.send(unsent);
                        return;
                    }
                    None => {
                        let unsent = self.finish().await;
                        if !unsent.is_empty() {
                            warn!(fixes = unsent.len(), "Producer handles dropped with undelivered fixes");
                        }
                        return;
                    }
                },
                Some(joined) = self.best_effort.join_next(), if !self.best_effort.is_empty() => {
                    if let Ok(result) = joined {
                        self.on_best_effort_done(result);
                    }
                }
                Some(joined) = self.durable.join_next(), if !self.durable.is_empty() => {
                    self.on_durable_done(flatten(joined));
                    self.pump_durable();
                }
                _ = ticker.tick() => self.on_tick(),
            }
        }
    }

    fn handle_fix(&mut self, fix: LocationFix) {
        let fix = fix.wire_safe();

        if self.transport.is_reachable() {
            match encode(&Payload::Fix { fix: fix.clone() }) {
                Ok(bytes) => {
                    let transport = Arc::clone(&self.transport);
                    let timeout = self.config.send_timeout;
                    let sequence = fix.sequence;
                    self.best_effort.spawn(async move {
                        let result = match time::timeout(timeout, transport.send_best_effort(bytes)).await {
                            Ok(r) => r,
                            Err(_) => Err(SendError::Timeout),
                        };
                        (sequence, result)
                    });
                }
                Err(e) => error!(sequence = fix.sequence, "Failed to encode fix: {}", e),
            }
        }

        if self.batch.is_empty() {
            self.batch_started = Some(Instant::now());
        }
        self.last_fix = Some(fix.clone());
        self.batch.push(fix);

        if self.batch.len() >= self.config.batch_max_fixes.max(1) {
            self.seal_batch();
            self.pump_durable();
        }
    }

    fn on_best_effort_done(&mut self, (sequence, result): BestEffortResult) {
        match result {
            Ok(()) => {
                self.counters.best_effort_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.best_effort_failed.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, "Best-effort send failed, falling back to durable tier: {}", e);
                self.fallback_pending = true;
            }
        }
    }

    fn on_tick(&mut self) {
        let aged = self
            .batch_started
            .map_or(false, |started| started.elapsed() >= self.config.batch_max_age);
        if !self.batch.is_empty() && (aged || self.fallback_pending) {
            self.seal_batch();
        }
        self.fallback_pending = false;

        self.pump_durable();
        self.push_status();
    }

    fn seal_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let fixes = std::mem::take(&mut self.batch);
        self.batch_started = None;
        self.outbox.push_back(PendingBatch { fixes, attempts: 0, not_before: Instant::now() });
    }

    /// Start sending the head batch if nothing is in flight and its backoff has passed
    fn pump_durable(&mut self) {
        while self.durable.is_empty() {
            let Some(front) = self.outbox.front() else { return };
            if front.not_before > Instant::now() {
                return;
            }
            match encode(&Payload::Batch { fixes: front.fixes.clone() }) {
                Ok(bytes) => {
                    let transport = Arc::clone(&self.transport);
                    let timeout = self.config.send_timeout;
                    self.durable.spawn(async move {
                        match time::timeout(timeout, transport.enqueue_durable(bytes)).await {
                            Ok(r) => r,
                            Err(_) => Err(SendError::Timeout),
                        }
                    });
                }
                Err(e) => self.drop_front(&format!("encode: {}", e)),
            }
        }
    }

    /// Outcome of the head batch's send
    ///
    /// Retryable failures keep the batch at the head with a growing delay;
    /// only a permanent failure discards it.
    fn on_durable_done(&mut self, result: Result<(), SendError>) {
        match result {
            Ok(()) => {
                if let Some(batch) = self.outbox.pop_front() {
                    self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(fixes = batch.fixes.len(), "Durable batch queued");
                }
            }
            Err(e) if e.is_retryable() => {
                let backoff = self.config.retry_backoff;
                let Some(front) = self.outbox.front_mut() else { return };
                front.attempts = front.attempts.saturating_add(1);
                let exp = 2u32.pow(front.attempts.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS));
                let delay = fuzzy(backoff * exp);
                front.not_before = Instant::now() + delay;
                self.counters.batch_retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    attempt = front.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "Durable send failed: {}",
                    e
                );
            }
            Err(e) => self.drop_front(&e.to_string()),
        }
    }

    fn drop_front(&mut self, reason: &str) {
        if let Some(batch) = self.outbox.pop_front() {
            self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
            self.counters.fixes_dropped.fetch_add(batch.fixes.len() as u64, Ordering::Relaxed);
            error!(fixes = batch.fixes.len(), "Dropping durable batch: {}", reason);
        }
    }

    fn push_status(&mut self) {
        let queued = self.batch.len() + self.outbox.iter().map(|b| b.fixes.len()).sum::<usize>();
        let status = StatusSummary {
            captured_at: Utc::now(),
            battery_fraction: self.last_fix.as_ref().map(|f| f.battery()),
            reachable: self.transport.is_reachable(),
            last_sequence: self.last_fix.as_ref().map(|f| f.sequence),
            queued_fixes: queued,
            tracking_preset: self.last_fix.as_ref().and_then(|f| f.tracking_preset.clone()),
        };

        if self.last_status.as_ref().map_or(false, |s| s.same_state(&status)) {
            return;
        }

        let frame = match LatestOnlyFrame::from_status(&status) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode status: {}", e);
                return;
            }
        };
        match self.transport.push_latest_only(frame) {
            Ok(()) => {
                self.counters.status_pushes.fetch_add(1, Ordering::Relaxed);
                self.last_status = Some(status);
            }
            Err(e) => debug!("Status push failed: {}", e),
        }
    }

    async fn send_durable(&self, fixes: &[LocationFix]) -> Result<(), SendError> {
        let bytes = encode(&Payload::Batch { fixes: fixes.to_vec() })
            .map_err(|e| SendError::Permanent(format!("encode: {}", e)))?;
        match time::timeout(self.config.send_timeout, self.transport.enqueue_durable(bytes)).await {
            Ok(r) => r,
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Final pass on shutdown; returns fixes the durable tier did not take
    async fn finish(&mut self) -> Vec<LocationFix> {
        // Each task carries its own timeout
        while let Some(joined) = self.best_effort.join_next().await {
            if let Ok(result) = joined {
                self.on_best_effort_done(result);
            }
        }

        let mut unsent = Vec::new();
        // An in-flight head send counts as that batch's last attempt
        if let Some(joined) = self.durable.join_next().await {
            match flatten(joined) {
                Ok(()) => self.on_durable_done(Ok(())),
                Err(e) if e.is_retryable() => {
                    if let Some(batch) = self.outbox.pop_front() {
                        warn!(fixes = batch.fixes.len(), "Durable batch not delivered before shutdown: {}", e);
                        unsent.extend(batch.fixes);
                    }
                }
                Err(e) => self.drop_front(&e.to_string()),
            }
        }

        self.seal_batch();
        while let Some(batch) = self.outbox.pop_front() {
            match self.send_durable(&batch.fixes).await {
                Ok(()) => {
                    self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_retryable() => {
                    warn!(fixes = batch.fixes.len(), "Durable batch not delivered before shutdown: {}", e);
                    unsent.extend(batch.fixes);
                }
                Err(e) => {
                    self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
                    self.counters.fixes_dropped.fetch_add(batch.fixes.len() as u64, Ordering::Relaxed);
                    error!(fixes = batch.fixes.len(), "Dropping durable batch: {}", e);
                }
            }
        }

        info!(unsent = unsent.len(), "Producer relay stopped");
        unsent
    }
}

/// A panicked or cancelled send task is treated as a retryable failure
fn flatten(joined: Result<Result<(), SendError>, JoinError>) -> Result<(), SendError> {
    joined.unwrap_or_else(|e| Err(SendError::Transient(format!("send task failed: {}", e))))
}
