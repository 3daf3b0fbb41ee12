// In-process loopback transport
// Channel-backed stand-in for the device link, with switchable failures

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::SendError;
use crate::net::consumer::ConsumerRelay;
use crate::net::messages::{LatestOnlyFrame, Tier};
use crate::net::transport::Transport;

/// Sending half of a loopback link
///
/// Tier A is a bounded channel that refuses when full or "suspended";
/// Tier B is a `watch` mailbox that keeps only the newest frame;
/// Tier C is a FIFO channel.
pub struct MemoryTransport {
    reachable: AtomicBool,
    suspended: AtomicBool,
    best_effort: mpsc::Sender<Vec<u8>>,
    latest: watch::Sender<Option<Vec<u8>>>,
    durable: mpsc::Sender<Vec<u8>>,
    durable_failures: Mutex<VecDeque<SendError>>,
}

/// Receiving half of a loopback link
pub struct MemoryInbound {
    best_effort: mpsc::Receiver<Vec<u8>>,
    latest: watch::Receiver<Option<Vec<u8>>>,
    durable: mpsc::Receiver<Vec<u8>>,
}

/// Create a connected transport/inbound pair
pub fn memory_link(best_effort_capacity: usize, durable_capacity: usize) -> (MemoryTransport, MemoryInbound) {
    let (be_tx, be_rx) = mpsc::channel(best_effort_capacity.max(1));
    let (latest_tx, latest_rx) = watch::channel(None);
    let (durable_tx, durable_rx) = mpsc::channel(durable_capacity.max(1));
    (
        MemoryTransport {
            reachable: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            best_effort: be_tx,
            latest: latest_tx,
            durable: durable_tx,
            durable_failures: Mutex::new(VecDeque::new()),
        },
        MemoryInbound { best_effort: be_rx, latest: latest_rx, durable: durable_rx },
    )
}

impl MemoryTransport {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Report reachable but fail best-effort sends, like a suspended receiver process
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Relaxed);
    }

    /// Make the next durable enqueue fail with `err`; queued failures are used in order
    pub fn fail_next_durable(&self, err: SendError) {
        if let Ok(mut q) = self.durable_failures.lock() {
            q.push_back(err);
        }
    }
}

impl Transport for MemoryTransport {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    async fn send_best_effort(&self, payload: Vec<u8>) -> Result<(), SendError> {
        if !self.is_reachable() {
            return Err(SendError::Unreachable);
        }
        if self.suspended.load(Ordering::Relaxed) {
            return Err(SendError::Transient("receiver suspended".to_string()));
        }
        self.best_effort.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Transient("best-effort queue full".to_string()),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn push_latest_only(&self, frame: LatestOnlyFrame) -> Result<(), SendError> {
        self.latest.send_replace(Some(frame.into_bytes()));
        Ok(())
    }

    async fn enqueue_durable(&self, payload: Vec<u8>) -> Result<(), SendError> {
        let scripted = self.durable_failures.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }
        self.durable.send(payload).await.map_err(|_| SendError::Closed)
    }
}

impl MemoryInbound {
    /// Deliver everything that arrives to `consumer` until all senders are gone
    ///
    /// Returns the consumer so callers can inspect it afterwards.
    pub fn spawn_pump(self, mut consumer: ConsumerRelay) -> JoinHandle<ConsumerRelay> {
        let MemoryInbound { mut best_effort, mut latest, mut durable } = self;
        tokio::spawn(async move {
            let (mut be_open, mut latest_open, mut durable_open) = (true, true, true);
            while be_open || latest_open || durable_open {
                tokio::select! {
                    msg = best_effort.recv(), if be_open => match msg {
                        Some(bytes) => { consumer.ingest(Tier::BestEffort, &bytes).await; }
                        None => be_open = false,
                    },
                    msg = durable.recv(), if durable_open => match msg {
                        Some(bytes) => { consumer.ingest(Tier::Durable, &bytes).await; }
                        None => durable_open = false,
                    },
                    changed = latest.changed(), if latest_open => match changed {
                        Ok(()) => {
                            let frame = latest.borrow_and_update().clone();
                            if let Some(bytes) = frame {
                                consumer.ingest(Tier::LatestOnly, &bytes).await;
                            }
                        }
                        Err(_) => latest_open = false,
                    },
                }
            }
            debug!("Loopback link closed");
            consumer
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::RelayConfig;
    use crate::coordinator::Coordinator;
    use crate::fix::test_support::fix_at;
    use crate::net::messages::{encode, Payload};
    use crate::net::producer::ProducerRelay;
    use crate::policy::TrackingModePolicy;

    fn pair() -> (Arc<Coordinator>, Arc<Coordinator>) {
        let cfg = RelayConfig::default();
        (
            Arc::new(Coordinator::new(&cfg, TrackingModePolicy::balanced())),
            Arc::new(Coordinator::new(&cfg, TrackingModePolicy::balanced())),
        )
    }

    fn walk(n: u64) -> Vec<crate::fix::LocationFix> {
        (1..=n).map(|i| fix_at(i, i as f64 * 10.0, 37.0 + i as f64 * 1e-4, -122.0)).collect()
    }

    #[tokio::test]
    async fn test_best_effort_refuses_when_full_or_unreachable() {
        let (transport, _inbound) = memory_link(1, 1);
        assert!(transport.send_best_effort(b"a".to_vec()).await.is_ok());
        assert!(matches!(
            transport.send_best_effort(b"b".to_vec()).await,
            Err(SendError::Transient(_))
        ));

        transport.set_reachable(false);
        assert!(matches!(
            transport.send_best_effort(b"c".to_vec()).await,
            Err(SendError::Unreachable)
        ));
    }

    #[tokio::test]
    async fn test_scripted_durable_failure_is_used_once() {
        let (transport, mut inbound) = memory_link(1, 4);
        transport.fail_next_durable(SendError::Timeout);

        assert!(matches!(transport.enqueue_durable(b"x".to_vec()).await, Err(SendError::Timeout)));
        assert!(transport.enqueue_durable(b"y".to_vec()).await.is_ok());
        assert_eq!(inbound.durable.recv().await.unwrap(), b"y".to_vec());
    }

    #[tokio::test]
    async fn test_fix_arriving_on_two_tiers_is_kept_once() {
        let (sensor, display) = pair();
        let (transport, inbound) = memory_link(16, 16);
        let pump = inbound.spawn_pump(ConsumerRelay::new(Arc::clone(&display), 5));

        let cfg = RelayConfig { batch_max_fixes: 2, ..RelayConfig::default() };
        sensor.attach_producer(ProducerRelay::spawn(Arc::new(transport), cfg)).await;

        for fix in walk(5) {
            assert!(sensor.submit(fix).await.is_accept());
        }
        let producer = sensor.detach_producer().await.unwrap();
        assert!(producer.shutdown().await.unwrap().is_empty());
        pump.await.unwrap();

        let sequences: Vec<u64> = display.trail().await.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert_eq!(display.latest_fix().await.unwrap().sequence, 5);
        let stats = display.stats().await;
        assert_eq!(stats.accepted, 5);
        assert_eq!(stats.duplicates, 5);
        assert_eq!(
            display.latest_fix().await.unwrap().tracking_preset.as_deref(),
            Some("balanced")
        );
    }

    #[tokio::test]
    async fn test_malformed_fixes_stay_on_sensor_side() {
        let (sensor, display) = pair();
        let (transport, inbound) = memory_link(16, 16);
        transport.set_reachable(false);
        let pump = inbound.spawn_pump(ConsumerRelay::new(Arc::clone(&display), 5));
        sensor.attach_producer(ProducerRelay::spawn(Arc::new(transport), RelayConfig::default())).await;

        let mut fixes = walk(5);
        fixes[2].horizontal_accuracy_meters = -1.0;
        fixes[3].horizontal_accuracy_meters = f64::NAN;
        let mut decisions = Vec::new();
        for fix in fixes {
            decisions.push(sensor.submit(fix).await.is_accept());
        }
        assert_eq!(decisions, vec![true, true, false, false, true]);

        let producer = sensor.detach_producer().await.unwrap();
        assert!(producer.shutdown().await.unwrap().is_empty());
        pump.await.unwrap();

        let sequences: Vec<u64> = display.trail().await.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 5]);
        assert_eq!(sensor.stats().await.malformed, 2);
        assert_eq!(display.stats().await.decode_failures, 0);
    }

    #[tokio::test]
    async fn test_suspended_receiver_gets_fixes_through_durable_tier() {
        let (sensor, display) = pair();
        let (transport, inbound) = memory_link(16, 16);
        transport.set_suspended(true);
        let pump = inbound.spawn_pump(ConsumerRelay::new(Arc::clone(&display), 5));

        let cfg = RelayConfig {
            status_interval: Duration::from_millis(20),
            batch_max_age: Duration::from_secs(3600),
            ..RelayConfig::default()
        };
        let producer = ProducerRelay::spawn(Arc::new(transport), cfg);
        sensor.attach_producer(producer.clone()).await;

        for fix in walk(3) {
            sensor.submit(fix).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Delivered well before the batch would have aged out
        assert_eq!(display.trail().await.len(), 3);
        assert_eq!(producer.stats().best_effort_failed, 3);

        drop(sensor.detach_producer().await);
        producer.shutdown().await.unwrap();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_only_channel_keeps_one_fix_at_most() {
        let (_sensor, display) = pair();
        let (transport, inbound) = memory_link(16, 16);

        // Bypass the status-only frame type to show what the mailbox would do to fixes
        for fix in walk(10) {
            let bytes = encode(&Payload::Fix { fix }).unwrap();
            transport.latest.send_replace(Some(bytes));
        }
        drop(transport);

        let consumer = inbound.spawn_pump(ConsumerRelay::new(Arc::clone(&display), 5)).await.unwrap();
        assert_eq!(consumer.consecutive_failures(), 0);

        let trail = display.trail().await;
        assert!(trail.len() <= 1);
        if let Some(fix) = trail.first() {
            assert_eq!(fix.sequence, 10);
        }
    }
}
