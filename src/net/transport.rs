// Transport abstraction
// The three delivery tiers the relay needs from whatever carries bytes between devices

use std::future::Future;

use crate::error::SendError;
use crate::net::messages::LatestOnlyFrame;

/// Byte transport offering three delivery qualities
///
/// Implementations must not block: a send that cannot complete right away
/// is queued and its future resolves when the transport knows the outcome.
/// The relay wraps every send in its own timeout.
pub trait Transport: Send + Sync + 'static {
    /// Whether the peer currently looks reachable. A hint only: a reachable
    /// peer can still fail delivery.
    fn is_reachable(&self) -> bool;

    /// Tier A: direct, low-latency delivery
    fn send_best_effort(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Tier B: replace the peer's mailbox-of-one with this frame
    fn push_latest_only(&self, frame: LatestOnlyFrame) -> Result<(), SendError>;

    /// Tier C: FIFO, at-least-once queue. `Ok` means the transport accepted
    /// responsibility for the payload.
    fn enqueue_durable(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), SendError>> + Send;
}
