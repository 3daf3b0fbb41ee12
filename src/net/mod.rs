// Delivery layer
// Wire payloads, the three-tier transport seam and both relay halves

pub mod messages;
pub mod transport;
pub mod producer;
pub mod consumer;
pub mod memory;

pub use messages::{LatestOnlyFrame, Payload, StatusSummary, Tier};
pub use transport::Transport;
pub use producer::{ProducerHandle, ProducerRelay, ProducerStats};
pub use consumer::{ConsumerRelay, IngestReport};
pub use memory::{memory_link, MemoryInbound, MemoryTransport};
