// Shared defaults for the fix pipeline and delivery relay

/// Accepted fixes retained in the trail.
pub const TRAIL_CAPACITY: usize = 100;

/// Distinct (source, sequence) pairs remembered for duplicate rejection.
pub const SEQUENCE_WINDOW: usize = 150;

/// Durable-tier batch is flushed once it holds this many fixes...
pub const BATCH_MAX_FIXES: usize = 60;

/// ...or once its oldest fix has waited this long (seconds).
pub const BATCH_MAX_AGE_SECS: u64 = 60;

/// Latest-only status push cadence (milliseconds). Two pushes per second.
pub const STATUS_INTERVAL_MS: u64 = 500;

/// Upper bound on any single send attempt (seconds).
pub const SEND_TIMEOUT_SECS: u64 = 10;

/// Base delay between durable retries (milliseconds), doubled per attempt up to 64x.
pub const RETRY_BACKOFF_MS: u64 = 1000;

/// Consecutive decode failures before the observer is warned.
pub const DECODE_ESCALATION_THRESHOLD: u32 = 5;

/// Minimum spacing between battery samples used for a drain estimate (seconds).
pub const MIN_DRAIN_INTERVAL_SECS: f64 = 60.0;

/// Weight given to the newest drain observation in the moving average.
pub const DRAIN_EMA_WEIGHT: f64 = 0.3;

/// Mean Earth radius (m) for spherical distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Capacity of the change-event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Commands (fixes, flushes) queued for the producer task before `enqueue` waits.
pub const COMMAND_CAPACITY: usize = 1024;
