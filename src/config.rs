use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::constants::*;
use crate::error::PolicyError;
use crate::policy::{Preset, TrackingModePolicy};

/// Pet tracker fix pipeline tools
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Push a recorded fix log through validator, relay and display side
    Replay(ReplayArgs),
    /// Report horizontal error between two fix logs
    Compare(CompareArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReplayArgs {
    /// JSON-lines file of candidate fixes, in capture order
    #[arg(long, value_name = "FILE")]
    pub input: String,

    /// Tracking preset: balanced, emergency or saver
    #[arg(long, default_value = "balanced")]
    pub policy: String,

    /// Override the preset's horizontal accuracy threshold (m)
    #[arg(long, value_name = "METERS")]
    pub max_accuracy: Option<f64>,

    /// Override the preset's plausible jump distance (m)
    #[arg(long, value_name = "METERS")]
    pub max_jump: Option<f64>,

    /// Override the preset's jump window (s)
    #[arg(long, value_name = "SECONDS")]
    pub jump_window: Option<f64>,

    /// Override the preset's staleness limit (s)
    #[arg(long, value_name = "SECONDS")]
    pub max_staleness: Option<f64>,

    /// Fixes per durable batch
    #[arg(long, default_value_t = BATCH_MAX_FIXES)]
    pub batch_size: usize,

    /// Trail capacity on both sides
    #[arg(long, default_value_t = TRAIL_CAPACITY)]
    pub trail_capacity: usize,

    /// Treat the display side as unreachable (durable tier only)
    #[arg(long, default_value_t = false)]
    pub unreachable: bool,

    /// Append display-side accepted fixes to a CSV file
    #[arg(long, value_name = "FILE")]
    pub write_csv: Vec<String>,

    /// Write the final display-side trail as JSON lines
    #[arg(long, value_name = "FILE")]
    pub write_trail: Option<String>,

    /// Write the final display-side trail as GPX
    #[arg(long, value_name = "FILE")]
    pub write_gpx: Option<String>,
}

impl ReplayArgs {
    /// Resolve the preset plus overrides into a validated policy
    pub fn tracking_policy(&self) -> Result<TrackingModePolicy, PolicyError> {
        let preset: Preset = self.policy.parse()?;
        TrackingModePolicy::preset(preset).with_overrides(
            self.max_accuracy,
            self.max_jump,
            self.jump_window,
            self.max_staleness,
        )
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            trail_capacity: self.trail_capacity,
            batch_max_fixes: self.batch_size,
            ..RelayConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatchMode {
    /// Pair fixes whose timestamps are within --epsilon-sec
    Time,
    /// Pair each baseline fix with the spatially nearest test fix
    Nearest,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CompareArgs {
    /// Reference track (.gpx, or a JSON-lines fix log)
    pub baseline: String,

    /// Track under test (.gpx, or a JSON-lines fix log)
    pub test: String,

    /// Maximum timestamp difference for time matching (s)
    #[arg(long, default_value_t = 5.0)]
    pub epsilon_sec: f64,

    #[arg(long = "match", value_enum, default_value_t = MatchMode::Time)]
    pub match_mode: MatchMode,

    /// Write per-pair rows to a CSV file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<String>,
}

/// Tunables for history and delivery
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub trail_capacity: usize,
    pub sequence_window: usize,
    pub batch_max_fixes: usize,
    pub batch_max_age: Duration,
    /// Latest-only push cadence; also drives batch-age and retry checks
    pub status_interval: Duration,
    pub send_timeout: Duration,
    /// Base delay for durable retries; retryable failures never drop a batch
    pub retry_backoff: Duration,
    pub escalation_threshold: u32,
    /// Bound on commands queued for the producer task
    pub command_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            trail_capacity: TRAIL_CAPACITY,
            sequence_window: SEQUENCE_WINDOW,
            batch_max_fixes: BATCH_MAX_FIXES,
            batch_max_age: Duration::from_secs(BATCH_MAX_AGE_SECS),
            status_interval: Duration::from_millis(STATUS_INTERVAL_MS),
            send_timeout: Duration::from_secs(SEND_TIMEOUT_SECS),
            retry_backoff: Duration::from_millis(RETRY_BACKOFF_MS),
            escalation_threshold: DECODE_ESCALATION_THRESHOLD,
            command_capacity: COMMAND_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay() {
        let cfg = Config::parse_from([
            "pawtrack", "replay", "--input", "walk.jsonl", "--policy", "saver",
            "--max-accuracy", "30", "--batch-size", "10", "--write-csv", "a.csv", "-v",
        ]);
        assert!(cfg.verbose);
        match cfg.command {
            Command::Replay(args) => {
                assert_eq!(args.input, "walk.jsonl");
                let policy = args.tracking_policy().unwrap();
                assert_eq!(policy.name(), "saver");
                assert_eq!(policy.max_horizontal_accuracy_meters(), 30.0);
                assert_eq!(args.relay_config().batch_max_fixes, 10);
                assert_eq!(args.write_csv, vec!["a.csv".to_string()]);
            }
            other => panic!("Expected replay, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_rejects_bad_policy() {
        let cfg = Config::parse_from([
            "pawtrack", "replay", "--input", "x", "--max-staleness", "0",
        ]);
        let Command::Replay(args) = cfg.command else { panic!("Expected replay") };
        assert!(args.tracking_policy().is_err());
    }

    #[test]
    fn test_relay_defaults_come_from_constants() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.command_capacity, COMMAND_CAPACITY);
        assert_eq!(cfg.batch_max_fixes, BATCH_MAX_FIXES);
        assert_eq!(cfg.status_interval, Duration::from_millis(STATUS_INTERVAL_MS));
    }

    #[test]
    fn test_parse_compare() {
        let cfg = Config::parse_from([
            "pawtrack", "compare", "base.jsonl", "test.jsonl", "--match", "nearest",
        ]);
        let Command::Compare(args) = cfg.command else { panic!("Expected compare") };
        assert_eq!(args.match_mode, MatchMode::Nearest);
        assert_eq!(args.epsilon_sec, 5.0);
    }
}
