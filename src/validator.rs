// Fix validator
// Pure accept/reject decision for a candidate fix

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fix::{seconds_between, LocationFix};
use crate::history::FixHistoryStore;
use crate::policy::TrackingModePolicy;

/// Why a candidate fix was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Already seen via another delivery path; expected, not an error
    DuplicateSequence,
    /// Non-finite or out-of-range coordinates, or negative/NaN accuracy
    Malformed,
    /// Horizontal accuracy worse than the policy allows
    AccuracyTooLow,
    /// Moved further than physically plausible since the latest fix
    ImplausibleJump,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::DuplicateSequence => "duplicate_sequence",
            RejectReason::Malformed => "malformed",
            RejectReason::AccuracyTooLow => "accuracy_too_low",
            RejectReason::ImplausibleJump => "implausible_jump",
        })
    }
}

/// Validator verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Duplicate check on its own, run before the full pipeline on receipt
pub fn is_duplicate(candidate: &LocationFix, history: &FixHistoryStore) -> bool {
    history.has_seen(candidate.source, candidate.sequence)
}

/// Decide whether a fix is trustworthy enough for the trail
///
/// Rules run in order and the first rejection wins:
/// 1. (source, sequence) already seen
/// 2. shape checks from `LocationFix::check`
/// 3. horizontal accuracy above the threshold (equality passes)
/// 4. great-circle jump from the latest fix above the cap, only when the
///    two fixes are within the jump window of each other
///
/// Staleness is not checked here: old fixes still belong in the trail.
/// Whether an accepted fix also becomes `latest` is decided separately by
/// `FixHistoryStore::update_latest_if_newer`.
pub fn should_accept(
    candidate: &LocationFix,
    policy: &TrackingModePolicy,
    history: &FixHistoryStore,
) -> Decision {
    if is_duplicate(candidate, history) {
        return Decision::Reject(RejectReason::DuplicateSequence);
    }

    // Anything failing here would also fail to decode on the receiving side
    if candidate.check().is_err() {
        return Decision::Reject(RejectReason::Malformed);
    }

    if candidate.horizontal_accuracy_meters > policy.max_horizontal_accuracy_meters() {
        return Decision::Reject(RejectReason::AccuracyTooLow);
    }

    if let Some(latest) = history.latest() {
        // Absolute gap: late arrivals are screened the same way as fresh ones
        let gap = candidate.seconds_since(latest).abs();
        if gap <= policy.max_plausible_jump_window_seconds() {
            let moved = candidate.coordinate.distance_to(&latest.coordinate);
            if moved > policy.max_plausible_jump_meters() {
                return Decision::Reject(RejectReason::ImplausibleJump);
            }
        }
    }

    Decision::Accept
}

/// How old a fix is relative to `now`, against the policy's staleness limit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Staleness {
    pub age_seconds: f64,
    pub stale: bool,
}

/// Pure staleness query; `margin` scales the policy limit (1.0 = as configured)
pub fn staleness(
    fix: &LocationFix,
    policy: &TrackingModePolicy,
    now: DateTime<Utc>,
    margin: f64,
) -> Staleness {
    let age_seconds = seconds_between(fix.timestamp, now);
    Staleness {
        age_seconds,
        stale: age_seconds > policy.max_fix_staleness_seconds() * margin.max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::test_support::{fix_at, t};
    use crate::geodesy;

    fn accept_into(store: &mut FixHistoryStore, fix: &LocationFix) {
        store.record_sequence(fix.source, fix.sequence);
        store.insert(fix.clone());
        store.update_latest_if_newer(fix);
    }

    #[test]
    fn test_balanced_good_fixes_all_accepted() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();

        let mut lat = 37.0;
        for i in 0..3u64 {
            let f = fix_at(i, i as f64, lat, -122.0);
            assert_eq!(should_accept(&f, &policy, &store), Decision::Accept);
            accept_into(&mut store, &f);
            lat = geodesy::destination(lat, -122.0, 0.0, 10.0).0;
        }

        assert_eq!(store.trail().len(), 3);
        assert_eq!(store.latest().unwrap().timestamp, t(2.0));
    }

    #[test]
    fn test_duplicate_wins_over_other_rules() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();
        let f = fix_at(9, 0.0, 37.0, -122.0);
        accept_into(&mut store, &f);

        let mut again = f.clone();
        again.horizontal_accuracy_meters = 500.0;
        assert!(is_duplicate(&again, &store));
        assert_eq!(
            should_accept(&again, &policy, &store),
            Decision::Reject(RejectReason::DuplicateSequence)
        );
    }

    #[test]
    fn test_accuracy_gate_is_inclusive() {
        let policy = TrackingModePolicy::balanced();
        let store = FixHistoryStore::default();

        let mut f = fix_at(1, 0.0, 37.0, -122.0);
        f.horizontal_accuracy_meters = 75.0;
        assert_eq!(should_accept(&f, &policy, &store), Decision::Accept);

        f.horizontal_accuracy_meters = 75.01;
        assert_eq!(
            should_accept(&f, &policy, &store),
            Decision::Reject(RejectReason::AccuracyTooLow)
        );
    }

    #[test]
    fn test_reject_then_accept() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();

        let mut noisy = fix_at(1, 0.0, 37.0, -122.0);
        noisy.horizontal_accuracy_meters = 200.0;
        assert_eq!(
            should_accept(&noisy, &policy, &store),
            Decision::Reject(RejectReason::AccuracyTooLow)
        );

        let mut good = fix_at(2, 0.5, 37.0, -122.0);
        good.horizontal_accuracy_meters = 50.0;
        assert_eq!(should_accept(&good, &policy, &store), Decision::Accept);
        accept_into(&mut store, &good);
        assert_eq!(store.latest().map(|f| f.sequence), Some(2));
    }

    #[test]
    fn test_teleport_rejected_then_accepted_after_gap() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();
        accept_into(&mut store, &fix_at(1, 0.0, 37.0, -122.0));

        let jump = fix_at(2, 1.0, 37.1, -122.0);
        assert_eq!(
            should_accept(&jump, &policy, &store),
            Decision::Reject(RejectReason::ImplausibleJump)
        );

        let later = fix_at(3, 600.0, 37.1, -122.0);
        assert_eq!(should_accept(&later, &policy, &store), Decision::Accept);
    }

    #[test]
    fn test_jump_gate_boundaries() {
        let mut store = FixHistoryStore::default();
        accept_into(&mut store, &fix_at(1, 0.0, 37.0, -122.0));

        let window = 120.0;
        let (lat, lon) = geodesy::destination(37.0, -122.0, 45.0, 5_000.0);
        let cand = fix_at(2, window, lat, lon);
        let moved = cand.coordinate.distance_to(&store.latest().unwrap().coordinate);

        // Exactly the cap, exactly at the window edge: accepted
        let exact = TrackingModePolicy::new("edge", 75.0, moved, window, 300.0).unwrap();
        assert_eq!(should_accept(&cand, &exact, &store), Decision::Accept);

        // Cap a hair below the distance, inside the window: rejected
        let tight = TrackingModePolicy::new("edge", 75.0, moved - 1e-6, window, 300.0).unwrap();
        assert_eq!(
            should_accept(&cand, &tight, &store),
            Decision::Reject(RejectReason::ImplausibleJump)
        );

        // Same jump just outside the window: no jump check
        let outside = fix_at(3, window + 0.001, lat, lon);
        assert_eq!(should_accept(&outside, &tight, &store), Decision::Accept);
    }

    #[test]
    fn test_late_fix_screened_against_latest() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();
        accept_into(&mut store, &fix_at(5, 100.0, 37.0, -122.0));

        // Arrives late, 10s older than latest, 11 km away
        let late = fix_at(4, 90.0, 37.1, -122.0);
        assert_eq!(
            should_accept(&late, &policy, &store),
            Decision::Reject(RejectReason::ImplausibleJump)
        );
    }

    #[test]
    fn test_malformed_fixes_rejected() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();
        accept_into(&mut store, &fix_at(1, 0.0, 37.0, -122.0));

        let mut negative = fix_at(2, 1.0, 37.0, -122.0);
        negative.horizontal_accuracy_meters = -1.0;
        let mut nan_accuracy = fix_at(3, 2.0, 37.0, -122.0);
        nan_accuracy.horizontal_accuracy_meters = f64::NAN;
        // A NaN position would slip past the jump gate (NaN > cap is false)
        let nan_position = fix_at(4, 3.0, f64::NAN, -122.0);
        let off_globe = fix_at(5, 4.0, 37.0, 200.0);

        for fix in [negative, nan_accuracy, nan_position, off_globe] {
            assert_eq!(
                should_accept(&fix, &policy, &store),
                Decision::Reject(RejectReason::Malformed),
                "sequence {}",
                fix.sequence
            );
        }
    }

    #[test]
    fn test_staleness_query() {
        let policy = TrackingModePolicy::balanced(); // 300s
        let f = fix_at(1, 0.0, 37.0, -122.0);

        let s = staleness(&f, &policy, t(299.0), 1.0);
        assert!(!s.stale);
        assert_eq!(s.age_seconds, 299.0);

        assert!(staleness(&f, &policy, t(301.0), 1.0).stale);
        assert!(!staleness(&f, &policy, t(301.0), 2.0).stale);
        assert!(staleness(&f, &policy, t(601.0), 2.0).stale);
    }

    #[test]
    fn test_stale_fix_accepted_for_trail_not_latest() {
        let policy = TrackingModePolicy::balanced();
        let mut store = FixHistoryStore::default();
        accept_into(&mut store, &fix_at(10, 1000.0, 37.0, -122.0));

        let old = fix_at(3, 10.0, 37.0, -122.0);
        assert!(staleness(&old, &policy, t(1000.0), 1.0).stale);
        assert_eq!(should_accept(&old, &policy, &store), Decision::Accept);

        store.record_sequence(old.source, old.sequence);
        assert!(store.insert(old.clone()));
        assert!(!store.update_latest_if_newer(&old));
        assert_eq!(store.latest().unwrap().sequence, 10);
        assert_eq!(store.trail().front().unwrap().sequence, 3);
    }
}
