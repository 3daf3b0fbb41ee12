// Trail comparison
// Horizontal error between a reference trail and a trail under test

use std::io::{self, Write};

use chrono::{DateTime, Utc};

use crate::fix::{seconds_between, Coordinate, LocationFix};

/// A position with an optional time, from a fix log or a GPX track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub coordinate: Coordinate,
}

impl From<&LocationFix> for TrackPoint {
    fn from(fix: &LocationFix) -> Self {
        TrackPoint { timestamp: Some(fix.timestamp), coordinate: fix.coordinate }
    }
}

/// One baseline point paired with a test point
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair<'a> {
    pub baseline: &'a TrackPoint,
    pub test: &'a TrackPoint,
    pub distance_m: f64,
}

/// count / median / p90 / max / mean of a set of distances (meters)
#[derive(Debug, Clone, Copy)]
pub struct ErrorSummary {
    pub count: usize,
    pub median: f64,
    pub p90: f64,
    pub max: f64,
    pub mean: f64,
}

fn timed(points: &[TrackPoint]) -> Vec<(&TrackPoint, DateTime<Utc>)> {
    let mut out: Vec<_> = points.iter().filter_map(|p| p.timestamp.map(|ts| (p, ts))).collect();
    out.sort_by_key(|&(_, ts)| ts);
    out
}

/// Pair each baseline point with the test point nearest in time, keeping pairs within `epsilon_seconds`
///
/// Points without a time are skipped on both sides.
pub fn match_by_time<'a>(
    baseline: &'a [TrackPoint],
    test: &'a [TrackPoint],
    epsilon_seconds: f64,
) -> Vec<MatchedPair<'a>> {
    let test_sorted = timed(test);
    if test_sorted.is_empty() {
        return Vec::new();
    }

    let mut pairs = Vec::new();
    for (b, b_ts) in timed(baseline) {
        let idx = test_sorted.partition_point(|&(_, ts)| ts < b_ts);
        let candidates = [idx.checked_sub(1), Some(idx)];
        let winner = candidates
            .iter()
            .flatten()
            .filter_map(|&i| test_sorted.get(i).copied())
            .map(|(p, ts)| (p, seconds_between(b_ts, ts).abs()))
            .min_by(|x, y| x.1.total_cmp(&y.1));

        if let Some((w, dt)) = winner {
            if dt <= epsilon_seconds {
                pairs.push(MatchedPair {
                    baseline: b,
                    test: w,
                    distance_m: b.coordinate.distance_to(&w.coordinate),
                });
            }
        }
    }
    pairs
}

/// Pair each baseline point with the spatially nearest test point
pub fn match_by_nearest<'a>(baseline: &'a [TrackPoint], test: &'a [TrackPoint]) -> Vec<MatchedPair<'a>> {
    baseline
        .iter()
        .filter_map(|b| {
            test.iter()
                .map(|t| (t, b.coordinate.distance_to(&t.coordinate)))
                .min_by(|x, y| x.1.total_cmp(&y.1))
                .map(|(t, d)| MatchedPair { baseline: b, test: t, distance_m: d })
        })
        .collect()
}

/// Nearest-rank percentile over sorted values
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if pct <= 0.0 {
        return sorted[0];
    }
    if pct >= 100.0 {
        return sorted[sorted.len() - 1];
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

pub fn summarize(distances: &[f64]) -> ErrorSummary {
    let n = distances.len();
    if n == 0 {
        return ErrorSummary { count: 0, median: f64::NAN, p90: f64::NAN, max: f64::NAN, mean: f64::NAN };
    }
    let mut vals = distances.to_vec();
    vals.sort_by(|a, b| a.total_cmp(b));
    let mid = n / 2;
    let median = if n % 2 == 1 { vals[mid] } else { 0.5 * (vals[mid - 1] + vals[mid]) };

    ErrorSummary {
        count: n,
        median,
        p90: percentile(&vals, 90.0),
        max: vals[n - 1],
        mean: vals.iter().sum::<f64>() / n as f64,
    }
}

/// Per-pair CSV rows for deeper analysis
pub fn write_csv<W: Write>(mut writer: W, pairs: &[MatchedPair<'_>]) -> io::Result<()> {
    let iso = |ts: Option<DateTime<Utc>>| {
        ts.map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string()).unwrap_or_default()
    };
    writeln!(writer, "baseline_time,baseline_lat,baseline_lon,test_time,test_lat,test_lon,error_m")?;
    for p in pairs {
        writeln!(
            writer,
            "{},{:.7},{:.7},{},{:.7},{:.7},{:.3}",
            iso(p.baseline.timestamp),
            p.baseline.coordinate.latitude,
            p.baseline.coordinate.longitude,
            iso(p.test.timestamp),
            p.test.coordinate.latitude,
            p.test.coordinate.longitude,
            p.distance_m
        )?;
    }
    writer.flush()
}
