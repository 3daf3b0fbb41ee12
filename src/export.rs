// Trail export
// JSON-lines persistence of fix sequences, GPX track output and track loading

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use time::OffsetDateTime;

use crate::compare::TrackPoint;
use crate::fix::{Coordinate, LocationFix};

/// Write fixes one JSON object per line, in the given order
pub fn write_json_lines<W: Write>(mut writer: W, fixes: &[LocationFix]) -> io::Result<()> {
    for fix in fixes {
        serde_json::to_writer(&mut writer, &fix.wire_safe())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Read fixes written by `write_json_lines`; blank lines are skipped
pub fn read_json_lines<R: BufRead>(reader: R) -> io::Result<Vec<LocationFix>> {
    let mut fixes = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let fix: LocationFix = serde_json::from_str(trimmed).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("line {}: {}", idx + 1, e))
        })?;
        fixes.push(fix);
    }
    Ok(fixes)
}

pub fn save_trail(path: impl AsRef<Path>, fixes: &[LocationFix]) -> io::Result<()> {
    write_json_lines(BufWriter::new(File::create(path)?), fixes)
}

pub fn load_trail(path: impl AsRef<Path>) -> io::Result<Vec<LocationFix>> {
    read_json_lines(BufReader::new(File::open(path)?))
}

fn invalid_data(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn gpx_time(ts: DateTime<Utc>) -> io::Result<OffsetDateTime> {
    let nanos = i128::from(ts.timestamp()) * 1_000_000_000 + i128::from(ts.timestamp_subsec_nanos());
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(invalid_data)
}

/// Write a GPX 1.1 document with a single track segment
pub fn write_gpx<W: Write>(writer: W, name: &str, fixes: &[LocationFix]) -> io::Result<()> {
    let mut segment = TrackSegment::new();
    for fix in fixes {
        let mut point = Waypoint::new(Point::new(fix.coordinate.longitude, fix.coordinate.latitude));
        point.elevation = fix.altitude_meters.filter(|v| v.is_finite());
        point.time = Some(gpx_time(fix.timestamp)?.into());
        segment.points.push(point);
    }

    let mut track = Track::new();
    track.name = Some(name.to_string());
    track.segments.push(segment);

    let mut doc = Gpx::default();
    doc.version = GpxVersion::Gpx11;
    doc.creator = Some("pawtrack".to_string());
    doc.tracks.push(track);

    gpx::write(&doc, writer).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

pub fn save_gpx(path: impl AsRef<Path>, name: &str, fixes: &[LocationFix]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_gpx(&mut writer, name, fixes)?;
    writer.flush()
}

/// Read every track point of a GPX document; points may lack a time
pub fn read_gpx<R: Read>(reader: R) -> io::Result<Vec<TrackPoint>> {
    let doc = gpx::read(reader).map_err(invalid_data)?;
    let mut points = Vec::new();
    for track in doc.tracks {
        for segment in track.segments {
            for point in segment.points {
                let timestamp = match point.time {
                    Some(time) => {
                        let iso = time.format().map_err(invalid_data)?;
                        Some(DateTime::parse_from_rfc3339(&iso).map_err(invalid_data)?.with_timezone(&Utc))
                    }
                    None => None,
                };
                let geo = point.point();
                points.push(TrackPoint { timestamp, coordinate: Coordinate::new(geo.y(), geo.x()) });
            }
        }
    }
    Ok(points)
}

/// Load a track for comparison: GPX by extension, JSON-lines fix log otherwise
pub fn load_track(path: impl AsRef<Path>) -> io::Result<Vec<TrackPoint>> {
    let path = path.as_ref();
    let is_gpx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("gpx"));
    if is_gpx {
        read_gpx(BufReader::new(File::open(path)?))
    } else {
        Ok(load_trail(path)?.iter().map(TrackPoint::from).collect())
    }
}
