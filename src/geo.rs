//! Great-circle math and coordinate parsing.
//!
//! [`haversine_meters`] is the single distance implementation in the crate:
//! the ETA proximity gate and the on-screen straight-line distance both go
//! through it so their rounding never diverges.

use crate::models::Position;
use serde_json::Value;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Calculate the distance between two points on a sphere, in meters.
pub fn haversine_meters(start: &Position, end: &Position) -> f64 {
    let d_lat = (end.latitude - start.latitude).to_radians();
    let d_lon = (end.longitude - start.longitude).to_radians();
    let lat1 = start.latitude.to_radians();
    let lat2 = end.latitude.to_radians();

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + (d_lon / 2.0).sin() * (d_lon / 2.0).sin() * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Formats a straight-line distance for display ("850 m", "2.4 km").
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

/// Straight-line distance between two positions, formatted for display.
pub fn display_distance(start: &Position, end: &Position) -> String {
    format_distance(haversine_meters(start, end))
}

/// Parses a provider location as returned by the booking backend.
///
/// Accepts a GeoJSON point object (`coordinates: [lng, lat]`) or a WKT
/// string such as `POINT(14.51 35.89)`, optionally prefixed with an SRID.
pub fn parse_point(value: &Value) -> Option<Position> {
    match value {
        Value::Object(map) => {
            let coords = map.get("coordinates")?.as_array()?;
            let lng = coords.first()?.as_f64()?;
            let lat = coords.get(1)?.as_f64()?;
            valid(Position::new(lat, lng))
        }
        Value::String(text) => parse_wkt_point(text),
        _ => None,
    }
}

fn parse_wkt_point(text: &str) -> Option<Position> {
    let text = text.rsplit(';').next()?.trim();
    if !text.to_ascii_uppercase().starts_with("POINT") {
        return None;
    }
    let inner = text.split_once('(')?.1.split_once(')')?.0;
    let mut parts = inner.split_whitespace();
    let lng = parts.next()?.parse::<f64>().ok()?;
    let lat = parts.next()?.parse::<f64>().ok()?;
    valid(Position::new(lat, lng))
}

fn valid(position: Position) -> Option<Position> {
    let in_range = (-90.0..=90.0).contains(&position.latitude)
        && (-180.0..=180.0).contains(&position.longitude);
    in_range.then_some(position)
}
