use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        crate::geo::haversine_meters(self, other)
    }

    /// Moves the position by the given offsets in meters (north and east positive).
    pub fn offset_meters(&self, north: f64, east: f64) -> Self {
        let d_lat = (north / crate::geo::EARTH_RADIUS_METERS).to_degrees();
        let d_lon = (east / (crate::geo::EARTH_RADIUS_METERS * self.latitude.to_radians().cos()))
            .to_degrees();
        Self::new(self.latitude + d_lat, self.longitude + d_lon)
    }
}

/// Where a fix came from, ordered by trust.
///
/// `Fallback` is the hardcoded regional centre shown when nothing else is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FixSource {
    Fallback,
    Cached,
    Network,
    Gps,
}

impl FixSource {
    /// Live tiers count as a "real" position; the cache and fallback do not.
    pub fn is_live(self) -> bool {
        matches!(self, FixSource::Network | FixSource::Gps)
    }

    pub fn label(self) -> &'static str {
        match self {
            FixSource::Fallback => "DEFAULT",
            FixSource::Cached => "CACHED",
            FixSource::Network => "NETWORK",
            FixSource::Gps => "GPS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub position: Position,
    pub source: FixSource,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn now(position: Position, source: FixSource) -> Self {
        Self {
            position,
            source,
            timestamp: Utc::now(),
        }
    }
}

// Persisted form of the last live fix. Timestamp is unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedLocationRecord {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: i64,
}

impl CachedLocationRecord {
    pub fn new(position: Position, at: DateTime<Utc>) -> Self {
        Self {
            lat: position.latitude,
            lng: position.longitude,
            timestamp: at.timestamp_millis(),
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        chrono::Duration::milliseconds(now.timestamp_millis() - self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub formatted_text: String,
    pub source_position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EtaKind {
    /// Computed from a real provider position and the routing service.
    Live,
    /// Static generic range shown when no live estimate exists.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub duration_text: String,
    pub computed_at_position: Position,
    pub distance_text: Option<String>,
    pub kind: EtaKind,
}

impl EtaEstimate {
    pub fn fallback(text: &str, position: Position) -> Self {
        Self {
            duration_text: text.to_string(),
            computed_at_position: position,
            distance_text: None,
            kind: EtaKind::Fallback,
        }
    }

    pub fn is_live(&self) -> bool {
        self.kind == EtaKind::Live
    }
}
