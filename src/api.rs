//! HTTP collaborators: Google geocoding and distance matrix, the booking
//! backend's nearest-driver RPC, and IP-based network geolocation.

use async_trait::async_trait;
use ipgeolocate::{Locator, Service};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::eta::{DistanceMatrix, EtaError, NearbyProvider, ProviderLookup, TravelMode, TravelSummary};
use crate::geo::parse_point;
use crate::geocode::{GeocodeCandidate, GeocodeError, ReverseGeocoder};
use crate::location::{GeolocationError, GeolocationProvider, PositionOptions, WatchReceiver};
use crate::models::Position;

pub fn http_client(timeout: Duration) -> color_eyre::Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn latlng(position: Position) -> String {
    format!("{},{}", position.latitude, position.longitude)
}

#[derive(Debug, Deserialize)]
pub struct GeocodeResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<GeocodeCandidate>,
    pub error_message: Option<String>,
}

impl GeocodeResponse {
    pub fn into_candidates(self) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
        if self.status == "OK" {
            return Ok(self.results);
        }
        if self.status == "ZERO_RESULTS" {
            return Ok(Vec::new());
        }
        let detail = match self.error_message {
            Some(msg) => format!("{} ({})", self.status, msg),
            None => self.status,
        };
        Err(GeocodeError::Status(detail))
    }
}

#[derive(Debug, Deserialize)]
pub struct MatrixResponse {
    pub status: String,
    #[serde(default)]
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
pub struct MatrixRow {
    #[serde(default)]
    pub elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
pub struct MatrixElement {
    pub status: String,
    pub duration: Option<TextValue>,
    pub distance: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
pub struct TextValue {
    pub text: String,
}

impl MatrixResponse {
    pub fn into_summary(self) -> Result<TravelSummary, EtaError> {
        if self.status != "OK" {
            return Err(EtaError::Matrix(self.status));
        }
        let element = self
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or_else(|| EtaError::Matrix("empty matrix".to_string()))?;
        if element.status != "OK" {
            return Err(EtaError::Matrix(element.status));
        }
        match (element.duration, element.distance) {
            (Some(duration), Some(distance)) => Ok(TravelSummary {
                duration_text: duration.text,
                distance_text: distance.text,
            }),
            _ => Err(EtaError::Matrix("element missing duration".to_string())),
        }
    }
}

pub struct GoogleMaps {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GoogleMaps {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ReverseGeocoder for GoogleMaps {
    async fn reverse_geocode(
        &self,
        position: Position,
    ) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
        let url = format!("{}/maps/api/geocode/json", self.base_url);
        let res = self
            .client
            .get(url)
            .query(&[("latlng", latlng(position)), ("key", self.api_key.clone())])
            .send()
            .await?
            .error_for_status()?
            .json::<GeocodeResponse>()
            .await?;
        res.into_candidates()
    }
}

#[async_trait]
impl DistanceMatrix for GoogleMaps {
    async fn travel(
        &self,
        origin: Position,
        destination: Position,
        mode: TravelMode,
    ) -> Result<TravelSummary, EtaError> {
        let url = format!("{}/maps/api/distancematrix/json", self.base_url);
        let res = self
            .client
            .get(url)
            .query(&[
                ("origins", latlng(origin)),
                ("destinations", latlng(destination)),
                ("mode", mode.as_str().to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<MatrixResponse>()
            .await?;
        res.into_summary()
    }
}

#[derive(Debug, Deserialize)]
pub struct DriverRow {
    #[serde(alias = "id", default)]
    pub driver_id: Value,
    #[serde(default)]
    pub location: Value,
}

/// Converts RPC rows into providers, keeping order and skipping rows whose
/// location can't be parsed.
pub fn parse_driver_rows(rows: Vec<DriverRow>) -> Vec<NearbyProvider> {
    rows.into_iter()
        .filter_map(|row| {
            let provider_id = match &row.driver_id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            match parse_point(&row.location) {
                Some(position) => Some(NearbyProvider {
                    provider_id,
                    last_known_position: position,
                }),
                None => {
                    warn!("Could not parse driver location: {} {}", provider_id, row.location);
                    None
                }
            }
        })
        .collect()
}

/// Booking backend RPC (`get_nearest_online_drivers`).
pub struct SupabaseDrivers {
    client: Client,
    url: String,
    anon_key: String,
}

impl SupabaseDrivers {
    pub fn new(client: Client, url: &str, anon_key: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}

#[async_trait]
impl ProviderLookup for SupabaseDrivers {
    async fn nearest_available(
        &self,
        position: Position,
        limit: usize,
    ) -> Result<Vec<NearbyProvider>, EtaError> {
        if self.url.is_empty() {
            return Err(EtaError::Lookup("backend url not configured".to_string()));
        }
        let url = format!("{}/rest/v1/rpc/get_nearest_online_drivers", self.url);
        let rows = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&json!({
                "lat": position.latitude,
                "lng": position.longitude,
                "lim": limit,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<DriverRow>>()
            .await?;
        debug!("Nearest-driver RPC returned {} rows", rows.len());
        Ok(parse_driver_rows(rows))
    }
}

/// Network-tier geolocation from the public IP address.
///
/// There is no satellite receiver behind this provider: high-accuracy
/// requests report [`GeolocationError::PositionUnavailable`] and watches stay
/// open without ever producing a fix, so the tracker sees them time out.
pub struct IpGeolocation {
    lookup_ip: String,
    last_fix: Mutex<Option<(Instant, Position)>>,
    watches: Mutex<Vec<mpsc::UnboundedSender<Result<Position, GeolocationError>>>>,
}

impl IpGeolocation {
    pub fn new(lookup_ip: &str) -> Self {
        Self {
            lookup_ip: lookup_ip.to_string(),
            last_fix: Mutex::new(None),
            watches: Mutex::new(Vec::new()),
        }
    }

    fn recent(&self, maximum_age: Duration) -> Option<Position> {
        let last = self.last_fix.lock().unwrap_or_else(|e| e.into_inner());
        (*last).and_then(|(at, position)| (at.elapsed() <= maximum_age).then_some(position))
    }
}

#[async_trait]
impl GeolocationProvider for IpGeolocation {
    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> Result<Position, GeolocationError> {
        if options.high_accuracy {
            return Err(GeolocationError::PositionUnavailable(
                "no high-accuracy source".to_string(),
            ));
        }
        if let Some(position) = self.recent(options.maximum_age) {
            debug!("Reusing recent IP fix");
            return Ok(position);
        }

        // Using IpApi as the service, it's pretty reliable.
        let loc = Locator::get(&self.lookup_ip, Service::IpApi)
            .await
            .map_err(|e| GeolocationError::PositionUnavailable(e.to_string()))?;
        let lat = loc.latitude.parse::<f64>();
        let lon = loc.longitude.parse::<f64>();
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => {
                info!("Geolocation successful - ({}, {})", lat, lon);
                let position = Position::new(lat, lon);
                *self.last_fix.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some((Instant::now(), position));
                Ok(position)
            }
            _ => Err(GeolocationError::PositionUnavailable(format!(
                "unparseable coordinates ({}, {})",
                loc.latitude, loc.longitude
            ))),
        }
    }

    fn watch_position(&self, _options: PositionOptions) -> WatchReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
        watches.retain(|w| !w.is_closed());
        watches.push(tx);
        rx
    }
}
