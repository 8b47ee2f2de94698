//! Reverse geocoding for the pickup address field.
//!
//! [`AddressResolver`] debounces pin movement: each call to
//! [`AddressResolver::resolve`] cancels the pending timer (and any request
//! it already started) before scheduling a new one, so a burst of moves
//! costs a single geocoder request once the pin settles.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::GeocodeConfig;
use crate::models::{Position, ResolvedAddress};

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoder returned status {0}")]
    Status(String),
    #[error("geocoder returned no usable results")]
    NoResults,
    #[error("geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeocodeCandidate {
    pub formatted_address: String,
    #[serde(default)]
    pub types: Vec<String>,
}

impl GeocodeCandidate {
    pub fn new(formatted_address: &str, types: &[&str]) -> Self {
        Self {
            formatted_address: formatted_address.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn has_type(&self, kind: &str) -> bool {
        self.types.iter().any(|t| t == kind)
    }
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse_geocode(
        &self,
        position: Position,
    ) -> Result<Vec<GeocodeCandidate>, GeocodeError>;
}

type CandidateRule = fn(&GeocodeCandidate) -> bool;

fn is_route(c: &GeocodeCandidate) -> bool {
    c.has_type("route")
}

fn is_neighborhood(c: &GeocodeCandidate) -> bool {
    c.has_type("neighborhood")
}

fn is_not_plus_code(c: &GeocodeCandidate) -> bool {
    !is_plus_code(&c.formatted_address)
}

fn any(_: &GeocodeCandidate) -> bool {
    true
}

/// Preference order for display candidates, first match wins.
pub const CANDIDATE_POLICY: [(&str, CandidateRule); 4] = [
    ("route", is_route),
    ("neighborhood", is_neighborhood),
    ("named", is_not_plus_code),
    ("first", any),
];

pub fn select_candidate(candidates: &[GeocodeCandidate]) -> Option<&GeocodeCandidate> {
    CANDIDATE_POLICY.iter().find_map(|(name, rule)| {
        let found = candidates.iter().find(|c| rule(c));
        if let Some(c) = found {
            trace!("Picked '{}' by rule {}", c.formatted_address, name);
        }
        found
    })
}

const PLUS_CODE_ALPHABET: &str = "23456789CFGHJMPQRVWX";

/// True when the text leads with an Open Location Code such as `Q7V3+2J`.
pub fn is_plus_code(text: &str) -> bool {
    let Some(token) = text.split_whitespace().next() else {
        return false;
    };
    let Some((head, tail)) = token.trim_end_matches(',').split_once('+') else {
        return false;
    };
    let in_alphabet = |s: &str| {
        s.chars()
            .all(|ch| PLUS_CODE_ALPHABET.contains(ch.to_ascii_uppercase()))
    };
    (2..=8).contains(&head.len())
        && tail.len() <= 3
        && in_alphabet(head)
        && in_alphabet(tail)
}

// Postal codes carry at least four digits ("1117", "10118", "10118-2201");
// shorter numbers are usually part of a street or building name.
fn is_postal_number(word: &str) -> bool {
    let digits = word.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 4
        && word.starts_with(|c: char| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_digit() || c == '-')
}

fn is_postal_prefix(word: &str) -> bool {
    (2..=3).contains(&word.len()) && word.chars().all(|c| c.is_ascii_uppercase())
}

// "Valletta VLT 1117" -> "Valletta", "NY 10118" -> "NY"
fn strip_postal_tail(segment: &str) -> String {
    let mut words: Vec<&str> = segment.split_whitespace().collect();
    if words.len() < 2 || !words.last().is_some_and(|w| is_postal_number(w)) {
        return segment.to_string();
    }
    words.pop();
    if words.len() > 1 && words.last().is_some_and(|w| is_postal_prefix(w)) {
        words.pop();
    }
    words.join(" ")
}

/// Drops trailing country names and postal codes for a compact display.
/// The first segment (street or place name) is always kept.
pub fn clean_address(text: &str, strip_suffixes: &[String]) -> String {
    let mut segments: Vec<String> = text
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    while segments.len() > 1 {
        let last = &segments[segments.len() - 1];
        let is_country = strip_suffixes.iter().any(|s| s.eq_ignore_ascii_case(last));
        let is_postal = last.split_whitespace().all(is_postal_number);
        if is_country || is_postal {
            segments.pop();
        } else {
            break;
        }
    }

    // The first segment is the street or place name and is never trimmed
    if segments.len() > 1 {
        if let Some(last) = segments.last_mut() {
            *last = strip_postal_tail(last);
        }
    }

    let cleaned = segments.join(", ");
    if cleaned.is_empty() {
        text.trim().to_string()
    } else {
        cleaned
    }
}

/// Display text used when no address has ever been resolved.
pub fn coordinate_fallback(position: Position) -> String {
    format!(
        "Lat: {:.5}, Lng: {:.5}",
        position.latitude, position.longitude
    )
}

pub fn is_coordinate_fallback(text: &str) -> bool {
    text.is_empty() || text.starts_with("Lat:")
}

/// One undebounced lookup: fetch candidates, apply the policy, clean the text.
pub async fn resolve_once(
    geocoder: &dyn ReverseGeocoder,
    position: Position,
    strip_suffixes: &[String],
) -> Result<ResolvedAddress, GeocodeError> {
    let candidates = geocoder.reverse_geocode(position).await?;
    let best = select_candidate(&candidates).ok_or(GeocodeError::NoResults)?;
    Ok(ResolvedAddress {
        formatted_text: clean_address(&best.formatted_address, strip_suffixes),
        source_position: position,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddressUpdate {
    Resolved(ResolvedAddress),
    /// Geocoding failed; `display` is the last good address or the raw coordinate.
    Unresolved { position: Position, display: String },
}

impl AddressUpdate {
    pub fn display_text(&self) -> &str {
        match self {
            AddressUpdate::Resolved(address) => &address.formatted_text,
            AddressUpdate::Unresolved { display, .. } => display,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub debounce: Duration,
    pub strip_suffixes: Vec<String>,
}

impl From<&GeocodeConfig> for ResolverSettings {
    fn from(config: &GeocodeConfig) -> Self {
        Self {
            debounce: config.debounce(),
            strip_suffixes: config.strip_suffixes.clone(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&GeocodeConfig::default())
    }
}

pub struct AddressResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    debounce: Duration,
    strip_suffixes: Arc<[String]>,
    tx: mpsc::UnboundedSender<AddressUpdate>,
    pending: Option<JoinHandle<()>>,
    generation: Arc<AtomicU64>,
    last_good: Arc<Mutex<Option<ResolvedAddress>>>,
}

impl AddressResolver {
    pub fn new(
        geocoder: Arc<dyn ReverseGeocoder>,
        settings: ResolverSettings,
    ) -> (Self, mpsc::UnboundedReceiver<AddressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = Self {
            geocoder,
            debounce: settings.debounce,
            strip_suffixes: settings.strip_suffixes.into(),
            tx,
            pending: None,
            generation: Arc::new(AtomicU64::new(0)),
            last_good: Arc::new(Mutex::new(None)),
        };
        (resolver, rx)
    }

    /// Schedules a lookup for `position` once the debounce window passes
    /// without another call. Must be called inside a Tokio runtime.
    pub fn resolve(&mut self, position: Position) {
        self.cancel_pending();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let geocoder = Arc::clone(&self.geocoder);
        let suffixes = Arc::clone(&self.strip_suffixes);
        let current = Arc::clone(&self.generation);
        let last_good = Arc::clone(&self.last_good);
        let tx = self.tx.clone();
        let debounce = self.debounce;

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let outcome = resolve_once(geocoder.as_ref(), position, &suffixes).await;

            if current.load(Ordering::SeqCst) != generation {
                debug!("Discarding superseded geocode result");
                return;
            }

            let update = match outcome {
                Ok(address) => {
                    debug!("Resolved pickup address: {}", address.formatted_text);
                    *last_good.lock().unwrap_or_else(|e| e.into_inner()) = Some(address.clone());
                    AddressUpdate::Resolved(address)
                }
                Err(e) => {
                    warn!("Reverse geocoding failed: {}", e);
                    let display = last_good
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .as_ref()
                        .map(|a| a.formatted_text.clone())
                        .unwrap_or_else(|| coordinate_fallback(position));
                    AddressUpdate::Unresolved { position, display }
                }
            };
            let _ = tx.send(update);
        }));
    }

    pub fn last_resolved(&self) -> Option<ResolvedAddress> {
        self.last_good
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Cancels the pending timer or in-flight lookup, if any.
    pub fn dispose(&mut self) {
        self.cancel_pending();
    }

    fn cancel_pending(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
        // Anything already past its last await point is still filtered out.
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for AddressResolver {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
