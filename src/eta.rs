//! Pickup ETA from the nearest available driver.
//!
//! The estimator is proximity-gated: once a live estimate exists, pin moves
//! that stay within [`EtaSettings::proximity_radius_m`] of where it was
//! computed reuse it without touching the network. Failures never blank the
//! ETA; the previous estimate or a static range is returned instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::EtaConfig;
use crate::geo::haversine_meters;
use crate::models::{EtaEstimate, EtaKind, Position};

#[derive(Debug, thiserror::Error)]
pub enum EtaError {
    #[error("nearest-provider lookup failed: {0}")]
    Lookup(String),
    #[error("distance matrix failed: {0}")]
    Matrix(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyProvider {
    pub provider_id: String,
    pub last_known_position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Driving,
}

impl TravelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TravelMode::Driving => "driving",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TravelSummary {
    pub distance_text: String,
    pub duration_text: String,
}

/// Backend query for online drivers, nearest first.
#[async_trait]
pub trait ProviderLookup: Send + Sync {
    async fn nearest_available(
        &self,
        position: Position,
        limit: usize,
    ) -> Result<Vec<NearbyProvider>, EtaError>;
}

#[async_trait]
pub trait DistanceMatrix: Send + Sync {
    async fn travel(
        &self,
        origin: Position,
        destination: Position,
        mode: TravelMode,
    ) -> Result<TravelSummary, EtaError>;
}

#[derive(Debug, Clone)]
pub struct EtaSettings {
    pub proximity_radius_m: f64,
    pub provider_limit: usize,
    pub no_provider_text: String,
    pub failure_text: String,
}

impl From<&EtaConfig> for EtaSettings {
    fn from(config: &EtaConfig) -> Self {
        Self {
            proximity_radius_m: config.proximity_radius_m,
            provider_limit: config.provider_limit.max(1),
            no_provider_text: config.no_provider_text.clone(),
            failure_text: config.failure_text.clone(),
        }
    }
}

impl Default for EtaSettings {
    fn default() -> Self {
        Self::from(&EtaConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EtaOutcome {
    /// Within the proximity radius of the last live estimate; nothing was queried.
    Unchanged(EtaEstimate),
    Updated(EtaEstimate),
}

impl EtaOutcome {
    pub fn estimate(&self) -> &EtaEstimate {
        match self {
            EtaOutcome::Unchanged(estimate) | EtaOutcome::Updated(estimate) => estimate,
        }
    }

    pub fn into_estimate(self) -> EtaEstimate {
        match self {
            EtaOutcome::Unchanged(estimate) | EtaOutcome::Updated(estimate) => estimate,
        }
    }
}

pub struct EtaEstimator {
    lookup: Arc<dyn ProviderLookup>,
    matrix: Arc<dyn DistanceMatrix>,
    settings: EtaSettings,
    current: Option<EtaEstimate>,
    // Position of the last live estimate; fallbacks never arm the gate.
    anchor: Option<Position>,
}

impl EtaEstimator {
    pub fn new(
        lookup: Arc<dyn ProviderLookup>,
        matrix: Arc<dyn DistanceMatrix>,
        settings: EtaSettings,
    ) -> Self {
        Self {
            lookup,
            matrix,
            settings,
            current: None,
            anchor: None,
        }
    }

    pub fn current(&self) -> Option<&EtaEstimate> {
        self.current.as_ref()
    }

    pub async fn estimate(&mut self, position: Position) -> EtaOutcome {
        if let (Some(anchor), Some(current)) = (self.anchor, self.current.as_ref()) {
            let moved = haversine_meters(&anchor, &position);
            if moved < self.settings.proximity_radius_m {
                debug!("Pin moved {:.1} m, reusing ETA", moved);
                return EtaOutcome::Unchanged(current.clone());
            }
        }

        let estimate = match self.compute(position).await {
            Ok(Some(estimate)) => {
                info!("Pickup ETA {}", estimate.duration_text);
                self.anchor = Some(position);
                estimate
            }
            Ok(None) => {
                info!("No drivers online near pickup");
                self.anchor = None;
                EtaEstimate::fallback(&self.settings.no_provider_text, position)
            }
            Err(e) => {
                error!("ETA Error: {}", e);
                match self.current.clone() {
                    Some(previous) => previous,
                    None => EtaEstimate::fallback(&self.settings.failure_text, position),
                }
            }
        };

        self.current = Some(estimate.clone());
        EtaOutcome::Updated(estimate)
    }

    // Ok(None) means the lookup worked but nobody is available.
    async fn compute(&self, pickup: Position) -> Result<Option<EtaEstimate>, EtaError> {
        let providers = self
            .lookup
            .nearest_available(pickup, self.settings.provider_limit)
            .await?;
        let Some(nearest) = providers.into_iter().next() else {
            return Ok(None);
        };
        debug!("Nearest driver {}", nearest.provider_id);

        let summary = self
            .matrix
            .travel(nearest.last_known_position, pickup, TravelMode::Driving)
            .await?;
        Ok(Some(EtaEstimate {
            duration_text: summary.duration_text,
            computed_at_position: pickup,
            distance_text: Some(summary.distance_text),
            kind: EtaKind::Live,
        }))
    }

    /// Ungated estimate for an assigned driver heading to a fixed pickup.
    pub async fn live_estimate(
        &self,
        driver: Position,
        pickup: Position,
    ) -> Result<EtaEstimate, EtaError> {
        let summary = self
            .matrix
            .travel(driver, pickup, TravelMode::Driving)
            .await
            .map_err(|e| {
                warn!("Live ETA failed: {}", e);
                e
            })?;
        Ok(EtaEstimate {
            duration_text: summary.duration_text,
            computed_at_position: pickup,
            distance_text: Some(summary.distance_text),
            kind: EtaKind::Live,
        })
    }
}
