//! Progressive location resolution for the pickup client.
//!
//! [`LocationTracker::start`] runs three tiers side by side:
//!
//! 1. the persisted cache (or the fixed regional fallback), emitted before
//!    `start` returns so the consumer never sees "no position";
//! 2. a single coarse network fix with a short timeout;
//! 3. a continuous high-accuracy watch that keeps emitting until stopped.
//!
//! Tiers can resolve in any order. Every fix goes through a [`TrustGate`]
//! which only lets a fix through when its tier is at least as trusted as the
//! one currently shown, so a late network fix never replaces GPS.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LocationConfig;
use crate::db::KeyValueStore;
use crate::models::{CachedLocationRecord, FixSource, Position, PositionFix};

pub const LOCATION_CACHE_KEY: &str = "towme_last_location";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("location request timed out")]
    Timeout,
    #[error("geolocation is not supported on this device")]
    Unsupported,
}

impl GeolocationError {
    /// Unavailable and timeout failures may succeed at a lower accuracy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeolocationError::PositionUnavailable(_) | GeolocationError::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest OS-cached position the provider may hand back.
    pub maximum_age: Duration,
}

pub type WatchReceiver = mpsc::UnboundedReceiver<Result<Position, GeolocationError>>;

/// Device geolocation backend.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> Result<Position, GeolocationError>;

    /// Starts a continuous subscription. The provider must stop producing
    /// once the returned receiver is dropped.
    fn watch_position(&self, options: PositionOptions) -> WatchReceiver;
}

/// A failure the user should see, with the message to show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFailure {
    pub error: GeolocationError,
    pub message: String,
}

impl LocationFailure {
    /// Failure of the passive tiers while nothing real is on screen.
    pub fn passive(error: GeolocationError) -> Self {
        let message = match error {
            GeolocationError::PermissionDenied => {
                "Permission denied. Please enable location services."
            }
            GeolocationError::PositionUnavailable(_) => {
                "Position unavailable. Check GPS or network."
            }
            GeolocationError::Timeout => "GPS timeout. Using approximate location.",
            GeolocationError::Unsupported => "GPS not supported by this device",
        };
        Self {
            error,
            message: message.to_string(),
        }
    }

    /// Terminal failure of a manual "locate me".
    pub fn refetch(error: GeolocationError) -> Self {
        let message = match error {
            GeolocationError::PermissionDenied => {
                "Location permission denied. Please enable location services."
            }
            GeolocationError::PositionUnavailable(_) | GeolocationError::Timeout => {
                "Unable to get current location. Please try again or move the pin manually."
            }
            GeolocationError::Unsupported => "Failed to get current location. Please try again.",
        };
        Self {
            error,
            message: message.to_string(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.error == GeolocationError::PermissionDenied
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationUpdate {
    Fix(PositionFix),
    /// A live tier failed while a real position is already shown.
    Degraded(GeolocationError),
    Failed(LocationFailure),
}

/// Monotonic trust state: `None -> Fallback -> Cached -> Network -> Gps`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrustGate {
    level: Option<FixSource>,
}

impl TrustGate {
    /// Accepts the fix when its tier is at least as trusted as the current one.
    pub fn offer(&mut self, source: FixSource) -> bool {
        match self.level {
            Some(level) if source < level => false,
            _ => {
                self.level = Some(source);
                true
            }
        }
    }

    /// Manual results replace whatever is shown.
    pub fn force(&mut self, source: FixSource) {
        self.level = Some(source);
    }

    pub fn level(&self) -> Option<FixSource> {
        self.level
    }

    pub fn has_live_fix(&self) -> bool {
        self.level.is_some_and(FixSource::is_live)
    }

    pub fn reset(&mut self) {
        self.level = None;
    }
}

/// Last live fix, persisted as JSON text in a [`KeyValueStore`].
#[derive(Clone)]
pub struct LocationCache {
    store: Arc<dyn KeyValueStore>,
    max_age: chrono::Duration,
}

impl LocationCache {
    pub fn new(store: Arc<dyn KeyValueStore>, max_age: chrono::Duration) -> Self {
        Self { store, max_age }
    }

    pub fn load(&self) -> Option<Position> {
        self.load_at(Utc::now())
    }

    /// Returns the cached position if it is younger than the freshness window.
    pub fn load_at(&self, now: DateTime<Utc>) -> Option<Position> {
        let raw = match self.store.get(LOCATION_CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to load cached location: {}", e);
                return None;
            }
        };

        let record: CachedLocationRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring malformed cached location: {}", e);
                return None;
            }
        };

        if record.age(now) < self.max_age {
            Some(record.position())
        } else {
            debug!("Cached location is stale ({}h old)", record.age(now).num_hours());
            None
        }
    }

    pub fn store(&self, position: Position) {
        self.store_at(position, Utc::now());
    }

    pub fn store_at(&self, position: Position, at: DateTime<Utc>) {
        let record = CachedLocationRecord::new(position, at);
        let result = serde_json::to_string(&record)
            .map_err(color_eyre::Report::from)
            .and_then(|text| self.store.set(LOCATION_CACHE_KEY, &text));
        if let Err(e) = result {
            warn!("Failed to cache location: {}", e);
        }
    }
}

/// One step of the manual "locate me" chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateAttempt {
    pub options: PositionOptions,
    pub source: FixSource,
}

#[derive(Debug, Clone)]
pub struct TierSettings {
    pub fallback: Position,
    pub cache_max_age: chrono::Duration,
    pub network: PositionOptions,
    pub gps: PositionOptions,
    /// Evaluated top-down; a retryable failure falls through to the next attempt.
    pub refetch: Vec<LocateAttempt>,
}

impl From<&LocationConfig> for TierSettings {
    fn from(config: &LocationConfig) -> Self {
        let secs = Duration::from_secs;
        Self {
            fallback: config.fallback_position(),
            cache_max_age: config.cache_max_age(),
            network: PositionOptions {
                high_accuracy: false,
                timeout: secs(config.network_timeout_secs),
                maximum_age: secs(config.network_max_age_secs),
            },
            gps: PositionOptions {
                high_accuracy: true,
                timeout: secs(config.gps_timeout_secs),
                maximum_age: Duration::ZERO,
            },
            refetch: vec![
                LocateAttempt {
                    options: PositionOptions {
                        high_accuracy: true,
                        timeout: secs(config.refetch_high_timeout_secs),
                        maximum_age: Duration::ZERO,
                    },
                    source: FixSource::Gps,
                },
                LocateAttempt {
                    options: PositionOptions {
                        high_accuracy: false,
                        timeout: secs(config.refetch_low_timeout_secs),
                        maximum_age: secs(config.refetch_low_max_age_secs),
                    },
                    source: FixSource::Network,
                },
            ],
        }
    }
}

impl Default for TierSettings {
    fn default() -> Self {
        Self::from(&LocationConfig::default())
    }
}

// State the tier tasks share with the tracker. Never locked across an await.
// Lock order is gate, then tx: updates leave in the order the gate saw them.
struct Shared {
    cache: LocationCache,
    gate: Mutex<TrustGate>,
    epoch: AtomicU64,
    tx: Mutex<Option<mpsc::UnboundedSender<LocationUpdate>>>,
    // A silent watch times out every attempt; only the first is surfaced.
    timeout_reported: AtomicBool,
}

impl Shared {
    fn new(cache: LocationCache) -> Self {
        Self {
            cache,
            gate: Mutex::new(TrustGate::default()),
            epoch: AtomicU64::new(0),
            tx: Mutex::new(None),
            timeout_reported: AtomicBool::new(false),
        }
    }

    fn gate(&self) -> MutexGuard<'_, TrustGate> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, update: LocationUpdate) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(update);
        }
    }

    fn offer(&self, fix: PositionFix) -> bool {
        let mut gate = self.gate();
        let accepted = gate.offer(fix.source);
        if accepted {
            self.send(LocationUpdate::Fix(fix));
        } else {
            debug!(
                "Dropping {} fix, a more trusted tier is already shown",
                fix.source.label()
            );
        }
        accepted
    }

    fn force(&self, fix: PositionFix) {
        let mut gate = self.gate();
        gate.force(fix.source);
        self.timeout_reported.store(false, Ordering::SeqCst);
        self.send(LocationUpdate::Fix(fix));
    }

    fn on_live_fix(&self, fix: PositionFix) {
        self.cache.store(fix.position);
        self.timeout_reported.store(false, Ordering::SeqCst);
        self.offer(fix);
    }

    fn on_watch_error(&self, err: GeolocationError) {
        if err == GeolocationError::Timeout && self.timeout_reported.swap(true, Ordering::SeqCst) {
            debug!("GPS watch still silent");
            return;
        }
        let gate = self.gate();
        if gate.has_live_fix() {
            warn!("GPS watch error with a live fix on screen: {}", err);
            self.send(LocationUpdate::Degraded(err));
        } else {
            error!("GPS watch error: {}", err);
            self.send(LocationUpdate::Failed(LocationFailure::passive(err)));
        }
    }
}

async fn request_position(
    provider: &dyn GeolocationProvider,
    options: PositionOptions,
) -> Result<Position, GeolocationError> {
    match tokio::time::timeout(options.timeout, provider.current_position(options)).await {
        Ok(result) => result,
        Err(_) => Err(GeolocationError::Timeout),
    }
}

pub struct LocationTracker {
    provider: Arc<dyn GeolocationProvider>,
    settings: TierSettings,
    shared: Arc<Shared>,
    network_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

impl LocationTracker {
    pub fn new(
        provider: Arc<dyn GeolocationProvider>,
        store: Arc<dyn KeyValueStore>,
        settings: TierSettings,
    ) -> Self {
        let cache = LocationCache::new(store, settings.cache_max_age);
        Self {
            provider,
            settings,
            shared: Arc::new(Shared::new(cache)),
            network_task: None,
            watch_task: None,
        }
    }

    /// Begins a location session and returns its update stream.
    ///
    /// The first update (cached or fallback fix) is already in the channel
    /// when this returns. Must be called inside a Tokio runtime. Calling it
    /// again stops the previous session first.
    pub fn start(&mut self) -> mpsc::UnboundedReceiver<LocationUpdate> {
        self.stop();

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        self.shared.gate().reset();
        self.shared.timeout_reported.store(false, Ordering::SeqCst);
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // Tier 1: cache or fallback, same tick
        let initial = match self.shared.cache.load() {
            Some(position) => {
                info!("Using cached location ({}, {})", position.latitude, position.longitude);
                PositionFix::now(position, FixSource::Cached)
            }
            None => PositionFix::now(self.settings.fallback, FixSource::Fallback),
        };
        self.shared.offer(initial);

        if !self.provider.is_available() {
            error!("No geolocation provider available");
            self.shared.send(LocationUpdate::Failed(LocationFailure::passive(
                GeolocationError::Unsupported,
            )));
            return rx;
        }

        // Tier 2: one coarse fix, failures swallowed
        let provider = Arc::clone(&self.provider);
        let shared = Arc::clone(&self.shared);
        let options = self.settings.network;
        self.network_task = Some(tokio::spawn(async move {
            match request_position(provider.as_ref(), options).await {
                Ok(position) => {
                    if shared.epoch.load(Ordering::SeqCst) != epoch {
                        debug!("Discarding network fix from a superseded session");
                        return;
                    }
                    info!("Network location ({}, {})", position.latitude, position.longitude);
                    shared.on_live_fix(PositionFix::now(position, FixSource::Network));
                }
                Err(e) => warn!("Network location failed: {}", e),
            }
        }));

        // Tier 3: continuous high-accuracy watch
        let mut watch = self.provider.watch_position(self.settings.gps);
        let shared = Arc::clone(&self.shared);
        let attempt_timeout = self.settings.gps.timeout;
        self.watch_task = Some(tokio::spawn(async move {
            loop {
                match tokio::time::timeout(attempt_timeout, watch.recv()).await {
                    Ok(Some(Ok(position))) => {
                        shared.on_live_fix(PositionFix::now(position, FixSource::Gps));
                    }
                    Ok(Some(Err(e))) => shared.on_watch_error(e),
                    Ok(None) => {
                        debug!("GPS watch closed by provider");
                        break;
                    }
                    Err(_) => shared.on_watch_error(GeolocationError::Timeout),
                }
            }
        }));

        rx
    }

    /// Manual "locate me": high accuracy first, then the remaining attempts
    /// of the refetch policy on retryable failures.
    ///
    /// Any network fix from `start` that has not resolved yet is discarded.
    /// The result is also pushed into the session stream and always replaces
    /// the fix on screen.
    pub async fn refetch(&mut self) -> Result<PositionFix, LocationFailure> {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.network_task.take() {
            task.abort();
        }

        let attempts = self.settings.refetch.clone();
        let mut last_error = GeolocationError::PositionUnavailable("no locate attempts".into());

        for (i, attempt) in attempts.iter().enumerate() {
            match request_position(self.provider.as_ref(), attempt.options).await {
                Ok(position) => {
                    let fix = PositionFix::now(position, attempt.source);
                    info!(
                        "Located ({}, {}) via {}",
                        position.latitude,
                        position.longitude,
                        fix.source.label()
                    );
                    self.shared.cache.store(position);
                    self.shared.force(fix);
                    return Ok(fix);
                }
                Err(e) if e.is_retryable() && i + 1 < attempts.len() => {
                    warn!("Locate attempt {} failed, trying lower accuracy: {}", i + 1, e);
                    last_error = e;
                }
                Err(e) => {
                    last_error = e;
                    break;
                }
            }
        }

        error!("Manual locate failed: {}", last_error);
        let failure = LocationFailure::refetch(last_error);
        self.shared.send(LocationUpdate::Failed(failure.clone()));
        Err(failure)
    }

    /// Cancels the watch and any pending network request. Safe to repeat.
    pub fn stop(&mut self) {
        if let Some(task) = self.watch_task.take() {
            task.abort();
            debug!("GPS watch stopped");
        }
        if let Some(task) = self.network_task.take() {
            task.abort();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn trust_level(&self) -> Option<FixSource> {
        self.shared.gate().level()
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::mock::MockGeolocation;

    const HOME: Position = Position::new(35.90, 14.51);
    const NEAR: Position = Position::new(35.91, 14.49);
    const GPS: Position = Position::new(35.9001, 14.5102);

    fn store_with_cache(age: chrono::Duration) -> Arc<dyn KeyValueStore> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let cache = LocationCache::new(Arc::clone(&store), chrono::Duration::hours(24));
        cache.store_at(HOME, Utc::now() - age);
        store
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LocationUpdate>) -> Vec<LocationUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    fn fix(update: &LocationUpdate) -> PositionFix {
        match update {
            LocationUpdate::Fix(fix) => *fix,
            other => panic!("expected a fix, got {other:?}"),
        }
    }

    #[test]
    fn gate_only_upgrades() {
        let mut gate = TrustGate::default();
        assert!(gate.offer(FixSource::Cached));
        assert!(gate.offer(FixSource::Gps));
        assert!(!gate.offer(FixSource::Network));
        assert!(!gate.offer(FixSource::Cached));
        assert!(gate.offer(FixSource::Gps));
        assert!(gate.has_live_fix());

        gate.force(FixSource::Network);
        assert_eq!(gate.level(), Some(FixSource::Network));
    }

    #[test]
    fn cache_ignores_stale_and_malformed_entries() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let cache = LocationCache::new(Arc::clone(&store), chrono::Duration::hours(24));
        assert_eq!(cache.load(), None);

        store.set(LOCATION_CACHE_KEY, "{not json").unwrap();
        assert_eq!(cache.load(), None);

        let now = Utc::now();
        cache.store_at(HOME, now - chrono::Duration::hours(23));
        assert_eq!(cache.load_at(now), Some(HOME));
        assert_eq!(cache.load_at(now + chrono::Duration::hours(2)), None);
    }

    #[test]
    fn cache_expires_exactly_at_the_freshness_window() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let cache = LocationCache::new(Arc::clone(&store), chrono::Duration::hours(24));
        let stored_at = Utc::now();
        cache.store_at(HOME, stored_at);

        let almost = stored_at + chrono::Duration::hours(24) - chrono::Duration::milliseconds(1);
        assert_eq!(cache.load_at(almost), Some(HOME));
        assert_eq!(cache.load_at(stored_at + chrono::Duration::hours(24)), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tiers_are_delivered_in_trust_order() {
        for _ in 0..200 {
            let cache = LocationCache::new(Arc::new(MemoryStore::default()), chrono::Duration::hours(24));
            let shared = Arc::new(Shared::new(cache));
            let (tx, mut rx) = mpsc::unbounded_channel();
            *shared.tx.lock().unwrap() = Some(tx);

            let network = {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    shared.on_live_fix(PositionFix::now(NEAR, FixSource::Network));
                })
            };
            let gps = {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    shared.on_live_fix(PositionFix::now(GPS, FixSource::Gps));
                })
            };
            network.await.unwrap();
            gps.await.unwrap();

            let sources: Vec<FixSource> = drain(&mut rx).iter().map(|u| fix(u).source).collect();
            assert!(
                sources.windows(2).all(|w| w[0] <= w[1]),
                "delivered out of trust order: {sources:?}"
            );
            assert_eq!(sources.last(), Some(&FixSource::Gps));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_is_emitted_before_start_returns() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_low(Duration::from_millis(200), Ok(NEAR));
        let mut tracker = LocationTracker::new(
            mock.clone(),
            store_with_cache(chrono::Duration::hours(1)),
            TierSettings::default(),
        );

        let mut rx = tracker.start();
        let first = fix(&rx.try_recv().expect("cached fix must be queued synchronously"));
        assert_eq!(first.source, FixSource::Cached);
        assert_eq!(first.position, HOME);

        let second = fix(&rx.recv().await.unwrap());
        assert_eq!(second.source, FixSource::Network);
        assert_eq!(second.position, NEAR);

        mock.push_watch(Ok(GPS));
        let third = fix(&rx.recv().await.unwrap());
        assert_eq!(third.source, FixSource::Gps);
        assert_eq!(tracker.trust_level(), Some(FixSource::Gps));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_yields_the_fallback_coordinate() {
        let mock = Arc::new(MockGeolocation::new());
        let mut tracker = LocationTracker::new(
            mock,
            store_with_cache(chrono::Duration::hours(25)),
            TierSettings::default(),
        );

        let mut rx = tracker.start();
        let first = fix(&rx.try_recv().unwrap());
        assert_eq!(first.source, FixSource::Fallback);
        assert_eq!(first.position, Position::new(35.8989, 14.5146));
    }

    #[tokio::test(start_paused = true)]
    async fn late_network_fix_never_replaces_gps() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_low(Duration::from_secs(2), Ok(NEAR));
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let mut tracker = LocationTracker::new(mock.clone(), Arc::clone(&store), TierSettings::default());

        let mut rx = tracker.start();
        assert_eq!(fix(&rx.try_recv().unwrap()).source, FixSource::Fallback);

        mock.push_watch(Ok(GPS));
        assert_eq!(fix(&rx.recv().await.unwrap()).source, FixSource::Gps);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(mock.low_calls(), 1);

        // Persisting is last-writer-wins, independent of display trust.
        let cache = LocationCache::new(store, chrono::Duration::hours(24));
        assert_eq!(cache.load(), Some(NEAR));
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_is_silent() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_low(
            Duration::ZERO,
            Err(GeolocationError::PositionUnavailable("no wifi".into())),
        );
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let mut rx = tracker.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 1);
        assert_eq!(fix(&updates[0]).source, FixSource::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_failure_is_surfaced_only_without_a_real_fix() {
        let mock = Arc::new(MockGeolocation::new());
        let mut tracker = LocationTracker::new(
            mock.clone(),
            store_with_cache(chrono::Duration::hours(1)),
            TierSettings::default(),
        );

        let mut rx = tracker.start();
        drain(&mut rx);
        mock.push_watch(Err(GeolocationError::PermissionDenied));
        match rx.recv().await.unwrap() {
            LocationUpdate::Failed(failure) => {
                assert!(failure.is_permission_denied());
                assert_eq!(failure.message, "Permission denied. Please enable location services.");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        mock.push_watch(Ok(GPS));
        assert_eq!(fix(&rx.recv().await.unwrap()).source, FixSource::Gps);

        mock.push_watch(Err(GeolocationError::PositionUnavailable("tunnel".into())));
        assert!(matches!(
            rx.recv().await.unwrap(),
            LocationUpdate::Degraded(GeolocationError::PositionUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_watch_times_out_after_fifteen_seconds() {
        let mock = Arc::new(MockGeolocation::new());
        let mut tracker =
            LocationTracker::new(mock, Arc::new(MemoryStore::default()), TierSettings::default());

        let mut rx = tracker.start();
        drain(&mut rx);
        let started = tokio::time::Instant::now();
        match rx.recv().await.unwrap() {
            LocationUpdate::Failed(failure) => assert_eq!(failure.error, GeolocationError::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(15) && waited < Duration::from_secs(16));
        assert!(tracker.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_watch_is_reported_once_until_a_fix_arrives() {
        let mock = Arc::new(MockGeolocation::new());
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let mut rx = tracker.start();
        drain(&mut rx);
        tokio::time::sleep(Duration::from_secs(50)).await;
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 1);
        assert!(matches!(&updates[0], LocationUpdate::Failed(f) if f.error == GeolocationError::Timeout));

        mock.push_watch(Ok(GPS));
        assert_eq!(fix(&rx.recv().await.unwrap()).source, FixSource::Gps);

        tokio::time::sleep(Duration::from_secs(50)).await;
        let updates = drain(&mut rx);
        assert_eq!(updates, vec![LocationUpdate::Degraded(GeolocationError::Timeout)]);
        assert!(tracker.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_retries_once_at_low_accuracy() {
        let mock = Arc::new(MockGeolocation::new());
        // First low-accuracy response belongs to the network tier of `start`.
        mock.script_low(
            Duration::ZERO,
            Err(GeolocationError::PositionUnavailable("no wifi".into())),
        );
        mock.script_low(Duration::ZERO, Ok(NEAR));
        mock.script_high(
            Duration::ZERO,
            Err(GeolocationError::PositionUnavailable("no fix".into())),
        );
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let mut rx = tracker.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rx);

        let located = tracker.refetch().await.unwrap();
        assert_eq!(located.source, FixSource::Network);
        assert_eq!(located.position, NEAR);
        assert_eq!(mock.high_calls(), 1);
        assert_eq!(mock.low_calls(), 2);

        let emitted = fix(&rx.try_recv().unwrap());
        assert_eq!(emitted, located);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_high_accuracy_timeout_falls_back() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_low(Duration::from_secs(1), Ok(NEAR));
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let started = tokio::time::Instant::now();
        let located = tracker.refetch().await.unwrap();
        assert_eq!(located.source, FixSource::Network);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(21) && waited < Duration::from_secs(22));
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_permission_denied_does_not_retry() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_high(Duration::ZERO, Err(GeolocationError::PermissionDenied));
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let failure = tracker.refetch().await.unwrap_err();
        assert!(failure.is_permission_denied());
        assert_eq!(
            failure.message,
            "Location permission denied. Please enable location services."
        );
        assert_eq!(mock.low_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_exhausted_suggests_moving_the_pin() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_high(Duration::ZERO, Err(GeolocationError::Timeout));
        mock.script_low(Duration::ZERO, Err(GeolocationError::Timeout));
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let failure = tracker.refetch().await.unwrap_err();
        assert!(failure.message.contains("move the pin manually"));
        assert_eq!(mock.low_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_discards_the_pending_network_fix() {
        let mock = Arc::new(MockGeolocation::new());
        mock.script_low(Duration::from_secs(3), Ok(NEAR));
        mock.script_high(Duration::ZERO, Ok(GPS));
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let mut rx = tracker.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.low_calls(), 1);

        let located = tracker.refetch().await.unwrap();
        assert_eq!(located.position, GPS);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let positions: Vec<Position> = drain(&mut rx)
            .iter()
            .filter_map(|u| match u {
                LocationUpdate::Fix(f) => Some(f.position),
                _ => None,
            })
            .collect();
        assert!(!positions.contains(&NEAR));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_releases_the_watch() {
        let mock = Arc::new(MockGeolocation::new());
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        tracker.stop();
        let _rx = tracker.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(tracker.is_watching());
        assert_eq!(mock.watch_count(), 1);

        tracker.stop();
        tracker.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!tracker.is_watching());
        assert!(mock.watch_released());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_keeps_a_single_watch() {
        let mock = Arc::new(MockGeolocation::new());
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let _first = tracker.start();
        let _second = tracker.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(mock.watch_count(), 2);
        assert_eq!(mock.active_watches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_provider_reports_unsupported() {
        let mock = Arc::new(MockGeolocation::unavailable());
        let mut tracker =
            LocationTracker::new(mock.clone(), Arc::new(MemoryStore::default()), TierSettings::default());

        let mut rx = tracker.start();
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 2);
        assert!(matches!(
            &updates[1],
            LocationUpdate::Failed(f) if f.message == "GPS not supported by this device"
        ));
        assert_eq!(mock.watch_count(), 0);
    }
}
