//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::eta::{DistanceMatrix, EtaError, NearbyProvider, ProviderLookup, TravelMode, TravelSummary};
use crate::geocode::{GeocodeCandidate, GeocodeError, ReverseGeocoder};
use crate::location::{GeolocationError, GeolocationProvider, PositionOptions, WatchReceiver};
use crate::models::Position;

type Scripted<T, E> = (Duration, Result<T, E>);

fn pop<T, E>(queue: &Mutex<VecDeque<Scripted<T, E>>>) -> Option<Scripted<T, E>> {
    queue.lock().unwrap().pop_front()
}

// Replays the next scripted answer after its delay; an empty script never answers.
async fn replay<T, E>(next: Option<Scripted<T, E>>) -> Result<T, E> {
    match next {
        Some((delay, result)) => {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        None => std::future::pending().await,
    }
}

pub struct MockGeolocation {
    available: bool,
    high: Mutex<VecDeque<Scripted<Position, GeolocationError>>>,
    low: Mutex<VecDeque<Scripted<Position, GeolocationError>>>,
    high_calls: AtomicUsize,
    low_calls: AtomicUsize,
    watches: Mutex<Vec<mpsc::UnboundedSender<Result<Position, GeolocationError>>>>,
}

impl MockGeolocation {
    pub fn new() -> Self {
        Self {
            available: true,
            high: Mutex::default(),
            low: Mutex::default(),
            high_calls: AtomicUsize::new(0),
            low_calls: AtomicUsize::new(0),
            watches: Mutex::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn script_high(&self, delay: Duration, result: Result<Position, GeolocationError>) {
        self.high.lock().unwrap().push_back((delay, result));
    }

    pub fn script_low(&self, delay: Duration, result: Result<Position, GeolocationError>) {
        self.low.lock().unwrap().push_back((delay, result));
    }

    /// Delivers a result to every open watch.
    pub fn push_watch(&self, result: Result<Position, GeolocationError>) {
        for tx in self.watches.lock().unwrap().iter() {
            let _ = tx.send(result.clone());
        }
    }

    pub fn high_calls(&self) -> usize {
        self.high_calls.load(Ordering::SeqCst)
    }

    pub fn low_calls(&self) -> usize {
        self.low_calls.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    pub fn active_watches(&self) -> usize {
        self.watches
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn watch_released(&self) -> bool {
        self.active_watches() == 0
    }
}

#[async_trait]
impl GeolocationProvider for MockGeolocation {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> Result<Position, GeolocationError> {
        let next = if options.high_accuracy {
            self.high_calls.fetch_add(1, Ordering::SeqCst);
            pop(&self.high)
        } else {
            self.low_calls.fetch_add(1, Ordering::SeqCst);
            pop(&self.low)
        };
        replay(next).await
    }

    fn watch_position(&self, _options: PositionOptions) -> WatchReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches.lock().unwrap().push(tx);
        rx
    }
}

pub struct MockGeocoder {
    script: Mutex<VecDeque<Scripted<Vec<GeocodeCandidate>, GeocodeError>>>,
    calls: Mutex<Vec<Position>>,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self {
            script: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn script(&self, delay: Duration, result: Result<Vec<GeocodeCandidate>, GeocodeError>) {
        self.script.lock().unwrap().push_back((delay, result));
    }

    pub fn calls(&self) -> Vec<Position> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReverseGeocoder for MockGeocoder {
    async fn reverse_geocode(
        &self,
        position: Position,
    ) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
        self.calls.lock().unwrap().push(position);
        replay(pop(&self.script)).await
    }
}

pub struct MockProviders {
    script: Mutex<VecDeque<Scripted<Vec<NearbyProvider>, EtaError>>>,
    calls: AtomicUsize,
}

impl MockProviders {
    pub fn new() -> Self {
        Self {
            script: Mutex::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, result: Result<Vec<NearbyProvider>, EtaError>) {
        self.script.lock().unwrap().push_back((Duration::ZERO, result));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderLookup for MockProviders {
    async fn nearest_available(
        &self,
        _position: Position,
        _limit: usize,
    ) -> Result<Vec<NearbyProvider>, EtaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        replay(pop(&self.script)).await
    }
}

pub struct MockMatrix {
    script: Mutex<VecDeque<Scripted<TravelSummary, EtaError>>>,
    calls: Mutex<Vec<(Position, Position)>>,
}

impl MockMatrix {
    pub fn new() -> Self {
        Self {
            script: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn script(&self, result: Result<TravelSummary, EtaError>) {
        self.script.lock().unwrap().push_back((Duration::ZERO, result));
    }

    pub fn calls(&self) -> Vec<(Position, Position)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DistanceMatrix for MockMatrix {
    async fn travel(
        &self,
        origin: Position,
        destination: Position,
        _mode: TravelMode,
    ) -> Result<TravelSummary, EtaError> {
        self.calls.lock().unwrap().push((origin, destination));
        replay(pop(&self.script)).await
    }
}
