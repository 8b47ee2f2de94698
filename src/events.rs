//! Event types and the input/tick driver for the pickup screen.
//!
//! Terminal input, ticks and the three background pipelines (location tiers,
//! address resolver, ETA worker) all feed one channel. The main loop in
//! `main.rs` drains it through [`EventHandler::next`]; background tasks post
//! into it through a clone of [`EventHandler::tx`].

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

use crate::geocode::AddressUpdate;
use crate::location::LocationUpdate;
use crate::models::EtaEstimate;

/// Events processed by the application event loop.
#[derive(Debug)]
pub enum Event {
    /// Periodic tick used for the locating spinner and redraws.
    Tick,
    /// User key press from the terminal.
    Input(KeyEvent),
    /// Fix, degradation or failure from the location tiers.
    Location(LocationUpdate),
    /// Debounced reverse-geocode result for the pickup pin.
    Address(AddressUpdate),
    /// New or reused pickup ETA.
    Eta(EtaEstimate),
    /// Final address text once a pickup is confirmed.
    PickupConfirmed(String),
}

/// Multiplexes terminal input and ticks into a single event stream.
pub struct EventHandler {
    /// Sender for posting events from the background pipelines.
    pub tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    /// Creates the handler and spawns the input/tick task.
    ///
    /// The task polls crossterm with a timeout of `tick_rate_ms`, sending
    /// [`Event::Input`] on key press and [`Event::Tick`] when the interval
    /// elapses. It exits once the receiving side is gone or the terminal
    /// stops answering.
    pub fn new(tick_rate_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();

        tokio::spawn(async move {
            let tick_rate = Duration::from_millis(tick_rate_ms);
            let mut last_tick = Instant::now();
            loop {
                let timeout = tick_rate
                    .checked_sub(last_tick.elapsed())
                    .unwrap_or(Duration::from_secs(0));
                match event::poll(timeout) {
                    Ok(true) => match event::read() {
                        // Windows reports releases too
                        Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                            if event_tx.send(Event::Input(key)).is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Terminal read failed: {}", e);
                            break;
                        }
                    },
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Terminal poll failed: {}", e);
                        break;
                    }
                }
                if last_tick.elapsed() >= tick_rate {
                    if event_tx.send(Event::Tick).is_err() {
                        break;
                    }
                    last_tick = Instant::now();
                }
            }
        });

        Self { tx, rx }
    }

    /// Receives the next event. `None` only once every sender is dropped.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
