//! Pickup-location client for a tow request: progressive location tiers,
//! a debounced reverse geocoder and a proximity-gated ETA estimator, shown
//! in a terminal UI.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod eta;
pub mod events;
pub mod geo;
pub mod geocode;
pub mod location;
pub mod logging;
pub mod models;
pub mod ui;

#[cfg(test)]
mod mock;
