use crossterm::event::{KeyCode, KeyEvent};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::geo::display_distance;
use crate::geocode::{coordinate_fallback, is_coordinate_fallback, AddressUpdate};
use crate::location::LocationUpdate;
use crate::models::{EtaEstimate, Position, PositionFix};

/// Work the main loop hands to the background pipelines.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Manual "locate me".
    Locate,
    /// The pickup pin settled somewhere new; re-resolve the address and ETA.
    MovePickup(Position),
    /// `address` is `None` when only a coordinate string is on screen and a
    /// final lookup is needed.
    ConfirmPickup {
        position: Position,
        address: Option<String>,
    },
}

pub struct App {
    pub user_fix: Option<PositionFix>,
    pub pickup: Position,
    // The pin tracks the user until they drag it; "locate me" re-attaches it.
    pub pin_follows_user: bool,
    pub address_text: String,
    pub address_resolved: bool,
    pub eta: Option<EtaEstimate>,
    pub last_eta_update: Option<Instant>,
    pub is_locating: bool,
    pub location_error: Option<String>,
    pub show_permission_prompt: bool,
    pub confirmed_pickup: Option<String>,
    pub tick_count: usize,
    pub should_quit: bool,
    pub map_span_deg: f64,
    pin_step_m: f64,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let pickup = config.location.fallback_position();
        Self {
            user_fix: None,
            pickup,
            pin_follows_user: true,
            address_text: coordinate_fallback(pickup),
            address_resolved: false,
            eta: None,
            last_eta_update: None,
            is_locating: true,
            location_error: None,
            show_permission_prompt: false,
            confirmed_pickup: None,
            tick_count: 0,
            should_quit: false,
            map_span_deg: config.ui.map_span_deg,
            pin_step_m: config.ui.pin_step_m,
        }
    }

    pub fn on_tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);
    }

    pub fn on_location(&mut self, update: LocationUpdate) -> Option<Command> {
        match update {
            LocationUpdate::Fix(fix) => {
                debug!("Fix from {}", fix.source.label());
                self.user_fix = Some(fix);
                if fix.source.is_live() {
                    self.is_locating = false;
                    self.location_error = None;
                    self.show_permission_prompt = false;
                }
                if self.pin_follows_user && self.pickup != fix.position {
                    return Some(self.move_pickup(fix.position));
                }
                None
            }
            LocationUpdate::Degraded(e) => {
                debug!("Location degraded: {}", e);
                None
            }
            LocationUpdate::Failed(failure) => {
                self.is_locating = false;
                self.show_permission_prompt = failure.is_permission_denied();
                self.location_error = Some(failure.message);
                None
            }
        }
    }

    pub fn on_address(&mut self, update: AddressUpdate) {
        // A result for a pin position we already left is stale
        let position = match &update {
            AddressUpdate::Resolved(address) => address.source_position,
            AddressUpdate::Unresolved { position, .. } => *position,
        };
        if position != self.pickup {
            debug!("Dropping address for a previous pin position");
            return;
        }
        self.address_resolved = matches!(update, AddressUpdate::Resolved(_));
        self.address_text = update.display_text().to_string();
    }

    pub fn on_eta(&mut self, estimate: EtaEstimate) {
        self.eta = Some(estimate);
        self.last_eta_update = Some(Instant::now());
    }

    pub fn on_pickup_confirmed(&mut self, address: String) {
        info!("Pickup confirmed at {}", address);
        self.address_text = address.clone();
        self.confirmed_pickup = Some(address);
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        if self.show_permission_prompt {
            if let KeyCode::Esc | KeyCode::Enter = key.code {
                self.show_permission_prompt = false;
            }
            if key.code != KeyCode::Char('q') {
                return None;
            }
        }

        let step = self.pin_step_m;
        let moved = match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                return None;
            }
            KeyCode::Up | KeyCode::Char('k') => self.pickup.offset_meters(step, 0.0),
            KeyCode::Down | KeyCode::Char('j') => self.pickup.offset_meters(-step, 0.0),
            KeyCode::Right | KeyCode::Char('l') => self.pickup.offset_meters(0.0, step),
            KeyCode::Left | KeyCode::Char('h') => self.pickup.offset_meters(0.0, -step),
            KeyCode::Char('g') => {
                self.is_locating = true;
                self.location_error = None;
                self.pin_follows_user = true;
                return Some(Command::Locate);
            }
            KeyCode::Char('c') | KeyCode::Enter => {
                let address = (!is_coordinate_fallback(&self.address_text) && self.address_resolved)
                    .then(|| self.address_text.clone());
                return Some(Command::ConfirmPickup {
                    position: self.pickup,
                    address,
                });
            }
            KeyCode::Esc => {
                self.location_error = None;
                return None;
            }
            _ => return None,
        };

        self.pin_follows_user = false;
        Some(self.move_pickup(moved))
    }

    fn move_pickup(&mut self, position: Position) -> Command {
        self.pickup = position;
        self.confirmed_pickup = None;
        Command::MovePickup(position)
    }

    /// Straight-line distance from the user's live position to the pin.
    pub fn distance_to_pickup(&self) -> Option<String> {
        self.user_fix
            .filter(|fix| fix.source.is_live())
            .map(|fix| display_distance(&fix.position, &self.pickup))
    }
}
