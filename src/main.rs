use color_eyre::Result;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use towme_pickup::{
    api::{self, GoogleMaps, IpGeolocation, SupabaseDrivers},
    app::{App, Command},
    config::Config,
    db,
    eta::{EtaEstimator, EtaOutcome, EtaSettings},
    events::{Event, EventHandler},
    geocode::{self, AddressResolver, ResolverSettings, ReverseGeocoder},
    location::{LocationTracker, TierSettings},
    logging,
    models::Position,
    ui,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // Instrumentation and safety
    let _log_guard = logging::initialize_logging(&config.storage.log_dir);
    install_panic_hook();
    color_eyre::install()?;

    // Collaborators
    let http = api::http_client(Duration::from_secs(config.backend.request_timeout_secs))?;
    let maps = Arc::new(GoogleMaps::new(
        http.clone(),
        &config.geocode.base_url,
        &config.geocode.api_key,
    ));
    let drivers = Arc::new(SupabaseDrivers::new(
        http,
        &config.backend.supabase_url,
        &config.backend.anon_key,
    ));
    let store = db::open_store(&config.storage.db_path);
    let provider = Arc::new(IpGeolocation::new(&config.location.lookup_ip));

    // Ready terminal and state
    let mut terminal = setup_terminal()?;
    let mut app = App::new(&config);
    let mut events = EventHandler::new(config.ui.tick_rate_ms);

    // Location tiers
    let tracker = LocationTracker::new(provider, store, TierSettings::from(&config.location));
    let (locate_tx, locate_rx) = mpsc::unbounded_channel();
    spawn_location_worker(tracker, locate_rx, events.tx.clone());

    // Address resolver
    let (mut resolver, mut address_rx) =
        AddressResolver::new(maps.clone(), ResolverSettings::from(&config.geocode));
    let address_tx = events.tx.clone();
    tokio::spawn(async move {
        while let Some(update) = address_rx.recv().await {
            if address_tx.send(Event::Address(update)).is_err() {
                break;
            }
        }
    });

    // ETA
    let estimator = EtaEstimator::new(drivers, maps.clone(), EtaSettings::from(&config.eta));
    let (eta_tx, eta_rx) = mpsc::unbounded_channel();
    spawn_eta_worker(estimator, eta_rx, events.tx.clone());

    resolver.resolve(app.pickup);
    let _ = eta_tx.send(app.pickup);

    // Main loop
    while !app.should_quit {
        terminal.draw(|f| ui::render(f, &app))?;

        let Some(event) = events.next().await else {
            break;
        };
        let command = match event {
            Event::Tick => {
                app.on_tick();
                None
            }
            Event::Input(key) => app.handle_key(key),
            Event::Location(update) => app.on_location(update),
            Event::Address(update) => {
                app.on_address(update);
                None
            }
            Event::Eta(estimate) => {
                app.on_eta(estimate);
                None
            }
            Event::PickupConfirmed(address) => {
                app.on_pickup_confirmed(address);
                None
            }
        };

        match command {
            Some(Command::Locate) => {
                let _ = locate_tx.send(());
            }
            Some(Command::MovePickup(position)) => {
                resolver.resolve(position);
                let _ = eta_tx.send(position);
            }
            Some(Command::ConfirmPickup { address: Some(address), .. }) => {
                app.on_pickup_confirmed(address);
            }
            Some(Command::ConfirmPickup { position, address: None }) => {
                confirm_with_lookup(
                    maps.clone(),
                    position,
                    config.geocode.strip_suffixes.clone(),
                    events.tx.clone(),
                );
            }
            None => {}
        }
    }

    info!("Shutting down");
    resolver.dispose();
    drop(locate_tx);
    drop(eta_tx);
    restore_terminal(terminal)?;
    Ok(())
}

/// Owns the tracker: forwards its stream and runs "locate me" requests.
/// Dropping `locate_rx`'s sender ends the session.
fn spawn_location_worker(
    mut tracker: LocationTracker,
    mut locate_rx: mpsc::UnboundedReceiver<()>,
    tx: mpsc::UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        let mut updates = tracker.start();
        loop {
            tokio::select! {
                Some(update) = updates.recv() => {
                    if tx.send(Event::Location(update)).is_err() {
                        break;
                    }
                }
                request = locate_rx.recv() => match request {
                    // The outcome also lands in `updates`
                    Some(()) => {
                        let _ = tracker.refetch().await;
                    }
                    None => break,
                },
            }
        }
        tracker.stop();
        debug!("Location worker stopped");
    });
}

fn spawn_eta_worker(
    mut estimator: EtaEstimator,
    mut positions: mpsc::UnboundedReceiver<Position>,
    tx: mpsc::UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        while let Some(mut position) = positions.recv().await {
            // Only the pin's latest resting place matters
            while let Ok(next) = positions.try_recv() {
                position = next;
            }
            if let EtaOutcome::Updated(estimate) = estimator.estimate(position).await {
                if tx.send(Event::Eta(estimate)).is_err() {
                    break;
                }
            }
        }
    });
}

// Final lookup before booking; keeps the coordinates if the geocoder fails.
fn confirm_with_lookup(
    geocoder: Arc<dyn ReverseGeocoder>,
    position: Position,
    strip_suffixes: Vec<String>,
    tx: mpsc::UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        let address = match geocode::resolve_once(geocoder.as_ref(), position, &strip_suffixes).await
        {
            Ok(address) => address.formatted_text,
            Err(e) => {
                warn!("Final geocode failed: {}", e);
                geocode::coordinate_fallback(position)
            }
        };
        let _ = tx.send(Event::PickupConfirmed(address));
    });
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen, crossterm::cursor::Hide)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), crossterm::terminal::LeaveAlternateScreen, crossterm::cursor::Show)?;
    Ok(())
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Force terminal cleanup!
        crossterm::terminal::disable_raw_mode().ok();
        crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen, crossterm::cursor::Show).ok();
        original_hook(panic_info);
    }));
}
