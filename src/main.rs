use color_eyre::{eyre::eyre, Result};
use eframe::egui;
use growstudio::config::ControllerConfig;
use growstudio::persistence::{PreferenceStore, Preferences, TomlPreferenceStore};
use growstudio::reservoir::ReservoirController;
use growstudio::ui::ReservoirPanel;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(ControllerConfig::default_path);
    info!("Loading controller config from {}", config_path.display());
    let config = ControllerConfig::load_or_default(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load config: {}", e))?;

    let store = TomlPreferenceStore::default_location();
    let preferences = match store.load().await {
        Ok(preferences) => preferences,
        Err(e) => {
            warn!("Unable to load preferences, using defaults: {}", e);
            Preferences::default()
        }
    };
    let preferences = Arc::new(Mutex::new(preferences));

    let mut controller =
        ReservoirController::new(config).map_err(|e| eyre!("Failed to create controller: {}", e))?;
    controller.on_connected(|| info!("Broker connection established"));
    controller.on_connection_lost(|| warn!("Broker connection lost"));
    controller.on_fatal(|failure| {
        error!(
            "Giving up on the broker after {} attempts: {}",
            failure.failed_attempts, failure.last_error
        )
    });
    controller
        .connect()
        .map_err(|e| eyre!("Failed to start connection: {}", e))?;

    info!("Starting UI");
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("GrowStudio")
            .with_inner_size([460.0, 620.0]),
        ..Default::default()
    };

    let panel_preferences = preferences.clone();
    eframe::run_native(
        "GrowStudio",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(ReservoirPanel::new(
                cc,
                controller,
                panel_preferences,
            )))
        }),
    )
    .map_err(|e| eyre!("UI terminated with an error: {}", e))?;

    let preferences = preferences.lock().clone();
    store
        .save(&preferences)
        .await
        .map_err(|e| eyre!("Failed to save preferences: {}", e))?;
    info!("Preferences saved to {}", store.path().display());

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
