mod common;
mod config;
mod error;
mod network;
mod ui;

use std::error::Error;

use clap::Parser;
use dotenvy::dotenv;
use eframe::egui;
use network::{ChatBackend, RestStore};
use tokio::sync::mpsc;
use ui::{AppState, ChatApp};

use crate::common::Session;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "realtime_chat",
    version,
    about = "Minimal real-time chat over a managed Supabase table"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Prefill the name field on the join screen
    #[arg(long, value_name = "NAME")]
    name: Option<String>,
    /// Override the history polling interval
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    if let Some(secs) = cli.poll_interval {
        app_config.poll_interval_secs = secs;
    }
    app_config.validate()?;

    run_client(app_config, cli.name).await
}

async fn run_client(app_config: AppConfig, name: Option<String>) -> Result<(), Box<dyn Error>> {
    // UI -> backend
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // backend -> UI
    let (event_tx, event_rx) = mpsc::channel(100);

    let store = RestStore::new(&app_config)?;
    let realtime_url = app_config.realtime_url()?;
    let backend = ChatBackend::new(store, app_config.clone(), event_tx, cmd_rx)
        .with_realtime(realtime_url);

    tokio::spawn(async move {
        if let Err(err) = backend.run().await {
            log::error!("Backend task terminated: {err}");
        }
    });

    let session = Session::new();
    log::info!(
        "Client started for {}/{} (session {})",
        app_config.rest_base(),
        app_config.table,
        session.user_id
    );

    let mut state = AppState::new(
        session,
        app_config.join_delay(),
        app_config.history_window(),
    );
    state.name_input = name.unwrap_or_default();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Real-time Chat")
            .with_inner_size([520.0, 680.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Real-time Chat",
        options,
        Box::new(move |cc| Ok(Box::new(ChatApp::new(cc, state, cmd_tx, event_rx)))),
    )?;
    Ok(())
}
