//! Backend for the care home. Glues the gate actuator, the Mongo care
//! records and the WhatsApp gateway behind one small HTTP surface.
//!
//!
//!
//! # General Infrastructure
//! - One process: axum server, MQTT event loop and cron scheduler all run on
//!   the same tokio runtime
//! - Mongo holds the gate logs and the care records the scans aggregate over
//! - The WhatsApp gateway is plain HTTP, one POST per message
//! - The gate actuator is an ESP relay on MQTT, commands on `cmd`, status on
//!   `stat`
//!
//!
//!
//! # Gate flow
//!
//! - `POST /gate/open` checks the night window, writes a pending log entry,
//!   publishes the press command and waits for the device ack
//! - The MQTT loop independently matches every terminal ack against the most
//!   recent pending entry, so logs close even when nobody is waiting anymore
//! - A request with no ack answers 504 and leaves the entry pending; the
//!   command may still have fired physically
//!
//!
//!
//! # Notes
//!
//! ## Ack matching
//! Acks carry no request id, the firmware cannot echo one back. Matching is
//! device + status + trailing time window, newest pending entry first. Two
//! overlapping requests on the same device can therefore swap acks; the
//! window keeps the damage bounded.
//!
//! ## Running locally
//! ```sh
//! RUST_LOG=info MQTT_TLS=false cargo run -p server
//! ```
//! Without WhatsApp credentials the notifications are skipped with a debug
//! log, everything else works.

use std::time::Duration;

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod cron;
pub mod error;
pub mod gate;
pub mod mqtt;
pub mod reports;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod whatsapp;

use routes::{logs_handler, open_handler, stale_evolutions_handler};
use state::AppState;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting cron jobs...");
    let _scheduler = cron::init_cron(state.clone())
        .await
        .expect("Cron misconfigured!");

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/gate/open", post(open_handler))
        .route("/gate/logs", get(logs_handler))
        .route("/reports/stale-evolutions", get(stale_evolutions_handler))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
