mod audio;
mod catalog;
mod config;
mod dialogue;
mod error;
mod handlers;
mod llm;
mod matcher;
mod monday_types;
mod notifier;
mod openai_types;
mod session;
mod tasks;
mod tts;
mod twilio_types;
mod types;

use crate::types::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

pub mod consts {
    /// Monday items_page page size.
    pub const CATALOG_PAGE_SIZE: u32 = 100;
    /// Upper bound on catalog rows pulled per matcher run.
    pub const CATALOG_MAX_ITEMS: usize = 500;
    /// A property card carries at most this many photo messages.
    pub const MAX_PHOTO_MESSAGES: usize = 3;
    /// Conversation history kept per session, in messages.
    pub const MAX_HISTORY_MESSAGES: usize = 20;
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
    /// Remote calls block the turn; keep them bounded.
    pub const HTTP_TIMEOUT_SECS: u64 = 60;
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            (
                "inmo_voicebot",
                tracing_subscriber::filter::LevelFilter::DEBUG,
            ),
        ]));
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = config::Config::from_env();
    let port = config.port;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(consts::HTTP_TIMEOUT_SECS))
        .build()
        .expect("failed to build http client");
    let app_state = Arc::new(AppState::new(config, http_client));

    tokio::spawn(tasks::sweep_expired(app_state.clone()));

    let app = Router::new()
        .route("/voice", post(handlers::voice_inbound))
        .route("/gather", post(handlers::gather_handler))
        .route("/whatsapp", post(handlers::whatsapp_inbound))
        .route("/audio/:file", get(handlers::audio_handler))
        .route("/healthz", get(handlers::healthz))
        .route("/ops/send-whatsapp", post(handlers::ops_send_whatsapp))
        .route("/ops/send-email", post(handlers::ops_send_email))
        .route(
            "/",
            get(|| async { "Backend de voz activo. Webhooks: POST /voice, /whatsapp" }),
        )
        .with_state(app_state);

    axum::Server::bind(&format!("0.0.0.0:{port}").parse().unwrap())
        .serve(app.into_make_service())
        .await
        .unwrap();
}
