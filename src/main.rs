mod auth;
mod config;
mod middleware;

mod confirmation;
mod db;
mod display;
mod error;
mod models;
mod notify;
mod queue;
mod routes;

use std::sync::Arc;

use crate::{config::Config, display::broadcaster::DisplayHub, models::AppState};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        auto_open_same_day: cfg.auto_open_same_day,
        display_call_seconds: cfg.display_call_seconds,
        displays: DisplayHub::new(),
        notifier: Arc::new(notify::TracingNotifier),
    };

    // Browser/WebView clients (registrar desk app, waiting-room boards) call
    // the API cross-origin; without this the OPTIONS preflight 405s.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
