//! Documentation of the kitchen storefront cart service.
//!
//!
//!
//! # General Infrastructure
//! - Shopper's browser talks to the storefront, which talks to this service for carts
//! - Reverse proxy in front terminates sessions and forwards the owner identity header
//! - Requests without that header are anonymous and get `401` on every cart route
//! - Anonymous shoppers keep their cart locally (see the `cart` crate) until they sign in
//!
//!
//!
//! # Routes
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | `GET` | `/cart` | | `{id, lines}` |
//! | `PATCH` | `/cart` | `{op, slugs}`, op one of add/remove/set | `{id, lines, removedInvalid}` |
//! | `POST` | `/cart/merge` | `{localSlugs}` | `{id, lines, removedFromMerge}` |
//! | `POST` | `/catalog/validate` | `{slugs}` | `{valid, invalid}` |
//! | `GET` | `/health` | | `ok` |
//!
//! Lines are `{itemSlug, addedAt}`. A malformed body is `400`.
//!
//!
//!
//! # Notes
//!
//! ## Quantity
//! Quantity is never a counter. Three of an item is three lines, which keeps
//! removal and merge as plain list operations:
//! - `remove` takes away one stored line per input occurrence, earliest first
//! - `merge` keeps server lines first, then the local ones, multiplicities added
//!
//! ## Validation
//! Every slug entering a cart through `add`, `set` or `merge` is checked against
//! the menu bank. Unknown or unavailable items are dropped and reported back so
//! the storefront can tell the shopper. `remove` is never validated.
//!
//! ## Consistency
//! Writes for one owner are serialized by a per-owner lock. Two clients of the
//! same owner still race last-write-wins, which is acceptable for a cart.
//!
//!
//!
//! # Setup
//!
//! Write a sample menu bank.
//! ```sh
//! cargo run -p tester -- menu.bin
//! ```
//!
//! Start the server with an in-memory store.
//! ```sh
//! RUST_LOG=info MENU_PATH=menu.bin cargo run -p kitchen
//! ```
//!
//! Use Redis instead.
//! ```sh
//! REDIS_URL=redis://127.0.0.1/ cargo run -p kitchen
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::Error;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
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

pub mod auth;
pub mod cart;
pub mod config;
pub mod database;
pub mod error;
pub mod menu;
pub mod routes;
pub mod state;
pub mod utils;

use config::Config;
use menu::spawn_refresh;
use routes::{
    get_cart_handler, health_handler, merge_cart_handler, patch_cart_handler, validate_handler,
};
use state::AppState;

pub async fn start_server() -> Result<(), Error> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new(Config::load()).await?;
    spawn_refresh(state.clone());

    info!("Starting server...");

    let app = build_router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");

    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::PATCH, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            state.config.owner_header.clone(),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/cart", get(get_cart_handler).patch(patch_cart_handler))
        .route("/cart/merge", post(merge_cart_handler))
        .route("/catalog/validate", post(validate_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
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
