//! # Menu Catalog
//!
//! The server validates every slug that enters a cart against the menu bank.
//!
//! - Remote URL wins over the local file when both are configured
//! - Optional background refresh picks up availability changes
//! - A failed refresh keeps serving the previous catalog
use std::sync::Arc;

use anyhow::Error;
use bank::{Catalog, get_bank, remote::get_remote_bank};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{config::Config, state::AppState};

pub async fn load_catalog(config: &Config) -> Result<Catalog, Error> {
    let bank = match &config.menu_url {
        Some(url) => {
            debug!("Fetching menu bank from {url}");
            get_remote_bank(url).await?
        }
        None => {
            debug!("Reading menu bank from {}", config.menu_path);
            get_bank(&config.menu_path)?
        }
    };

    Ok(bank.into())
}

pub fn spawn_refresh(state: Arc<AppState>) {
    let Some(period) = state.config.menu_refresh else {
        return;
    };

    info!("Refreshing menu every {}s", period.as_secs());

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately and the catalog was just loaded.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match load_catalog(&state.config).await {
                Ok(catalog) => {
                    debug!("Menu refreshed: {} items", catalog.len());
                    *state.catalog.write().await = catalog;
                }
                Err(e) => warn!("Menu refresh failed, keeping previous catalog: {e:#}"),
            }
        }
    });
}
