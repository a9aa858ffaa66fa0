//! # Server Cart
//!
//! A cart is an ordered list of lines. Quantity is never stored: three of an
//! item is three lines with the same slug. Every mutation goes through the
//! owner's lock, so load-modify-save never interleaves for one owner.
use std::collections::HashMap;

use bank::Validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub item_slug: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCart {
    pub id: String,
    pub owner: String,
    pub lines: Vec<CartLine>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Add { slugs: Vec<String> },
    Remove { slugs: Vec<String> },
    Set { slugs: Vec<String> },
}

impl ServerCart {
    pub fn new(owner: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn slugs(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.item_slug.clone()).collect()
    }

    /// Appends one line per valid slug, in input order.
    pub fn append(&mut self, slugs: &[String], validation: &Validation, now: DateTime<Utc>) {
        self.lines.extend(
            slugs
                .iter()
                .filter(|slug| validation.is_valid(slug))
                .map(|slug| line(slug, now)),
        );
    }

    /// Multiset difference: each input occurrence removes the earliest stored line with that slug.
    pub fn remove(&mut self, slugs: &[String]) {
        let mut pending: HashMap<&str, usize> = HashMap::new();
        for slug in slugs {
            *pending.entry(slug.as_str()).or_default() += 1;
        }

        self.lines.retain(|line| match pending.get_mut(line.item_slug.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        });
    }

    /// Replaces every line with one line per valid slug, in input order.
    pub fn replace(&mut self, slugs: &[String], validation: &Validation, now: DateTime<Utc>) {
        self.lines.clear();
        self.append(slugs, validation, now);
    }
}

fn line(slug: &str, now: DateTime<Utc>) -> CartLine {
    CartLine {
        item_slug: slug.to_string(),
        added_at: now,
    }
}

fn rejected(validation: Validation) -> Vec<String> {
    validation.invalid.into_iter().collect()
}

async fn load_or_create(state: &AppState, owner: &str) -> Result<ServerCart, AppError> {
    if let Some(cart) = state.store.load(owner).await? {
        return Ok(cart);
    }

    debug!("Creating cart for {owner}");
    let cart = ServerCart::new(owner);
    state.store.save(&cart).await?;

    Ok(cart)
}

pub async fn fetch_cart(state: &AppState, owner: &str) -> Result<ServerCart, AppError> {
    let _guard = state.lock_owner(owner).await;

    load_or_create(state, owner).await
}

/// Applies a patch, returning the updated cart and the slugs rejected by the catalog.
pub async fn patch_cart(
    state: &AppState,
    owner: &str,
    patch: Patch,
) -> Result<(ServerCart, Vec<String>), AppError> {
    let _guard = state.lock_owner(owner).await;

    let mut cart = load_or_create(state, owner).await?;
    let now = Utc::now();

    let removed_invalid = match patch {
        Patch::Add { slugs } => {
            let validation = state.validate(&slugs).await;
            cart.append(&slugs, &validation, now);
            rejected(validation)
        }
        Patch::Remove { slugs } => {
            cart.remove(&slugs);
            Vec::new()
        }
        Patch::Set { slugs } => {
            let validation = state.validate(&slugs).await;
            cart.replace(&slugs, &validation, now);
            rejected(validation)
        }
    };

    state.store.save(&cart).await?;
    debug!("Patched cart for {owner}: {} lines", cart.lines.len());

    Ok((cart, removed_invalid))
}

/// Folds a signed-in shopper's anonymous cart into their server cart.
///
/// Server lines come first, then local ones. Multiplicities add up; every
/// valid occurrence becomes a fresh line.
pub async fn merge_cart(
    state: &AppState,
    owner: &str,
    local_slugs: Vec<String>,
) -> Result<(ServerCart, Vec<String>), AppError> {
    let _guard = state.lock_owner(owner).await;

    let mut cart = load_or_create(state, owner).await?;

    let mut combined = cart.slugs();
    combined.extend(local_slugs);

    let validation = state.validate(&combined).await;
    cart.replace(&combined, &validation, Utc::now());

    state.store.save(&cart).await?;
    debug!("Merged cart for {owner}: {} lines", cart.lines.len());

    Ok((cart, rejected(validation)))
}
