//! # Menu Bank
//!
//! Catalog of purchasable menu items, keyed by slug.
//!
//! The bank is produced offline (see the `tester` binary for a sample) and
//! either shipped next to the server or fetched from a remote URL at startup.
//! Carts only ever hold slugs, so the one question the rest of the system
//! asks the catalog is "which of these slugs still exist and can be bought".
//! That is [`Catalog::validate`].
//!
//! ## Validation
//!
//! - Candidates may repeat; the catalog is queried once per unique slug
//! - Result is two disjoint sets, `valid` and `invalid`
//! - Not found, unavailable, or not slug-shaped all count as invalid
//! - Multiplicity is the caller's business
use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
};

use anyhow::{Context, Error};
use prost::Message;
use serde::{Deserialize, Serialize};

pub mod menu;
pub mod remote;
pub mod slug;

use menu::{Bank, Item};
pub use slug::{is_slug, slugify};

/// Header carrying the signed-in owner identity between storefront, proxy and cart service.
pub const DEFAULT_OWNER_HEADER: &str = "x-kitchen-owner";

pub fn get_bank(path: impl AsRef<Path>) -> Result<Bank, Error> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("reading menu bank {}", path.display()))?;

    Ok(Bank::decode(&*data)?)
}

pub fn write_bank(path: impl AsRef<Path>, bank: &Bank) -> Result<(), Error> {
    let path = path.as_ref();

    fs::write(path, bank.encode_to_vec())
        .with_context(|| format!("writing menu bank {}", path.display()))
}

/// Outcome of checking a batch of slugs against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: BTreeSet<String>,
    pub invalid: BTreeSet<String>,
}

impl Validation {
    pub fn is_valid(&self, slug: &str) -> bool {
        self.valid.contains(slug)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: HashMap<String, Item>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, slug: &str) -> Option<&Item> {
        self.items.get(slug)
    }

    pub fn validate<S: AsRef<str>>(&self, candidates: &[S]) -> Validation {
        let unique: BTreeSet<&str> = candidates.iter().map(AsRef::as_ref).collect();
        let mut validation = Validation::default();

        for slug in unique {
            let purchasable =
                is_slug(slug) && self.items.get(slug).is_some_and(|item| item.available);

            if purchasable {
                validation.valid.insert(slug.to_string());
            } else {
                validation.invalid.insert(slug.to_string());
            }
        }

        validation
    }
}

impl From<Bank> for Catalog {
    fn from(bank: Bank) -> Self {
        Self { items: bank.items }
    }
}
