//! Catalog validation collaborator.
use async_trait::async_trait;
use bank::{Catalog, Validation};
use reqwest::Client;
use serde::Serialize;

use crate::{error::CartError, remote::send};

/// Splits candidate slugs into those still purchasable and those not.
///
/// Callers pass unique slugs; implementations must not assume it.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, slugs: &[String]) -> Result<Validation, CartError>;
}

#[async_trait]
impl Validator for Catalog {
    async fn validate(&self, slugs: &[String]) -> Result<Validation, CartError> {
        Ok(Catalog::validate(self, slugs))
    }
}

#[derive(Serialize)]
struct ValidateBody<'a> {
    slugs: &'a [String],
}

#[derive(Clone)]
pub struct HttpValidator {
    client: Client,
    url: String,
}

impl HttpValidator {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/catalog/validate", base_url.as_ref().trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(&self, slugs: &[String]) -> Result<Validation, CartError> {
        send(self.client.post(&self.url).json(&ValidateBody { slugs })).await
    }
}
