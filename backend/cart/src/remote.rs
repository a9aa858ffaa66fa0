//! Server cart client.
use async_trait::async_trait;
use bank::DEFAULT_OWNER_HEADER;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::CartError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Set,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLine {
    pub item_slug: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteCart {
    pub id: String,
    pub lines: Vec<RemoteLine>,
}

impl RemoteCart {
    pub fn slugs(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.item_slug.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOutcome {
    #[serde(flatten)]
    pub cart: RemoteCart,
    pub removed_invalid: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    #[serde(flatten)]
    pub cart: RemoteCart,
    pub removed_from_merge: Vec<String>,
}

/// The signed-in shopper's cart, as seen from the client.
#[async_trait]
pub trait CartApi: Send + Sync {
    async fn fetch(&self, owner: &str) -> Result<RemoteCart, CartError>;

    async fn patch(
        &self,
        owner: &str,
        op: PatchOp,
        slugs: &[String],
    ) -> Result<PatchOutcome, CartError>;

    async fn merge(&self, owner: &str, local_slugs: &[String]) -> Result<MergeOutcome, CartError>;
}

#[derive(Serialize)]
struct PatchBody<'a> {
    op: PatchOp,
    slugs: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeBody<'a> {
    local_slugs: &'a [String],
}

#[derive(Clone)]
pub struct HttpCartApi {
    client: Client,
    base_url: String,
    owner_header: String,
}

impl HttpCartApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner_header: DEFAULT_OWNER_HEADER.to_string(),
        }
    }

    pub fn with_owner_header(mut self, owner_header: impl Into<String>) -> Self {
        self.owner_header = owner_header.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

pub(crate) async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, CartError> {
    let response = request.send().await?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(CartError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("Request rejected with {status}: {body}");

        return Err(CartError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.json().await?)
}

#[async_trait]
impl CartApi for HttpCartApi {
    async fn fetch(&self, owner: &str) -> Result<RemoteCart, CartError> {
        send(
            self.client
                .get(self.url("/cart"))
                .header(&self.owner_header, owner),
        )
        .await
    }

    async fn patch(
        &self,
        owner: &str,
        op: PatchOp,
        slugs: &[String],
    ) -> Result<PatchOutcome, CartError> {
        send(
            self.client
                .patch(self.url("/cart"))
                .header(&self.owner_header, owner)
                .json(&PatchBody { op, slugs }),
        )
        .await
    }

    async fn merge(&self, owner: &str, local_slugs: &[String]) -> Result<MergeOutcome, CartError> {
        send(
            self.client
                .post(self.url("/cart/merge"))
                .header(&self.owner_header, owner)
                .json(&MergeBody { local_slugs }),
        )
        .await
    }
}
