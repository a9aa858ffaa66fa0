//! # Cart Storage
//!
//! One cart per owner, stored as a JSON document.
//!
//! ## Redis
//!
//! - Single hash `carts`: field is the owner identity, value is the serialized cart
//! - O(1) lookup per owner, whole-cart overwrite on save
//! - Carts are never deleted, only emptied
//!
//! ## Memory
//!
//! Same contract kept in a map. Used when no Redis URL is configured and in tests.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cart::ServerCart;

pub const CARTS_KEY: &str = "carts";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] RedisError),

    #[error("corrupt cart document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[async_trait]
pub trait CartStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn load(&self, owner: &str) -> Result<Option<ServerCart>, StoreError>;

    async fn save(&self, cart: &ServerCart) -> Result<(), StoreError>;
}

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;

    client.get_connection_manager_with_config(config).await
}

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CartStore for RedisStore {
    fn backend_tag(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, owner: &str) -> Result<Option<ServerCart>, StoreError> {
        let mut connection = self.connection.clone();
        let document: Option<String> = connection.hget(CARTS_KEY, owner).await?;

        Ok(document
            .map(|document| serde_json::from_str(&document))
            .transpose()?)
    }

    async fn save(&self, cart: &ServerCart) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let document = serde_json::to_string(cart)?;

        let _: () = connection.hset(CARTS_KEY, &cart.owner, document).await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    carts: RwLock<HashMap<String, ServerCart>>,
}

#[async_trait]
impl CartStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, owner: &str) -> Result<Option<ServerCart>, StoreError> {
        Ok(self.carts.read().await.get(owner).cloned())
    }

    async fn save(&self, cart: &ServerCart) -> Result<(), StoreError> {
        self.carts
            .write()
            .await
            .insert(cart.owner.clone(), cart.clone());

        Ok(())
    }
}
