use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Error;
use bank::{Catalog, Validation};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::info;

use super::{
    config::Config,
    database::{CartStore, MemoryStore, RedisStore, init_redis},
    menu::load_catalog,
};

pub struct AppState {
    pub config: Config,
    pub catalog: RwLock<Catalog>,
    pub store: Box<dyn CartStore>,
    owner_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, Error> {
        let catalog = load_catalog(&config).await?;
        info!("Loaded {} menu items", catalog.len());

        let store: Box<dyn CartStore> = match &config.redis_url {
            Some(redis_url) => Box::new(RedisStore::new(init_redis(redis_url).await?)),
            None => Box::new(MemoryStore::default()),
        };
        info!("Cart store backend: {}", store.backend_tag());

        Ok(Self::from_parts(config, catalog, store))
    }

    pub fn from_parts(config: Config, catalog: Catalog, store: Box<dyn CartStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            catalog: RwLock::new(catalog),
            store,
            owner_locks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn validate(&self, slugs: &[String]) -> Validation {
        self.catalog.read().await.validate(slugs)
    }

    /// Serializes cart operations per owner. The entry is pruned once the
    /// last holder or waiter lets go.
    pub async fn lock_owner(&self, owner: &str) -> OwnerGuard<'_> {
        let lock = self.locks().entry(owner.to_string()).or_default().clone();
        let guard = lock.clone().lock_owned().await;

        OwnerGuard {
            state: self,
            owner: owner.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.owner_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct OwnerGuard<'a> {
    state: &'a AppState,
    owner: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        // Release first so the guard's clone no longer counts.
        self.guard.take();

        let mut locks = self.state.locks();
        let idle = locks
            .get(&self.owner)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&self.owner);
        }
    }
}
