//! # Cart Reconciliation Engine
//!
//! Owns the active cart the UI reads and decides where each change is
//! written.
//!
//! ## States
//!
//! - Bootstrapping: auth unknown, `loading`, no mutations, no validation
//! - Local: anonymous, backed by the [`LocalCartStore`]
//! - Server: signed in, backed by the [`CartApi`]
//!
//! Local becomes Server once, on sign-in. A non-empty local cart is merged
//! into the server cart at that moment and the local record is cleared right
//! after, so a reload cannot merge it twice. Server never goes back to Local;
//! signing out starts a new engine.
//!
//! ## Mutations
//!
//! Optimistic: the in-memory list changes first, then the backing store is
//! written (local: full overwrite, server: targeted patch), then a validation
//! pass is scheduled. A failed server write is returned to the caller and the
//! in-memory change stays.
//!
//! ## Validation
//!
//! Debounced, single flight. Unique slugs go to the [`Validator`]; every
//! occurrence of an invalid slug is pruned, the pruned list is persisted and
//! subscribers get a [`CartEvent::Pruned`]. A pass that fails is abandoned
//! without touching the cart. Results of a pass that started before a later
//! mutation are still applied.
use std::{
    collections::{BTreeSet, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{
    sync::{Mutex as AsyncMutex, broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    catalog::Validator,
    debounce::Debouncer,
    error::CartError,
    local::LocalCartStore,
    remote::{CartApi, PatchOp},
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(350);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unknown,
    Anonymous,
    Authenticated(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Server,
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCart {
    pub slugs: Vec<String>,
    pub source: Source,
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    Changed(Vec<String>),
    /// Slugs a validation pass found gone or unavailable.
    Pruned(Vec<String>),
    /// Slugs the server refused while merging the local cart at sign-in.
    MergeDropped(Vec<String>),
    /// A sign-in fetch or merge failed. Retried on the next navigation or
    /// visibility change.
    SyncFailed(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Bootstrapping,
    Local,
    Server { owner: String },
}

struct Session {
    slugs: Vec<String>,
    phase: Phase,
    loading: bool,
}

/// Where a write lands once the in-memory list has changed.
enum Target {
    Local(Vec<String>),
    Server(String),
}

impl Session {
    fn ready(&self) -> Result<(), CartError> {
        if self.loading || self.phase == Phase::Bootstrapping {
            return Err(CartError::NotReady);
        }

        Ok(())
    }

    fn target(&self) -> Target {
        match &self.phase {
            Phase::Server { owner } => Target::Server(owner.clone()),
            _ => Target::Local(self.slugs.clone()),
        }
    }

    fn source(&self) -> Source {
        match self.phase {
            Phase::Server { .. } => Source::Server,
            _ => Source::Local,
        }
    }
}

struct Inner {
    local: LocalCartStore,
    api: Arc<dyn CartApi>,
    validator: Arc<dyn Validator>,
    auth: watch::Receiver<AuthState>,
    session: Mutex<Session>,
    transition: AsyncMutex<()>,
    debouncer: Debouncer,
    events: broadcast::Sender<CartEvent>,
}

#[derive(Clone)]
pub struct CartEngine {
    inner: Arc<Inner>,
}

impl CartEngine {
    pub fn new(
        config: EngineConfig,
        local: LocalCartStore,
        api: Arc<dyn CartApi>,
        validator: Arc<dyn Validator>,
        auth: watch::Receiver<AuthState>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                local,
                api,
                validator,
                auth,
                session: Mutex::new(Session {
                    slugs: Vec::new(),
                    phase: Phase::Bootstrapping,
                    loading: true,
                }),
                transition: AsyncMutex::new(()),
                debouncer: Debouncer::new(config.debounce),
                events,
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: CartEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> ActiveCart {
        let session = self.session();

        ActiveCart {
            slugs: session.slugs.clone(),
            source: session.source(),
            loading: session.loading,
        }
    }

    pub fn local(&self) -> &LocalCartStore {
        &self.inner.local
    }

    /// Applies the current auth state: bootstraps, or signs in and merges.
    ///
    /// Idempotent; only the first call that sees a new state does any work.
    pub async fn sync_auth(&self) -> Result<(), CartError> {
        let _transition = self.inner.transition.lock().await;

        let auth = self.inner.auth.borrow().clone();
        let phase = self.session().phase.clone();

        match (phase, auth) {
            (_, AuthState::Unknown) => Ok(()),
            (Phase::Server { owner }, AuthState::Authenticated(next)) if owner != next => {
                warn!("Identity changed mid-session, keeping cart for the first owner");
                Ok(())
            }
            (Phase::Server { .. }, _) | (Phase::Local, AuthState::Anonymous) => Ok(()),
            (Phase::Bootstrapping, AuthState::Anonymous) => {
                self.bootstrap_local();
                Ok(())
            }
            (Phase::Bootstrapping | Phase::Local, AuthState::Authenticated(owner)) => {
                self.sign_in(owner).await
            }
        }
    }

    fn bootstrap_local(&self) {
        let cart = self.inner.local.read();
        debug!("Bootstrapped local cart with {} slugs", cart.slugs.len());

        {
            let mut session = self.session();
            session.slugs = cart.slugs.clone();
            session.phase = Phase::Local;
            session.loading = false;
        }

        self.emit(CartEvent::Changed(cart.slugs));
        self.request_validation();
    }

    async fn sign_in(&self, owner: String) -> Result<(), CartError> {
        let was_loading = {
            let mut session = self.session();
            std::mem::replace(&mut session.loading, true)
        };

        let local = self.inner.local.read();

        let result = if local.slugs.is_empty() {
            self.inner
                .api
                .fetch(&owner)
                .await
                .map(|cart| (cart.slugs(), Vec::new()))
        } else {
            info!("Merging {} local slugs into server cart", local.slugs.len());
            self.inner
                .api
                .merge(&owner, &local.slugs)
                .await
                .map(|outcome| (outcome.cart.slugs(), outcome.removed_from_merge))
        };

        let (slugs, dropped) = match result {
            Ok(adopted) => adopted,
            Err(e) => {
                self.session().loading = was_loading;
                return Err(e);
            }
        };

        if !local.slugs.is_empty() {
            self.inner.local.clear();
        }

        {
            let mut session = self.session();
            session.slugs = slugs.clone();
            session.phase = Phase::Server { owner };
            session.loading = false;
        }

        if !dropped.is_empty() {
            self.emit(CartEvent::MergeDropped(dropped));
        }
        self.emit(CartEvent::Changed(slugs));
        self.request_validation();

        Ok(())
    }

    pub async fn add(&self, slug: impl Into<String>) -> Result<(), CartError> {
        self.add_many(vec![slug.into()]).await
    }

    pub async fn add_many(&self, slugs: Vec<String>) -> Result<(), CartError> {
        if slugs.is_empty() {
            return Ok(());
        }

        let (target, current) = {
            let mut session = self.session();
            session.ready()?;
            session.slugs.extend(slugs.iter().cloned());
            (session.target(), session.slugs.clone())
        };
        self.emit(CartEvent::Changed(current));

        let written = match target {
            Target::Local(all) => {
                self.inner.local.set_slugs(all);
                Ok(())
            }
            Target::Server(owner) => self
                .inner
                .api
                .patch(&owner, PatchOp::Add, &slugs)
                .await
                .map(drop),
        };

        self.request_validation();
        written
    }

    /// Removes the first occurrence of `slug`. Absent slugs are a no-op.
    pub async fn remove_one(&self, slug: &str) -> Result<(), CartError> {
        let (target, current) = {
            let mut session = self.session();
            session.ready()?;

            let Some(position) = session.slugs.iter().position(|s| s == slug) else {
                return Ok(());
            };
            session.slugs.remove(position);
            (session.target(), session.slugs.clone())
        };
        self.emit(CartEvent::Changed(current));

        let written = match target {
            Target::Local(all) => {
                self.inner.local.set_slugs(all);
                Ok(())
            }
            Target::Server(owner) => self
                .inner
                .api
                .patch(&owner, PatchOp::Remove, &[slug.to_string()])
                .await
                .map(drop),
        };

        self.request_validation();
        written
    }

    pub async fn clear(&self) -> Result<(), CartError> {
        let target = {
            let mut session = self.session();
            session.ready()?;
            session.slugs.clear();
            session.target()
        };
        self.emit(CartEvent::Changed(Vec::new()));

        let written = match target {
            Target::Local(_) => {
                self.inner.local.clear();
                Ok(())
            }
            Target::Server(owner) => self
                .inner
                .api
                .patch(&owner, PatchOp::Set, &[])
                .await
                .map(drop),
        };

        self.request_validation();
        written
    }

    pub fn on_navigate(&self) {
        self.retry_pending_sync();
        self.request_validation();
    }

    pub fn on_visibility_change(&self) {
        self.retry_pending_sync();
        self.request_validation();
    }

    /// True while the auth state calls for a phase the session has not reached.
    fn sync_pending(&self) -> bool {
        let auth = self.inner.auth.borrow().clone();
        let session = self.session();
        if session.loading && session.phase != Phase::Bootstrapping {
            return false;
        }

        match (&session.phase, auth) {
            (_, AuthState::Unknown) => false,
            (Phase::Server { .. }, _) => false,
            (Phase::Local, AuthState::Anonymous) => false,
            _ => true,
        }
    }

    fn retry_pending_sync(&self) {
        if !self.sync_pending() {
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.sync_auth().await {
                warn!("Retried cart sync failed: {e}");
                engine.emit(CartEvent::SyncFailed(e.to_string()));
            }
        });
    }

    /// Arms the debounced validation pass. Needs a tokio runtime.
    pub fn request_validation(&self) {
        let engine = self.clone();

        self.inner.debouncer.schedule(move || async move {
            if let Err(e) = engine.validation_pass().await {
                debug!("Validation pass abandoned: {e}");
            }
        });
    }

    /// Runs a validation pass immediately, returning the pruned slugs.
    ///
    /// Yields an empty list when a pass is already in flight.
    pub async fn validate_now(&self) -> Result<Vec<String>, CartError> {
        self.inner
            .debouncer
            .run_now(self.validation_pass())
            .await
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn validation_pass(&self) -> Result<Vec<String>, CartError> {
        let unique: Vec<String> = {
            let session = self.session();
            if session.ready().is_err() {
                return Ok(Vec::new());
            }

            let unique: BTreeSet<&String> = session.slugs.iter().collect();
            unique.into_iter().cloned().collect()
        };
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let validation = self.inner.validator.validate(&unique).await?;
        let invalid: HashSet<&str> = validation.invalid.iter().map(String::as_str).collect();
        if invalid.is_empty() {
            return Ok(Vec::new());
        }

        let (target, kept, pruned) = {
            let mut session = self.session();
            let before = std::mem::take(&mut session.slugs);
            let (kept, dropped): (Vec<String>, Vec<String>) = before
                .into_iter()
                .partition(|slug| !invalid.contains(slug.as_str()));
            session.slugs = kept.clone();

            let pruned: BTreeSet<String> = dropped.into_iter().collect();
            (session.target(), kept, pruned.into_iter().collect::<Vec<_>>())
        };
        if pruned.is_empty() {
            return Ok(pruned);
        }

        info!("Pruned {} unavailable items from cart", pruned.len());
        self.emit(CartEvent::Pruned(pruned.clone()));
        self.emit(CartEvent::Changed(kept.clone()));

        match target {
            Target::Local(all) => self.inner.local.set_slugs(all),
            Target::Server(owner) => {
                if let Err(e) = self.inner.api.patch(&owner, PatchOp::Set, &kept).await {
                    warn!("Failed to persist pruned cart: {e}");
                }
            }
        }

        Ok(pruned)
    }

    /// Adopts a cart written by another tab while this one is local.
    fn adopt_local(&self, slugs: Vec<String>) {
        {
            let mut session = self.session();
            if session.phase != Phase::Local || session.loading {
                return;
            }
            session.slugs = slugs.clone();
        }

        debug!("Adopted local cart from another tab");
        self.emit(CartEvent::Changed(slugs));
        self.request_validation();
    }

    /// Follows auth changes and other tabs' writes until the engine is dropped.
    pub fn spawn_listeners(&self) -> Listeners {
        let engine = self.clone();
        let mut auth = self.inner.auth.clone();
        let auth_task = tokio::spawn(async move {
            loop {
                // Marks the current value seen; sync_auth reads the latest anyway.
                let _ = auth.borrow_and_update();
                if let Err(e) = engine.sync_auth().await {
                    warn!("Cart sync after auth change failed: {e}");
                    engine.emit(CartEvent::SyncFailed(e.to_string()));
                }
                if auth.changed().await.is_err() {
                    break;
                }
            }
        });

        let engine = self.clone();
        let mut storage = self.inner.local.subscribe();
        let storage_task = tokio::spawn(async move {
            while let Some(cart) = storage.recv().await {
                engine.adopt_local(cart.slugs);
            }
        });

        Listeners {
            tasks: vec![auth_task, storage_task],
        }
    }
}

/// Listener tasks; aborted on drop.
pub struct Listeners {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Listeners {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
