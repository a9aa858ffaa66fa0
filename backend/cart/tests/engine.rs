use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bank::Validation;
use cart::{
    AuthState, CartApi, CartEngine, CartError, CartEvent, EngineConfig, LocalCartStore, PatchOp,
    Source, Validator,
    local::MemoryStorage,
    remote::{MergeOutcome, PatchOutcome, RemoteCart, RemoteLine},
};
use chrono::Utc;
use tokio::{
    sync::{broadcast, watch},
    time::{sleep, timeout},
};

const OWNER: &str = "chef@district.edu";

fn slugs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn count(items: &[String], slug: &str) -> usize {
    items.iter().filter(|s| *s == slug).count()
}

/// Server cart with the same line semantics as the real service.
struct FakeApi {
    menu: BTreeSet<String>,
    carts: Mutex<HashMap<String, Vec<String>>>,
    patches: Mutex<Vec<(PatchOp, Vec<String>)>>,
    merges: AtomicUsize,
    fail: AtomicBool,
}

impl FakeApi {
    fn new(menu: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            menu: menu.iter().map(|s| s.to_string()).collect(),
            carts: Mutex::new(HashMap::new()),
            patches: Mutex::new(Vec::new()),
            merges: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn seed(&self, owner: &str, items: &[&str]) {
        self.carts
            .lock()
            .unwrap()
            .insert(owner.to_string(), slugs(items));
    }

    fn stored(&self, owner: &str) -> Vec<String> {
        self.carts
            .lock()
            .unwrap()
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    fn last_patch(&self) -> Option<(PatchOp, Vec<String>)> {
        self.patches.lock().unwrap().last().cloned()
    }

    fn check(&self) -> Result<(), CartError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CartError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        Ok(())
    }

    fn cart(&self, owner: &str) -> RemoteCart {
        RemoteCart {
            id: format!("cart-{owner}"),
            lines: self
                .stored(owner)
                .into_iter()
                .map(|item_slug| RemoteLine {
                    item_slug,
                    added_at: Utc::now(),
                })
                .collect(),
        }
    }

    fn rejected(&self, input: &[String]) -> Vec<String> {
        input
            .iter()
            .filter(|s| !self.menu.contains(*s))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl CartApi for FakeApi {
    async fn fetch(&self, owner: &str) -> Result<RemoteCart, CartError> {
        self.check()?;

        Ok(self.cart(owner))
    }

    async fn patch(
        &self,
        owner: &str,
        op: PatchOp,
        input: &[String],
    ) -> Result<PatchOutcome, CartError> {
        self.check()?;
        self.patches.lock().unwrap().push((op, input.to_vec()));

        let valid = input.iter().filter(|s| self.menu.contains(*s)).cloned();
        {
            let mut carts = self.carts.lock().unwrap();
            let lines = carts.entry(owner.to_string()).or_default();
            match op {
                PatchOp::Add => lines.extend(valid),
                PatchOp::Set => *lines = valid.collect(),
                PatchOp::Remove => {
                    for slug in input {
                        if let Some(position) = lines.iter().position(|s| s == slug) {
                            lines.remove(position);
                        }
                    }
                }
            }
        }

        let removed_invalid = match op {
            PatchOp::Remove => Vec::new(),
            _ => self.rejected(input),
        };

        Ok(PatchOutcome {
            cart: self.cart(owner),
            removed_invalid,
        })
    }

    async fn merge(&self, owner: &str, local_slugs: &[String]) -> Result<MergeOutcome, CartError> {
        self.check()?;
        self.merges.fetch_add(1, Ordering::SeqCst);

        let mut combined = self.stored(owner);
        combined.extend(local_slugs.iter().cloned());
        let removed_from_merge = self.rejected(&combined);
        combined.retain(|s| self.menu.contains(s));
        self.carts
            .lock()
            .unwrap()
            .insert(owner.to_string(), combined);

        Ok(MergeOutcome {
            cart: self.cart(owner),
            removed_from_merge,
        })
    }
}

struct FakeValidator {
    menu: Mutex<BTreeSet<String>>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeValidator {
    fn new(menu: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            menu: Mutex::new(menu.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn withdraw(&self, slug: &str) {
        self.menu.lock().unwrap().remove(slug);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for FakeValidator {
    async fn validate(&self, candidates: &[String]) -> Result<Validation, CartError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CartError::Rejected {
                status: 502,
                body: "catalog down".to_string(),
            });
        }

        let menu = self.menu.lock().unwrap();
        let (valid, invalid) = candidates
            .iter()
            .cloned()
            .partition(|slug| menu.contains(slug));

        Ok(Validation { valid, invalid })
    }
}

struct Harness {
    engine: CartEngine,
    local: LocalCartStore,
    api: Arc<FakeApi>,
    validator: Arc<FakeValidator>,
    auth: watch::Sender<AuthState>,
}

const MENU: &[&str] = &["a", "b", "burger", "fries", "salad", "y"];

fn harness_with(debounce: Duration, auth: AuthState) -> Harness {
    let local = LocalCartStore::new(Arc::new(MemoryStorage::default()));
    let api = FakeApi::new(MENU);
    let validator = FakeValidator::new(MENU);
    let (auth, auth_rx) = watch::channel(auth);

    let engine = CartEngine::new(
        EngineConfig { debounce },
        local.clone(),
        api.clone(),
        validator.clone(),
        auth_rx,
    );

    Harness {
        engine,
        local,
        api,
        validator,
        auth,
    }
}

/// Debounced passes never fire on their own during these tests.
fn harness(auth: AuthState) -> Harness {
    harness_with(Duration::from_secs(3600), auth)
}

fn signed_in() -> AuthState {
    AuthState::Authenticated(OWNER.to_string())
}

async fn next_event(events: &mut broadcast::Receiver<CartEvent>) -> CartEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("event")
}

#[tokio::test]
async fn bootstrapping_refuses_mutations() {
    let h = harness(AuthState::Unknown);

    h.engine.sync_auth().await.unwrap();

    let snapshot = h.engine.snapshot();
    assert!(snapshot.loading);
    assert!(matches!(h.engine.add("burger").await, Err(CartError::NotReady)));
    assert!(matches!(h.engine.clear().await, Err(CartError::NotReady)));
    assert!(h.engine.validate_now().await.unwrap().is_empty());
    assert_eq!(h.validator.calls(), 0);
}

#[tokio::test]
async fn anonymous_bootstrap_reads_local_cart() {
    let h = harness(AuthState::Anonymous);
    h.local.set_slugs(slugs(&["burger", "burger"]));

    h.engine.sync_auth().await.unwrap();

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.slugs, slugs(&["burger", "burger"]));
    assert_eq!(snapshot.source, Source::Local);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn local_mutations_overwrite_local_store() {
    let h = harness(AuthState::Anonymous);
    h.engine.sync_auth().await.unwrap();

    h.engine.add("burger").await.unwrap();
    h.engine.add_many(slugs(&["fries", "burger"])).await.unwrap();
    assert_eq!(h.local.read().slugs, slugs(&["burger", "fries", "burger"]));

    h.engine.remove_one("burger").await.unwrap();
    assert_eq!(h.local.read().slugs, slugs(&["fries", "burger"]));

    h.engine.clear().await.unwrap();
    assert!(h.local.read().slugs.is_empty());
    assert!(h.engine.snapshot().slugs.is_empty());
    assert!(h.api.last_patch().is_none());
}

#[tokio::test]
async fn multiplicity_tracks_adds_minus_removes() {
    let h = harness(AuthState::Anonymous);
    h.engine.sync_auth().await.unwrap();

    let script: &[(bool, &str)] = &[
        (true, "a"),
        (true, "b"),
        (false, "a"),
        (false, "a"),
        (true, "a"),
        (true, "a"),
        (true, "b"),
        (false, "b"),
        (false, "c"),
        (true, "a"),
    ];

    let mut expected: HashMap<&str, usize> = HashMap::new();
    for &(add, slug) in script {
        let entry = expected.entry(slug).or_default();
        if add {
            h.engine.add(slug).await.unwrap();
            *entry += 1;
        } else {
            h.engine.remove_one(slug).await.unwrap();
            *entry = entry.saturating_sub(1);
        }
    }

    let active = h.engine.snapshot().slugs;
    for (slug, n) in expected {
        assert_eq!(count(&active, slug), n, "{slug}");
    }
    assert_eq!(active, slugs(&["a", "a", "b", "a"]));
}

#[tokio::test]
async fn sign_in_merges_local_into_server_once() {
    let h = harness(AuthState::Anonymous);
    h.api.seed(OWNER, &["salad"]);
    h.engine.sync_auth().await.unwrap();
    h.engine.add("burger").await.unwrap();
    h.engine.add("fries").await.unwrap();

    h.auth.send(signed_in()).unwrap();
    h.engine.sync_auth().await.unwrap();

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.slugs, slugs(&["salad", "burger", "fries"]));
    assert_eq!(snapshot.source, Source::Server);
    assert!(h.local.read().slugs.is_empty());
    assert_eq!(h.api.merges.load(Ordering::SeqCst), 1);

    h.engine.sync_auth().await.unwrap();
    h.auth.send(signed_in()).unwrap();
    h.engine.sync_auth().await.unwrap();
    assert_eq!(h.api.merges.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.stored(OWNER), slugs(&["salad", "burger", "fries"]));
}

#[tokio::test]
async fn merge_adds_multiplicities() {
    let h = harness(AuthState::Anonymous);
    h.api.seed(OWNER, &["b"]);
    h.local.set_slugs(slugs(&["a", "a", "b"]));
    h.engine.sync_auth().await.unwrap();

    h.auth.send(signed_in()).unwrap();
    h.engine.sync_auth().await.unwrap();

    let stored = h.api.stored(OWNER);
    assert_eq!(count(&stored, "a"), 2);
    assert_eq!(count(&stored, "b"), 2);
    assert_eq!(h.engine.snapshot().slugs, stored);
}

#[tokio::test]
async fn signed_in_bootstrap_merges_leftover_local_cart() {
    let h = harness(signed_in());
    h.local.set_slugs(slugs(&["fries", "ghost"]));
    let mut events = h.engine.subscribe();

    h.engine.sync_auth().await.unwrap();

    assert_eq!(next_event(&mut events).await, CartEvent::MergeDropped(slugs(&["ghost"])));
    assert_eq!(next_event(&mut events).await, CartEvent::Changed(slugs(&["fries"])));
    assert!(h.local.read().slugs.is_empty());
}

#[tokio::test]
async fn signed_in_bootstrap_without_local_cart_fetches() {
    let h = harness(signed_in());
    h.api.seed(OWNER, &["salad", "salad"]);

    h.engine.sync_auth().await.unwrap();

    assert_eq!(h.engine.snapshot().slugs, slugs(&["salad", "salad"]));
    assert_eq!(h.api.merges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_merge_keeps_local_cart() {
    let h = harness(AuthState::Anonymous);
    h.engine.sync_auth().await.unwrap();
    h.engine.add("burger").await.unwrap();

    h.api.fail.store(true, Ordering::SeqCst);
    h.auth.send(signed_in()).unwrap();
    assert!(h.engine.sync_auth().await.is_err());

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.source, Source::Local);
    assert!(!snapshot.loading);
    assert_eq!(h.local.read().slugs, slugs(&["burger"]));

    h.api.fail.store(false, Ordering::SeqCst);
    h.engine.sync_auth().await.unwrap();
    assert_eq!(h.engine.snapshot().source, Source::Server);
    assert_eq!(h.api.stored(OWNER), slugs(&["burger"]));
}

#[tokio::test]
async fn server_remove_one_patches_single_occurrence() {
    let h = harness(signed_in());
    h.api.seed(OWNER, &["fries", "fries", "salad"]);
    h.engine.sync_auth().await.unwrap();

    h.engine.remove_one("fries").await.unwrap();

    assert_eq!(h.engine.snapshot().slugs, slugs(&["fries", "salad"]));
    assert_eq!(h.api.last_patch(), Some((PatchOp::Remove, slugs(&["fries"]))));
    assert_eq!(h.api.stored(OWNER), slugs(&["fries", "salad"]));
}

#[tokio::test]
async fn server_add_and_clear_patch_targeted_ops() {
    let h = harness(signed_in());
    h.engine.sync_auth().await.unwrap();

    h.engine.add_many(slugs(&["burger", "fries"])).await.unwrap();
    assert_eq!(h.api.last_patch(), Some((PatchOp::Add, slugs(&["burger", "fries"]))));

    h.engine.clear().await.unwrap();
    assert_eq!(h.api.last_patch(), Some((PatchOp::Set, Vec::new())));
    assert!(h.api.stored(OWNER).is_empty());
}

#[tokio::test]
async fn failed_server_write_keeps_optimistic_state() {
    let h = harness(signed_in());
    h.engine.sync_auth().await.unwrap();

    h.api.fail.store(true, Ordering::SeqCst);
    let result = h.engine.add("burger").await;

    assert!(matches!(result, Err(CartError::Rejected { status: 503, .. })));
    assert_eq!(h.engine.snapshot().slugs, slugs(&["burger"]));
}

#[tokio::test]
async fn validation_prunes_server_cart_with_set() {
    let h = harness(signed_in());
    h.api.seed(OWNER, &["salad", "burger"]);
    h.engine.sync_auth().await.unwrap();
    let mut events = h.engine.subscribe();

    h.validator.withdraw("salad");
    let pruned = h.engine.validate_now().await.unwrap();

    assert_eq!(pruned, slugs(&["salad"]));
    assert_eq!(h.engine.snapshot().slugs, slugs(&["burger"]));
    assert_eq!(h.api.last_patch(), Some((PatchOp::Set, slugs(&["burger"]))));
    assert_eq!(next_event(&mut events).await, CartEvent::Pruned(slugs(&["salad"])));
}

#[tokio::test]
async fn validation_prunes_every_occurrence_locally() {
    let h = harness(AuthState::Anonymous);
    h.local.set_slugs(slugs(&["x", "y", "x"]));
    h.engine.sync_auth().await.unwrap();

    let pruned = h.engine.validate_now().await.unwrap();

    assert_eq!(pruned, slugs(&["x"]));
    assert_eq!(h.engine.snapshot().slugs, slugs(&["y"]));
    assert_eq!(h.local.read().slugs, slugs(&["y"]));
}

#[tokio::test]
async fn validation_queries_unique_slugs() {
    struct Recording(Mutex<Vec<Vec<String>>>);

    #[async_trait]
    impl Validator for Recording {
        async fn validate(&self, candidates: &[String]) -> Result<Validation, CartError> {
            self.0.lock().unwrap().push(candidates.to_vec());
            Ok(Validation {
                valid: candidates.iter().cloned().collect(),
                invalid: BTreeSet::new(),
            })
        }
    }

    let local = LocalCartStore::new(Arc::new(MemoryStorage::default()));
    local.set_slugs(slugs(&["fries", "burger", "fries"]));
    let recording = Arc::new(Recording(Mutex::new(Vec::new())));
    let (_auth, auth_rx) = watch::channel(AuthState::Anonymous);
    let engine = CartEngine::new(
        EngineConfig {
            debounce: Duration::from_secs(3600),
        },
        local,
        FakeApi::new(MENU),
        recording.clone(),
        auth_rx,
    );
    engine.sync_auth().await.unwrap();

    assert!(engine.validate_now().await.unwrap().is_empty());
    assert_eq!(*recording.0.lock().unwrap(), vec![slugs(&["burger", "fries"])]);
}

#[tokio::test]
async fn failed_validation_removes_nothing() {
    let h = harness(AuthState::Anonymous);
    h.local.set_slugs(slugs(&["ghost", "fries"]));
    h.engine.sync_auth().await.unwrap();

    h.validator.fail.store(true, Ordering::SeqCst);
    assert!(h.engine.validate_now().await.is_err());
    assert_eq!(h.engine.snapshot().slugs, slugs(&["ghost", "fries"]));

    h.validator.fail.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.validate_now().await.unwrap(), slugs(&["ghost"]));
}

#[tokio::test(start_paused = true)]
async fn triggers_coalesce_into_one_pass() {
    let h = harness_with(Duration::from_millis(350), AuthState::Anonymous);
    h.engine.sync_auth().await.unwrap();

    h.engine.add("burger").await.unwrap();
    h.engine.on_navigate();
    h.engine.add("ghost").await.unwrap();
    h.engine.on_visibility_change();
    assert_eq!(h.validator.calls(), 0);

    sleep(Duration::from_millis(400)).await;

    assert_eq!(h.validator.calls(), 1);
    assert_eq!(h.engine.snapshot().slugs, slugs(&["burger"]));
    assert_eq!(h.local.read().slugs, slugs(&["burger"]));
}

#[tokio::test(start_paused = true)]
async fn bootstrap_schedules_validation() {
    let h = harness_with(Duration::from_millis(350), AuthState::Anonymous);
    h.local.set_slugs(slugs(&["ghost"]));

    h.engine.sync_auth().await.unwrap();
    sleep(Duration::from_millis(400)).await;

    assert_eq!(h.validator.calls(), 1);
    assert!(h.engine.snapshot().slugs.is_empty());
}

#[tokio::test]
async fn other_tab_writes_are_adopted() {
    let h = harness(AuthState::Anonymous);
    let _listeners = h.engine.spawn_listeners();
    let mut events = h.engine.subscribe();
    assert_eq!(next_event(&mut events).await, CartEvent::Changed(Vec::new()));

    let other_tab = h.local.tab();
    other_tab.set_slugs(slugs(&["fries", "salad"]));

    assert_eq!(
        next_event(&mut events).await,
        CartEvent::Changed(slugs(&["fries", "salad"]))
    );
    assert_eq!(h.engine.snapshot().slugs, slugs(&["fries", "salad"]));
}

#[tokio::test]
async fn listeners_follow_sign_in() {
    let h = harness(AuthState::Unknown);
    h.api.seed(OWNER, &["salad"]);
    let _listeners = h.engine.spawn_listeners();
    let mut events = h.engine.subscribe();

    h.auth.send(AuthState::Anonymous).unwrap();
    assert_eq!(next_event(&mut events).await, CartEvent::Changed(Vec::new()));

    h.engine.add("burger").await.unwrap();
    assert_eq!(next_event(&mut events).await, CartEvent::Changed(slugs(&["burger"])));

    h.auth.send(signed_in()).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        CartEvent::Changed(slugs(&["salad", "burger"]))
    );
    assert_eq!(h.engine.snapshot().source, Source::Server);
    assert!(h.local.read().slugs.is_empty());
}

#[tokio::test]
async fn failed_listener_sync_retries_on_navigation() {
    let h = harness(signed_in());
    h.api.seed(OWNER, &["salad"]);
    h.api.fail.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();
    let _listeners = h.engine.spawn_listeners();

    assert!(matches!(next_event(&mut events).await, CartEvent::SyncFailed(_)));
    assert!(h.engine.snapshot().loading);
    assert!(h.engine.add("fries").await.is_err());

    h.api.fail.store(false, Ordering::SeqCst);
    h.engine.on_navigate();

    assert_eq!(next_event(&mut events).await, CartEvent::Changed(slugs(&["salad"])));
    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.source, Source::Server);
    assert!(!snapshot.loading);

    h.engine.add("fries").await.unwrap();
    assert_eq!(h.api.stored(OWNER), slugs(&["salad", "fries"]));
}

#[tokio::test]
async fn failed_merge_retries_on_visibility_change() {
    let h = harness(AuthState::Anonymous);
    h.engine.sync_auth().await.unwrap();
    h.engine.add("burger").await.unwrap();
    h.api.fail.store(true, Ordering::SeqCst);
    let _listeners = h.engine.spawn_listeners();
    let mut events = h.engine.subscribe();

    h.auth.send(signed_in()).unwrap();
    assert!(matches!(next_event(&mut events).await, CartEvent::SyncFailed(_)));
    assert_eq!(h.engine.snapshot().source, Source::Local);

    h.api.fail.store(false, Ordering::SeqCst);
    h.engine.on_visibility_change();

    assert_eq!(next_event(&mut events).await, CartEvent::Changed(slugs(&["burger"])));
    assert_eq!(h.engine.snapshot().source, Source::Server);
    assert!(h.local.read().slugs.is_empty());
}

#[tokio::test]
async fn settled_session_skips_sync_retry() {
    let h = harness(signed_in());
    h.engine.sync_auth().await.unwrap();
    let mut events = h.engine.subscribe();

    h.engine.on_navigate();
    tokio::task::yield_now().await;

    assert!(events.try_recv().is_err());
    assert_eq!(h.api.merges.load(Ordering::SeqCst), 0);
}
