//! End-to-end behaviour of the sync engine against scripted sites.
//!
//! Every test wires a full [`Runtime`] (background + scraper contexts on a
//! real message bus) over an in-memory store, with fake order sources and
//! auth probes standing in for the platforms.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, Semaphore};

use order_sync::auth::StaticAuth;
use order_sync::bus::{Endpoint, MessageBus, Request, Response, Status};
use order_sync::config::Config;
use order_sync::coordinator::{FetchCoordinator, FetchOutcome};
use order_sync::error::FetchError;
use order_sync::merge::load_collection;
use order_sync::runtime::{Runtime, SiteWiring};
use order_sync::session::{LoginAction, SessionMonitor};
use order_sync::traits::{id_field, OrderSource};
use order_sync::viewer::ViewerEvent;
use order_sync_core::models::{derive_session_id, AuthSignal, DataStored, FetchState, Site, StoredOrder};
use order_sync_core::pagination::{Page, PageCursor, Pager};
use order_sync_core::store::memory::InMemoryKv;
use order_sync_core::store::{self, keys, KvStore, StoreChange};

// ═══════════════════════════════════════════════════════════════════════
// Fakes
// ═══════════════════════════════════════════════════════════════════════

/// Serves a fixed list of pages. Page `i` is the `i`-th entry, addressed by
/// page number (Grubhub) or offset / limit (DoorDash).
struct FakeSource {
    site: Site,
    pages: std::sync::Mutex<Vec<Vec<Value>>>,
    total_pages: Option<u32>,
    calls: AtomicUsize,
    detail_calls: AtomicUsize,
    fail_pages: AtomicBool,
    failing_detail: Option<String>,
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
    page_delay: Option<Duration>,
}

impl FakeSource {
    fn new(site: Site, pages: Vec<Vec<Value>>) -> Self {
        Self {
            site,
            pages: std::sync::Mutex::new(pages),
            total_pages: None,
            calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            fail_pages: AtomicBool::new(false),
            failing_detail: None,
            gate: None,
            entered: Arc::new(Notify::new()),
            page_delay: None,
        }
    }

    fn set_pages(&self, pages: Vec<Vec<Value>>) {
        *self.pages.lock().unwrap() = pages;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderSource for FakeSource {
    fn site(&self) -> Site {
        self.site
    }

    fn record_id(&self, raw: &Value) -> Option<String> {
        match self.site {
            Site::Grubhub => id_field(raw, "id"),
            Site::DoorDash => id_field(raw, "orderUuid"),
        }
    }

    async fn fetch_page(&self, _auth: &AuthSignal, cursor: &PageCursor) -> Result<Page, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.page_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("HTTP 503".into()));
        }

        let index = match *cursor {
            PageCursor::Page { page_number, .. } => page_number as usize - 1,
            PageCursor::Offset { offset, limit } => (offset / limit) as usize,
        };
        let records = self
            .pages
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default();
        let pager = self.total_pages.map(|total_pages| Pager {
            current_page: index as u32 + 1,
            total_pages,
        });
        Ok(Page { records, pager })
    }

    fn has_details(&self) -> bool {
        self.site == Site::DoorDash
    }

    async fn fetch_detail(&self, _auth: &AuthSignal, id: &str) -> Result<Value, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_detail.as_deref() == Some(id) {
            return Err(FetchError::Transport("HTTP 500".into()));
        }
        Ok(json!({ "lineItems": [{ "chargeId": "SUBTOTAL", "finalMoney": { "unitAmount": 1000 } }] }))
    }
}

/// In-memory store whose order-collection writes, or swaps back to an
/// idle fetch flag, can be made to fail.
struct FlakyStore {
    inner: InMemoryKv,
    fail_collections: AtomicBool,
    fail_release: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryKv::new(),
            fail_collections: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if key.ends_with("OrderResults") && self.fail_collections.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&Value>, new: Value) -> Result<bool> {
        if self.fail_release.load(Ordering::SeqCst) && new == serde_json::to_value(FetchState::Idle)? {
            anyhow::bail!("database is locked");
        }
        self.inner.compare_and_swap(key, expected, new).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

fn test_config() -> Config {
    toml::from_str(
        r#"
[db]
path = "unused.sqlite"

[bus]
request_timeout_secs = 5

[session]
poll_interval_ms = 10
max_poll_attempts = 3
"#,
    )
    .unwrap()
}

fn config_with_lease(secs: u64) -> Config {
    let mut config = test_config();
    config.sync.fetch_lease_secs = secs;
    config
}

fn grubhub_orders(prefix: &str, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "id": format!("{}-{}", prefix, i), "state": "COMPLETE" }))
        .collect()
}

fn doordash_orders(prefix: &str, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "orderUuid": format!("{}-{}", prefix, i), "store": { "name": "Deli" } }))
        .collect()
}

fn signal(token: &str) -> AuthSignal {
    AuthSignal {
        token: token.to_string(),
        account_id: Some("diner-1".to_string()),
        ..Default::default()
    }
}

async fn start(store: Arc<dyn KvStore>, source: Arc<FakeSource>, auth: Arc<StaticAuth>) -> Runtime {
    Runtime::start(store, &test_config(), vec![SiteWiring { source, auth }]).await
}

async fn fetch(runtime: &Runtime, site: Site) -> Response {
    runtime
        .bus()
        .request(Endpoint::Background, Request::FetchSiteData { site })
        .await
        .unwrap()
}

async fn stored_ids(store: &dyn KvStore, site: Site) -> Vec<String> {
    load_collection(store, site)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect()
}

async fn fetch_state(store: &dyn KvStore, site: Site) -> FetchState {
    store::read(store, &keys::fetching(site))
        .await
        .unwrap()
        .unwrap_or_default()
}

async fn data_stored(store: &dyn KvStore) -> DataStored {
    store::read(store, keys::DATA_STORED).await.unwrap().unwrap()
}

fn stored(id: &str) -> StoredOrder {
    StoredOrder {
        id: id.to_string(),
        fetched_at: Utc::now(),
        raw: json!({ "id": id }),
        detail: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pagination scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn backfill_walks_pages_until_the_short_last_one() {
    let store = Arc::new(InMemoryKv::new());
    let mut source = FakeSource::new(
        Site::Grubhub,
        vec![grubhub_orders("a", 10), grubhub_orders("b", 5)],
    );
    source.total_pages = Some(2);
    let source = Arc::new(source);
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::Grubhub).await;

    assert_eq!(resp.status, Status::Success);
    assert_eq!(resp.stored, Some(15));
    assert_eq!(source.calls(), 2);
    assert_eq!(stored_ids(store.as_ref(), Site::Grubhub).await.len(), 15);
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

#[tokio::test]
async fn known_page_ends_cycle_without_touching_the_collection() {
    let store = Arc::new(InMemoryKv::new());
    let existing: Vec<StoredOrder> = (0..15).map(|i| stored(&format!("k-{}", i))).collect();
    store::write(store.as_ref(), &keys::order_results(Site::Grubhub), &existing)
        .await
        .unwrap();

    let source = Arc::new(FakeSource::new(
        Site::Grubhub,
        vec![grubhub_orders("k", 2), grubhub_orders("k", 4)],
    ));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;
    let mut changes = store.subscribe();

    let resp = fetch(&runtime, Site::Grubhub).await;

    assert_eq!(resp.status, Status::Success);
    assert_eq!(resp.stored, Some(0));
    assert_eq!(source.calls(), 1);
    let collection_key = keys::order_results(Site::Grubhub);
    while let Ok(change) = changes.try_recv() {
        assert_ne!(change.key, collection_key, "collection must not be rewritten");
    }
    assert_eq!(stored_ids(store.as_ref(), Site::Grubhub).await.len(), 15);
}

#[tokio::test]
async fn incremental_cycle_uses_the_small_page_size() {
    let store = Arc::new(InMemoryKv::new());
    store::write(store.as_ref(), &keys::order_results(Site::DoorDash), &vec![stored("old-0")])
        .await
        .unwrap();

    let source = Arc::new(FakeSource::new(
        Site::DoorDash,
        vec![doordash_orders("new", 2), vec![json!({ "orderUuid": "new-2" }), json!({ "orderUuid": "old-0" })]],
    ));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::DoorDash).await;

    assert_eq!(resp.stored, Some(3));
    assert_eq!(
        stored_ids(store.as_ref(), Site::DoorDash).await,
        vec!["new-0", "new-1", "new-2", "old-0"]
    );
}

#[tokio::test]
async fn failed_detail_lookup_keeps_the_order() {
    let store = Arc::new(InMemoryKv::new());
    let mut source = FakeSource::new(Site::DoorDash, vec![doordash_orders("d", 3)]);
    source.failing_detail = Some("d-1".to_string());
    let source = Arc::new(source);
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::DoorDash).await;

    assert_eq!(resp.status, Status::Success);
    assert_eq!(source.detail_calls.load(Ordering::SeqCst), 3);
    let orders = load_collection(store.as_ref(), Site::DoorDash).await.unwrap();
    assert_eq!(orders.len(), 3);
    assert!(orders[0].detail.is_some());
    assert!(orders[1].detail.is_none());
    assert!(orders[2].detail.is_some());
    assert!(data_stored(store.as_ref()).await.ok);
}

// ═══════════════════════════════════════════════════════════════════════
// Single-flight guard
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn second_trigger_during_a_cycle_is_rejected() {
    let store = Arc::new(InMemoryKv::new());
    let gate = Arc::new(Semaphore::new(0));
    let mut source = FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 3)]);
    source.gate = Some(gate.clone());
    let entered = source.entered.clone();
    let source = Arc::new(source);
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let bus = runtime.bus();
    let first = tokio::spawn(async move {
        bus.request(Endpoint::Background, Request::FetchSiteData { site: Site::Grubhub })
            .await
            .unwrap()
    });
    entered.notified().await;
    assert!(fetch_state(store.as_ref(), Site::Grubhub).await.is_in_progress());

    let second = fetch(&runtime, Site::Grubhub).await;
    assert_eq!(second.status, Status::FetchingInProgress);
    assert_eq!(source.calls(), 1);

    gate.add_permits(10);
    let first = first.await.unwrap();
    assert_eq!(first.status, Status::Success);
    assert_eq!(first.stored, Some(3));
    assert_eq!(source.calls(), 1);
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

#[tokio::test]
async fn guard_is_released_after_a_transport_error() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 3)]));
    source.fail_pages.store(true, Ordering::SeqCst);
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::Grubhub).await;

    assert_eq!(resp.status, Status::Error);
    assert!(resp.error.unwrap().contains("503"));
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
    assert!(!data_stored(store.as_ref()).await.ok);
    assert!(stored_ids(store.as_ref(), Site::Grubhub).await.is_empty());

    source.fail_pages.store(false, Ordering::SeqCst);
    assert_eq!(fetch(&runtime, Site::Grubhub).await.status, Status::Success);
}

#[tokio::test]
async fn guard_is_released_after_a_storage_failure() {
    let store = Arc::new(FlakyStore::new());
    store.fail_collections.store(true, Ordering::SeqCst);
    let source = Arc::new(FakeSource::new(Site::DoorDash, vec![doordash_orders("d", 2)]));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::DoorDash).await;

    assert_eq!(resp.status, Status::Failure);
    assert!(resp.error.unwrap().contains("disk full"));
    assert_eq!(fetch_state(store.as_ref(), Site::DoorDash).await, FetchState::Idle);
    assert!(!data_stored(store.as_ref()).await.ok);
}

#[tokio::test]
async fn missing_auth_is_an_error_and_releases_the_guard() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 1)]));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_out())).await;

    let resp = fetch(&runtime, Site::Grubhub).await;

    assert_eq!(resp.status, Status::Error);
    assert_eq!(source.calls(), 0);
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

#[tokio::test]
async fn abandoned_lease_is_taken_over() {
    let store = Arc::new(InMemoryKv::new());
    let abandoned = FetchState::in_progress(Utc::now() - chrono::Duration::hours(2));
    store::write(store.as_ref(), &keys::fetching(Site::Grubhub), &abandoned)
        .await
        .unwrap();
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 2)]));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::Grubhub).await;

    assert_eq!(resp.status, Status::Success);
    assert_eq!(resp.stored, Some(2));
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

#[tokio::test]
async fn sites_have_independent_guards() {
    let store = Arc::new(InMemoryKv::new());
    let fresh = FetchState::in_progress(Utc::now());
    store::write(store.as_ref(), &keys::fetching(Site::Grubhub), &fresh)
        .await
        .unwrap();

    let grubhub = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 1)]));
    let doordash = Arc::new(FakeSource::new(Site::DoorDash, vec![doordash_orders("d", 1)]));
    let auth = Arc::new(StaticAuth::logged_in(signal("t")));
    let runtime = Runtime::start(
        store.clone(),
        &test_config(),
        vec![
            SiteWiring { source: grubhub.clone(), auth: auth.clone() },
            SiteWiring { source: doordash.clone(), auth },
        ],
    )
    .await;

    assert_eq!(fetch(&runtime, Site::Grubhub).await.status, Status::FetchingInProgress);
    assert_eq!(fetch(&runtime, Site::DoorDash).await.status, Status::Success);
    assert_eq!(grubhub.calls(), 0);
    assert_eq!(doordash.calls(), 1);
}

#[tokio::test]
async fn cycle_that_lost_its_lease_does_not_merge() {
    let store = Arc::new(InMemoryKv::new());
    let mut source = FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 3)]);
    source.page_delay = Some(Duration::from_millis(2500));
    let source = Arc::new(source);
    let runtime = Runtime::start(
        store.clone(),
        &config_with_lease(1),
        vec![SiteWiring {
            source: source.clone(),
            auth: Arc::new(StaticAuth::logged_in(signal("t"))),
        }],
    )
    .await;

    let bus = runtime.bus();
    let first = tokio::spawn(async move {
        bus.request(Endpoint::Background, Request::FetchSiteData { site: Site::Grubhub })
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // The first cycle is still waiting on its page; its lease has expired.
    let second = fetch(&runtime, Site::Grubhub).await;
    let first = first.await.unwrap();

    assert_eq!(second.status, Status::Success);
    assert_eq!(second.stored, Some(3));
    assert_eq!(first.status, Status::Error);
    assert!(first.error.unwrap().contains("taken over"));
    assert_eq!(stored_ids(store.as_ref(), Site::Grubhub).await, vec!["g-0", "g-1", "g-2"]);
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

#[tokio::test]
async fn slow_cycle_keeps_its_lease_by_renewing() {
    let store = Arc::new(InMemoryKv::new());
    let mut source = FakeSource::new(
        Site::Grubhub,
        vec![grubhub_orders("a", 10), grubhub_orders("b", 10), grubhub_orders("c", 2)],
    );
    source.page_delay = Some(Duration::from_millis(600));
    let source = Arc::new(source);
    let runtime = Runtime::start(
        store.clone(),
        &config_with_lease(1),
        vec![SiteWiring {
            source: source.clone(),
            auth: Arc::new(StaticAuth::logged_in(signal("t"))),
        }],
    )
    .await;

    let bus = runtime.bus();
    let first = tokio::spawn(async move {
        bus.request(Endpoint::Background, Request::FetchSiteData { site: Site::Grubhub })
            .await
            .unwrap()
    });
    // Past the lease length, but the lease was renewed after the second page.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let second = fetch(&runtime, Site::Grubhub).await;
    let first = first.await.unwrap();

    assert_eq!(second.status, Status::FetchingInProgress);
    assert_eq!(first.status, Status::Success);
    assert_eq!(first.stored, Some(22));
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn failed_release_falls_back_to_idle() {
    let store = Arc::new(FlakyStore::new());
    store.fail_release.store(true, Ordering::SeqCst);
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 2)]));
    let runtime = start(store.clone(), source, Arc::new(StaticAuth::logged_in(signal("t")))).await;

    let resp = fetch(&runtime, Site::Grubhub).await;

    assert_eq!(resp.status, Status::Success);
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

// ═══════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn first_login_resets_then_backfills() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 4)]));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;
    let scraper = runtime.scraper(Site::Grubhub).unwrap();

    let check = scraper.run().await.unwrap().unwrap();

    assert!(check.is_logged_in);
    assert_eq!(check.action, LoginAction::FetchTriggered(FetchOutcome::Success { stored: 4 }));
    assert!(store
        .get(&keys::session_id(Site::Grubhub))
        .await
        .unwrap()
        .is_some());
    assert_eq!(store.get(&keys::logged_in(Site::Grubhub)).await.unwrap(), Some(json!(true)));
}

#[tokio::test]
async fn account_switch_clears_orders_before_the_next_merge() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("alice", 3)]));
    let auth = Arc::new(StaticAuth::logged_in(signal("alice-token")));
    let runtime = start(store.clone(), source.clone(), auth.clone()).await;
    let scraper = runtime.scraper(Site::Grubhub).unwrap();

    scraper.sync_now().await.unwrap();
    assert_eq!(stored_ids(store.as_ref(), Site::Grubhub).await.len(), 3);

    auth.set(Some(signal("bob-token"))).await;
    source.set_pages(vec![grubhub_orders("bob", 2)]);
    let check = scraper.sync_now().await.unwrap();

    assert_eq!(check.action, LoginAction::FetchTriggered(FetchOutcome::Success { stored: 2 }));
    assert_eq!(stored_ids(store.as_ref(), Site::Grubhub).await, vec!["bob-0", "bob-1"]);
}

#[tokio::test]
async fn account_switch_mid_cycle_discards_the_old_batch() {
    let store = Arc::new(InMemoryKv::new());
    let alice = signal("alice-token");
    store::write(
        store.as_ref(),
        &keys::session_id(Site::Grubhub),
        &derive_session_id(Site::Grubhub, &alice),
    )
    .await
    .unwrap();

    let gate = Arc::new(Semaphore::new(0));
    let mut source = FakeSource::new(Site::Grubhub, vec![grubhub_orders("alice", 3)]);
    source.gate = Some(gate.clone());
    let entered = source.entered.clone();
    let source = Arc::new(source);
    let auth = Arc::new(StaticAuth::logged_in(alice));
    let runtime = start(store.clone(), source, auth.clone()).await;
    let scraper = runtime.scraper(Site::Grubhub).unwrap();

    let bus = runtime.bus();
    let first = tokio::spawn(async move {
        bus.request(Endpoint::Background, Request::FetchSiteData { site: Site::Grubhub })
            .await
            .unwrap()
    });
    entered.notified().await;

    auth.set(Some(signal("bob-token"))).await;
    let check = scraper.sync_now().await.unwrap();
    assert_eq!(check.action, LoginAction::SkippedInProgress);

    gate.add_permits(10);
    let first = first.await.unwrap();

    assert_eq!(first.status, Status::Error);
    assert!(first.error.unwrap().contains("session changed"));
    assert!(stored_ids(store.as_ref(), Site::Grubhub).await.is_empty());
    assert_eq!(fetch_state(store.as_ref(), Site::Grubhub).await, FetchState::Idle);
}

#[tokio::test]
async fn same_session_does_not_reset() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 2)]));
    let runtime = start(store.clone(), source.clone(), Arc::new(StaticAuth::logged_in(signal("t")))).await;
    let scraper = runtime.scraper(Site::Grubhub).unwrap();

    scraper.sync_now().await.unwrap();
    source.set_pages(vec![vec![json!({ "id": "g-new" }), json!({ "id": "g-0" })]]);
    let check = scraper.sync_now().await.unwrap();

    assert_eq!(check.action, LoginAction::FetchTriggered(FetchOutcome::Success { stored: 1 }));
    let ids = stored_ids(store.as_ref(), Site::Grubhub).await;
    assert_eq!(ids, vec!["g-new", "g-0", "g-1"]);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test]
async fn logout_forces_the_guard_idle() {
    let store = Arc::new(InMemoryKv::new());
    let fresh = FetchState::in_progress(Utc::now());
    store::write(store.as_ref(), &keys::fetching(Site::DoorDash), &fresh)
        .await
        .unwrap();
    let source = Arc::new(FakeSource::new(Site::DoorDash, vec![]));
    let runtime = start(store.clone(), source, Arc::new(StaticAuth::logged_out())).await;

    let check = runtime
        .scraper(Site::DoorDash)
        .unwrap()
        .sync_now()
        .await
        .unwrap();

    assert!(!check.is_logged_in);
    assert_eq!(check.action, LoginAction::LoggedOut);
    assert_eq!(fetch_state(store.as_ref(), Site::DoorDash).await, FetchState::Idle);
    assert_eq!(store.get(&keys::logged_in(Site::DoorDash)).await.unwrap(), Some(json!(false)));
}

#[tokio::test]
async fn polling_records_the_login_it_sees() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![grubhub_orders("g", 1)]));
    let auth = Arc::new(StaticAuth::logged_in(signal("t")));
    let config = test_config();
    let coordinator = Arc::new(FetchCoordinator::new(
        source.clone(),
        auth.clone(),
        store.clone(),
        Arc::new(MessageBus::new(Duration::from_secs(5))),
        config.sync.clone(),
    ));
    let monitor = SessionMonitor::new(auth, store.clone(), coordinator, config.session.clone());
    let mut changes = store.subscribe();

    assert!(monitor.wait_for_login().await);

    let change = changes.try_recv().unwrap();
    assert_eq!(change.key, keys::logged_in(Site::Grubhub));
    assert_eq!(change.new_value, Some(json!(true)));
    // Nothing beyond the flag happens until an active check.
    assert!(store.get(&keys::session_id(Site::Grubhub)).await.unwrap().is_none());
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn login_polling_gives_up() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![]));
    let runtime = start(store, source.clone(), Arc::new(StaticAuth::logged_out())).await;

    let result = runtime.scraper(Site::Grubhub).unwrap().run().await.unwrap();

    assert!(result.is_none());
    assert_eq!(source.calls(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Background routing and viewer
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn login_status_follows_the_host() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![]));
    let runtime = start(store.clone(), source, Arc::new(StaticAuth::logged_in(signal("t")))).await;
    let bus = runtime.bus();

    let before = bus
        .request(Endpoint::Background, Request::CheckLoginStatus)
        .await
        .unwrap();
    assert_eq!(before.status, Status::Error);

    let rejected = bus
        .request(Endpoint::Background, Request::SetHost { host: "example.com".into() })
        .await
        .unwrap();
    assert_eq!(rejected.status, Status::Error);

    let set = bus
        .request(Endpoint::Background, Request::SetHost { host: "www.grubhub.com".into() })
        .await
        .unwrap();
    assert!(set.is_success());

    let status = bus
        .request(Endpoint::Background, Request::CheckLoginStatus)
        .await
        .unwrap();
    assert!(status.is_success());
    assert_eq!(status.is_logged_in, Some(true));
    // A passive check never records a session.
    assert!(store.get(&keys::session_id(Site::Grubhub)).await.unwrap().is_none());
}

#[tokio::test]
async fn unconfigured_site_is_an_error_response() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::Grubhub, vec![]));
    let runtime = start(store, source, Arc::new(StaticAuth::logged_out())).await;

    let resp = fetch(&runtime, Site::DoorDash).await;

    assert_eq!(resp.status, Status::Error);
    assert!(resp.error.unwrap().contains("scraper:doordash"));
}

#[tokio::test]
async fn viewer_sees_the_cycle_and_normalized_orders() {
    let store = Arc::new(InMemoryKv::new());
    let source = Arc::new(FakeSource::new(Site::DoorDash, vec![doordash_orders("d", 2)]));
    let runtime = start(store.clone(), source, Arc::new(StaticAuth::logged_in(signal("t")))).await;
    let mut viewer = runtime.viewer();

    runtime
        .bus()
        .request(Endpoint::Background, Request::SetHost { host: "www.doordash.com".into() })
        .await
        .unwrap();
    assert!(fetch(&runtime, Site::DoorDash).await.is_success());

    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(200), viewer.next_event()).await
    {
        events.push(event);
    }
    assert_eq!(events[0], ViewerEvent::FetchStarted(Site::DoorDash));
    assert!(events.contains(&ViewerEvent::FetchFinished(Site::DoorDash)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ViewerEvent::DataStored(d) if d.ok && d.site == Site::DoorDash)));

    let (site, records) = viewer.load_orders().await.unwrap();
    assert_eq!(site, Site::DoorDash);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].restaurant_name, "Deli");
    assert_eq!(records[0].monetary.subtotal, 1000.0);
}
