//! QueryStateStore - the single owner of the pending URL.
//!
//! Writers never build URLs themselves. They queue [`QueryOp`]s on the
//! store, which folds them into one pending [`Location`] and pushes a
//! navigation on the next [`commit`](QueryStateStore::commit) only when
//! the result differs from the live location. Writes made in the same
//! turn therefore coalesce into a single navigation.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::channel::QueryState;
use crate::error::{QueryStateError, Result};
use crate::location::{has_scheme, Location};
use crate::navigator::Navigator;
use crate::watch::{QuerySender, QueryStream};

/// Maximum query key length in bytes.
pub const MAX_KEY_LENGTH: usize = 256;

/// A single mutation of the pending URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOp {
    /// Set a key to an already JSON-encoded value.
    Set { key: String, value: String },
    /// Remove a key.
    Delete { key: String },
    /// Override the pathname (or the whole base, for absolute URLs).
    SetBaseUrl { path: String },
}

impl QueryOp {
    /// Create a Set operation.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Set operation with a JSON-encoded value.
    pub fn set_json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::Set {
            key: key.into(),
            value: serde_json::to_string(value)?,
        })
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Create a SetBaseUrl operation.
    pub fn base_url(path: impl Into<String>) -> Self {
        Self::SetBaseUrl { path: path.into() }
    }

    /// Check that this operation can be applied to any location.
    pub fn validate(&self) -> Result<()> {
        match self {
            QueryOp::Set { key, .. } | QueryOp::Delete { key } => validate_key(key),
            QueryOp::SetBaseUrl { path } => {
                if has_scheme(path) {
                    url::Url::parse(path)?;
                }
                Ok(())
            }
        }
    }

    fn apply_to(&self, location: &mut Location) -> Result<()> {
        match self {
            QueryOp::Set { key, value } => location.set(key, value),
            QueryOp::Delete { key } => {
                location.delete(key);
            }
            QueryOp::SetBaseUrl { path } => location.set_base(path)?,
        }
        Ok(())
    }
}

/// Validate that a query key is well-formed.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(QueryStateError::InvalidKey(
            "key cannot be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(QueryStateError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Capacity of the change notification channel.
    pub watch_capacity: usize,
    /// Whether channels write their default value on mount.
    pub seed_defaults: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            watch_capacity: 256,
            seed_defaults: true,
        }
    }
}

struct Pending {
    /// Working copy: the live location at the first write, plus `ops`.
    location: Location,
    ops: Vec<QueryOp>,
}

impl Pending {
    /// Replay the queued ops on top of `base`.
    fn rebase(&mut self, base: &Location) -> Result<()> {
        let mut location = base.clone();
        for op in &self.ops {
            op.apply_to(&mut location)?;
        }
        self.location = location;
        Ok(())
    }
}

struct State {
    pending: Option<Pending>,
    /// Last location this store saw on the navigator.
    observed: Location,
    /// Target of a navigation currently running outside the lock.
    navigating: Option<Location>,
    generation: u64,
}

/// Authority for the query string of one page.
///
/// Share it between channels behind an `Arc`. All reads go to the live
/// location; all writes go through [`apply`](Self::apply) and its
/// single-op shorthands.
pub struct QueryStateStore {
    navigator: Arc<dyn Navigator>,
    state: Mutex<State>,
    watcher: QuerySender,
    wakeup: Arc<Notify>,
    stopped: AtomicBool,
    options: StoreOptions,
}

impl QueryStateStore {
    /// Create a store over `navigator` with default options.
    pub fn new(navigator: impl Navigator + 'static) -> Self {
        Self::with_options(navigator, StoreOptions::default())
    }

    /// Create a store over `navigator`.
    pub fn with_options(navigator: impl Navigator + 'static, options: StoreOptions) -> Self {
        let navigator: Arc<dyn Navigator> = Arc::new(navigator);
        let observed = navigator.current();
        info!(href = observed.relative_href(), "query state store created");

        Self {
            navigator,
            state: Mutex::new(State {
                pending: None,
                observed,
                navigating: None,
                generation: 0,
            }),
            watcher: QuerySender::new(options.watch_capacity),
            wakeup: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
            options,
        }
    }

    /// Store configuration.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The live location.
    pub fn current(&self) -> Location {
        self.navigator.current()
    }

    /// The pending location if writes are queued, otherwise the live one.
    pub fn working_copy(&self) -> Location {
        let state = self.state.lock();
        match &state.pending {
            Some(pending) => pending.location.clone(),
            None => self.navigator.current(),
        }
    }

    /// Relative href of the pending location, if any writes are queued.
    pub fn pending_href(&self) -> Option<String> {
        self.state
            .lock()
            .pending
            .as_ref()
            .map(|p| p.location.relative_href().to_string())
    }

    /// Number of accepted mutation batches so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Whether writes are waiting for a commit.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Set `key` to an already JSON-encoded value.
    pub fn set_search_param(&self, key: &str, encoded: &str) -> Result<()> {
        self.apply(vec![QueryOp::set(key, encoded)])
    }

    /// Remove `key`. Removing an absent key still marks the store dirty
    /// but never produces a navigation.
    pub fn delete_search_param(&self, key: &str) -> Result<()> {
        self.apply(vec![QueryOp::delete(key)])
    }

    /// Override the pathname, or origin and path for an absolute URL,
    /// keeping every query key.
    pub fn set_base_url(&self, path: &str) -> Result<()> {
        self.apply(vec![QueryOp::base_url(path)])
    }

    /// Apply a batch of operations to the pending location.
    ///
    /// Every operation is validated first; either all of them land or
    /// none do.
    pub fn apply(&self, ops: Vec<QueryOp>) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QueryStateError::ReconcilerStopped);
        }
        for op in &ops {
            op.validate()?;
        }

        let mut state = self.state.lock();
        let mut pending = match state.pending.take() {
            Some(pending) => pending,
            None => Pending {
                // Writes made from inside a navigation build on its target
                location: state
                    .navigating
                    .clone()
                    .unwrap_or_else(|| self.navigator.current()),
                ops: Vec::new(),
            },
        };

        let mut location = pending.location.clone();
        let applied = ops.iter().try_for_each(|op| op.apply_to(&mut location));
        if let Err(err) = applied {
            // Restore what was queued before this batch
            if !pending.ops.is_empty() {
                state.pending = Some(pending);
            }
            return Err(err);
        }

        pending.location = location;
        pending.ops.extend(ops);
        state.pending = Some(pending);
        state.generation += 1;
        drop(state);

        self.wakeup.notify_one();
        Ok(())
    }

    /// Reconcile the pending location with the live one.
    ///
    /// A navigation made elsewhere since the last reconciliation is picked
    /// up first, exactly as [`sync_with_location`](Self::sync_with_location)
    /// would. Pushes a navigation only if the pending location then differs
    /// from the live one and returns whether it did.
    ///
    /// The store lock is released while the navigator runs, so a navigator
    /// may read from or write to the store. Navigation errors are returned
    /// unchanged; the pending writes are discarded with them.
    pub fn commit(&self) -> Result<bool> {
        let (live, target) = {
            let mut state = self.state.lock();
            let live = self.navigator.current();
            self.observe_external(&mut state, &live)?;

            let Some(pending) = state.pending.take() else {
                return Ok(false);
            };
            if pending.location.href() == live.href() {
                debug!(href = live.relative_href(), "pending location matches live, skipping");
                return Ok(false);
            }
            state.navigating = Some(pending.location.clone());
            (live, pending.location)
        };

        let navigated = self.navigator.navigate(&target);

        let mut state = self.state.lock();
        state.navigating = None;
        if let Err(err) = navigated {
            // Writes made during the failed navigation assumed its target
            if let Some(pending) = state.pending.as_mut() {
                pending.rebase(&live)?;
            }
            return Err(err);
        }
        debug!(
            from = live.relative_href(),
            to = target.relative_href(),
            generation = state.generation,
            "navigated"
        );
        self.watcher.publish(&live, &target);
        state.observed = target;
        Ok(true)
    }

    /// Re-read the live location after a navigation this store did not make
    /// (back/forward, link clicks).
    ///
    /// Readers are notified of the keys that changed and queued writes are
    /// replayed on top of the new location. Returns whether the live
    /// location differed from the last one observed.
    pub fn sync_with_location(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let live = self.navigator.current();
        self.observe_external(&mut state, &live)
    }

    /// Move `observed` to `live`, notifying readers and rebasing queued
    /// writes. `observed` never moves without its events.
    fn observe_external(&self, state: &mut State, live: &Location) -> Result<bool> {
        if *live == state.observed {
            return Ok(false);
        }

        debug!(
            from = state.observed.relative_href(),
            to = live.relative_href(),
            "external navigation"
        );
        self.watcher.publish(&state.observed, live);

        if let Some(pending) = state.pending.as_mut() {
            pending.rebase(live)?;
        }
        state.observed = live.clone();
        Ok(true)
    }

    /// Watch for changes to keys matching `pattern` (exact key or `prefix*`).
    pub fn watch(&self, pattern: &str) -> QueryStream {
        self.watcher.subscribe(pattern)
    }

    /// Bind a typed channel to `key`.
    pub fn channel<T>(self: &Arc<Self>, key: impl Into<String>) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        QueryState::new(Arc::clone(self), key)
    }

    /// Commit automatically at the end of every turn that wrote something.
    ///
    /// The task wakes on the first write, yields once so the remaining
    /// writes of the turn land, then commits. It ends with `Ok` when the
    /// store is dropped and with the error when a navigation fails; after
    /// a failure further writes return [`QueryStateError::ReconcilerStopped`].
    ///
    /// # Panics
    ///
    /// Panics if called from outside of a Tokio runtime.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let store: Weak<Self> = Arc::downgrade(self);
        let wakeup = Arc::clone(&self.wakeup);

        tokio::spawn(async move {
            loop {
                wakeup.notified().await;
                tokio::task::yield_now().await;

                let Some(strong) = store.upgrade() else {
                    return Ok(());
                };
                if let Err(err) = strong.commit() {
                    error!(%err, "reconciler stopped");
                    strong.stopped.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        })
    }
}

impl Drop for QueryStateStore {
    fn drop(&mut self) {
        // Let a waiting reconciler observe the drop
        self.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNavigator;
    use crate::watch::{EventType, PATH_KEY};
    use std::sync::{mpsc, OnceLock};
    use std::thread;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn setup(href: &str) -> (MemoryNavigator, Arc<QueryStateStore>) {
        let nav = MemoryNavigator::new(href).unwrap();
        let store = Arc::new(QueryStateStore::new(nav.clone()));
        (nav, store)
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("search").is_ok());
        assert!(matches!(
            validate_key(""),
            Err(QueryStateError::InvalidKey(_))
        ));
        let key = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            validate_key(&key),
            Err(QueryStateError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_query_op_creation() {
        let op = QueryOp::set("search", "\"shoe\"");
        assert!(matches!(op, QueryOp::Set { .. }));

        let op = QueryOp::delete("search");
        assert!(matches!(op, QueryOp::Delete { .. }));

        let op = QueryOp::set_json("page", &2).unwrap();
        assert_eq!(op, QueryOp::set("page", "2"));

        assert!(QueryOp::base_url("/brands").validate().is_ok());
        assert!(QueryOp::base_url("http://").validate().is_err());
    }

    #[test]
    fn test_set_is_pending_until_commit() {
        let (nav, store) = setup("http://localhost/portal");

        store.set_search_param("search", "\"shoe\"").unwrap();
        assert!(store.is_dirty());
        assert_eq!(store.generation(), 1);
        assert_eq!(
            store.pending_href().as_deref(),
            Some("/portal?search=%22shoe%22")
        );
        assert_eq!(nav.current_href(), "/portal");

        assert!(store.commit().unwrap());
        assert!(!store.is_dirty());
        assert_eq!(nav.current_href(), "/portal?search=%22shoe%22");
        assert_eq!(nav.navigation_count(), 1);
    }

    #[test]
    fn test_commit_without_writes_is_noop() {
        let (nav, store) = setup("http://localhost/portal");
        assert!(!store.commit().unwrap());
        assert_eq!(nav.navigation_count(), 0);
    }

    #[test]
    fn test_same_value_twice_navigates_once() {
        let (nav, store) = setup("http://localhost/portal");

        store.set_search_param("search", "\"shoe\"").unwrap();
        assert!(store.commit().unwrap());
        store.set_search_param("search", "\"shoe\"").unwrap();
        assert!(!store.commit().unwrap());

        assert_eq!(nav.navigation_count(), 1);
    }

    #[test]
    fn test_delete_absent_key_does_not_navigate() {
        let (nav, store) = setup("http://localhost/portal?a=1");
        store.delete_search_param("b").unwrap();
        assert!(!store.commit().unwrap());
        assert_eq!(nav.navigation_count(), 0);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (_nav, store) = setup("http://localhost/portal");

        let result = store.apply(vec![
            QueryOp::set("search", "\"shoe\""),
            QueryOp::delete(""),
        ]);
        assert!(matches!(result, Err(QueryStateError::InvalidKey(_))));
        assert!(!store.is_dirty());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_failed_batch_keeps_earlier_writes() {
        let (_nav, store) = setup("http://localhost/portal");

        store.set_search_param("search", "\"shoe\"").unwrap();
        assert!(store.set_base_url("http://").is_err());
        assert_eq!(
            store.pending_href().as_deref(),
            Some("/portal?search=%22shoe%22")
        );
    }

    #[test]
    fn test_navigation_error_propagates() {
        let (nav, store) = setup("http://localhost/portal");
        nav.fail_next_navigation("router unavailable");

        store.set_search_param("search", "\"shoe\"").unwrap();
        let result = store.commit();
        assert!(matches!(result, Err(QueryStateError::Navigation(_))));
        assert!(!store.is_dirty());
        assert_eq!(nav.current_href(), "/portal");
    }

    #[test]
    fn test_writes_start_from_live_location() {
        let (nav, store) = setup("http://localhost/portal");

        store.set_search_param("page", "2").unwrap();
        store.commit().unwrap();
        nav.back();

        // Nothing pending, so the next write is based on "/portal"
        store.set_search_param("sort", "1").unwrap();
        assert_eq!(store.pending_href().as_deref(), Some("/portal?sort=1"));
    }

    #[test]
    fn test_sync_rebases_pending_writes() {
        let (nav, store) = setup("http://localhost/portal");

        store.set_search_param("page", "2").unwrap();
        store.commit().unwrap();
        store.set_search_param("sort", "1").unwrap();

        nav.back();
        assert!(store.sync_with_location().unwrap());
        assert_eq!(store.pending_href().as_deref(), Some("/portal?sort=1"));
        assert!(!store.sync_with_location().unwrap());
    }

    #[tokio::test]
    async fn test_sync_notifies_readers() {
        let (nav, store) = setup("http://localhost/portal");
        let mut stream = store.watch("page");

        store.set_search_param("page", "2").unwrap();
        store.commit().unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventType::Created);

        nav.back();
        store.sync_with_location().unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::Deleted);
        assert_eq!(event.href, "/portal");
    }

    #[tokio::test]
    async fn test_commit_publishes_path_event() {
        let (_nav, store) = setup("http://localhost/settings/brands?tab=1");
        let mut stream = store.watch(PATH_KEY);

        store.set_base_url("/settings/brands/42").unwrap();
        store.commit().unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.new_value.as_deref(), Some("/settings/brands/42"));
        assert_eq!(event.href, "/settings/brands/42?tab=1");
    }

    #[tokio::test]
    async fn test_reconciler_coalesces_turn() {
        let (nav, store) = setup("http://localhost/portal");
        let mut stream = store.watch("*");
        let _handle = store.spawn_reconciler();

        store.set_search_param("search", "\"shoe\"").unwrap();
        store.set_search_param("page", "1").unwrap();
        store.set_search_param("sort", "\"name\"").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "search");
        assert_eq!(nav.navigation_count(), 1);
        assert_eq!(
            nav.current_href(),
            "/portal?search=%22shoe%22&page=1&sort=%22name%22"
        );
    }

    #[tokio::test]
    async fn test_reconciler_stops_on_navigation_error() {
        let (nav, store) = setup("http://localhost/portal");
        nav.fail_next_navigation("bad url");
        let handle = store.spawn_reconciler();

        store.set_search_param("search", "\"shoe\"").unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(QueryStateError::Navigation(_))));

        let result = store.set_search_param("search", "\"boot\"");
        assert!(matches!(result, Err(QueryStateError::ReconcilerStopped)));
    }

    #[tokio::test]
    async fn test_reconciler_ends_when_store_dropped() {
        let (_nav, store) = setup("http://localhost/portal");
        let handle = store.spawn_reconciler();
        drop(store);

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_commit_picks_up_back_navigation() {
        let (nav, store) = setup("http://localhost/portal");

        store.set_search_param("page", "2").unwrap();
        store.commit().unwrap();
        store.set_search_param("sort", "1").unwrap();

        // The user leaves "?page=2" before the write is flushed
        nav.back();
        assert!(store.commit().unwrap());
        assert_eq!(nav.current_href(), "/portal?sort=1");
    }

    #[tokio::test]
    async fn test_noop_commit_reports_external_navigation() {
        let (nav, store) = setup("http://localhost/portal");
        store.set_search_param("page", "2").unwrap();
        store.commit().unwrap();
        let mut stream = store.watch("page");

        nav.back();
        store.delete_search_param("absent").unwrap();
        assert!(!store.commit().unwrap());

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::Deleted);
        assert_eq!(event.href, "/portal");
        assert!(!store.sync_with_location().unwrap());
        assert_eq!(nav.navigation_count(), 1);
    }

    #[tokio::test]
    async fn test_reconciler_follows_external_navigation() {
        let (nav, store) = setup("http://localhost/portal");
        store.set_search_param("page", "2").unwrap();
        store.commit().unwrap();

        let mut stream = store.watch("sort");
        let _handle = store.spawn_reconciler();

        store.set_search_param("sort", "1").unwrap();
        nav.back();

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::Created);
        assert_eq!(event.href, "/portal?sort=1");
        assert_eq!(nav.current_href(), "/portal?sort=1");
        assert_eq!(nav.navigation_count(), 2);
    }

    /// Navigator that re-renders into the store while navigating.
    struct RenderingNavigator {
        inner: MemoryNavigator,
        store: Arc<OnceLock<Weak<QueryStateStore>>>,
        dirty_seen: Arc<Mutex<Vec<bool>>>,
    }

    impl Navigator for RenderingNavigator {
        fn current(&self) -> Location {
            self.inner.current()
        }

        fn navigate(&self, to: &Location) -> Result<()> {
            self.inner.navigate(to)?;
            if let Some(store) = self.store.get().and_then(Weak::upgrade) {
                self.dirty_seen.lock().push(store.is_dirty());
                if !to.contains("rendered") {
                    store.set_search_param("rendered", "true")?;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_navigator_can_reenter_store() {
        let inner = MemoryNavigator::new("http://localhost/portal").unwrap();
        let slot = Arc::new(OnceLock::new());
        let dirty_seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(QueryStateStore::new(RenderingNavigator {
            inner: inner.clone(),
            store: Arc::clone(&slot),
            dirty_seen: Arc::clone(&dirty_seen),
        }));
        slot.set(Arc::downgrade(&store)).unwrap();

        store.set_search_param("search", "\"shoe\"").unwrap();

        let (tx, rx) = mpsc::channel();
        let committer = Arc::clone(&store);
        thread::spawn(move || {
            let _ = tx.send(committer.commit().map_err(|e| e.to_string()));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("commit did not return");
        assert_eq!(result, Ok(true));

        // The write made during navigation builds on the new location
        assert_eq!(*dirty_seen.lock(), vec![false]);
        assert_eq!(
            store.pending_href().as_deref(),
            Some("/portal?search=%22shoe%22&rendered=true")
        );

        assert!(store.commit().unwrap());
        assert_eq!(inner.navigation_count(), 2);
        assert_eq!(inner.current_href(), "/portal?search=%22shoe%22&rendered=true");
    }
}
