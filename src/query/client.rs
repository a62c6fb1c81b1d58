//! The shared query cache.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use super::key::{CacheKey, QueryFilter};
use super::state::{QueryOptions, QueryResult, QueryStatus};
use crate::error::QueryError;
use crate::notify::{Notification, Notifier};

/// Type-erased cached value.
type Payload = Arc<dyn Any + Send + Sync>;

/// Outcome of one fetch attempt, cloned to every joined reader.
type Settled = std::result::Result<Payload, QueryError>;

type InFlight = Shared<BoxFuture<'static, Settled>>;

/// One cache entry per distinct key.
#[derive(Default)]
struct Entry {
  status: QueryStatus,
  data: Option<Payload>,
  error: Option<QueryError>,
  fetched_at: Option<DateTime<Utc>>,
  /// Marked stale by an explicit invalidation
  invalidated: bool,
  /// Id of the fetch whose result this entry will accept
  fetch_id: Option<u64>,
  in_flight: Option<InFlight>,
}

impl Entry {
  fn is_stale(&self, stale_time: Duration) -> bool {
    self.invalidated
      || self
        .fetched_at
        .map(|t| Utc::now() - t >= stale_time)
        .unwrap_or(true)
  }

  fn is_fresh(&self, stale_time: Duration) -> bool {
    self.status == QueryStatus::Success && self.data.is_some() && !self.is_stale(stale_time)
  }

  fn snapshot<T: Send + Sync + 'static>(&self, key: &CacheKey, stale_time: Duration) -> QueryResult<T> {
    let mut result = QueryResult {
      status: self.status,
      data: None,
      error: self.error.clone(),
      last_fetched_at: self.fetched_at,
      is_stale: self.data.is_some() && self.is_stale(stale_time),
    };

    if let Some(payload) = &self.data {
      match Arc::clone(payload).downcast::<T>() {
        Ok(data) => result.data = Some(data),
        Err(_) => {
          result.status = QueryStatus::Error;
          result.error = Some(QueryError::TypeMismatch {
            key: key.to_string(),
          });
        }
      }
    }

    result
  }
}

/// Cached entries plus the mounted-subscriber count per key. Counts live apart
/// from entries so mounting a handle never creates an entry.
#[derive(Default)]
struct Table {
  entries: HashMap<CacheKey, Entry>,
  observers: HashMap<CacheKey, usize>,
}

struct Inner {
  table: Mutex<Table>,
  /// Source of fetch ids, unique for the life of the client
  next_fetch: AtomicU64,
  notifier: Arc<dyn Notifier>,
  stale_time: Duration,
}

impl Inner {
  fn new(notifier: Arc<dyn Notifier>, stale_time: Duration) -> Self {
    Self {
      table: Mutex::new(Table::default()),
      next_fetch: AtomicU64::new(0),
      notifier,
      stale_time,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Table> {
    // Entries stay consistent even if a panic poisoned the lock.
    self.table.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Record the outcome of fetch `fetch_id`, unless invalidation detached it.
  fn settle(&self, key: &CacheKey, fetch_id: u64, settled: &Settled) {
    {
      let mut table = self.lock();
      match table.entries.get_mut(key) {
        Some(entry) if entry.fetch_id == Some(fetch_id) => {
          entry.fetch_id = None;
          entry.in_flight = None;
          match settled {
            Ok(payload) => {
              entry.status = QueryStatus::Success;
              entry.data = Some(Arc::clone(payload));
              entry.error = None;
              entry.fetched_at = Some(Utc::now());
              entry.invalidated = false;
              debug!(%key, "fetch succeeded");
            }
            Err(err) => {
              // Prior data stays available.
              entry.status = QueryStatus::Error;
              entry.error = Some(err.clone());
            }
          }
        }
        _ => {
          debug!(%key, "discarding result of a fetch detached by invalidation");
        }
      }
    }

    if let Err(err) = settled {
      warn!(%key, error = %err, "fetch failed");
      self.notifier.notify(Notification::error(err.to_string()));
    }
  }
}

/// Client-side request cache with keyed invalidation.
///
/// A `QueryClient` is an explicit instance: clone it into every caller that
/// needs it. Clones share the same entries.
///
/// # Example
///
/// ```ignore
/// let client = QueryClient::new(Arc::new(LogNotifier));
/// let key = CacheKey::new("users").with("bob");
/// let user = client
///   .read(&key, || backend.user("bob"), QueryOptions::default())
///   .await;
/// ```
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  /// Create a new cache. Entries go stale after one minute by default.
  pub fn new(notifier: Arc<dyn Notifier>) -> Self {
    Self {
      inner: Arc::new(Inner::new(notifier, Duration::minutes(1))),
    }
  }

  /// Set the default stale time for every read. Only valid before the client
  /// is shared.
  pub fn with_stale_time(self, stale_time: Duration) -> Self {
    let notifier = Arc::clone(&self.inner.notifier);
    Self {
      inner: Arc::new(Inner::new(notifier, stale_time)),
    }
  }

  pub fn notifier(&self) -> &Arc<dyn Notifier> {
    &self.inner.notifier
  }

  /// Read `key`, fetching through `fetch` when needed.
  ///
  /// 1. Disabled: never fetch, return what is cached (or `Idle`)
  /// 2. A fetch for this key is in flight: join it
  /// 3. Fresh data: return it without fetching
  /// 4. Otherwise start one fetch and wait for it
  ///
  /// The fetch runs on its own task, so dropping this future does not cancel
  /// it: the entry is still updated for later readers.
  pub async fn read<T, F, Fut>(&self, key: &CacheKey, fetch: F, options: QueryOptions) -> QueryResult<T>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if !options.enabled {
      trace!(%key, "read disabled");
      return self.peek(key).unwrap_or_else(QueryResult::idle);
    }

    let stale_time = options.stale_time.unwrap_or(self.inner.stale_time);

    let pending = {
      let mut table = self.inner.lock();
      let entry = table.entries.entry(key.clone()).or_default();

      if let Some(in_flight) = &entry.in_flight {
        trace!(%key, "joining in-flight fetch");
        in_flight.clone()
      } else if entry.is_fresh(stale_time) {
        trace!(%key, "cache hit");
        return entry.snapshot(key, stale_time);
      } else {
        self.start_fetch(key, entry, fetch())
      }
    };

    let settled = pending.await;
    self.result_after(key, settled, stale_time)
  }

  fn start_fetch<T, Fut>(&self, key: &CacheKey, entry: &mut Entry, fetch: Fut) -> InFlight
  where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetch_id = self.inner.next_fetch.fetch_add(1, Ordering::Relaxed);
    debug!(%key, namespace = key.namespace(), fetch_id, "starting fetch");

    entry.status = QueryStatus::Loading;
    entry.fetch_id = Some(fetch_id);

    let inner = Arc::clone(&self.inner);
    let owned_key = key.clone();

    let in_flight = async move {
      let settled = match fetch.await {
        Ok(value) => Ok(Arc::new(value) as Payload),
        Err(err) => Err(QueryError::fetch_failed(owned_key.to_string(), err.to_string())),
      };
      inner.settle(&owned_key, fetch_id, &settled);
      settled
    }
    .boxed()
    .shared();

    entry.in_flight = Some(in_flight.clone());

    // Drive the fetch even if every reader goes away.
    tokio::spawn(in_flight.clone());

    in_flight
  }

  /// Build the reader's view once its fetch settled. Every reader of the same
  /// fetch gets the same `Arc`.
  fn result_after<T: Send + Sync + 'static>(
    &self,
    key: &CacheKey,
    settled: Settled,
    stale_time: Duration,
  ) -> QueryResult<T> {
    let mut result = {
      let table = self.inner.lock();
      table
        .entries
        .get(key)
        .map(|entry| entry.snapshot(key, stale_time))
        .unwrap_or_else(QueryResult::idle)
    };

    match settled {
      Ok(payload) => match payload.downcast::<T>() {
        Ok(data) => {
          result.status = QueryStatus::Success;
          result.data = Some(data);
          result.error = None;
        }
        Err(_) => {
          result.status = QueryStatus::Error;
          result.error = Some(QueryError::TypeMismatch {
            key: key.to_string(),
          });
        }
      },
      Err(err) => {
        result.status = QueryStatus::Error;
        result.error = Some(err);
      }
    }

    result
  }

  /// Snapshot of an entry without fetching.
  pub fn peek<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<QueryResult<T>> {
    let table = self.inner.lock();
    table
      .entries
      .get(key)
      .map(|entry| entry.snapshot(key, self.inner.stale_time))
  }

  /// Mark matching entries stale.
  ///
  /// Entries with mounted observers keep their data and refetch on the next
  /// read; entries nobody observes are dropped. Returns how many matched.
  pub fn invalidate(&self, filter: impl Into<QueryFilter>) -> usize {
    let filter = filter.into();
    let mut matched = 0;

    let mut guard = self.inner.lock();
    let table = &mut *guard;
    let observers = &table.observers;
    table.entries.retain(|key, entry| {
      if !filter.matches(key) {
        return true;
      }
      matched += 1;

      // A fetch started before this point must not land.
      entry.fetch_id = None;

      if observers.get(key).copied().unwrap_or(0) == 0 {
        trace!(%key, "dropping unobserved entry");
        return false;
      }

      entry.invalidated = true;
      if entry.in_flight.take().is_some() {
        entry.status = if entry.data.is_some() {
          QueryStatus::Success
        } else if entry.error.is_some() {
          QueryStatus::Error
        } else {
          QueryStatus::Idle
        };
      }
      true
    });

    debug!(?filter, matched, "invalidated");
    matched
  }

  /// Register a mounted subscriber for `key` until the returned guard drops.
  pub fn observe(&self, key: &CacheKey) -> Observer {
    *self.inner.lock().observers.entry(key.clone()).or_default() += 1;

    Observer {
      inner: Arc::clone(&self.inner),
      key: key.clone(),
    }
  }

  /// Drop every entry. Mounted observers stay registered.
  pub fn clear(&self) {
    self.inner.lock().entries.clear();
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("entries", &self.len())
      .field("stale_time", &self.inner.stale_time)
      .finish_non_exhaustive()
  }
}

/// A mounted subscriber. Unregisters itself on drop.
pub struct Observer {
  inner: Arc<Inner>,
  key: CacheKey,
}

impl Observer {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }
}

impl Drop for Observer {
  fn drop(&mut self) {
    let mut table = self.inner.lock();
    if let Some(count) = table.observers.get_mut(&self.key) {
      *count = count.saturating_sub(1);
      if *count == 0 {
        table.observers.remove(&self.key);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::{Level, RecordingNotifier};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn client() -> (QueryClient, RecordingNotifier) {
    let notifier = RecordingNotifier::new();
    (QueryClient::new(Arc::new(notifier.clone())), notifier)
  }

  fn counting_fetch(
    counter: &Arc<AtomicU32>,
    delay_ms: u64,
  ) -> impl Future<Output = Result<u32>> + Send + 'static {
    let counter = Arc::clone(counter);
    async move {
      tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
      Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
  }

  #[tokio::test]
  async fn test_concurrent_reads_fetch_once() {
    let (client, _) = client();
    let key = CacheKey::new("analytics").with("bob").with("7d");
    let counter = Arc::new(AtomicU32::new(0));

    let reads = (0..5).map(|_| {
      client.read(&key, || counting_fetch(&counter, 20), QueryOptions::default())
    });
    let results = futures::future::join_all(reads).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    for result in &results {
      assert!(result.is_success());
      assert_eq!(result.data(), Some(&1));
    }
  }

  #[tokio::test]
  async fn test_joined_readers_share_the_same_object() {
    let (client, _) = client();
    let key = CacheKey::new("analytics").with("bob").with("7d");
    let counter = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
      client.read(&key, || counting_fetch(&counter, 20), QueryOptions::default()),
      client.read(&key, || counting_fetch(&counter, 20), QueryOptions::default()),
    );

    let (a, b) = (a.data.unwrap(), b.data.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_second_read_is_served_from_cache() {
    let (client, _) = client();
    let key = CacheKey::new("links").with(7);
    let counter = Arc::new(AtomicU32::new(0));

    let first = client.read(&key, || counting_fetch(&counter, 0), QueryOptions::default()).await;
    let second = client.read(&key, || counting_fetch(&counter, 0), QueryOptions::default()).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first.data(), Some(&1));
    assert_eq!(second.data(), Some(&1));
    assert!(second.last_fetched_at.is_some());
  }

  #[tokio::test]
  async fn test_invalidate_then_read_fetches_once() {
    let (client, _) = client();
    let key = CacheKey::new("users").with("bob");
    let counter = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
      client.read(&key, || counting_fetch(&counter, 0), QueryOptions::default()).await;
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    assert_eq!(client.invalidate(key.clone()), 1);

    let after = client.read(&key, || counting_fetch(&counter, 0), QueryOptions::default()).await;
    client.read(&key, || counting_fetch(&counter, 0), QueryOptions::default()).await;

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(after.data(), Some(&2));
  }

  #[tokio::test]
  async fn test_disabled_read_never_fetches() {
    let (client, _) = client();
    let key = CacheKey::new("users").with(None::<&str>);
    let counter = Arc::new(AtomicU32::new(0));

    let result = client
      .read(&key, || counting_fetch(&counter, 0), QueryOptions::enabled(false))
      .await;

    assert!(result.is_idle());
    assert!(result.data.is_none());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(client.is_empty());
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_previous_data() {
    let (client, notifier) = client();
    let key = CacheKey::new("users").with("bob");
    let observer = client.observe(&key);

    client
      .read(&key, || async { Ok::<_, color_eyre::Report>("v1".to_string()) }, QueryOptions::default())
      .await;
    client.invalidate(QueryFilter::namespace("users"));

    let result = client
      .read::<String, _, _>(&key, || async { Err(eyre!("server down")) }, QueryOptions::default())
      .await;

    assert!(result.is_error());
    assert_eq!(result.data().map(String::as_str), Some("v1"));
    assert!(matches!(result.error(), Some(QueryError::FetchFailed { .. })));
    assert_eq!(notifier.count(Level::Error), 1);
    drop(observer);
  }

  #[tokio::test]
  async fn test_failure_notifies_once_for_many_subscribers() {
    let (client, notifier) = client();
    let key = CacheKey::new("links").with(1);

    let fail = || async {
      tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      Err::<u32, _>(eyre!("nope"))
    };
    let results = futures::future::join_all(
      (0..4).map(|_| client.read(&key, fail, QueryOptions::default())),
    )
    .await;

    assert!(results.iter().all(|r| r.is_error()));
    assert_eq!(notifier.count(Level::Error), 1);
  }

  #[tokio::test]
  async fn test_zero_stale_time_refetches() {
    let (client, _) = client();
    let key = CacheKey::new("links").with(3);
    let counter = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::default().with_stale_time(Duration::zero());

    client.read(&key, || counting_fetch(&counter, 0), options).await;
    client.read(&key, || counting_fetch(&counter, 0), options).await;

    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_unobserved_entries_are_dropped_on_invalidate() {
    let (client, _) = client();
    let watched = CacheKey::new("users").with("bob");
    let unwatched = CacheKey::new("users").with("alice");
    let other = CacheKey::new("links").with(1);

    let _observer = client.observe(&watched);
    for key in [&watched, &unwatched, &other] {
      client
        .read(key, || async { Ok::<_, color_eyre::Report>(1u8) }, QueryOptions::default())
        .await;
    }

    assert_eq!(client.invalidate(QueryFilter::namespace("users")), 2);

    assert_eq!(client.len(), 2);
    let stale = client.peek::<u8>(&watched).unwrap();
    assert!(stale.is_stale);
    assert_eq!(stale.data(), Some(&1));
    assert!(client.peek::<u8>(&unwatched).is_none());
    assert!(!client.peek::<u8>(&other).unwrap().is_stale);
  }

  #[tokio::test]
  async fn test_dropped_reader_still_updates_entry() {
    let (client, _) = client();
    let key = CacheKey::new("links").with(9);
    let counter = Arc::new(AtomicU32::new(0));

    let read = client.read(&key, || counting_fetch(&counter, 20), QueryOptions::default());
    // Poll once so the fetch starts, then abandon the reader.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(1), read).await;

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    let cached = client.peek::<u32>(&key).unwrap();
    assert!(cached.is_success());
    assert_eq!(cached.data(), Some(&1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidate_during_fetch_forces_new_fetch() {
    let (client, _) = client();
    let key = CacheKey::new("users").with("bob");
    let _observer = client.observe(&key);
    let counter = Arc::new(AtomicU32::new(0));

    let first = client.read(&key, || counting_fetch(&counter, 30), QueryOptions::default());
    let _ = tokio::time::timeout(std::time::Duration::from_millis(1), first).await;

    client.invalidate(key.clone());
    let second = client.read(&key, || counting_fetch(&counter, 0), QueryOptions::default()).await;
    assert!(second.is_success());

    // The detached fetch finishing later must not overwrite the newer data.
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    let cached = client.peek::<u32>(&key).unwrap();
    assert_eq!(cached.data(), second.data());
  }

  #[tokio::test]
  async fn test_invalidate_drops_unobserved_entry_and_ignores_its_fetch() {
    let (client, _) = client();
    let key = CacheKey::new("users").with("bob");

    let before = client.read(
      &key,
      || async {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        Ok::<_, color_eyre::Report>("before edit".to_string())
      },
      QueryOptions::default(),
    );
    let _ = tokio::time::timeout(std::time::Duration::from_millis(1), before).await;

    assert_eq!(client.invalidate(QueryFilter::namespace("users")), 1);
    assert!(client.is_empty());

    let fresh = client
      .read(
        &key,
        || async { Ok::<_, color_eyre::Report>("after edit".to_string()) },
        QueryOptions::default(),
      )
      .await;
    assert_eq!(fresh.data().map(String::as_str), Some("after edit"));

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    let cached = client.peek::<String>(&key).unwrap();
    assert_eq!(cached.data().map(String::as_str), Some("after edit"));
    assert!(cached.is_success());
  }

  #[tokio::test]
  async fn test_observing_does_not_create_entries() {
    let (client, _) = client();
    let key = CacheKey::new("users").with(None::<&str>);

    let observer = client.observe(&key);
    assert!(client.is_empty());
    assert!(client.peek::<u8>(&key).is_none());

    drop(observer);
    assert!(client.is_empty());
    assert!(client.inner.lock().observers.is_empty());
  }

  #[tokio::test]
  async fn test_entry_is_dropped_once_its_last_observer_is_gone() {
    let (client, _) = client();
    let key = CacheKey::new("users").with("bob");

    let (first, second) = (client.observe(&key), client.observe(&key));
    client
      .read(&key, || async { Ok::<_, color_eyre::Report>(1u8) }, QueryOptions::default())
      .await;

    drop(first);
    client.invalidate(key.clone());
    assert_eq!(client.len(), 1);

    drop(second);
    client.invalidate(key.clone());
    assert!(client.is_empty());
  }

  #[tokio::test]
  async fn test_type_mismatch_is_reported() {
    let (client, _) = client();
    let key = CacheKey::new("links").with(1);

    client
      .read(&key, || async { Ok::<_, color_eyre::Report>(1u32) }, QueryOptions::default())
      .await;
    let wrong = client
      .read(&key, || async { Ok::<_, color_eyre::Report>("x".to_string()) }, QueryOptions::default())
      .await;

    assert!(matches!(wrong.error(), Some(QueryError::TypeMismatch { .. })));
  }
}
