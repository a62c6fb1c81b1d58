//! Hook-style handle over one cache key.

use color_eyre::Result;
use std::future::Future;
use std::pin::Pin;

use super::client::{Observer, QueryClient};
use super::key::{CacheKey, QueryFilter};
use super::state::{QueryOptions, QueryResult};

/// A boxed future that returns a Result<T>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// A mounted read of one key.
///
/// Query<T> bundles:
/// - The cache key
/// - The fetching logic (via a closure)
/// - Whether the read is enabled
/// - An observer registration, so invalidation keeps (rather than drops)
///   the entry while this handle is alive
pub struct Query<T> {
  client: QueryClient,
  fetcher: FetcherFn<T>,
  options: QueryOptions,
  observer: Observer,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It is called each time
  /// the cache decides a fetch is needed.
  ///
  /// # Example
  ///
  /// ```ignore
  /// let backend = backend.clone();
  /// let query = Query::new(&client, CacheKey::new("links").with(id), move || {
  ///     let backend = backend.clone();
  ///     async move { backend.link(id).await }
  /// });
  /// ```
  pub fn new<F, Fut>(client: &QueryClient, key: CacheKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      observer: client.observe(&key),
      client: client.clone(),
      fetcher: Box::new(move || Box::pin(fetcher())),
      options: QueryOptions::default(),
    }
  }

  /// Gate the read on a precondition, e.g. a required parameter being set.
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.options.enabled = enabled;
    self
  }

  pub fn key(&self) -> &CacheKey {
    self.observer.key()
  }

  pub fn is_enabled(&self) -> bool {
    self.options.enabled
  }

  /// Read through the cache, fetching only if needed.
  pub async fn fetch(&self) -> QueryResult<T> {
    self
      .client
      .read(self.key(), || (self.fetcher)(), self.options)
      .await
  }

  /// Invalidate this key and read it again.
  pub async fn refetch(&self) -> QueryResult<T> {
    if self.options.enabled {
      self.client.invalidate(QueryFilter::Exact(self.key().clone()));
    }
    self.fetch().await
  }

  /// Current state of the entry, without fetching.
  pub fn state(&self) -> QueryResult<T> {
    self
      .client
      .peek(self.key())
      .unwrap_or_else(QueryResult::idle)
  }
}

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", self.observer.key())
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::LogNotifier;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn counting_query(client: &QueryClient, key: CacheKey, counter: &Arc<AtomicU32>) -> Query<u32> {
    let counter = Arc::clone(counter);
    Query::new(client, key, move || {
      let counter = Arc::clone(&counter);
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
    })
  }

  #[tokio::test]
  async fn test_query_success() {
    let client = QueryClient::new(Arc::new(LogNotifier));
    let query = Query::new(&client, CacheKey::new("links").with(1), || async {
      Ok(vec![1, 2, 3])
    });

    assert!(query.state().is_idle());

    let result = query.fetch().await;
    assert!(result.is_success());
    assert_eq!(result.data(), Some(&vec![1, 2, 3]));
    assert!(query.state().is_success());
  }

  #[tokio::test]
  async fn test_query_error() {
    let client = QueryClient::new(Arc::new(LogNotifier));
    let query: Query<i32> = Query::new(&client, CacheKey::new("links").with(2), || async {
      Err(eyre!("Something went wrong"))
    });

    let result = query.fetch().await;
    assert!(result.is_error());
    assert!(result
      .error()
      .map(|e| e.to_string().contains("Something went wrong"))
      .unwrap_or(false));
  }

  #[tokio::test]
  async fn test_disabled_query_stays_idle() {
    let client = QueryClient::new(Arc::new(LogNotifier));
    let counter = Arc::new(AtomicU32::new(0));
    let query = counting_query(&client, CacheKey::new("users").with(None::<&str>), &counter)
      .enabled(false);

    assert!(query.fetch().await.is_idle());
    assert!(query.refetch().await.is_idle());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_refetch_bypasses_fresh_data() {
    let client = QueryClient::new(Arc::new(LogNotifier));
    let counter = Arc::new(AtomicU32::new(0));
    let query = counting_query(&client, CacheKey::new("links").with(5), &counter);

    query.fetch().await;
    query.fetch().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let refetched = query.refetch().await;
    assert_eq!(refetched.data(), Some(&2));
  }

  #[tokio::test]
  async fn test_mounted_query_keeps_data_across_invalidation() {
    let client = QueryClient::new(Arc::new(LogNotifier));
    let counter = Arc::new(AtomicU32::new(0));
    let query = counting_query(&client, CacheKey::new("users").with("bob"), &counter);

    query.fetch().await;
    client.invalidate(QueryFilter::namespace("users"));

    let stale = query.state();
    assert!(stale.is_stale);
    assert_eq!(stale.data(), Some(&1));

    drop(query);
    client.invalidate(QueryFilter::namespace("users"));
    assert!(client.is_empty());
  }
}
