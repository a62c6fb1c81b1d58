//! Data hooks: one mounted query per remote read, keyed the same way everywhere.
//!
//! A hook whose required parameter is missing is disabled: it stays idle and
//! never calls the backend.

use color_eyre::eyre::eyre;
use std::sync::Arc;

use crate::backend::Backend;
use crate::query::{CacheKey, Query, QueryClient};
use crate::types::{AnalyticsFilter, CurrentUser, Link, PageViews, User};

pub const CURRENT_USER: &str = "current_user";
pub const USERS: &str = "users";
pub const LINKS: &str = "links";
pub const ANALYTICS: &str = "analytics";

/// `("current_user")`
pub fn use_current_user(client: &QueryClient, backend: &Arc<dyn Backend>) -> Query<CurrentUser> {
  let backend = Arc::clone(backend);
  Query::new(client, CacheKey::new(CURRENT_USER), move || {
    let backend = Arc::clone(&backend);
    async move { backend.current_user().await }
  })
}

/// `("users", handle)`, enabled once the handle is known.
pub fn use_user(client: &QueryClient, backend: &Arc<dyn Backend>, handle: Option<&str>) -> Query<User> {
  let key = CacheKey::new(USERS).with(handle);
  let handle = handle.map(String::from);
  let enabled = handle.is_some();
  let backend = Arc::clone(backend);

  Query::new(client, key, move || {
    let backend = Arc::clone(&backend);
    let handle = handle.clone();
    async move {
      let handle = handle.ok_or_else(|| eyre!("No handle to load"))?;
      backend.user(&handle).await
    }
  })
  .enabled(enabled)
}

/// `("links", id)`, enabled once a link is selected.
pub fn use_link(client: &QueryClient, backend: &Arc<dyn Backend>, link_id: Option<i64>) -> Query<Link> {
  let backend = Arc::clone(backend);

  Query::new(client, CacheKey::new(LINKS).with(link_id), move || {
    let backend = Arc::clone(&backend);
    async move {
      let link_id = link_id.ok_or_else(|| eyre!("No link selected"))?;
      backend.link(link_id).await
    }
  })
  .enabled(link_id.is_some())
}

/// `("analytics", handle, filter)`, enabled once the handle is known.
pub fn use_analytics(
  client: &QueryClient,
  backend: &Arc<dyn Backend>,
  filter: AnalyticsFilter,
  handle: Option<&str>,
) -> Query<PageViews> {
  let key = CacheKey::new(ANALYTICS).with(handle).with(filter.as_str());
  let handle = handle.map(String::from);
  let enabled = handle.is_some();
  let backend = Arc::clone(backend);

  Query::new(client, key, move || {
    let backend = Arc::clone(&backend);
    let handle = handle.clone();
    async move {
      let handle = handle.ok_or_else(|| eyre!("No handle to load"))?;
      backend.page_views(&handle, filter).await
    }
  })
  .enabled(enabled)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::fixture::signed_in_as_bob;
  use crate::error::QueryError;
  use crate::notify::{Level, RecordingNotifier};
  use chrono::Utc;

  fn client() -> (QueryClient, RecordingNotifier) {
    let notifier = RecordingNotifier::new();
    (QueryClient::new(Arc::new(notifier.clone())), notifier)
  }

  #[tokio::test]
  async fn test_use_user_without_handle_stays_idle() {
    let f = signed_in_as_bob();
    let (client, _) = client();

    let query = use_user(&client, &f.backend, None);

    assert!(!query.is_enabled());
    assert!(query.fetch().await.is_idle());
    assert!(client.is_empty());

    drop(query);
    assert!(client.is_empty());
  }

  #[tokio::test]
  async fn test_use_user_loads_profile() {
    let f = signed_in_as_bob();
    let (client, _) = client();

    let query = use_user(&client, &f.backend, Some("bob"));
    let result = query.fetch().await;

    assert_eq!(result.data().and_then(|u| u.name.as_deref()), Some("Bob"));
    assert_eq!(query.key(), &CacheKey::new(USERS).with("bob"));
  }

  #[tokio::test]
  async fn test_hooks_for_same_key_share_the_entry() {
    let f = signed_in_as_bob();
    let (client, _) = client();
    f.store.record_view("bob", Utc::now()).unwrap();

    let (a, b) = (
      use_analytics(&client, &f.backend, AnalyticsFilter::Week, Some("bob")),
      use_analytics(&client, &f.backend, AnalyticsFilter::Week, Some("bob")),
    );
    let (ra, rb) = tokio::join!(a.fetch(), b.fetch());

    assert!(Arc::ptr_eq(ra.data.as_ref().unwrap(), rb.data.as_ref().unwrap()));
    assert_eq!(ra.data().map(|v| v.total), Some(1));
    assert_eq!(client.len(), 1);
  }

  #[tokio::test]
  async fn test_missing_link_surfaces_error_and_notifies() {
    let f = signed_in_as_bob();
    let (client, notifier) = client();

    let result = use_link(&client, &f.backend, Some(99)).fetch().await;

    assert!(matches!(result.error(), Some(QueryError::FetchFailed { .. })));
    assert_eq!(notifier.count(Level::Error), 1);
  }

  #[tokio::test]
  async fn test_use_link_loads_existing_link() {
    let f = signed_in_as_bob();
    let (client, _) = client();
    let link = f.store.create_link(f.bob_id, "site", "https://example.com").unwrap();

    let result = use_link(&client, &f.backend, Some(link.id)).fetch().await;
    assert_eq!(result.data(), Some(&link));
  }

  #[tokio::test]
  async fn test_current_user_requires_session() {
    let f = signed_in_as_bob();
    let (client, _) = client();

    let signed_in = use_current_user(&client, &f.backend).fetch().await;
    assert_eq!(signed_in.data().map(|c| c.user.id), Some(f.bob_id));

    let (other_client, _) = self::client();
    let anonymous = use_current_user(&other_client, &f.anonymous).fetch().await;
    assert!(anonymous.is_error());
  }
}
