//! Remote read and write operations consumed by the data hooks.

mod http;
mod local;

use async_trait::async_trait;
use color_eyre::Result;

use crate::types::{AnalyticsFilter, CurrentUser, Link, PageViews, ProfilePatch, User};

pub use http::HttpBackend;
pub use local::LocalBackend;

/// Where reads and writes go. Reads must be safe to repeat; writes need not be.
#[async_trait]
pub trait Backend: Send + Sync {
  /// `GET /current`
  async fn current_user(&self) -> Result<CurrentUser>;

  /// `GET /users/:handle`
  async fn user(&self, handle: &str) -> Result<User>;

  /// `GET /links/:id`
  async fn link(&self, link_id: i64) -> Result<Link>;

  /// `GET /analytics/views?handle&filter`
  async fn page_views(&self, handle: &str, filter: AnalyticsFilter) -> Result<PageViews>;

  /// `PATCH /edit`
  async fn edit_profile(&self, patch: &ProfilePatch) -> Result<User>;

  /// `DELETE /edit`
  async fn delete_account(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) use local::fixture;
