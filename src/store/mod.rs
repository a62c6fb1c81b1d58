//! Persistence layer: an opaque record store behind the `AccountStore` trait.

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::types::{CurrentUser, DailyViews, Link, ProfilePatch, User};

pub use sqlite::SqliteStore;

/// Record operations used by the session guard and the request handlers.
///
/// Writes are last-write-wins: no concurrency token is checked.
#[async_trait]
pub trait AccountStore: Send + Sync {
  /// Unique-key lookup by email, including linked accounts.
  async fn find_user_by_email(&self, email: &str) -> Result<Option<CurrentUser>>;

  /// Unique-key lookup by public handle.
  async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>>;

  /// Overwrite the editable profile fields and return the stored user.
  async fn update_profile(&self, user_id: i64, patch: &ProfilePatch) -> Result<User>;

  /// Delete a user together with their accounts, sessions and links.
  async fn delete_user(&self, user_id: i64) -> Result<()>;

  async fn find_link(&self, link_id: i64) -> Result<Option<Link>>;

  /// Views of `handle` per day, oldest first. `None` means no lower bound.
  async fn page_views(&self, handle: &str, since: Option<DateTime<Utc>>) -> Result<Vec<DailyViews>>;
}
