//! Request handlers for the profile routes, independent of any HTTP server.
//!
//! | Route                               | Handler            | Guarded |
//! |-------------------------------------|--------------------|---------|
//! | `GET /current`                      | `current_user`     | yes     |
//! | `GET /users/:handle`                | `user_by_handle`   | no      |
//! | `GET /links/:id`                    | `link`             | no      |
//! | `GET /analytics/views?handle&filter`| `page_views`       | no      |
//! | `PATCH /edit`                       | `edit_profile`     | yes     |
//! | `DELETE /edit`                      | `delete_account`   | yes     |

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::auth::{RequestContext, SessionGuard};
use crate::error::ApiError;
use crate::store::AccountStore;
use crate::types::{AnalyticsFilter, CurrentUser, Link, PageViews, ProfilePatch, User};

#[derive(Clone)]
pub struct Handlers {
  guard: SessionGuard,
  store: Arc<dyn AccountStore>,
}

impl Handlers {
  pub fn new(guard: SessionGuard, store: Arc<dyn AccountStore>) -> Self {
    Self { guard, store }
  }

  pub async fn current_user(&self, ctx: &RequestContext) -> Result<CurrentUser, ApiError> {
    Ok(self.guard.authenticate(ctx).await?)
  }

  pub async fn user_by_handle(&self, handle: &str) -> Result<User, ApiError> {
    self
      .store
      .find_user_by_handle(handle)
      .await?
      .ok_or_else(|| ApiError::NotFound(format!("user {}", handle)))
  }

  pub async fn link(&self, link_id: i64) -> Result<Link, ApiError> {
    self
      .store
      .find_link(link_id)
      .await?
      .ok_or_else(|| ApiError::NotFound(format!("link {}", link_id)))
  }

  pub async fn page_views(&self, handle: &str, filter: AnalyticsFilter) -> Result<PageViews, ApiError> {
    let by_day = self
      .store
      .page_views(handle, filter.since(Utc::now()))
      .await?;

    Ok(PageViews {
      handle: handle.to_string(),
      filter,
      total: by_day.iter().map(|d| d.views).sum(),
      by_day,
    })
  }

  /// Overwrite the caller's profile.
  #[instrument(skip_all, fields(handle = %patch.handle))]
  pub async fn edit_profile(&self, ctx: &RequestContext, patch: &ProfilePatch) -> Result<User, ApiError> {
    let current = self.guard.authenticate(ctx).await?;

    let patch = ProfilePatch {
      bio: patch.bio.trim().to_string(),
      username: patch.username.trim().to_string(),
      image: patch.image.trim().to_string(),
      handle: patch.handle.trim().to_lowercase(),
    };

    if patch.username.is_empty() {
      return Err(ApiError::BadRequest("username is required".into()));
    }
    if patch.handle.is_empty() {
      return Err(ApiError::BadRequest("handle is required".into()));
    }

    if let Some(owner) = self.store.find_user_by_handle(&patch.handle).await? {
      if owner.id != current.user.id {
        return Err(ApiError::Conflict(format!("handle {} is taken", patch.handle)));
      }
    }

    let user = self.store.update_profile(current.user.id, &patch).await?;
    info!(user_id = user.id, "profile updated");
    Ok(user)
  }

  /// Delete the caller's account and everything it owns.
  pub async fn delete_account(&self, ctx: &RequestContext) -> Result<(), ApiError> {
    let current = self.guard.authenticate(ctx).await?;
    self.store.delete_user(current.user.id).await?;
    info!(user_id = current.user.id, "account deleted");
    Ok(())
  }
}
