use async_trait::async_trait;
use color_eyre::Result;

use super::Backend;
use crate::api::Handlers;
use crate::auth::RequestContext;
use crate::types::{AnalyticsFilter, CurrentUser, Link, PageViews, ProfilePatch, User};

/// Backend that calls the handlers in-process, as a fixed caller.
#[derive(Clone)]
pub struct LocalBackend {
  handlers: Handlers,
  ctx: RequestContext,
}

impl LocalBackend {
  pub fn new(handlers: Handlers, ctx: RequestContext) -> Self {
    Self { handlers, ctx }
  }
}

#[async_trait]
impl Backend for LocalBackend {
  async fn current_user(&self) -> Result<CurrentUser> {
    Ok(self.handlers.current_user(&self.ctx).await?)
  }

  async fn user(&self, handle: &str) -> Result<User> {
    Ok(self.handlers.user_by_handle(handle).await?)
  }

  async fn link(&self, link_id: i64) -> Result<Link> {
    Ok(self.handlers.link(link_id).await?)
  }

  async fn page_views(&self, handle: &str, filter: AnalyticsFilter) -> Result<PageViews> {
    Ok(self.handlers.page_views(handle, filter).await?)
  }

  async fn edit_profile(&self, patch: &ProfilePatch) -> Result<User> {
    Ok(self.handlers.edit_profile(&self.ctx, patch).await?)
  }

  async fn delete_account(&self) -> Result<()> {
    Ok(self.handlers.delete_account(&self.ctx).await?)
  }
}
