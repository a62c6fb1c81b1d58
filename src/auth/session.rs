//! Identity providers: turn a request into a session, or nothing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use super::context::{RequestContext, DEFAULT_SESSION_COOKIE};
use crate::store::SqliteStore;

/// The user a session belongs to, as the identity provider knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
  pub email: Option<String>,
  pub name: Option<String>,
}

/// Proof of identity with a validity window owned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  pub user: SessionUser,
  pub expires: DateTime<Utc>,
}

/// Validates the token carried by a request.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
  /// `None` when the token is missing, unknown or expired.
  async fn session(&self, ctx: &RequestContext) -> Result<Option<Session>>;
}

/// SHA-256 hex digest under which a token is stored.
pub fn hash_token(token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  hex::encode(hasher.finalize())
}

/// Database sessions kept in the record store.
///
/// Only token digests are persisted, so a leaked database does not yield
/// usable tokens.
pub struct SqliteSessions {
  store: Arc<SqliteStore>,
  cookie_name: String,
}

impl SqliteSessions {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self {
      store,
      cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
    }
  }

  pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
    self.cookie_name = cookie_name.into();
    self
  }

  pub fn cookie_name(&self) -> &str {
    &self.cookie_name
  }

  /// Start a session for `user_id` and return the raw token.
  pub fn issue(&self, user_id: i64, ttl: Duration) -> Result<String> {
    let token = uuid::Uuid::new_v4().simple().to_string();
    self
      .store
      .create_session(&hash_token(&token), user_id, Utc::now() + ttl)?;
    debug!(user_id, "issued session");
    Ok(token)
  }

  pub fn revoke(&self, token: &str) -> Result<()> {
    self.store.delete_session(&hash_token(token))
  }
}

#[async_trait]
impl IdentityProvider for SqliteSessions {
  async fn session(&self, ctx: &RequestContext) -> Result<Option<Session>> {
    let Some(token) = ctx.session_token(&self.cookie_name) else {
      return Ok(None);
    };

    let record = self.store.find_session(&hash_token(token), Utc::now())?;
    Ok(record.map(|r| Session {
      user: SessionUser {
        email: r.email,
        name: r.name,
      },
      expires: r.expires,
    }))
  }
}
