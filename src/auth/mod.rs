//! Server-side session guard.
//!
//! Every state-changing handler calls [`SessionGuard::authenticate`] before
//! touching the store:
//! 1. The identity provider validates the request's session token
//! 2. The session's email is looked up in the store (unique key)
//!
//! Either step failing yields `AuthError::Unauthenticated`. An unknown account
//! is reported the same way as a missing session.

mod context;
mod session;

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::store::AccountStore;
use crate::types::CurrentUser;

pub use context::{RequestContext, DEFAULT_SESSION_COOKIE};
pub use session::{IdentityProvider, Session, SessionUser, SqliteSessions};

/// Resolves a request to the signed-in user, or rejects it.
#[derive(Clone)]
pub struct SessionGuard {
  provider: Arc<dyn IdentityProvider>,
  store: Arc<dyn AccountStore>,
}

impl SessionGuard {
  pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn AccountStore>) -> Self {
    Self { provider, store }
  }

  /// Resolve the caller's identity. Read-only; never retries.
  ///
  /// Provider and store failures fail closed.
  pub async fn authenticate(&self, ctx: &RequestContext) -> Result<CurrentUser, AuthError> {
    let session = match self.provider.session(ctx).await {
      Ok(Some(session)) => session,
      Ok(None) => {
        debug!("no valid session");
        return Err(AuthError::Unauthenticated);
      }
      Err(e) => {
        warn!(error = %e, "identity provider failed");
        return Err(AuthError::Unauthenticated);
      }
    };

    let Some(email) = session.user.email.as_deref().filter(|e| !e.is_empty()) else {
      debug!("session carries no email");
      return Err(AuthError::Unauthenticated);
    };

    match self.store.find_user_by_email(email).await {
      Ok(Some(current)) => Ok(current),
      Ok(None) => {
        debug!("session for unknown account");
        Err(AuthError::Unauthenticated)
      }
      Err(e) => {
        warn!(error = %e, "identity lookup failed");
        Err(AuthError::Unauthenticated)
      }
    }
  }
}

impl std::fmt::Debug for SessionGuard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionGuard").finish_non_exhaustive()
  }
}
