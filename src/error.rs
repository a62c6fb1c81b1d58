//! Typed failures surfaced by the cache, the session guard and the handlers.
//!
//! Infrastructure code (store, HTTP, config) reports `color_eyre::Report`;
//! these enums exist where callers need to branch on the kind of failure.

use thiserror::Error;

/// Raised by the session guard. Missing sessions and unknown accounts are
/// reported identically so callers cannot probe for account existence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
  #[error("not signed in")]
  Unauthenticated,
}

/// Failure recorded on a cache entry and shared by every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
  #[error("fetch failed for {key}: {message}")]
  FetchFailed { key: String, message: String },

  /// The entry holds a payload of a different type than the reader asked for.
  #[error("cached value for {key} has an unexpected type")]
  TypeMismatch { key: String },
}

impl QueryError {
  pub fn fetch_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
    Self::FetchFailed {
      key: key.into(),
      message: message.into(),
    }
  }
}

/// Failure of a write operation, returned only to the caller that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
  #[error("mutation failed: {0}")]
  MutationFailed(String),
}

/// Store failures that callers branch on. Carried inside a
/// `color_eyre::Report` and recovered with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// A unique column (email, handle) already holds this value.
  #[error("{0} is already taken")]
  Duplicate(String),
}

/// Rejections produced by the request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  #[error(transparent)]
  Auth(#[from] AuthError),

  #[error("{0} not found")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl ApiError {
  /// HTTP status the route would answer with.
  pub fn status(&self) -> u16 {
    match self {
      Self::Auth(_) => 401,
      Self::NotFound(_) => 404,
      Self::BadRequest(_) => 400,
      Self::Conflict(_) => 409,
      Self::Internal(_) => 500,
    }
  }
}

impl From<color_eyre::Report> for ApiError {
  fn from(err: color_eyre::Report) -> Self {
    match err.downcast_ref::<StoreError>() {
      Some(StoreError::Duplicate(what)) => Self::Conflict(format!("{} is taken", what)),
      None => Self::Internal(err.to_string()),
    }
  }
}
