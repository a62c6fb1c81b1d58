use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::QueryError;

/// The status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
  /// Nothing has been fetched (or the read is disabled)
  #[default]
  Idle,
  /// A fetch is in flight
  Loading,
  /// The last fetch succeeded
  Success,
  /// The last fetch failed
  Error,
}

/// What a reader sees of one cache entry.
///
/// `data` survives a later failure: after `Success` then `Error`, both `data`
/// and `error` are populated.
#[derive(Debug)]
pub struct QueryResult<T> {
  pub status: QueryStatus,
  pub data: Option<Arc<T>>,
  pub error: Option<QueryError>,
  pub last_fetched_at: Option<DateTime<Utc>>,
  pub is_stale: bool,
}

impl<T> QueryResult<T> {
  pub fn idle() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      last_fetched_at: None,
      is_stale: false,
    }
  }

  pub fn is_idle(&self) -> bool {
    self.status == QueryStatus::Idle
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }
}

// Manual impl: `T` itself does not need to be Clone behind the Arc.
impl<T> Clone for QueryResult<T> {
  fn clone(&self) -> Self {
    Self {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      last_fetched_at: self.last_fetched_at,
      is_stale: self.is_stale,
    }
  }
}

/// Per-read options.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
  /// When false the read never fetches and the entry stays idle.
  pub enabled: bool,
  /// Overrides the client's stale time for this read.
  pub stale_time: Option<Duration>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      stale_time: None,
    }
  }
}

impl QueryOptions {
  pub fn enabled(enabled: bool) -> Self {
    Self {
      enabled,
      ..Self::default()
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }
}
