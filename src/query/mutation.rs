//! Write operations that invalidate the cache namespaces their caller names.

use color_eyre::Result;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

use super::client::QueryClient;
use super::key::QueryFilter;
use crate::error::MutationError;
use crate::notify::Notification;

type BoxFuture<O> = Pin<Box<dyn Future<Output = Result<O>> + Send>>;
type WriteFn<I, O> = Box<dyn Fn(I) -> BoxFuture<O> + Send + Sync>;
type SuccessFn<O> = Box<dyn Fn(&O) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&MutationError) + Send + Sync>;

/// Default message for a failed write.
const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// A non-idempotent write.
///
/// Each `mutate` call runs the write exactly once: concurrent calls are never
/// merged. Nothing is invalidated unless declared with [`Mutation::invalidates`].
pub struct Mutation<I, O> {
  client: QueryClient,
  write: WriteFn<I, O>,
  invalidates: Vec<QueryFilter>,
  on_success: Option<SuccessFn<O>>,
  on_error: Option<ErrorFn>,
  success_message: Option<String>,
  error_message: String,
}

impl<I: Send + 'static, O: Send + 'static> Mutation<I, O> {
  pub fn new<F, Fut>(client: &QueryClient, write: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
  {
    Self {
      client: client.clone(),
      write: Box::new(move |input| Box::pin(write(input))),
      invalidates: Vec::new(),
      on_success: None,
      on_error: None,
      success_message: None,
      error_message: DEFAULT_ERROR_MESSAGE.to_string(),
    }
  }

  /// Invalidate `filter` after every successful write.
  pub fn invalidates(mut self, filter: impl Into<QueryFilter>) -> Self {
    self.invalidates.push(filter.into());
    self
  }

  pub fn on_success(mut self, callback: impl Fn(&O) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Box::new(callback));
    self
  }

  pub fn on_error(mut self, callback: impl Fn(&MutationError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Box::new(callback));
    self
  }

  /// Notify with `message` after a successful write.
  pub fn success_message(mut self, message: impl Into<String>) -> Self {
    self.success_message = Some(message.into());
    self
  }

  pub fn error_message(mut self, message: impl Into<String>) -> Self {
    self.error_message = message.into();
    self
  }

  /// Run the write once.
  ///
  /// On success: declared invalidations, then `on_success`, then the success
  /// notification. On failure: `on_error`, one error notification, and the
  /// error is returned to this caller only. No retry either way.
  pub async fn mutate(&self, input: I) -> Result<O, MutationError> {
    match (self.write)(input).await {
      Ok(output) => {
        for filter in &self.invalidates {
          self.client.invalidate(filter.clone());
        }
        if let Some(callback) = &self.on_success {
          callback(&output);
        }
        if let Some(message) = &self.success_message {
          self.client.notifier().notify(Notification::success(message.as_str()));
        }
        debug!(invalidated = self.invalidates.len(), "mutation succeeded");
        Ok(output)
      }
      Err(err) => {
        let error = MutationError::MutationFailed(err.to_string());
        warn!(error = %error, "mutation failed");
        if let Some(callback) = &self.on_error {
          callback(&error);
        }
        self
          .client
          .notifier()
          .notify(Notification::error(self.error_message.as_str()));
        Err(error)
      }
    }
  }
}

impl<I, O> std::fmt::Debug for Mutation<I, O> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("invalidates", &self.invalidates)
      .field("success_message", &self.success_message)
      .finish_non_exhaustive()
  }
}
