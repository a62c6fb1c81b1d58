//! Side channels: transient user notifications and the cross-instance event bus.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Severity of a transient notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Success,
  Error,
}

/// A single "operation succeeded" / "operation failed" signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub level: Level,
  pub message: String,
}

impl Notification {
  pub fn success(message: impl Into<String>) -> Self {
    Self {
      level: Level::Success,
      message: message.into(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      level: Level::Error,
      message: message.into(),
    }
  }
}

/// Receives one notification per completed attempt. Presentation is up to
/// the implementor.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Notifier that writes to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, notification: Notification) {
    match notification.level {
      Level::Success => info!(message = %notification.message, "operation succeeded"),
      Level::Error => warn!(message = %notification.message, "operation failed"),
    }
  }
}

/// Notifier that keeps every notification in memory, in order.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
  seen: Arc<Mutex<Vec<Notification>>>,
}

#[cfg(test)]
impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Everything notified so far.
  pub fn notifications(&self) -> Vec<Notification> {
    self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
  }

  pub fn count(&self, level: Level) -> usize {
    self
      .notifications()
      .iter()
      .filter(|n| n.level == level)
      .count()
  }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) {
    if let Ok(mut seen) = self.seen.lock() {
      seen.push(notification);
    }
  }
}

/// Topic published after the profile changes so other open views reload.
pub const PROFILE_UPDATED: &str = "profile-updated";

/// Signals other open instances that something changed. Transport is the
/// implementor's concern.
pub trait EventBus: Send + Sync {
  fn publish(&self, topic: &str);
}

/// In-process event bus backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
  tx: broadcast::Sender<String>,
}

impl BroadcastBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<String> {
    self.tx.subscribe()
  }
}

impl Default for BroadcastBus {
  fn default() -> Self {
    Self::new(16)
  }
}

impl EventBus for BroadcastBus {
  fn publish(&self, topic: &str) {
    // No receivers is fine: nobody else is listening.
    let _ = self.tx.send(topic.to_string());
  }
}
