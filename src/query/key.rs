//! Cache keys and invalidation filters.

use std::fmt;

/// One segment of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
  Text(String),
  Int(i64),
  Null,
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Segment::Text(s) => write!(f, "{s}"),
      Segment::Int(n) => write!(f, "{n}"),
      Segment::Null => write!(f, "null"),
    }
  }
}

impl From<&str> for Segment {
  fn from(s: &str) -> Self {
    Segment::Text(s.to_string())
  }
}

impl From<String> for Segment {
  fn from(s: String) -> Self {
    Segment::Text(s)
  }
}

impl From<&String> for Segment {
  fn from(s: &String) -> Self {
    Segment::Text(s.clone())
  }
}

impl From<i64> for Segment {
  fn from(n: i64) -> Self {
    Segment::Int(n)
  }
}

impl From<i32> for Segment {
  fn from(n: i32) -> Self {
    Segment::Int(n.into())
  }
}

impl<T: Into<Segment>> From<Option<T>> for Segment {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(Segment::Null)
  }
}

/// Deterministic identifier for one cached read: `(entity, ...params)`.
///
/// Equality is structural and order-sensitive, so `("analytics", "bob", "7d")`
/// and `("analytics", "7d", "bob")` address different entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  segments: Vec<Segment>,
}

impl CacheKey {
  /// Start a key with its entity name (the namespace).
  pub fn new(entity: &str) -> Self {
    Self {
      segments: vec![Segment::from(entity)],
    }
  }

  /// Append a parameter.
  pub fn with(mut self, param: impl Into<Segment>) -> Self {
    self.segments.push(param.into());
    self
  }

  /// The entity name this key belongs to.
  pub fn namespace(&self) -> &str {
    match self.segments.first() {
      Some(Segment::Text(entity)) => entity,
      _ => "",
    }
  }

  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  /// Segment-wise prefix match.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.segments.starts_with(&prefix.segments)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.segments.iter().map(ToString::to_string).collect();
    write!(f, "[{}]", parts.join(", "))
  }
}

/// Selects cache entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
  /// Exactly this key.
  Exact(CacheKey),
  /// Every key starting with this one.
  Prefix(CacheKey),
}

impl QueryFilter {
  /// Every entry of an entity, e.g. all `users` entries.
  pub fn namespace(entity: &str) -> Self {
    Self::Prefix(CacheKey::new(entity))
  }

  pub fn matches(&self, key: &CacheKey) -> bool {
    match self {
      Self::Exact(exact) => exact == key,
      Self::Prefix(prefix) => key.starts_with(prefix),
    }
  }
}

impl From<CacheKey> for QueryFilter {
  fn from(key: CacheKey) -> Self {
    Self::Exact(key)
  }
}
