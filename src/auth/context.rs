use std::collections::HashMap;

/// Cookie carrying the session token unless configured otherwise.
pub const DEFAULT_SESSION_COOKIE: &str = "linkdeck.session-token";

/// The parts of an inbound request the session guard looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
  headers: HashMap<String, String>,
}

impl RequestContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a header. Names are case-insensitive.
  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  /// Append a cookie to the `Cookie` header.
  pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
    let pair = format!("{}={}", name, value);
    self
      .headers
      .entry("cookie".to_string())
      .and_modify(|existing| {
        existing.push_str("; ");
        existing.push_str(&pair);
      })
      .or_insert(pair);
    self
  }

  pub fn with_bearer(self, token: &str) -> Self {
    self.with_header("authorization", format!("Bearer {}", token))
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn cookie(&self, name: &str) -> Option<&str> {
    self.header("cookie")?.split(';').find_map(|pair| {
      let (key, value) = pair.trim().split_once('=')?;
      (key == name).then_some(value)
    })
  }

  /// Session token from the session cookie, falling back to a bearer header.
  /// Empty values count as absent.
  pub fn session_token(&self, cookie_name: &str) -> Option<&str> {
    let non_empty = |t: &&str| !t.is_empty();
    self
      .cookie(cookie_name)
      .map(str::trim)
      .filter(non_empty)
      .or_else(|| {
        self
          .header("authorization")
          .and_then(|h| h.strip_prefix("Bearer "))
          .map(str::trim)
          .filter(non_empty)
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_token_from_cookie() {
    let ctx = RequestContext::new()
      .with_cookie("theme", "dark")
      .with_cookie(DEFAULT_SESSION_COOKIE, "abc");

    assert_eq!(ctx.session_token(DEFAULT_SESSION_COOKIE), Some("abc"));
    assert_eq!(ctx.cookie("theme"), Some("dark"));
  }

  #[test]
  fn test_token_from_bearer_header() {
    let ctx = RequestContext::new().with_header("Authorization", "Bearer xyz");
    assert_eq!(ctx.session_token(DEFAULT_SESSION_COOKIE), Some("xyz"));
  }

  #[test]
  fn test_missing_or_empty_token() {
    assert_eq!(RequestContext::new().session_token(DEFAULT_SESSION_COOKIE), None);

    let empty = RequestContext::new().with_cookie(DEFAULT_SESSION_COOKIE, "");
    assert_eq!(empty.session_token(DEFAULT_SESSION_COOKIE), None);

    let basic = RequestContext::new().with_header("authorization", "Basic Zm9v");
    assert_eq!(basic.session_token(DEFAULT_SESSION_COOKIE), None);
  }

  #[test]
  fn test_empty_cookie_falls_back_to_bearer_header() {
    let ctx = RequestContext::new()
      .with_cookie(DEFAULT_SESSION_COOKIE, "")
      .with_bearer("xyz");
    assert_eq!(ctx.session_token(DEFAULT_SESSION_COOKIE), Some("xyz"));

    let blank = RequestContext::new()
      .with_cookie(DEFAULT_SESSION_COOKIE, "  ")
      .with_header("Authorization", "Bearer  ");
    assert_eq!(blank.session_token(DEFAULT_SESSION_COOKIE), None);
  }
}
