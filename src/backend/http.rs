use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::COOKIE;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::Backend;
use crate::config::Config;
use crate::types::{AnalyticsFilter, CurrentUser, Link, PageViews, ProfilePatch, User};

/// Backend talking to the profile API over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
  client: reqwest::Client,
  base: Url,
  cookie_name: String,
  token: Option<String>,
}

impl HttpBackend {
  pub fn new(config: &Config) -> Result<Self> {
    let base = parse_base(&config.api.url)?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("linkdeck/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      cookie_name: config.api.session_cookie.clone(),
      token: Config::get_session_token().ok(),
    })
  }

  /// Resolve an API path such as `links/3` against the base url.
  pub fn endpoint(&self, path: &str) -> Result<Url> {
    join(&self.base, path)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let request = self.client.request(method, url);
    match &self.token {
      Some(token) => request.header(COOKIE, format!("{}={}", self.cookie_name, token)),
      None => request,
    }
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
    let response = self
      .send(request, what)
      .await?;
    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", what, e))
  }

  async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to request {}: {}", what, e))?;
    debug!(status = %response.status(), what, "api response");
    response
      .error_for_status()
      .map_err(|e| eyre!("Failed to get {}: {}", what, e))
  }
}

/// Parse the API base url so relative joins keep its path.
fn parse_base(url: &str) -> Result<Url> {
  let mut base = Url::parse(url).map_err(|e| eyre!("Invalid API url '{}': {}", url, e))?;
  // `join` replaces the last segment unless the path ends with a slash.
  if !base.path().ends_with('/') {
    base.set_path(&format!("{}/", base.path()));
  }
  Ok(base)
}

fn join(base: &Url, path: &str) -> Result<Url> {
  base
    .join(path.trim_start_matches('/'))
    .map_err(|e| eyre!("Invalid endpoint '{}': {}", path, e))
}

#[async_trait]
impl Backend for HttpBackend {
  async fn current_user(&self) -> Result<CurrentUser> {
    let url = self.endpoint("current")?;
    self.send_json(self.request(Method::GET, url), "current user").await
  }

  async fn user(&self, handle: &str) -> Result<User> {
    let mut url = self.endpoint("users/")?;
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API url cannot be a base"))?
      .pop_if_empty()
      .push(handle);
    self.send_json(self.request(Method::GET, url), "user").await
  }

  async fn link(&self, link_id: i64) -> Result<Link> {
    let url = self.endpoint(&format!("links/{}", link_id))?;
    self.send_json(self.request(Method::GET, url), "link").await
  }

  async fn page_views(&self, handle: &str, filter: AnalyticsFilter) -> Result<PageViews> {
    let mut url = self.endpoint("analytics/views")?;
    url
      .query_pairs_mut()
      .append_pair("handle", handle)
      .append_pair("filter", filter.as_str());
    self.send_json(self.request(Method::GET, url), "page views").await
  }

  async fn edit_profile(&self, patch: &ProfilePatch) -> Result<User> {
    let url = self.endpoint("edit")?;
    self
      .send_json(self.request(Method::PATCH, url).json(patch), "profile update")
      .await
  }

  async fn delete_account(&self) -> Result<()> {
    let url = self.endpoint("edit")?;
    self
      .send(self.request(Method::DELETE, url), "account deletion")
      .await?;
    Ok(())
  }
}
