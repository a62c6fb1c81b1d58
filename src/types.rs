use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Profile owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub email: String,
  pub name: Option<String>,
  pub handle: Option<String>,
  pub bio: Option<String>,
  pub image: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Sign-in provider account linked to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
  pub id: i64,
  pub user_id: i64,
  pub provider: String,
  pub provider_account_id: String,
}

/// The identity resolved from a session: the user plus linked accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
  #[serde(flatten)]
  pub user: User,
  pub accounts: Vec<Account>,
}

/// A link on a profile page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
  pub id: i64,
  pub user_id: i64,
  pub title: String,
  pub url: String,
  pub archived: bool,
  pub clicks: i64,
}

/// Partial profile sent by the settings page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
  pub bio: String,
  pub username: String,
  pub image: String,
  pub handle: String,
}

/// Page views for one day (`YYYY-MM-DD`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyViews {
  pub day: String,
  pub views: i64,
}

/// Page views of a profile over a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageViews {
  pub handle: String,
  pub filter: AnalyticsFilter,
  pub total: i64,
  pub by_day: Vec<DailyViews>,
}

/// Time window for analytics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyticsFilter {
  #[serde(rename = "24h")]
  Day,
  #[default]
  #[serde(rename = "7d")]
  Week,
  #[serde(rename = "30d")]
  Month,
  #[serde(rename = "all")]
  All,
}

impl AnalyticsFilter {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Day => "24h",
      Self::Week => "7d",
      Self::Month => "30d",
      Self::All => "all",
    }
  }

  /// Start of the window ending at `now`; `None` means unbounded.
  pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      Self::Day => Some(now - Duration::hours(24)),
      Self::Week => Some(now - Duration::days(7)),
      Self::Month => Some(now - Duration::days(30)),
      Self::All => None,
    }
  }
}

impl fmt::Display for AnalyticsFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AnalyticsFilter {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "24h" | "day" => Ok(Self::Day),
      "7d" | "week" => Ok(Self::Week),
      "30d" | "month" => Ok(Self::Month),
      "all" => Ok(Self::All),
      other => Err(format!("unknown analytics filter '{}'", other)),
    }
  }
}
