//! SQLite record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::AccountStore;
use crate::error::StoreError;
use crate::types::{Account, CurrentUser, DailyViews, Link, ProfilePatch, User};

/// Session row joined with its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
  pub email: Option<String>,
  pub name: Option<String>,
  pub expires: DateTime<Utc>,
}

/// SQLite-based record store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    debug!(path = %path.display(), "opened record store");
    Self::with_connection(conn)
  }

  /// Store that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("linkdeck").join("linkdeck.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  pub fn create_user(&self, email: &str, name: Option<&str>, handle: Option<&str>) -> Result<User> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO users (email, name, handle, created_at) VALUES (?, ?, ?, ?)",
        params![email, name, handle, Utc::now().timestamp()],
      )
      .map_err(|e| write_error(e, || format!("email {} or handle", email), || format!("create user {}", email)))?;

    let id = conn.last_insert_rowid();
    select_user(&conn, "id = ?", params![id])?.ok_or_else(|| eyre!("User {} vanished after insert", id))
  }

  pub fn link_account(&self, user_id: i64, provider: &str, provider_account_id: &str) -> Result<Account> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO accounts (user_id, provider, provider_account_id) VALUES (?, ?, ?)",
        params![user_id, provider, provider_account_id],
      )
      .map_err(|e| eyre!("Failed to link account: {}", e))?;

    Ok(Account {
      id: conn.last_insert_rowid(),
      user_id,
      provider: provider.to_string(),
      provider_account_id: provider_account_id.to_string(),
    })
  }

  pub fn create_link(&self, user_id: i64, title: &str, url: &str) -> Result<Link> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO links (user_id, title, url) VALUES (?, ?, ?)",
        params![user_id, title, url],
      )
      .map_err(|e| eyre!("Failed to create link: {}", e))?;

    Ok(Link {
      id: conn.last_insert_rowid(),
      user_id,
      title: title.to_string(),
      url: url.to_string(),
      archived: false,
      clicks: 0,
    })
  }

  pub fn record_view(&self, handle: &str, at: DateTime<Utc>) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT INTO page_views (handle, viewed_at) VALUES (?, ?)",
        params![handle, at.timestamp()],
      )
      .map_err(|e| eyre!("Failed to record page view: {}", e))?;
    Ok(())
  }

  /// Store a session keyed by the digest of its token.
  pub fn create_session(&self, token_hash: &str, user_id: i64, expires: DateTime<Utc>) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO sessions (token_hash, user_id, expires) VALUES (?, ?, ?)",
        params![token_hash, user_id, expires.timestamp()],
      )
      .map_err(|e| eyre!("Failed to create session: {}", e))?;
    Ok(())
  }

  /// Look up an unexpired session by token digest.
  pub fn find_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<SessionRecord>> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT u.email, u.name, s.expires FROM sessions s
         INNER JOIN users u ON u.id = s.user_id
         WHERE s.token_hash = ? AND s.expires > ?",
        params![token_hash, now.timestamp()],
        |row| {
          Ok(SessionRecord {
            email: row.get(0)?,
            name: row.get(1)?,
            expires: timestamp(row.get(2)?),
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up session: {}", e))
  }

  pub fn delete_session(&self, token_hash: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM sessions WHERE token_hash = ?", params![token_hash])
      .map_err(|e| eyre!("Failed to delete session: {}", e))?;
    Ok(())
  }
}

/// Schema for the record tables.
const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    handle TEXT UNIQUE,
    bio TEXT,
    image TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    UNIQUE (provider, provider_account_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    clicks INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS page_views (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    handle TEXT NOT NULL,
    viewed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_views_handle ON page_views(handle, viewed_at);
"#;

const USER_COLUMNS: &str = "id, email, name, handle, bio, image, created_at";

fn timestamp(secs: i64) -> DateTime<Utc> {
  DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
  Ok(User {
    id: row.get(0)?,
    email: row.get(1)?,
    name: row.get(2)?,
    handle: row.get(3)?,
    bio: row.get(4)?,
    image: row.get(5)?,
    created_at: timestamp(row.get(6)?),
  })
}

fn select_user(conn: &Connection, condition: &str, params: impl rusqlite::Params) -> Result<Option<User>> {
  let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, condition);
  conn
    .query_row(&sql, params, user_from_row)
    .optional()
    .map_err(|e| eyre!("Failed to query user: {}", e))
}

#[async_trait]
impl AccountStore for SqliteStore {
  async fn find_user_by_email(&self, email: &str) -> Result<Option<CurrentUser>> {
    let conn = self.conn()?;
    let Some(user) = select_user(&conn, "email = ?", params![email])? else {
      return Ok(None);
    };

    let mut stmt = conn
      .prepare("SELECT id, user_id, provider, provider_account_id FROM accounts WHERE user_id = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare account query: {}", e))?;

    let accounts = stmt
      .query_map(params![user.id], |row| {
        Ok(Account {
          id: row.get(0)?,
          user_id: row.get(1)?,
          provider: row.get(2)?,
          provider_account_id: row.get(3)?,
        })
      })
      .map_err(|e| eyre!("Failed to query accounts: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read account: {}", e))?;

    Ok(Some(CurrentUser { user, accounts }))
  }

  async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>> {
    let conn = self.conn()?;
    select_user(&conn, "handle = ?", params![handle])
  }

  async fn update_profile(&self, user_id: i64, patch: &ProfilePatch) -> Result<User> {
    let conn = self.conn()?;
    let changed = conn
      .execute(
        "UPDATE users SET name = ?, bio = ?, image = ?, handle = ? WHERE id = ?",
        params![patch.username, patch.bio, patch.image, patch.handle, user_id],
      )
      .map_err(|e| write_error(e, || format!("handle {}", patch.handle), || format!("update user {}", user_id)))?;

    if changed == 0 {
      return Err(eyre!("User {} does not exist", user_id));
    }

    select_user(&conn, "id = ?", params![user_id])?
      .ok_or_else(|| eyre!("User {} vanished after update", user_id))
  }

  async fn delete_user(&self, user_id: i64) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM users WHERE id = ?", params![user_id])
      .map_err(|e| eyre!("Failed to delete user {}: {}", user_id, e))?;
    Ok(())
  }

  async fn find_link(&self, link_id: i64) -> Result<Option<Link>> {
    self
      .conn()?
      .query_row(
        "SELECT id, user_id, title, url, archived, clicks FROM links WHERE id = ?",
        params![link_id],
        |row| {
          Ok(Link {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            archived: row.get(4)?,
            clicks: row.get(5)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query link {}: {}", link_id, e))
  }

  async fn page_views(&self, handle: &str, since: Option<DateTime<Utc>>) -> Result<Vec<DailyViews>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT date(viewed_at, 'unixepoch') AS day, COUNT(*) FROM page_views
         WHERE handle = ? AND viewed_at >= ?
         GROUP BY day ORDER BY day",
      )
      .map_err(|e| eyre!("Failed to prepare page view query: {}", e))?;

    let since = since.map(|t| t.timestamp()).unwrap_or(i64::MIN);
    let days = stmt
      .query_map(params![handle, since], |row| {
        Ok(DailyViews {
          day: row.get(0)?,
          views: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to query page views: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read page views: {}", e))?;

    Ok(days)
  }
}

/// Turn a unique-constraint violation into `StoreError::Duplicate`; anything
/// else stays an opaque report.
fn write_error(
  err: rusqlite::Error,
  what: impl FnOnce() -> String,
  action: impl FnOnce() -> String,
) -> color_eyre::Report {
  match err.sqlite_error_code() {
    Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::Duplicate(what()).into(),
    _ => eyre!("Failed to {}: {}", action(), err),
  }
}
