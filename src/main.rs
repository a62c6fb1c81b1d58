mod api;
mod auth;
mod backend;
mod config;
mod error;
mod hooks;
mod logging;
mod notify;
mod query;
mod settings;
mod store;
mod types;

use chrono::Duration;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::Handlers;
use crate::auth::{RequestContext, SessionGuard, SqliteSessions};
use crate::backend::{Backend, HttpBackend, LocalBackend};
use crate::config::Config;
use crate::notify::{BroadcastBus, Level, LogNotifier, Notification, Notifier};
use crate::query::{QueryClient, QueryResult};
use crate::settings::Settings;
use crate::store::{AccountStore, SqliteStore};
use crate::types::AnalyticsFilter;

#[derive(Parser, Debug)]
#[command(name = "linkdeck")]
#[command(about = "Manage a link-in-bio profile page")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/linkdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Use the local database instead of the remote API
  #[arg(long)]
  local: bool,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(flatten)]
  Profile(ProfileCommand),
  #[command(flatten)]
  Database(DatabaseCommand),
}

/// Commands that go through the query cache and a backend.
#[derive(Subcommand, Debug)]
enum ProfileCommand {
  /// Show the signed-in user
  Me,
  /// Show a public profile
  Profile { handle: String },
  /// Show a link
  Link { id: i64 },
  /// Show page views of a profile
  Analytics {
    handle: String,
    /// Window: 24h, 7d, 30d or all
    #[arg(short, long, default_value = "7d")]
    filter: AnalyticsFilter,
  },
  /// Edit your profile; omitted fields keep their current value
  Edit {
    #[arg(long)]
    bio: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    image: Option<String>,
    #[arg(long)]
    handle: Option<String>,
  },
  /// Remove your profile picture
  RemovePicture,
  /// Permanently delete your account
  DeleteAccount {
    /// Confirm the deletion
    #[arg(long)]
    yes: bool,
  },
}

/// Commands that work on the local database directly.
#[derive(Subcommand, Debug)]
enum DatabaseCommand {
  /// Create a user in the local database
  Register {
    email: String,
    #[arg(long)]
    handle: Option<String>,
    #[arg(long)]
    name: Option<String>,
  },
  /// Start a session in the local database and print its token
  Login { email: String },
}

/// Prints notifications for the terminal user and logs them.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn notify(&self, notification: Notification) {
    match notification.level {
      Level::Success => eprintln!("✓ {}", notification.message),
      Level::Error => eprintln!("✗ {}", notification.message),
    }
    LogNotifier.notify(notification);
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log, args.verbose)?;

  match args.command {
    Command::Database(command) => run_database(command, &config).await,
    Command::Profile(command) => {
      let client = QueryClient::new(Arc::new(ConsoleNotifier)).with_stale_time(config.cache.stale_time());
      let backend = build_backend(&config, args.local)?;
      run(command, &client, backend).await
    }
  }
}

async fn run_database(command: DatabaseCommand, config: &Config) -> Result<()> {
  let store = Arc::new(SqliteStore::open(config.database.path.as_deref())?);

  match command {
    DatabaseCommand::Register {
      email,
      handle,
      name,
    } => {
      let user = store.create_user(&email, name.as_deref(), handle.as_deref())?;
      print_json(&user)
    }
    DatabaseCommand::Login { email } => {
      let current = store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| eyre!("No user with email {}", email))?;
      let token = SqliteSessions::new(store)
        .with_cookie_name(config.api.session_cookie.as_str())
        .issue(current.user.id, Duration::days(config.database.session_ttl_days.into()))?;
      println!("{}", token);
      eprintln!("Use it with: export LINKDECK_SESSION_TOKEN={}", token);
      Ok(())
    }
  }
}

fn build_backend(config: &Config, local: bool) -> Result<Arc<dyn Backend>> {
  if !local {
    return Ok(Arc::new(HttpBackend::new(config)?));
  }

  let store = Arc::new(SqliteStore::open(config.database.path.as_deref())?);
  let sessions = SqliteSessions::new(Arc::clone(&store)).with_cookie_name(config.api.session_cookie.as_str());
  let guard = SessionGuard::new(Arc::new(sessions), store.clone());
  let handlers = Handlers::new(guard, store);

  let ctx = match Config::get_session_token() {
    Ok(token) => RequestContext::new().with_cookie(&config.api.session_cookie, &token),
    Err(_) => RequestContext::new(),
  };

  Ok(Arc::new(LocalBackend::new(handlers, ctx)))
}

async fn run(command: ProfileCommand, client: &QueryClient, backend: Arc<dyn Backend>) -> Result<()> {
  match command {
    ProfileCommand::Me => show(hooks::use_current_user(client, &backend).fetch().await),
    ProfileCommand::Profile { handle } => show(hooks::use_user(client, &backend, Some(&handle)).fetch().await),
    ProfileCommand::Link { id } => show(hooks::use_link(client, &backend, Some(id)).fetch().await),
    ProfileCommand::Analytics { handle, filter } => {
      show(hooks::use_analytics(client, &backend, filter, Some(&handle)).fetch().await)
    }
    ProfileCommand::Edit {
      bio,
      username,
      image,
      handle,
    } => {
      let settings = Settings::new(client, backend, Arc::new(BroadcastBus::default()));
      let mut form = settings
        .load()
        .await
        .ok_or_else(|| eyre!("Could not load your profile"))?;

      if let Some(bio) = bio {
        form.bio = bio;
      }
      if let Some(username) = username {
        form.username = username;
      }
      if let Some(image) = image {
        form.image = image;
      }
      if let Some(handle) = handle {
        form.handle = handle;
      }

      let user = settings.save(&form).await?;
      print_json(&user)
    }
    ProfileCommand::RemovePicture => {
      let settings = Settings::new(client, backend, Arc::new(BroadcastBus::default()));
      let form = settings
        .load()
        .await
        .ok_or_else(|| eyre!("Could not load your profile"))?;

      match settings.remove_picture(&form).await? {
        Some(user) => print_json(&user),
        None => Ok(()),
      }
    }
    ProfileCommand::DeleteAccount { yes } => {
      if !yes {
        return Err(eyre!("This cannot be undone. Pass --yes to delete your account."));
      }
      let settings = Settings::new(client, backend, Arc::new(BroadcastBus::default()));
      let redirect = settings.delete_account().await?;
      eprintln!("Signed out. Continue at {}", redirect);
      Ok(())
    }
  }
}

/// Print the data of a read, or fail with its error.
fn show<T: Serialize>(result: QueryResult<T>) -> Result<()> {
  if let Some(data) = result.data() {
    return print_json(data);
  }
  match result.error {
    Some(err) => Err(err.into()),
    None => Err(eyre!("Nothing to show")),
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
