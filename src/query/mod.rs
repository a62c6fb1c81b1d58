//! Async query cache for remote reads.
//!
//! Inspired by TanStack Query, this module provides:
//! - A shared `QueryClient` that deduplicates concurrent fetches per key
//! - `Query<T>`, a mounted read with loading/success/error state
//! - `Mutation`, a write that invalidates the key namespaces it declares
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::new(Arc::new(LogNotifier));
//!
//! let query = Query::new(&client, CacheKey::new("users").with("bob"), move || {
//!     let backend = backend.clone();
//!     async move { backend.user("bob").await }
//! });
//!
//! let result = query.fetch().await;
//! if let Some(user) = result.data() {
//!     render(user);
//! } else if let Some(err) = result.error() {
//!     render_error(err);
//! }
//! ```

mod client;
mod key;
mod mutation;
mod observer;
mod state;

pub use client::QueryClient;
pub use key::{CacheKey, QueryFilter};
pub use mutation::Mutation;
pub use observer::Query;
pub use state::{QueryOptions, QueryResult};
