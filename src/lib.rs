//! # query-state
//!
//! URL-backed UI state. Independent pieces of state (search text, filter
//! lists, sort specs, the selected tab) live in the query string as
//! `key=<percent-encoded JSON>`, so reloads and shared links restore them.
//!
//! - **Single owner**: [`QueryStateStore`] is the only thing that edits the
//!   URL; everything else queues writes through it
//! - **Batched writes**: writes made in one turn collapse into one navigation
//! - **Idempotent**: a navigation happens only when the URL actually changes
//! - **Typed bindings**: [`QueryState<T>`] decodes with `serde`, treats empty
//!   values as absent, and degrades undecodable values to "unset"
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use query_state::{MemoryNavigator, QueryStateStore};
//!
//! fn main() -> query_state::Result<()> {
//!     let store = Arc::new(QueryStateStore::new(MemoryNavigator::new(
//!         "http://localhost/portal",
//!     )?));
//!
//!     let search = store.channel::<String>("search");
//!     let page = store.channel::<u32>("page").with_default(1);
//!     page.mount()?;
//!
//!     search.set(Some("shoe".to_string()))?;
//!     store.commit()?;
//!
//!     assert_eq!(search.get().as_deref(), Some("shoe"));
//!     assert_eq!(page.get(), Some(1));
//!     Ok(())
//! }
//! ```
//!
//! ## Automatic commits
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use query_state::{MemoryNavigator, QueryStateStore};
//!
//! #[tokio::main]
//! async fn main() -> query_state::Result<()> {
//!     let store = Arc::new(QueryStateStore::new(MemoryNavigator::new(
//!         "http://localhost/portal",
//!     )?));
//!     let reconciler = store.spawn_reconciler();
//!
//!     // One navigation for both keys
//!     store.channel::<String>("search").set(Some("shoe".into()))?;
//!     store.channel::<Vec<String>>("tags").set(Some(vec!["new".into()]))?;
//!
//!     drop(store);
//!     reconciler.await.expect("reconciler panicked")?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod location;
pub mod memory;
pub mod navigator;
pub mod store;
pub mod watch;

// Re-export main types
pub use channel::{is_empty_value, ChannelState, QueryState, SetOptions};
pub use error::{QueryStateError, Result};
pub use location::Location;
pub use memory::MemoryNavigator;
pub use navigator::Navigator;
pub use store::{QueryOp, QueryStateStore, StoreOptions, MAX_KEY_LENGTH};
pub use watch::{EventType, QueryEvent, QueryStream, PATH_KEY};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::channel::{ChannelState, QueryState, SetOptions};
    pub use crate::error::{QueryStateError, Result};
    pub use crate::location::Location;
    pub use crate::memory::MemoryNavigator;
    pub use crate::navigator::Navigator;
    pub use crate::store::{QueryOp, QueryStateStore, StoreOptions};
    pub use crate::watch::{EventType, QueryEvent, QueryStream};
}
