//! graph-cache - a normalized in-memory cache for graph-shaped query results.
//!
//! Query payloads are split into records addressed by stable ids and stored
//! in a stack of layers, so optimistic writes can be applied on top of the
//! committed data and later merged or discarded. Reads walk a
//! [`Selection`](selection::Selection) back out of storage, and the
//! subscription index tracks which listeners depend on which fields so every
//! write can report exactly who needs new data.
//!
//! ```
//! use graph_cache::{Cache, ReadOptions, WriteOptions};
//! use graph_cache::selection::{FieldSelection, Selection};
//! use serde_json::json;
//!
//! let selection = Selection::new().with_field(
//!     "viewer",
//!     FieldSelection::link(
//!         "User",
//!         "viewer",
//!         Selection::new().with_field("id", FieldSelection::scalar("ID", "id")),
//!     ),
//! );
//! let data = json!({"viewer": {"id": "1"}});
//!
//! let mut cache = Cache::default();
//! cache.write(WriteOptions::new(&selection, &data)).unwrap();
//! assert_eq!(cache.read(ReadOptions::new(&selection)).data, data);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gc;
pub mod key;
pub mod lists;
pub mod scalars;
pub mod selection;
pub mod shared;
pub mod stale;
pub mod storage;
pub mod subscription;

pub use cache::{Cache, ListHandle, ReadOptions, ReadResult, RecordHandle, WriteOptions};
pub use config::{CacheConfig, ScalarCodec};
pub use error::CacheError;
pub use key::{Variables, ROOT_ID};
pub use shared::SharedCache;
pub use subscription::{Listener, NotifySet, SubscriptionSpec};
