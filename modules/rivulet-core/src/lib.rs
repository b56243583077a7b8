//! Event-sourced reactive views.
//!
//! Queries are built by composing operators over a stream of tagged events:
//! extract, transform, key, join and fold them into keyed views whose state
//! lives in a path-addressed `Storage`. Every operator can be pushed (fold
//! new input into state) and pulled (read current keys and values back).
//!
//! Queries are plain descriptions. Placing them in a `StoreDef` binds each
//! one to a storage namespace; an executor (see `rivulet-engine`) runs them.

pub mod context;
pub mod dsl;
pub mod error;
pub mod etf;
pub mod event;
pub mod locale;
pub mod pack;
pub mod query;
pub mod read;
pub mod storage;
pub mod store;
pub mod value;

pub use context::{AsyncOutlet, Context};
pub use dsl::{action, action_typed, action_unit, extract, join, merge, never, try_action};
pub use error::{Error, Result};
pub use etf::{Etf, EtfRef};
pub use event::{Event, EventLike};
pub use pack::{Pack, PackEntry};
pub use query::Query;
pub use read::DEFAULT_MAX_CASCADE_DEPTH;
pub use storage::{InMemoryStorage, Storage, Stored, Teardown, Teardowns};
pub use store::{StoreBuilder, StoreDef};
pub use value::QueryValue;
