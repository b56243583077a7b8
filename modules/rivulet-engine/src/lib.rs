//! Runtime for `rivulet-core` stores.
//!
//! A [`StoreExecutor`] runs the slots of one store, one FIFO lane per slot,
//! feeding internally routed events back into itself. Executors talk to
//! each other over an [`EventSource`]; a [`MainStore`] wires a set of stores
//! to one in-process bus and registers further stores lazily.

pub mod bus;
pub mod config;
pub mod executor;
pub mod listener;
pub mod main_store;
mod tracker;

pub use bus::{EventSource, LoopbackEventSource, Subscriber, SubscriberId};
pub use config::EngineConfig;
pub use executor::{ExecutorOptions, StoreExecutor};
pub use listener::{ListenerId, StoreValue};
pub use main_store::{run_main, MainStore};
