//! Client-side resource cache and offline sync engine.
//!
//! Requests are classified and resolved cache-first or network-first against
//! generation-scoped cache partitions. Mutations that cannot reach the
//! network are queued durably and replayed in order once connectivity
//! returns.

pub mod cache;
pub mod classify;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod notify;
pub mod queue;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use cache::{
  CacheSource, FetchOutcome, MemoryStorage, SqliteStorage, Storage, UnavailableStorage,
};
pub use config::Config;
pub use engine::{CacheEngine, ControlMessage, Effect, Event};
pub use error::{EngineError, NetworkError, Result};
pub use http::{Destination, Method, Request, ResponseSnapshot};
pub use lifecycle::LifecycleState;
pub use network::{HttpNetwork, Network};
pub use notify::{DisplaySurface, LogSurface};
