//! mnemo — conversational memory for agent calls.
//!
//! Stores user/agent exchanges, ranks them against new queries with
//! corpus-weighted term vectors, and assembles bounded context blocks.

pub mod api;
pub mod config;
pub mod context;
pub mod corpus;
pub mod error;
pub mod profile;
pub mod rank;
pub mod store;
pub mod vectorize;

use std::sync::Arc;

pub use config::MemoryConfig;
pub use error::MemoryError;

pub type SharedStore = Arc<store::MemoryStore>;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub started_at: std::time::Instant,
}
