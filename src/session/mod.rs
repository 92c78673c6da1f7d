//! Preview sessions: debouncing, revisions and the instance pool.

pub mod config;
pub mod lru;
pub mod manager;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use manager::{LiveInstance, PreviewSessions, SessionStats};
