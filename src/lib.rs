//! folio
//!
//! Runs scripted content providers against a native host bridge: provider
//! scripts get HTML querying and headless-browser automation through opaque
//! handles, and the host turns their listings into typed, cached records.

pub mod bridge;
pub mod cache;
pub mod core;
pub mod provider;

// Re-export commonly used types
pub use crate::bridge::{ModuleRegistry, ScriptSession};
pub use crate::core::{Config, FolioError};
pub use crate::provider::{Chapter, Manga, Page, Provider, ScriptProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
