//! Content providers
//!
//! A provider discovers and paginates remote content: search for a manga,
//! list its chapters, list the pages of a chapter. Providers are written as
//! scripts and adapted to the [`Provider`] trait by
//! [`script::ScriptProvider`].

pub mod contract;
pub mod loader;
pub mod script;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

pub use loader::{discover, load_all, ProviderSource};
pub use script::{EntryPoint, ScriptProvider};

/// Provider interface
///
/// Listings are memoized per key for the lifetime of the provider, so asking
/// twice for the same query, manga or chapter runs the provider once.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier derived from the script file name
    fn id(&self) -> &str;

    /// Human readable name
    fn name(&self) -> &str;

    /// Search for manga matching `query`
    ///
    /// # Errors
    /// Returns an error if the script fails or its result breaks the listing contract
    async fn search(&self, query: &str) -> Result<Vec<Manga>>;

    /// List the chapters of `manga`
    async fn chapters_of(&self, manga: &Manga) -> Result<Vec<Chapter>>;

    /// List the pages of `chapter`
    async fn pages_of(&self, chapter: &Chapter) -> Result<Vec<Page>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manga {
    pub name: String,
    pub url: String,
    /// Position in the listing it came from
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    pub provider_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub name: String,
    pub url: String,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    pub manga_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub index: usize,
    /// File extension including the leading dot
    pub extension: String,
    pub chapter_url: String,
}
