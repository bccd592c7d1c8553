//! Provider backed by a script session
//!
//! Every listing follows the same protocol: call the entry point with one
//! string argument, require a table of tables keyed by position, decode each
//! inner table into a record and memoize the listing under its key.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::contract::{self, Violation};
use super::{Chapter, Manga, Page, Provider};
use crate::bridge::value::{ScriptValue, ValueKind};
use crate::bridge::{ModuleRegistry, ScriptSession};
use crate::cache::ListingCache;
use crate::core::error::{FolioError, Result};

const DEFAULT_PAGE_EXTENSION: &str = ".jpg";

/// Functions a provider script must define
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Search,
    Chapters,
    Pages,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 3] = [EntryPoint::Search, EntryPoint::Chapters, EntryPoint::Pages];

    pub fn function(self) -> &'static str {
        match self {
            EntryPoint::Search => "SearchManga",
            EntryPoint::Chapters => "MangaChapters",
            EntryPoint::Pages => "ChapterPages",
        }
    }
}

#[derive(Deserialize)]
struct MangaEntry {
    name: String,
    url: String,
    #[serde(default)]
    cover: Option<String>,
}

#[derive(Deserialize)]
struct ChapterEntry {
    name: String,
    url: String,
    #[serde(default)]
    volume: Option<String>,
}

#[derive(Deserialize)]
struct PageEntry {
    url: String,
    #[serde(default)]
    extension: Option<String>,
}

pub struct ScriptProvider {
    id: String,
    name: String,
    session: ScriptSession,
    searches: ListingCache<Manga>,
    chapters: ListingCache<Chapter>,
    pages: ListingCache<Page>,
}

impl ScriptProvider {
    /// Start a session for `source` and check it defines every entry point
    pub async fn load(
        id: impl Into<String>,
        name: impl Into<String>,
        source: String,
        registry: ModuleRegistry,
    ) -> Result<Self> {
        let id = id.into();
        let name = name.into();
        let session = ScriptSession::start(name.clone(), source, registry).await?;

        let functions: Vec<&str> = EntryPoint::ALL.iter().map(|e| e.function()).collect();
        let missing = session.missing_functions(&functions).await?;
        if !missing.is_empty() {
            return Err(FolioError::ProviderLoadError(format!(
                "{} does not define {}",
                name,
                missing.join(", ")
            )));
        }

        info!(provider = %id, session = %session.id(), "Provider loaded");
        Ok(Self {
            id,
            name,
            session,
            searches: ListingCache::new("search"),
            chapters: ListingCache::new("chapters"),
            pages: ListingCache::new("pages"),
        })
    }

    /// Load a provider from a script file; the id and name come from the file stem
    pub async fn from_file(path: &Path, registry: ModuleRegistry) -> Result<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                FolioError::ProviderLoadError(format!("invalid provider file name: {}", path.display()))
            })?;
        let source = tokio::fs::read_to_string(path).await?;
        Self::load(super::loader::provider_id(stem), stem, source, registry).await
    }

    /// Call `entry` and decode its listing, one record per inner table
    async fn list<E, T>(
        &self,
        entry: EntryPoint,
        arg: &str,
        build: impl Fn(usize, E) -> T,
    ) -> Result<Vec<T>>
    where
        E: DeserializeOwned,
    {
        let function = entry.function();
        debug!(provider = %self.id, function = function, arg = %arg, "Listing");

        let value = self.session.call(function, arg).await?;
        let entries = contract::expect_table(value, ValueKind::Number, ValueKind::Table)
            .map_err(|violation: Violation| {
                FolioError::ContractViolation(violation.describe(function))
            })?;

        entries
            .into_iter()
            .enumerate()
            .map(|(index, (_, record))| {
                decode::<E>(&record)
                    .map(|decoded| build(index, decoded))
                    .map_err(|message| FolioError::DecodeError {
                        function: function.to_string(),
                        message: format!("entry {}: {}", index + 1, message),
                    })
            })
            .collect()
    }
}

fn decode<E: DeserializeOwned>(record: &ScriptValue) -> std::result::Result<E, String> {
    let fields = match record {
        ScriptValue::Table(entries) if entries.is_empty() => Value::Object(Map::new()),
        ScriptValue::Table(entries) => {
            if let Some((key, _)) = entries.iter().find(|(k, _)| k.kind() != ValueKind::String) {
                return Err(format!("record fields must be named, got {} as a key", key.kind()));
            }
            record.to_json()
        }
        other => return Err(format!("expected a table, got {}", other.kind())),
    };
    serde_json::from_value(fields).map_err(|e| e.to_string())
}

/// Extension of the last path segment of `url`, with the dot, or `.jpg`
pub fn page_extension(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_string());

    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_PAGE_EXTENSION.to_string(),
    }
}

fn normalize_extension(extension: String) -> String {
    if extension.starts_with('.') {
        extension
    } else {
        format!(".{}", extension)
    }
}

#[async_trait]
impl Provider for ScriptProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<Vec<Manga>> {
        let listing = self
            .searches
            .get_or_try_load(query, || {
                self.list(EntryPoint::Search, query, |index, entry: MangaEntry| Manga {
                    name: entry.name,
                    url: entry.url,
                    index,
                    cover: entry.cover,
                    provider_id: self.id.clone(),
                })
            })
            .await?;
        Ok(listing.as_ref().clone())
    }

    async fn chapters_of(&self, manga: &Manga) -> Result<Vec<Chapter>> {
        let listing = self
            .chapters
            .get_or_try_load(&manga.url, || {
                self.list(EntryPoint::Chapters, &manga.url, |index, entry: ChapterEntry| {
                    Chapter {
                        name: entry.name,
                        url: entry.url,
                        index,
                        volume: entry.volume,
                        manga_url: manga.url.clone(),
                    }
                })
            })
            .await?;
        Ok(listing.as_ref().clone())
    }

    async fn pages_of(&self, chapter: &Chapter) -> Result<Vec<Page>> {
        let listing = self
            .pages
            .get_or_try_load(&chapter.url, || {
                self.list(EntryPoint::Pages, &chapter.url, |index, entry: PageEntry| {
                    let extension = match entry.extension {
                        Some(ext) if !ext.is_empty() => normalize_extension(ext),
                        _ => page_extension(&entry.url),
                    };
                    Page {
                        url: entry.url,
                        index,
                        extension,
                        chapter_url: chapter.url.clone(),
                    }
                })
            })
            .await?;
        Ok(listing.as_ref().clone())
    }
}
