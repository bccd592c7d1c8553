//! Provider discovery
//!
//! Every `*.js` file directly inside the providers directory is a provider.

use std::path::{Path, PathBuf};

use tracing::{error, info};
use walkdir::WalkDir;

use super::script::ScriptProvider;
use crate::bridge::ModuleRegistry;
use crate::core::error::{FolioError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSource {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

/// Lowercased file stem with every non-alphanumeric character replaced by `-`
pub fn provider_id(stem: &str) -> String {
    stem.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

/// Provider scripts in `dir`, sorted by id
pub fn discover(dir: &Path) -> Result<Vec<ProviderSource>> {
    if !dir.exists() {
        return Err(FolioError::ProviderNotFound(format!(
            "providers directory {} does not exist",
            dir.display()
        )));
    }

    let mut sources: Vec<ProviderSource> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("js"))
        .filter_map(|e| {
            let stem = e.path().file_stem()?.to_str()?.to_string();
            Some(ProviderSource {
                id: provider_id(&stem),
                name: stem,
                path: e.into_path(),
            })
        })
        .collect();

    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

/// Load every discovered provider; providers that fail to load are logged and skipped
pub async fn load_all(dir: &Path, registry: &ModuleRegistry) -> Result<Vec<ScriptProvider>> {
    info!("Discovering providers in {}", dir.display());

    let mut providers = Vec::new();
    for source in discover(dir)? {
        match ScriptProvider::from_file(&source.path, registry.clone()).await {
            Ok(provider) => providers.push(provider),
            Err(e) => {
                error!(
                    provider = %source.id,
                    error_type = e.error_type(),
                    "Failed to load provider from {}: {}",
                    source.path.display(),
                    e
                );
            }
        }
    }

    info!("Loaded {} provider(s)", providers.len());
    Ok(providers)
}
