//! folio - run scripted content providers from the command line

use clap::Parser;
use folio::core::{self, config::CliArgs};
use folio::provider::{self, Provider};
use folio::ModuleRegistry;

use anyhow::{Context, Result};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::Config::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting folio v{}", folio::VERSION);
    info!(
        dir = ?config.providers.dir,
        "Provider configuration"
    );

    let registry = ModuleRegistry::from_config(&config);
    let mut providers = provider::load_all(&config.providers.dir, &registry)
        .await
        .context("Failed to load providers")?;

    if let Some(id) = &args.provider {
        providers.retain(|p| p.id() == id);
        if providers.is_empty() {
            anyhow::bail!("no provider with id {}", id);
        }
    }

    let Some(query) = &args.query else {
        for p in &providers {
            println!("{}\t{}", p.id(), p.name());
        }
        return Ok(());
    };

    let mut results = serde_json::Map::new();
    for p in &providers {
        match p.search(query).await {
            Ok(found) => {
                info!(provider = %p.id(), count = found.len(), "Search finished");
                results.insert(p.id().to_string(), serde_json::to_value(found)?);
            }
            Err(e) => {
                warn!(provider = %p.id(), error_type = e.error_type(), "Search failed: {}", e);
                results.insert(
                    p.id().to_string(),
                    serde_json::json!({ "error": e.to_string() }),
                );
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
