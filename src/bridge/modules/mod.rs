//! Native modules and the registry that preloads them into a session

pub mod bootstrap;
pub mod dom;
pub mod headless;

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Context, Result};
use deno_core::{Extension, JsRuntime, OpDecl, OpState};
use serde_json::{json, Value};
use tracing::debug;

use super::handle::HandleTable;
use crate::core::config::Config;

pub use dom::DomModule;
pub use headless::HeadlessModule;

/// A group of host functions and handle kinds exposed under one `require` name
pub trait NativeModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ops the module's loader calls into
    fn ops(&self) -> Vec<OpDecl>;

    /// Bind the module's kinds to their method sets
    fn register(&self, table: &mut HandleTable);

    /// Put per-session state the module's ops read
    fn install(&self, state: &mut OpState) -> Result<()>;

    /// JS expression evaluating to `(internals) => exports`
    fn loader(&self) -> &'static str;
}

/// Immutable list of modules handed to every session
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Arc<Vec<Arc<dyn NativeModule>>>,
}

impl ModuleRegistry {
    pub fn new(modules: Vec<Arc<dyn NativeModule>>) -> Self {
        Self {
            modules: Arc::new(modules),
        }
    }

    /// `dom` and `headless`, configured from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(vec![
            Arc::new(DomModule::new(config.http.clone())),
            Arc::new(HeadlessModule::new(config.headless.clone())),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Extension carrying the bootstrap ops plus every module's ops
    pub fn extension(&self) -> Extension {
        let mut ops = bootstrap::ops();
        for module in self.modules.iter() {
            for op in module.ops() {
                if !ops.iter().any(|known| known.name == op.name) {
                    ops.push(op);
                }
            }
        }

        Extension {
            name: "folio_bridge",
            ops: Cow::Owned(ops),
            ..Default::default()
        }
    }

    /// Fresh handle table with every module's kinds registered
    pub fn handle_table(&self) -> HandleTable {
        let mut table = HandleTable::new();
        for module in self.modules.iter() {
            module.register(&mut table);
        }
        table
    }

    /// Install module state, run the core bootstrap and preload every module
    pub fn apply(&self, runtime: &mut JsRuntime) -> Result<()> {
        {
            let state = runtime.op_state();
            let mut state = state.borrow_mut();
            state.put(self.handle_table());
            for module in self.modules.iter() {
                module
                    .install(&mut state)
                    .with_context(|| format!("Failed to install module {}", module.name()))?;
            }
        }

        runtime
            .execute_script("<folio_core>", bootstrap::BOOTSTRAP.to_string().into())
            .context("Failed to run core bootstrap")?;

        for module in self.modules.iter() {
            let preload = format!(
                "globalThis.__folio_preload({}, {});",
                json!(module.name()),
                module.loader()
            );
            runtime
                .execute_script("<folio_preload>", preload.into())
                .with_context(|| format!("Failed to preload module {}", module.name()))?;
            debug!(module = module.name(), "Preloaded module");
        }

        Ok(())
    }
}

pub(crate) fn soft_ok(value: Value) -> Value {
    json!([value, null])
}

pub(crate) fn soft_err(message: impl Into<String>) -> Value {
    json!([null, message.into()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = ModuleRegistry::new(vec![
            Arc::new(DomModule::new(Default::default())),
            Arc::new(HeadlessModule::new(Default::default())),
        ]);
        assert_eq!(registry.names(), vec!["dom", "headless"]);

        let description = registry.handle_table().describe();
        for kind in ["document", "selection", "browser", "page", "element"] {
            assert!(description.get(kind).is_some(), "missing kind {}", kind);
        }
    }

    #[test]
    fn test_extension_has_no_duplicate_ops() {
        let registry = ModuleRegistry::new(vec![
            Arc::new(DomModule::new(Default::default())),
            Arc::new(DomModule::new(Default::default())),
        ]);
        let extension = registry.extension();
        let mut names: Vec<_> = extension.ops.iter().map(|op| op.name).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(names.contains(&"op_dom_fetch"));
        assert!(names.contains(&"op_handle_call"));
    }

    #[test]
    fn test_soft_pairs() {
        let reply = json!({ "data": 1 });
        assert_eq!(soft_ok(reply.clone()), json!([reply, null]));
        assert_eq!(soft_err("nope"), json!([null, "nope"]));
    }
}
