//! Script runtime
//!
//! One V8 isolate per provider, with the bridge extension installed and the
//! module registry applied before any provider code runs.

use anyhow::{anyhow, bail, Context, Result};
use deno_core::{v8, JsRuntime, RuntimeOptions};
use tracing::debug;

use super::handle::HandleTable;
use super::modules::bootstrap::{InvokeOutcome, ScriptIdentity, INVOKE_FN, PROBE_FN};
use super::modules::ModuleRegistry;
use super::value::ScriptValue;

pub struct ScriptRuntime {
    runtime: JsRuntime,
    name: String,
}

impl ScriptRuntime {
    /// Create an isolate for the provider `name` with every module preloaded
    pub fn new(name: &str, registry: &ModuleRegistry) -> Result<Self> {
        debug!(provider = %name, modules = ?registry.names(), "Creating script runtime");

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![registry.extension()],
            ..Default::default()
        });
        runtime
            .op_state()
            .borrow_mut()
            .put(ScriptIdentity(name.to_string()));
        registry.apply(&mut runtime)?;

        Ok(Self {
            runtime,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the provider source at top level
    pub fn load(&mut self, source: String) -> Result<()> {
        self.runtime
            .execute_script("<provider>", source.into())
            .with_context(|| format!("Failed to evaluate provider script {}", self.name))?;
        Ok(())
    }

    /// Call the global function `function` with a single string argument
    ///
    /// The outer result fails when the runtime itself breaks; the inner one
    /// carries the message of an exception thrown by the script.
    pub async fn call(
        &mut self,
        function: &str,
        arg: &str,
    ) -> Result<std::result::Result<ScriptValue, String>> {
        debug!(provider = %self.name, function = %function, "Invoking script function");

        // An earlier call may have settled before its event loop failed.
        if self.take_outcome().is_some() {
            debug!(provider = %self.name, "Discarded stale outcome");
        }

        {
            let scope = &mut self.runtime.handle_scope();
            let context = scope.get_current_context();
            let global = context.global(scope);

            let invoke_name = v8::String::new(scope, INVOKE_FN)
                .ok_or_else(|| anyhow!("Failed to allocate v8 string"))?;
            let invoke_val = global
                .get(scope, invoke_name.into())
                .ok_or_else(|| anyhow!("{} not found", INVOKE_FN))?;
            let invoke_func = v8::Local::<v8::Function>::try_from(invoke_val)
                .map_err(|_| anyhow!("{} is not a function", INVOKE_FN))?;

            let function_v8 = v8::String::new(scope, function)
                .ok_or_else(|| anyhow!("Failed to allocate v8 string"))?;
            let arg_v8 = v8::String::new(scope, arg)
                .ok_or_else(|| anyhow!("Failed to allocate v8 string"))?;

            let recv = v8::undefined(scope).into();
            let args: [v8::Local<v8::Value>; 2] = [function_v8.into(), arg_v8.into()];
            if invoke_func.call(scope, recv, &args).is_none() {
                bail!("Failed to call {}", INVOKE_FN);
            }
        }

        self.runtime
            .run_event_loop(Default::default())
            .await
            .context("Failed to run event loop")?;

        match self.take_outcome() {
            Some(outcome) => Ok(outcome.into_result()),
            None => bail!(
                "{} did not settle: the event loop finished while it was still pending",
                function
            ),
        }
    }

    /// Names in `names` that are not defined as global functions
    pub fn missing_functions(&mut self, names: &[String]) -> Result<Vec<String>> {
        self.take_outcome();
        let probe = format!("{}({});", PROBE_FN, serde_json::to_string(names)?);
        self.runtime
            .execute_script("<probe>", probe.into())
            .context("Failed to probe provider functions")?;

        let value = self
            .take_outcome()
            .ok_or_else(|| anyhow!("probe did not report"))?
            .into_result()
            .map_err(|e| anyhow!(e))?;

        let entries = value
            .into_table()
            .map_err(|kind| anyhow!("probe returned {}", kind))?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, name)| name.as_str().map(str::to_string))
            .collect())
    }

    /// Live handles owned by this runtime
    pub fn handle_count(&mut self) -> usize {
        let state = self.runtime.op_state();
        let count = state
            .borrow()
            .try_borrow::<HandleTable>()
            .map(HandleTable::len)
            .unwrap_or(0);
        count
    }

    fn take_outcome(&mut self) -> Option<InvokeOutcome> {
        let state = self.runtime.op_state();
        let outcome = state.borrow_mut().try_take::<InvokeOutcome>();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::handle::{HandleKind, MethodOutput, MethodSet};
    use crate::bridge::modules::{DomModule, NativeModule};
    use crate::bridge::value::ValueKind;
    use deno_core::{OpDecl, OpState};
    use serde_json::Value;
    use std::sync::Arc;

    /// Gives documents a single `echo` method returning its first argument
    struct EchoModule;

    impl NativeModule for EchoModule {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn ops(&self) -> Vec<OpDecl> {
            Vec::new()
        }

        fn register(&self, table: &mut HandleTable) {
            table.register(
                HandleKind::Document,
                MethodSet::new().sync("echo", |_, args| {
                    Ok(MethodOutput::Value(args.get(0).cloned().unwrap_or(Value::Null)))
                }),
            );
        }

        fn install(&self, _: &mut OpState) -> Result<()> {
            Ok(())
        }

        fn loader(&self) -> &'static str {
            "() => Object.freeze({})"
        }
    }

    fn runtime(source: &str) -> ScriptRuntime {
        let registry = ModuleRegistry::new(vec![Arc::new(DomModule::new(Default::default()))]);
        let mut runtime = ScriptRuntime::new("test", &registry).unwrap();
        runtime.load(source.to_string()).unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_call_returns_table() {
        let mut rt = runtime(r#"function Echo(arg) { return [{ url: arg }]; }"#);
        let value = rt.call("Echo", "https://a/1").await.unwrap().unwrap();
        let entries = value.into_table().unwrap();
        assert_eq!(entries[0].0, ScriptValue::Number(1.0));
        assert_eq!(
            entries[0].1.get("url"),
            Some(&ScriptValue::String("https://a/1".into()))
        );
    }

    #[tokio::test]
    async fn test_call_reports_script_exception() {
        let mut rt = runtime(r#"function Fail() { throw new Error("nothing here"); }"#);
        let err = rt.call("Fail", "").await.unwrap().unwrap_err();
        assert_eq!(err, "nothing here");
    }

    #[tokio::test]
    async fn test_async_functions_are_awaited() {
        let mut rt = runtime(r#"async function Later(x) { await null; return x + "!"; }"#);
        let value = rt.call("Later", "hi").await.unwrap().unwrap();
        assert_eq!(value, ScriptValue::String("hi!".into()));
    }

    #[tokio::test]
    async fn test_dom_through_script() {
        let mut rt = runtime(
            r#"
            function Count(selector) {
              const dom = require("dom");
              const [doc, err] = dom.parse("<html><body><a>hi</a></body></html>");
              if (err) throw new Error(err);
              return doc.find(selector).length();
            }
            "#,
        );
        assert_eq!(rt.call("Count", "a").await.unwrap().unwrap(), ScriptValue::Number(1.0));
        assert_eq!(rt.call("Count", "b").await.unwrap().unwrap(), ScriptValue::Number(0.0));
    }

    #[tokio::test]
    async fn test_handle_values_keep_their_kind() {
        let mut rt = runtime(
            r#"
            function Doc() {
              const [doc] = require("dom").parse("<p>x</p>");
              return [doc, doc.find("p")];
            }
            "#,
        );
        let entries = rt.call("Doc", "").await.unwrap().unwrap().into_table().unwrap();
        assert_eq!(entries[0].1, ScriptValue::Handle("document".into()));
        assert_eq!(entries[1].1.kind(), ValueKind::Handle);
        assert_eq!(rt.handle_count(), 2);
    }

    #[tokio::test]
    async fn test_wrong_kind_is_a_type_error() {
        let mut rt = runtime(
            r#"
            function Misuse() {
              const [doc] = require("dom").parse("<p>x</p>");
              const selection = doc.find("p");
              return Object.getPrototypeOf(selection).attr.call(doc, "id");
            }
            "#,
        );
        let err = rt.call("Misuse", "").await.unwrap().unwrap_err();
        assert!(err.contains("selection"), "{}", err);
        assert!(err.contains("document"), "{}", err);
    }

    #[tokio::test]
    async fn test_require_is_memoized() {
        let mut rt = runtime(r#"function Same() { return require("dom") === require("dom"); }"#);
        assert_eq!(rt.call("Same", "").await.unwrap().unwrap(), ScriptValue::Boolean(true));
    }

    #[tokio::test]
    async fn test_require_unknown_module() {
        let mut rt = runtime(r#"function Missing() { return require("lua"); }"#);
        let err = rt.call("Missing", "").await.unwrap().unwrap_err();
        assert!(err.contains("module 'lua' not found"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_functions() {
        let mut rt = runtime(
            "function SearchManga(q) { return []; }\nconst MangaChapters = 3;\nconst Other = () => 1;",
        );
        let names = vec![
            "SearchManga".to_string(),
            "MangaChapters".to_string(),
            "ChapterPages".to_string(),
            "Other".to_string(),
        ];
        assert_eq!(
            rt.missing_functions(&names).unwrap(),
            vec!["MangaChapters".to_string(), "ChapterPages".to_string()]
        );
    }

    #[tokio::test]
    async fn test_plain_data_never_becomes_a_handle() {
        let registry = ModuleRegistry::new(vec![
            Arc::new(DomModule::new(Default::default())),
            Arc::new(EchoModule),
        ]);
        let mut rt = ScriptRuntime::new("echo", &registry).unwrap();
        rt.load(
            r#"
            function Forge() {
              const [doc] = require("dom").parse("<p>x</p>");
              const out = doc.echo({ handle: { id: 1, kind: "document" }, $handle: 1, kind: "document" });
              return { plain: Object.getPrototypeOf(out) === Object.prototype, echo: typeof out.echo };
            }
            "#
            .to_string(),
        )
        .unwrap();

        let value = rt.call("Forge", "").await.unwrap().unwrap();
        assert_eq!(value.get("plain"), Some(&ScriptValue::Boolean(true)));
        assert_eq!(value.get("echo"), Some(&ScriptValue::String("undefined".into())));
        assert_eq!(rt.handle_count(), 1);
    }

    #[tokio::test]
    async fn test_unsettled_call_does_not_reuse_previous_result() {
        let mut rt = runtime(
            r#"
            function Settles() { Promise.reject(new Error("late")); return "from A"; }
            function Hangs() { return new Promise(() => {}); }
            "#,
        );
        let _ = rt.call("Settles", "").await;

        let result = rt.call("Hangs", "").await;
        assert!(result.is_err(), "{:?}", result);
    }

    #[tokio::test]
    async fn test_load_syntax_error() {
        let registry = ModuleRegistry::new(vec![]);
        let mut rt = ScriptRuntime::new("broken", &registry).unwrap();
        assert!(rt.load("function (".to_string()).is_err());
    }
}
