//! Bootstrap script: implicit globals shared by every provider script
//!
//! Installs `require`, `log`, the handle wrappers and the invocation shim.
//! Handle wrappers are plain objects whose prototype is built per kind from
//! the method table the host reports, so a script only ever sees the methods
//! of the kind it holds. The id lives in a `WeakMap` the script cannot reach.

use std::cell::RefCell;
use std::rc::Rc;

use deno_core::{op2, Op, OpDecl, OpState};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bridge::error::BridgeError;
use crate::bridge::handle::{Args, Handle, HandleTable, NativeMethod};
use crate::bridge::value::ScriptValue;

pub const INVOKE_FN: &str = "__folio_invoke";
pub const PROBE_FN: &str = "__folio_probe";

pub const BOOTSTRAP: &str = r#"
"use strict";
((ops) => {
  const ids = new WeakMap();
  const handleBase = Object.freeze({
    toString() { return `[${this.kind} handle]`; },
  });

  const handleId = (value) => {
    const id = ids.get(value);
    if (id === undefined) throw new TypeError("native handle expected");
    return id;
  };

  const prototypes = {};

  const mint = ({ id, kind }) => {
    const handle = Object.create(prototypes[kind] ?? handleBase);
    Object.defineProperty(handle, "kind", { value: kind, enumerable: true });
    ids.set(handle, id);
    return Object.freeze(handle);
  };

  // Host replies carry plain data under `data`; only `handle` and `handles` mint wrappers.
  const unwrap = (reply) => {
    if (reply === null || reply === undefined) return null;
    if ("handle" in reply) return mint(reply.handle);
    if ("handles" in reply) return reply.handles.map(mint);
    return reply.data;
  };

  for (const [kind, methods] of Object.entries(ops.op_handle_kinds())) {
    const proto = Object.create(handleBase);
    for (const [name, mode] of Object.entries(methods)) {
      proto[name] = mode === "async"
        ? async function (...args) { return unwrap(await ops.op_handle_call_async(handleId(this), name, args)); }
        : function (...args) { return unwrap(ops.op_handle_call(handleId(this), name, args)); };
    }
    prototypes[kind] = Object.freeze(proto);
  }

  const soft = ([reply, error]) => [unwrap(reply), error];

  const loaders = new Map();
  const loaded = new Map();
  const internals = Object.freeze({ ops, unwrap, soft });

  globalThis.__folio_preload = (name, loader) => {
    if (loaders.get(name) === loader) return;
    loaders.set(name, loader);
    loaded.delete(name);
  };

  globalThis.require = (name) => {
    if (loaded.has(name)) return loaded.get(name);
    const loader = loaders.get(name);
    if (loader === undefined) throw new Error(`module '${name}' not found`);
    const exports = loader(internals);
    loaded.set(name, exports);
    return exports;
  };

  const write = (level) => (...parts) => ops.op_script_log(level, parts.map(String).join(" "));
  globalThis.log = Object.freeze({
    debug: write("debug"),
    info: write("info"),
    warn: write("warn"),
    error: write("error"),
  });
  if (globalThis.console === undefined) {
    globalThis.console = { log: write("info"), info: write("info"), warn: write("warn"), error: write("error"), debug: write("debug") };
  }

  // Non-finite numbers have no JSON form and travel as nil.
  const encode = (value) => {
    if (value === null || value === undefined) return { type: "nil" };
    if (ids.has(value)) return { type: "handle", value: value.kind };
    switch (typeof value) {
      case "boolean":
        return { type: "boolean", value };
      case "number":
        return Number.isFinite(value) ? { type: "number", value } : { type: "nil" };
      case "string":
        return { type: "string", value };
      case "function":
        return { type: "function" };
      case "object":
        if (Array.isArray(value)) {
          return { type: "table", value: value.map((item, i) => [{ type: "number", value: i + 1 }, encode(item)]) };
        }
        return { type: "table", value: Object.entries(value).map(([key, item]) => [{ type: "string", value: key }, encode(item)]) };
      default:
        return { type: "string", value: String(value) };
    }
  };

  // Indirect eval also sees top-level `const` and `let` bindings.
  const lookup = (name) => {
    if (!/^[A-Za-z_$][\w$]*$/.test(name)) return undefined;
    try {
      return (0, eval)(name);
    } catch {
      return undefined;
    }
  };

  globalThis.__folio_invoke = async (name, arg) => {
    try {
      const fn = lookup(name);
      if (typeof fn !== "function") throw new Error(`function ${name} is not defined`);
      const result = await fn(arg);
      ops.op_invoke_settle({ ok: true, value: encode(result) });
    } catch (e) {
      ops.op_invoke_settle({ ok: false, error: e instanceof Error ? e.message : String(e) });
    }
  };

  globalThis.__folio_probe = (names) => {
    const missing = names.filter((name) => typeof lookup(name) !== "function");
    ops.op_invoke_settle({ ok: true, value: encode(missing) });
  };
})(Deno.core.ops);
"#;

/// Provider name attached to everything a script logs
pub struct ScriptIdentity(pub String);

/// Settled result of the last shim call
#[derive(Debug, Deserialize)]
pub struct InvokeOutcome {
    ok: bool,
    #[serde(default)]
    value: Option<ScriptValue>,
    #[serde(default)]
    error: Option<String>,
}

impl InvokeOutcome {
    pub fn into_result(self) -> Result<ScriptValue, String> {
        if self.ok {
            Ok(self.value.unwrap_or(ScriptValue::Nil))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "script failed without a message".to_string()))
        }
    }
}

#[op2]
#[serde]
fn op_handle_kinds(state: &mut OpState) -> serde_json::Value {
    state.borrow::<HandleTable>().describe()
}

#[op2]
#[serde]
fn op_handle_call(
    state: &mut OpState,
    id: u32,
    #[string] method: String,
    #[serde] args: Vec<Value>,
) -> Result<serde_json::Value, anyhow::Error> {
    let table = state.borrow_mut::<HandleTable>();
    let (object, native) = table.resolve(Handle::from_raw(id), &method)?;

    let output = match native {
        NativeMethod::Sync(call) => call(&object, &Args::new(method, args))?,
        NativeMethod::Async(_) => {
            return Err(BridgeError::CallMode {
                kind: object.kind(),
                method,
                mode: "synchronously",
            }
            .into())
        }
    };

    Ok(table.export(output))
}

#[op2(async)]
#[serde]
async fn op_handle_call_async(
    state: Rc<RefCell<OpState>>,
    id: u32,
    #[string] method: String,
    #[serde] args: Vec<Value>,
) -> Result<serde_json::Value, anyhow::Error> {
    let (object, native) = state
        .borrow()
        .borrow::<HandleTable>()
        .resolve(Handle::from_raw(id), &method)?;

    let output = match native {
        NativeMethod::Async(call) => call(object, Args::new(method, args)).await?,
        NativeMethod::Sync(call) => call(&object, &Args::new(method, args))?,
    };

    let encoded = state.borrow_mut().borrow_mut::<HandleTable>().export(output);
    Ok(encoded)
}

#[op2(fast)]
fn op_script_log(state: &mut OpState, #[string] level: String, #[string] message: String) {
    let provider = &state.borrow::<ScriptIdentity>().0;
    match level.as_str() {
        "debug" => debug!(provider = %provider, "{}", message),
        "warn" => warn!(provider = %provider, "{}", message),
        "error" => error!(provider = %provider, "{}", message),
        _ => info!(provider = %provider, "{}", message),
    }
}

#[op2]
fn op_invoke_settle(state: &mut OpState, #[serde] outcome: InvokeOutcome) {
    state.put(outcome);
}

pub fn ops() -> Vec<OpDecl> {
    vec![
        op_handle_kinds::DECL,
        op_handle_call::DECL,
        op_handle_call_async::DECL,
        op_script_log::DECL,
        op_invoke_settle::DECL,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_success() {
        let outcome: InvokeOutcome = serde_json::from_value(json!({
            "ok": true,
            "value": {"type": "string", "value": "x"}
        }))
        .unwrap();
        assert_eq!(outcome.into_result(), Ok(ScriptValue::String("x".into())));
    }

    #[test]
    fn test_outcome_failure() {
        let outcome: InvokeOutcome =
            serde_json::from_value(json!({"ok": false, "error": "boom"})).unwrap();
        assert_eq!(outcome.into_result(), Err("boom".to_string()));

        let outcome: InvokeOutcome = serde_json::from_value(json!({"ok": false})).unwrap();
        assert!(outcome.into_result().is_err());
    }
}
