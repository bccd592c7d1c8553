//! Handle table binding script-visible handles to native objects
//!
//! Scripts never see native objects directly. They receive a handle: a
//! numeric id plus a kind name, wrapped by the core bootstrap into an object
//! whose methods forward to the host. Every forwarded call goes through
//! [`HandleTable::resolve`], which is where the kind check happens.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::LocalBoxFuture;
use serde_json::{json, Value};

use super::error::BridgeError;
use super::modules::dom::{Document, Selection};
use super::modules::headless::BrowserHost;

/// Ids are process-wide so a handle minted by one session is unknown to all others
static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleKind {
    Document,
    Selection,
    Browser,
    Page,
    Element,
}

impl HandleKind {
    pub const ALL: [HandleKind; 5] = [
        HandleKind::Document,
        HandleKind::Selection,
        HandleKind::Browser,
        HandleKind::Page,
        HandleKind::Element,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HandleKind::Document => "document",
            HandleKind::Selection => "selection",
            HandleKind::Browser => "browser",
            HandleKind::Page => "page",
            HandleKind::Element => "element",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub fn from_raw(id: u32) -> Self {
        Handle(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

/// A native resource owned by a session
#[derive(Clone)]
pub enum NativeObject {
    Document(Rc<Document>),
    Selection(Rc<Selection>),
    Browser(Rc<BrowserHost>),
    Page(chromiumoxide::Page),
    Element(Rc<chromiumoxide::Element>),
}

impl NativeObject {
    pub fn kind(&self) -> HandleKind {
        match self {
            NativeObject::Document(_) => HandleKind::Document,
            NativeObject::Selection(_) => HandleKind::Selection,
            NativeObject::Browser(_) => HandleKind::Browser,
            NativeObject::Page(_) => HandleKind::Page,
            NativeObject::Element(_) => HandleKind::Element,
        }
    }

    fn wrong_kind(&self, expected: HandleKind) -> BridgeError {
        BridgeError::WrongKind {
            expected,
            actual: self.kind(),
        }
    }

    pub fn as_document(&self) -> Result<&Rc<Document>, BridgeError> {
        match self {
            NativeObject::Document(doc) => Ok(doc),
            other => Err(other.wrong_kind(HandleKind::Document)),
        }
    }

    pub fn as_selection(&self) -> Result<&Rc<Selection>, BridgeError> {
        match self {
            NativeObject::Selection(sel) => Ok(sel),
            other => Err(other.wrong_kind(HandleKind::Selection)),
        }
    }

    pub fn as_browser(&self) -> Result<&Rc<BrowserHost>, BridgeError> {
        match self {
            NativeObject::Browser(browser) => Ok(browser),
            other => Err(other.wrong_kind(HandleKind::Browser)),
        }
    }

    pub fn as_page(&self) -> Result<&chromiumoxide::Page, BridgeError> {
        match self {
            NativeObject::Page(page) => Ok(page),
            other => Err(other.wrong_kind(HandleKind::Page)),
        }
    }

    pub fn as_element(&self) -> Result<&Rc<chromiumoxide::Element>, BridgeError> {
        match self {
            NativeObject::Element(element) => Ok(element),
            other => Err(other.wrong_kind(HandleKind::Element)),
        }
    }
}

/// What a native method hands back to the script
pub enum MethodOutput {
    Unit,
    Value(Value),
    Object(NativeObject),
    Objects(Vec<NativeObject>),
}

pub type SyncMethod = fn(&NativeObject, &Args) -> Result<MethodOutput, BridgeError>;
pub type AsyncMethod =
    fn(NativeObject, Args) -> LocalBoxFuture<'static, Result<MethodOutput, BridgeError>>;

#[derive(Clone, Copy)]
pub enum NativeMethod {
    Sync(SyncMethod),
    Async(AsyncMethod),
}

impl NativeMethod {
    pub fn mode(&self) -> &'static str {
        match self {
            NativeMethod::Sync(_) => "sync",
            NativeMethod::Async(_) => "async",
        }
    }
}

/// Fixed mapping of method names to implementations for one kind
#[derive(Clone, Default)]
pub struct MethodSet {
    methods: BTreeMap<&'static str, NativeMethod>,
}

impl MethodSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(mut self, name: &'static str, method: SyncMethod) -> Self {
        self.methods.insert(name, NativeMethod::Sync(method));
        self
    }

    pub fn asynchronous(mut self, name: &'static str, method: AsyncMethod) -> Self {
        self.methods.insert(name, NativeMethod::Async(method));
        self
    }

    pub fn get(&self, name: &str) -> Option<NativeMethod> {
        self.methods.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

/// Positional arguments of a method call, with typed accessors
#[derive(Debug, Clone, Default)]
pub struct Args {
    method: String,
    values: Vec<Value>,
}

impl Args {
    pub fn new(method: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            values,
        }
    }

    fn bad(&self, index: usize, message: String) -> BridgeError {
        BridgeError::BadArgument {
            method: self.method.clone(),
            index: index + 1,
            message,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn string(&self, index: usize) -> Result<String, BridgeError> {
        match self.values.get(index) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(self.bad(index, format!("string expected, got {}", json_type(other)))),
            None => Err(self.bad(index, "string expected, got nothing".to_string())),
        }
    }

    pub fn index(&self, index: usize) -> Result<usize, BridgeError> {
        match self.values.get(index) {
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .map(|n| n as usize)
                .ok_or_else(|| self.bad(index, format!("non-negative integer expected, got {}", n))),
            Some(other) => Err(self.bad(index, format!("number expected, got {}", json_type(other)))),
            None => Err(self.bad(index, "number expected, got nothing".to_string())),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-session registry of kinds and live handles
///
/// Handles are never released; objects live until the session drops the table.
#[derive(Default)]
pub struct HandleTable {
    kinds: HashMap<HandleKind, MethodSet>,
    objects: HashMap<u32, NativeObject>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a kind to its method set. Re-registering a kind replaces its set.
    pub fn register(&mut self, kind: HandleKind, methods: MethodSet) {
        self.kinds.insert(kind, methods);
    }

    pub fn new_handle(&mut self, object: NativeObject) -> Handle {
        let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(id, object);
        Handle(id)
    }

    pub fn get(&self, handle: Handle) -> Result<&NativeObject, BridgeError> {
        self.objects
            .get(&handle.0)
            .ok_or(BridgeError::UnknownHandle(handle.0))
    }

    pub fn check_handle(
        &self,
        handle: Handle,
        expected: HandleKind,
    ) -> Result<&NativeObject, BridgeError> {
        let object = self.get(handle)?;
        if object.kind() != expected {
            return Err(BridgeError::WrongKind {
                expected,
                actual: object.kind(),
            });
        }
        Ok(object)
    }

    /// Find `method` for the kind of `handle`
    pub fn resolve(
        &self,
        handle: Handle,
        method: &str,
    ) -> Result<(NativeObject, NativeMethod), BridgeError> {
        let object = self.get(handle)?;
        let actual = object.kind();

        if let Some(found) = self.kinds.get(&actual).and_then(|set| set.get(method)) {
            return Ok((object.clone(), found));
        }

        let mut owners: Vec<HandleKind> = self
            .kinds
            .iter()
            .filter(|(_, set)| set.contains(method))
            .map(|(kind, _)| *kind)
            .collect();
        owners.sort();

        if owners.is_empty() {
            return Err(BridgeError::UnknownMethod {
                kind: actual,
                method: method.to_string(),
            });
        }

        Err(BridgeError::MethodKindMismatch {
            method: method.to_string(),
            owners: owners
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(" or "),
            actual,
        })
    }

    /// Allocate handles for any native objects in `output` and encode it for the script
    ///
    /// Plain data travels under `data`; only `handle` and `handles` carry ids.
    pub fn export(&mut self, output: MethodOutput) -> Value {
        match output {
            MethodOutput::Unit => json!({ "data": null }),
            MethodOutput::Value(value) => json!({ "data": value }),
            MethodOutput::Object(object) => self.export_object(object),
            MethodOutput::Objects(objects) => {
                let handles: Vec<Value> = objects
                    .into_iter()
                    .map(|object| self.mint(object))
                    .collect();
                json!({ "handles": handles })
            }
        }
    }

    pub fn export_object(&mut self, object: NativeObject) -> Value {
        json!({ "handle": self.mint(object) })
    }

    fn mint(&mut self, object: NativeObject) -> Value {
        let kind = object.kind();
        let handle = self.new_handle(object);
        json!({ "id": handle.id(), "kind": kind.name() })
    }

    /// Method names and call modes per registered kind, for the bootstrap
    pub fn describe(&self) -> Value {
        let mut kinds = serde_json::Map::new();
        for kind in HandleKind::ALL {
            if let Some(set) = self.kinds.get(&kind) {
                let methods: serde_json::Map<String, Value> = set
                    .methods
                    .iter()
                    .map(|(name, method)| (name.to_string(), Value::from(method.mode())))
                    .collect();
                kinds.insert(kind.name().to_string(), Value::Object(methods));
            }
        }
        Value::Object(kinds)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
