//! Host/script bridge
//!
//! Provider scripts run in per-provider sessions. Native capabilities reach
//! them through modules (`require("dom")`, `require("headless")`) whose
//! objects are only ever visible as kind-tagged handles.

pub mod error;
pub mod handle;
pub mod modules;
pub mod runtime;
pub mod session;
pub mod value;

pub use error::BridgeError;
pub use handle::{Handle, HandleKind, HandleTable, NativeObject};
pub use modules::{ModuleRegistry, NativeModule};
pub use session::ScriptSession;
pub use value::{ScriptValue, ValueKind};
