//! Errors raised at the host/script boundary
//!
//! Every variant is fatal for the script call that triggered it: ops return
//! these as exceptions, which abort the running entry point unless the script
//! catches them itself.

use super::handle::HandleKind;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("type error: {expected} expected, got {actual}")]
    WrongKind {
        expected: HandleKind,
        actual: HandleKind,
    },

    #[error("type error: '{method}' is a method of {owners}, got {actual}")]
    MethodKindMismatch {
        method: String,
        owners: String,
        actual: HandleKind,
    },

    #[error("invalid handle {0}: not owned by this session")]
    UnknownHandle(u32),

    #[error("{kind} has no method '{method}'")]
    UnknownMethod { kind: HandleKind, method: String },

    #[error("bad argument #{index} to '{method}': {message}")]
    BadArgument {
        method: String,
        index: usize,
        message: String,
    },

    #[error("'{method}' of {kind} cannot be called {mode}")]
    CallMode {
        kind: HandleKind,
        method: String,
        mode: &'static str,
    },

    #[error("browser: {0}")]
    Browser(String),
}

impl From<chromiumoxide::error::CdpError> for BridgeError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BridgeError::Browser(err.to_string())
    }
}
