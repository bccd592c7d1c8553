//! Error type system for folio
//!
//! Two tiers of failure exist in the bridge. Soft failures (a document that
//! could not be fetched, a browser that could not be launched) never reach
//! this module: they are handed to the script as `[null, message]` pairs.
//! Everything here is fatal for the current host call:
//! - provider load failures
//! - exceptions escaping a provider script
//! - contract violations in values returned by a provider
//! - record decode failures
//! - a session that is no longer running

/// Main error type for folio
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider load failed: {0}")]
    ProviderLoadError(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// An exception escaped the script (including fatal native failures raised
    /// by handle methods while the script was running)
    #[error("Script error in {function}: {message}")]
    ScriptError { function: String, message: String },

    /// The script returned a value whose shape breaks the calling contract
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A table passed the shape check but could not be decoded into a record
    #[error("Decode error in {function}: {message}")]
    DecodeError { function: String, message: String },

    #[error("Script session unavailable: {0}")]
    SessionClosed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FolioError {
    /// Get the error type name used in structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            FolioError::ConfigError(_) => "ConfigError",
            FolioError::ProviderLoadError(_) => "ProviderLoadError",
            FolioError::ProviderNotFound(_) => "ProviderNotFound",
            FolioError::ScriptError { .. } => "ScriptError",
            FolioError::ContractViolation(_) => "ContractViolation",
            FolioError::DecodeError { .. } => "DecodeError",
            FolioError::SessionClosed(_) => "SessionClosed",
            FolioError::IoError(_) => "IoError",
        }
    }

    /// Whether the error points at a defect in the provider script rather
    /// than in the host
    pub fn is_provider_fault(&self) -> bool {
        matches!(
            self,
            FolioError::ScriptError { .. }
                | FolioError::ContractViolation(_)
                | FolioError::DecodeError { .. }
        )
    }
}

/// Result type alias for operations that can fail with FolioError
pub type Result<T> = std::result::Result<T, FolioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(
            FolioError::ProviderNotFound("test".into()).error_type(),
            "ProviderNotFound"
        );
        assert_eq!(
            FolioError::ContractViolation("test".into()).error_type(),
            "ContractViolation"
        );
        assert_eq!(
            FolioError::ScriptError {
                function: "ChapterPages".into(),
                message: "boom".into(),
            }
            .error_type(),
            "ScriptError"
        );
    }

    #[test]
    fn test_provider_fault_classification() {
        assert!(FolioError::ContractViolation("x".into()).is_provider_fault());
        assert!(FolioError::DecodeError {
            function: "SearchManga".into(),
            message: "missing field `url`".into(),
        }
        .is_provider_fault());
        assert!(!FolioError::SessionClosed("x".into()).is_provider_fault());
        assert!(!FolioError::ConfigError("x".into()).is_provider_fault());
    }

    #[test]
    fn test_script_error_message_names_function() {
        let err = FolioError::ScriptError {
            function: "ChapterPages".into(),
            message: "element expected".into(),
        };
        let message = err.to_string();
        assert!(message.contains("ChapterPages"));
        assert!(message.contains("element expected"));
    }
}
