//! Error types for marshalling operations.

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for marshalling operations.
///
/// The marshaller recovers nothing internally: every failure surfaces to
/// the caller as one of these variants. Stream handles are released on the
/// failing path before the error propagates.
#[derive(Debug, Error, Clone)]
pub enum MarshalError {
    /// The host platform lacks a primitive the marshaller relies on.
    /// Raised at marshaller construction only.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Write of a type that does not declare the serializable capability
    /// while `require_serializable` is set.
    #[error(
        "not serializable: {0} (declare the serializable capability or \
         disable require_serializable; note that performance may degrade \
         for non-serializable types)"
    )]
    NotSerializable(String),

    /// The class resolver cannot resolve an id or name during read.
    #[error(
        "class not found: {0} (make sure the same versions of all classes \
         are registered on all nodes or enable peer class loading)"
    )]
    ClassNotFound(String),

    /// The wire checksum does not match the descriptor's current checksum.
    #[error(
        "class schema mismatch for {class} (is the same version of the \
         class present on all nodes?) [expected={expected}, actual={actual}]"
    )]
    SchemaMismatch {
        /// Name of the class whose schema differs.
        class: String,
        /// Checksum computed from the local descriptor.
        expected: u16,
        /// Checksum found on the wire.
        actual: u16,
    },

    /// `read_field` was invoked for a name absent from the footer.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// Invalid registration or field access (unknown field, kind mismatch).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the underlying sink or source (wrapped in `Arc` so
    /// the error type stays `Clone`).
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Malformed tag, truncated payload, or a handle to an unwritten
    /// position. Fatal, no recovery.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<io::Error> for MarshalError {
    fn from(err: io::Error) -> Self {
        MarshalError::Io(Arc::new(err))
    }
}

impl MarshalError {
    /// Returns the error category for structured error handling.
    ///
    /// `ClassNotFound` and `SchemaMismatch` share a category: both mean
    /// "this node cannot consume this blob".
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedPlatform(_) => ErrorCategory::Platform,
            Self::NotSerializable(_) => ErrorCategory::Serialization,
            Self::ClassNotFound(_) | Self::SchemaMismatch { .. } => ErrorCategory::ClassMissing,
            Self::FieldNotFound(_) => ErrorCategory::FieldLookup,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Io(_) => ErrorCategory::Io,
            Self::Protocol(_) => ErrorCategory::Protocol,
        }
    }
}

/// Classification of error categories for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The platform cannot run the marshaller at all.
    Platform,
    /// The value cannot be serialized under the current configuration.
    Serialization,
    /// The reading node cannot consume the blob (missing or drifted class).
    ClassMissing,
    /// Indexed field lookup failed.
    FieldLookup,
    /// Invalid registration or field access.
    Configuration,
    /// Underlying sink or source failure.
    Io,
    /// Malformed wire data.
    Protocol,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => write!(f, "PLATFORM"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::ClassMissing => write!(f, "CLASS_MISSING"),
            Self::FieldLookup => write!(f, "FIELD_LOOKUP"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Io => write!(f, "IO"),
            Self::Protocol => write!(f, "PROTOCOL"),
        }
    }
}

/// A specialized `Result` type for marshalling operations.
pub type Result<T> = std::result::Result<T, MarshalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_serializable_display() {
        let err = MarshalError::NotSerializable("com.acme.Opaque".to_string());
        assert!(err.to_string().starts_with("not serializable: com.acme.Opaque"));
    }

    #[test]
    fn test_class_not_found_mentions_peer_loading() {
        let err = MarshalError::ClassNotFound("com.acme.Missing".to_string());
        assert!(err.to_string().contains("peer class loading"));
    }

    #[test]
    fn test_schema_mismatch_display() {
        let err = MarshalError::SchemaMismatch {
            class: "com.acme.Person".to_string(),
            expected: 17,
            actual: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("com.acme.Person"));
        assert!(msg.contains("expected=17"));
        assert!(msg.contains("actual=42"));
    }

    #[test]
    fn test_class_errors_share_category() {
        let not_found = MarshalError::ClassNotFound("x".into());
        let mismatch = MarshalError::SchemaMismatch {
            class: "x".into(),
            expected: 0,
            actual: 1,
        };
        assert_eq!(not_found.category(), mismatch.category());
        assert_eq!(not_found.category(), ErrorCategory::ClassMissing);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: MarshalError = io_err.into();
        assert!(matches!(err, MarshalError::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Io);
    }

    #[test]
    fn test_error_is_send_sync_clone() {
        fn assert_bounds<T: Send + Sync + Clone>() {}
        assert_bounds::<MarshalError>();
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::ClassMissing.to_string(), "CLASS_MISSING");
        assert_eq!(ErrorCategory::Protocol.to_string(), "PROTOCOL");
    }
}
