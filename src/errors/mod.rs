//! # Error Handling
//!
//! Error types for the Stratus control plane, defined with `thiserror`.
//!
//! Only transport, configuration, and internal failures surface as [`Error`].
//! Problems caused by the *content* of watched Kubernetes objects (a missing
//! Service, a malformed TLS secret, an FQDN conflict) are not errors at all:
//! they are recorded as [`crate::graph::Finding`]s and the rebuild carries on
//! with the offending unit excluded.

/// Custom result type for Stratus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Stratus control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (gRPC)
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_helpers_produce_expected_variants() {
        assert!(matches!(Error::config("bad addr"), Error::Config(_)));
        assert!(matches!(Error::internal("oops"), Error::Internal(_)));
    }

    #[test]
    fn yaml_parse_failures_convert_to_serialization_errors() {
        let parse = serde_yaml::from_str::<Vec<u32>>("{unclosed").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn display_includes_context() {
        let err = Error::config("xDS listen address is empty");
        assert_eq!(err.to_string(), "Configuration error: xDS listen address is empty");
    }
}
