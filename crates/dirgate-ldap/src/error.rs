//! Directory client error types
//!
//! Error definitions with a network/permanent classification driving the
//! transport retry loop.

use thiserror::Error;

/// Error that can occur during directory client operations.
#[derive(Debug, Error)]
pub enum LdapClientError {
    /// Client options are missing or inconsistent.
    #[error("invalid client options: {message}")]
    InvalidOptions { message: String },

    /// Operation on a closed client.
    #[error("client is closed")]
    Closed,

    /// Socket-level failure while talking to the directory.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation did not complete within the configured deadline.
    #[error("{operation} timeout")]
    Timeout { operation: String },

    /// Bind was rejected by the server (invalid credentials).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A lookup returned no rows.
    #[error("{what} does not exist")]
    NotFound { what: String },

    /// The server answered with a non-zero result code.
    #[error("directory result code {code}: {message}")]
    ResultCode { code: u32, message: String },

    /// Payload encoding or decoding failed.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// A deeper error labeled with the operation that hit it.
    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<LdapClientError>,
    },

    /// Two failures observed by the same command, both kept visible.
    #[error("{left}; {right}")]
    Merged {
        left: Box<LdapClientError>,
        right: Box<LdapClientError>,
    },
}

impl LdapClientError {
    /// Check whether this error is a transport-class failure that the
    /// client may retry after restarting the socket.
    pub fn is_network(&self) -> bool {
        match self {
            LdapClientError::Network { .. } => true,
            LdapClientError::Context { source, .. } => source.is_network(),
            LdapClientError::Merged { left, right } => left.is_network() || right.is_network(),
            _ => false,
        }
    }

    /// Wrap this error with the label of the operation that observed it.
    #[must_use]
    pub fn context(self, operation: impl Into<String>) -> Self {
        LdapClientError::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Combine two failures into one without dropping either origin.
    pub fn merged(left: LdapClientError, right: LdapClientError) -> Self {
        LdapClientError::Merged {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    // Convenience constructors

    /// Create an invalid-options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        LdapClientError::InvalidOptions {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        LdapClientError::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        LdapClientError::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        LdapClientError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        LdapClientError::NotFound { what: what.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(LdapClientError::network("connection reset").is_network());
        assert!(!LdapClientError::Closed.is_network());
        assert!(!LdapClientError::InvalidCredentials.is_network());
        assert!(!LdapClientError::timeout("search").is_network());
    }

    #[test]
    fn test_network_classification_through_context() {
        let err = LdapClientError::network("broken pipe").context("groups search");
        assert!(err.is_network());

        let err = LdapClientError::InvalidCredentials.context("auth");
        assert!(!err.is_network());
    }

    #[test]
    fn test_network_classification_through_merge() {
        let err = LdapClientError::merged(
            LdapClientError::timeout("search"),
            LdapClientError::network("reset"),
        );
        assert!(err.is_network());

        let err = LdapClientError::merged(
            LdapClientError::timeout("search"),
            LdapClientError::InvalidCredentials,
        );
        assert!(!err.is_network());
    }

    #[test]
    fn test_display_keeps_origin_visible() {
        let err = LdapClientError::network("connection reset").context("groups search");
        assert_eq!(err.to_string(), "groups search: network error: connection reset");

        let err = LdapClientError::merged(
            LdapClientError::timeout("auth"),
            LdapClientError::network("reset"),
        );
        assert_eq!(err.to_string(), "auth timeout; network error: reset");
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(
            LdapClientError::not_found("user").to_string(),
            "user does not exist"
        );
    }
}
