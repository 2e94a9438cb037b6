//! Hub and endpoint error types

use thiserror::Error;

/// Numeric codes carried by hub-side failures, fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HubErrorCode {
    Unknown = 0,
    NoAgent = 1,
    Timeout = 2,
}

/// Error raised by [`crate::CoordinatorHub`] operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// No live connection is registered for the agent id.
    #[error("cannot find conn with id: {agent_id}")]
    NoAgent { agent_id: String },

    /// The response did not arrive within the hub timeout.
    #[error("ldap rpc timeout")]
    Timeout,

    /// A request with this correlation id is already in flight.
    #[error("guid rpc already exist: {guid}")]
    GuidExists { guid: String },

    /// The envelope could not be encoded.
    #[error("msg to json failed: {message}")]
    Encode { message: String },

    /// Every connection for the agent refused the frame.
    #[error("write to agent failed: {message}")]
    Write { message: String },

    /// The hub has been shut down.
    #[error("hub is closed")]
    Closed,

    /// Listener setup or serving failed.
    #[error("hub server error: {message}")]
    Server {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HubError {
    /// Protocol code for this failure.
    pub fn code(&self) -> HubErrorCode {
        match self {
            HubError::NoAgent { .. } => HubErrorCode::NoAgent,
            HubError::Timeout => HubErrorCode::Timeout,
            _ => HubErrorCode::Unknown,
        }
    }

    pub(crate) fn write(message: impl Into<String>) -> Self {
        HubError::Write {
            message: message.into(),
        }
    }

    pub(crate) fn server_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        HubError::Server {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Error raised by [`crate::AgentEndpoint`].
#[derive(Debug, Error)]
pub enum AgentError {
    /// Dialing or upgrading the hub channel failed.
    #[error("connect to hub failed: {message}")]
    Connect {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The established channel failed mid-serve.
    #[error("agent channel failure: {message}")]
    Channel { message: String },
}

impl AgentError {
    pub(crate) fn connect_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AgentError::Connect {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn channel(message: impl Into<String>) -> Self {
        AgentError::Channel {
            message: message.into(),
        }
    }
}

/// Error raised by the built-in RPC handlers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Payload did not parse as the method's input shape.
    #[error("{operation}: bad params: {message}")]
    Params {
        operation: &'static str,
        message: String,
    },

    /// The directory client failed.
    #[error("{operation}: {source}")]
    Ldap {
        operation: &'static str,
        #[source]
        source: dirgate_ldap::LdapClientError,
    },

    /// The reply could not be encoded.
    #[error("{operation}: encode failed: {message}")]
    Encode {
        operation: &'static str,
        message: String,
    },
}

impl RpcError {
    pub(crate) fn params(operation: &'static str, source: serde_json::Error) -> Self {
        RpcError::Params {
            operation,
            message: source.to_string(),
        }
    }

    pub(crate) fn ldap(operation: &'static str, source: dirgate_ldap::LdapClientError) -> Self {
        RpcError::Ldap { operation, source }
    }

    pub(crate) fn encode(operation: &'static str, source: serde_json::Error) -> Self {
        RpcError::Encode {
            operation,
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_error_codes() {
        assert_eq!(
            HubError::NoAgent {
                agent_id: "L1".to_string()
            }
            .code(),
            HubErrorCode::NoAgent
        );
        assert_eq!(HubError::Timeout.code(), HubErrorCode::Timeout);
        assert_eq!(
            HubError::GuidExists {
                guid: "g".to_string()
            }
            .code(),
            HubErrorCode::Unknown
        );
        assert_eq!(HubError::Closed.code(), HubErrorCode::Unknown);
    }

    #[test]
    fn test_hub_error_code_values() {
        assert_eq!(HubErrorCode::Unknown as u8, 0);
        assert_eq!(HubErrorCode::NoAgent as u8, 1);
        assert_eq!(HubErrorCode::Timeout as u8, 2);
    }

    #[test]
    fn test_rpc_error_display_labels_operation() {
        let err = RpcError::ldap(
            "rpc auth",
            dirgate_ldap::LdapClientError::not_found("user"),
        );
        assert_eq!(err.to_string(), "rpc auth: user does not exist");
    }
}
