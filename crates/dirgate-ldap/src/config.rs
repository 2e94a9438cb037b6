//! Directory client configuration
//!
//! Connection options with validation and credential redaction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LdapClientError;

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Options for a [`crate::DirectoryClient`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Directory URL (e.g., "ldap://dc1.corp.example.com:389").
    pub url: String,

    /// Base DN for all searches (e.g., "dc=corp,dc=example,dc=com").
    pub base_dn: String,

    /// Admin bind DN. The socket is kept bound to this identity between
    /// operations.
    pub bind_dn: String,

    /// Admin bind password.
    pub bind_password: String,

    /// Per-operation deadline, also used when dialing.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Emit wire-level search logging.
    #[serde(default)]
    pub debug: bool,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"***REDACTED***")
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ClientOptions {
    /// Create options with the required connection coordinates.
    pub fn new(
        url: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: String::new(),
            timeout: default_timeout(),
            debug: false,
        }
    }

    /// Set the admin bind password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = password.into();
        self
    }

    /// Set the per-operation deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable wire-level search logging.
    #[must_use]
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Check that every required option is present.
    pub fn validate(&self) -> Result<(), LdapClientError> {
        if self.url.is_empty() {
            return Err(LdapClientError::invalid_options("url is required"));
        }
        if self.base_dn.is_empty() {
            return Err(LdapClientError::invalid_options("base_dn is required"));
        }
        if self.bind_dn.is_empty() {
            return Err(LdapClientError::invalid_options("bind_dn is required"));
        }
        if self.bind_password.is_empty() {
            return Err(LdapClientError::invalid_options("bind_password is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ClientOptions {
        ClientOptions::new(
            "ldap://dc1.example.com:389",
            "dc=example,dc=com",
            "cn=admin,dc=example,dc=com",
        )
        .with_password("secret")
    }

    #[test]
    fn test_options_new_defaults() {
        let opts = options();
        assert_eq!(opts.url, "ldap://dc1.example.com:389");
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert!(!opts.debug);
    }

    #[test]
    fn test_options_builders() {
        let opts = options()
            .with_timeout(Duration::from_secs(10))
            .with_debug();
        assert_eq!(opts.timeout, Duration::from_secs(10));
        assert!(opts.debug);
    }

    #[test]
    fn test_options_validation() {
        assert!(options().validate().is_ok());

        let missing_url = ClientOptions::new("", "dc=example,dc=com", "cn=admin").with_password("x");
        assert!(missing_url.validate().is_err());

        let missing_password =
            ClientOptions::new("ldap://h", "dc=example,dc=com", "cn=admin");
        assert!(missing_password.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", options());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("***REDACTED***"));
    }
}
