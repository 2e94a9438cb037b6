//! Directory transport seam
//!
//! The client drives the directory only through [`DirectoryConn`] and
//! [`DirectoryDialer`]: bind, search with optional server-side paging, and
//! redial. The production implementation sits on `ldap3`; tests substitute
//! scripted connections at the same seam.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::error::LdapClientError;

/// Result code for a rejected bind (invalidCredentials, RFC 4511).
const RC_INVALID_CREDENTIALS: u32 = 49;

/// One directory entry, detached from the wire library.
#[derive(Debug, Clone, Default)]
pub struct DirEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attribute name to values.
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirEntry {
    /// First value of the named attribute, empty when absent.
    pub fn attr_first(&self, name: &str) -> &str {
        self.attrs
            .get(name)
            .and_then(|vs| vs.first())
            .map_or("", String::as_str)
    }

    /// First non-empty value walking the candidate attributes in order.
    pub fn first_of(&self, names: &[&str]) -> &str {
        names
            .iter()
            .map(|n| self.attr_first(n))
            .find(|v| !v.is_empty())
            .unwrap_or("")
    }

    /// All values of the named attribute.
    pub fn attr_values(&self, name: &str) -> &[String] {
        self.attrs.get(name).map_or(&[], Vec::as_slice)
    }
}

/// Server-side paging state for one search.
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    /// Requested page size.
    pub size: u32,
    /// Opaque cookie from the previous page; empty on the first call.
    pub cookie: Vec<u8>,
}

/// One prepared subtree search.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub base_dn: String,
    pub filter: String,
    /// Paging control; `None` issues an unpaged search.
    pub page: Option<PageCursor>,
}

/// Entries plus the server's paging verdict for one search.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub entries: Vec<DirEntry>,
    /// Cookie for the next page; `None` when the server reports no more
    /// pages (or the search was unpaged).
    pub next_cookie: Option<Vec<u8>>,
}

/// A live admin-capable directory connection.
#[async_trait]
pub trait DirectoryConn: Send {
    /// Simple bind as the given DN.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), LdapClientError>;

    /// Execute one subtree search.
    async fn search(&mut self, spec: &SearchSpec) -> Result<SearchOutcome, LdapClientError>;

    /// Release the underlying socket.
    async fn close(&mut self);
}

/// Factory producing fresh connections, used on connect and on transport
/// retry.
#[async_trait]
pub trait DirectoryDialer: Send + Sync {
    async fn dial(&self, timeout: Duration) -> Result<Box<dyn DirectoryConn>, LdapClientError>;
}

/// `ldap3`-backed dialer.
pub struct LdapDialer {
    url: String,
    debug: bool,
}

impl LdapDialer {
    pub fn new(url: impl Into<String>, debug: bool) -> Self {
        Self {
            url: url.into(),
            debug,
        }
    }
}

#[async_trait]
impl DirectoryDialer for LdapDialer {
    async fn dial(&self, timeout: Duration) -> Result<Box<dyn DirectoryConn>, LdapClientError> {
        let settings = LdapConnSettings::new().set_conn_timeout(timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| ldap_err("dial", e))?;

        // Drive the connection until it ends; the handle below is the only
        // way operations reach it.
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "ldap connection driver error");
            }
        });

        debug!(url = %self.url, "ldap connection established");

        Ok(Box::new(LdapDirectory {
            ldap,
            debug: self.debug,
        }))
    }
}

/// `ldap3`-backed connection.
struct LdapDirectory {
    ldap: ldap3::Ldap,
    debug: bool,
}

#[async_trait]
impl DirectoryConn for LdapDirectory {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), LdapClientError> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| ldap_err("bind", e))?;
        match result.rc {
            0 => Ok(()),
            RC_INVALID_CREDENTIALS => Err(LdapClientError::InvalidCredentials),
            rc => Err(LdapClientError::ResultCode {
                code: rc,
                message: result.text,
            }),
        }
    }

    async fn search(&mut self, spec: &SearchSpec) -> Result<SearchOutcome, LdapClientError> {
        if self.debug {
            debug!(
                target: "dirgate_ldap::wire",
                base_dn = %spec.base_dn,
                filter = %spec.filter,
                paged = spec.page.is_some(),
                "issuing search"
            );
        }

        let search = if let Some(page) = &spec.page {
            self.ldap
                .with_controls(PagedResults {
                    size: page.size as i32,
                    cookie: page.cookie.clone(),
                })
                .search(&spec.base_dn, Scope::Subtree, &spec.filter, Vec::<&str>::new())
                .await
        } else {
            self.ldap
                .search(&spec.base_dn, Scope::Subtree, &spec.filter, Vec::<&str>::new())
                .await
        };

        let (entries, result) = search
            .map_err(|e| ldap_err("search", e))?
            .success()
            .map_err(|e| ldap_err("search", e))?;

        let entries = entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|e| DirEntry {
                dn: e.dn,
                attrs: e.attrs,
            })
            .collect();

        // A non-empty cookie in the response control means the server has
        // more pages for this search.
        let next_cookie = result.ctrls.iter().find_map(|c| {
            let Control(Some(ControlType::PagedResults), raw) = c else {
                return None;
            };
            let paged = raw.parse::<PagedResults>();
            if paged.cookie.is_empty() {
                None
            } else {
                Some(paged.cookie)
            }
        });

        Ok(SearchOutcome {
            entries,
            next_cookie,
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            warn!(error = %e, "error during ldap unbind");
        }
    }
}

/// Map an `ldap3` failure into the client error space. Everything that is
/// not a server result code is treated as a transport failure.
fn ldap_err(operation: &'static str, e: ldap3::LdapError) -> LdapClientError {
    match e {
        ldap3::LdapError::LdapResult { result } => match result.rc {
            RC_INVALID_CREDENTIALS => LdapClientError::InvalidCredentials,
            rc => LdapClientError::ResultCode {
                code: rc,
                message: result.text,
            },
        },
        other => LdapClientError::Network {
            message: format!("{operation}: {other}"),
            source: Some(Box::new(other)),
        },
    }
}

/// Escape special characters in filter values (RFC 4515).
pub(crate) fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_attr_first() {
        let mut entry = DirEntry::default();
        entry
            .attrs
            .insert("cn".to_string(), vec!["alice".to_string(), "a2".to_string()]);

        assert_eq!(entry.attr_first("cn"), "alice");
        assert_eq!(entry.attr_first("missing"), "");
    }

    #[test]
    fn test_entry_first_of_walks_candidates() {
        let mut entry = DirEntry::default();
        entry.attrs.insert("name".to_string(), vec![String::new()]);
        entry
            .attrs
            .insert("displayName".to_string(), vec!["Alice A.".to_string()]);

        assert_eq!(entry.first_of(&["name", "displayName", "cn"]), "Alice A.");
        assert_eq!(entry.first_of(&["absent", "missing"]), "");
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("alice"), "alice");
        assert_eq!(escape_filter_value("a*b"), "a\\2ab");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("a\\b"), "a\\5cb");
    }
}
