//! # dirgate-ldap
//!
//! Serialized LDAP/Active Directory client for the dirgate bridge.
//!
//! One live admin-bound connection is shared by every caller through a
//! command intake drained by a single worker, so at most one directory
//! operation is ever on the socket. Queries that can return many entries
//! come back as lazy [`ResultStream`]s driven by server-side paging.
//!
//! ## Features
//!
//! - Admin rebind after every operation (no user-identity leakage)
//! - Bounded retry with socket restart on transport failures
//! - Paged group / unit / user streams
//! - Organizational-unit filtering over the full user enumeration
//! - Logon normalization (`CORP\alice` and `alice@corp` both mean `alice`)
//!
//! ## Example
//!
//! ```ignore
//! use dirgate_ldap::{ClientOptions, DirectoryClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let opts = ClientOptions::new(
//!     "ldap://dc1.corp.example.com:389",
//!     "dc=corp,dc=example,dc=com",
//!     "cn=admin,dc=corp,dc=example,dc=com",
//! )
//! .with_password("secret");
//!
//! let client = DirectoryClient::connect(opts, CancellationToken::new()).await?;
//! let user = client.auth("CORP\\alice", "password").await?;
//! ```

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod mapper;
pub mod model;
pub mod scanner;

// Re-exports
pub use client::DirectoryClient;
pub use config::ClientOptions;
pub use directory::{
    DirEntry, DirectoryConn, DirectoryDialer, LdapDialer, PageCursor, SearchOutcome, SearchSpec,
};
pub use error::LdapClientError;
pub use mapper::normalize_login;
pub use model::{Group, SearchRow, Unit, User};
pub use scanner::{Fetched, PageRetriever, ResultStream};
