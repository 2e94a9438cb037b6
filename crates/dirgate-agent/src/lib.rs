//! # dirgate-agent
//!
//! Agent-fleet transport for the dirgate LDAP bridge.
//!
//! A central [`CoordinatorHub`] accepts long-lived WebSocket channels from
//! remote [`AgentEndpoint`]s, each collocated with a directory server and
//! holding an admin-bound `dirgate-ldap` client. RPC requests are JSON
//! envelopes routed to an agent by logical id and correlated back to their
//! waiters by GUID.
//!
//! ## Features
//!
//! - Many agents per hub, redundant connections per agent id
//! - Request/response correlation with per-request timeouts
//! - Keepalive ping/pong with read/write deadlines on both sides
//! - Opt-in method registry binding a directory client per agent
//!
//! ## Example
//!
//! ```ignore
//! use dirgate_agent::{AgentEndpoint, CoordinatorHub, MethodRegistry, RpcRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! // Hub side.
//! let hub = CoordinatorHub::new(std::time::Duration::from_secs(5));
//! tokio::spawn({
//!     let hub = hub.clone();
//!     async move { hub.run(CancellationToken::new(), "0.0.0.0:8888", "/ws").await }
//! });
//!
//! // Agent side, next to the directory server.
//! let registry = MethodRegistry::for_client(client)
//!     .with_auth()
//!     .with_groups()
//!     .with_search()
//!     .build();
//! let endpoint = AgentEndpoint::connect("ldap://dc1", "hub:8888", "/ws", registry).await?;
//! tokio::spawn(endpoint.serve(CancellationToken::new()));
//!
//! // Dispatch.
//! let resp = hub.rpc("ldap://dc1", RpcRequest {
//!     method: "auth".to_string(),
//!     params: r#"{"Login":"alice","Pass":"p"}"#.to_string(),
//!     ..RpcRequest::default()
//! }).await?;
//! ```

pub mod endpoint;
pub mod error;
pub mod hub;
pub mod model;
pub mod rpc;

// Re-exports
pub use endpoint::AgentEndpoint;
pub use error::{AgentError, HubError, HubErrorCode, RpcError};
pub use hub::CoordinatorHub;
pub use model::{
    AuthParams, NodeUsersParams, PageParams, RpcRequest, RpcResponse, SignedPageParams,
    IDENTIFY_HEADER, METHOD_AUTH, METHOD_GROUPS, METHOD_GROUP_USERS, METHOD_SEARCH, METHOD_UNITS,
    METHOD_UNIT_USERS,
};
pub use rpc::{HandlerError, HandlerFuture, MethodRegistry, RegistryBuilder, RpcHandler};
