//! RPC method registry
//!
//! Maps method names to handlers. Every handler takes the envelope's
//! `Params` string and returns the `Data` string. The built-in handlers
//! bind a [`DirectoryClient`] and are registered opt-in, one builder call
//! per method.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dirgate_ldap::{DirectoryClient, LdapClientError, ResultStream};
use serde::Serialize;

use crate::error::RpcError;
use crate::model::{
    AuthParams, NodeUsersParams, PageParams, METHOD_AUTH, METHOD_GROUPS, METHOD_GROUP_USERS,
    METHOD_SEARCH, METHOD_UNITS, METHOD_UNIT_USERS,
};

/// Opaque error surfaced to the wire as the envelope's `Err` string.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<String, HandlerError>> + Send>>;

/// One RPC handler: `Params` payload in, `Data` payload out.
pub type RpcHandler = Arc<dyn Fn(String) -> HandlerFuture + Send + Sync>;

/// Named RPC handlers for one agent endpoint.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, RpcHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a builder binding the standard directory methods to `client`.
    pub fn for_client(client: DirectoryClient) -> RegistryBuilder {
        RegistryBuilder {
            client,
            registry: MethodRegistry::new(),
        }
    }

    /// Install a handler under the given method name.
    pub fn register(&mut self, method: impl Into<String>, handler: RpcHandler) {
        self.handlers.insert(method.into(), handler);
    }

    /// Look up a handler.
    pub fn handler(&self, method: &str) -> Option<RpcHandler> {
        self.handlers.get(method).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder registering the standard directory methods, each opt-in.
pub struct RegistryBuilder {
    client: DirectoryClient,
    registry: MethodRegistry,
}

impl RegistryBuilder {
    #[must_use]
    pub fn with_auth(mut self) -> Self {
        let client = self.client.clone();
        self.registry.register(
            METHOD_AUTH,
            Arc::new(move |params: String| {
                let client = client.clone();
                Box::pin(async move {
                    let auth: AuthParams = serde_json::from_str(&params)
                        .map_err(|e| RpcError::params("rpc auth", e))?;
                    let user = client
                        .auth(&auth.login, &auth.pass)
                        .await
                        .map_err(|e| RpcError::ldap("rpc auth", e))?;
                    encode("rpc auth", &user)
                })
            }),
        );
        self
    }

    #[must_use]
    pub fn with_groups(mut self) -> Self {
        let client = self.client.clone();
        self.registry.register(
            METHOD_GROUPS,
            Arc::new(move |params: String| {
                let client = client.clone();
                Box::pin(async move {
                    let page: PageParams = serde_json::from_str(&params)
                        .map_err(|e| RpcError::params("rpc groups", e))?;
                    let stream = client
                        .groups(page.per_page)
                        .map_err(|e| RpcError::ldap("rpc groups", e))?;
                    let rows = page_of(stream, page.page_num)
                        .await
                        .map_err(|e| RpcError::ldap("rpc groups", e))?;
                    encode("rpc groups", &rows)
                })
            }),
        );
        self
    }

    #[must_use]
    pub fn with_organizational_units(mut self) -> Self {
        let client = self.client.clone();
        self.registry.register(
            METHOD_UNITS,
            Arc::new(move |params: String| {
                let client = client.clone();
                Box::pin(async move {
                    let page: PageParams = serde_json::from_str(&params)
                        .map_err(|e| RpcError::params("rpc units", e))?;
                    let stream = client
                        .organizational_units(page.per_page)
                        .map_err(|e| RpcError::ldap("rpc units", e))?;
                    let rows = page_of(stream, page.page_num)
                        .await
                        .map_err(|e| RpcError::ldap("rpc units", e))?;
                    encode("rpc units", &rows)
                })
            }),
        );
        self
    }

    /// The `search` payload is the raw filter itself, not JSON.
    #[must_use]
    pub fn with_search(mut self) -> Self {
        let client = self.client.clone();
        self.registry.register(
            METHOD_SEARCH,
            Arc::new(move |params: String| {
                let client = client.clone();
                Box::pin(async move {
                    let rows = client
                        .search(&params)
                        .await
                        .map_err(|e| RpcError::ldap("rpc search", e))?;
                    encode("rpc search", &rows)
                })
            }),
        );
        self
    }

    #[must_use]
    pub fn with_group_users(mut self) -> Self {
        let client = self.client.clone();
        self.registry.register(
            METHOD_GROUP_USERS,
            Arc::new(move |params: String| {
                let client = client.clone();
                Box::pin(async move {
                    let node: NodeUsersParams = serde_json::from_str(&params)
                        .map_err(|e| RpcError::params("rpc groupUsers", e))?;
                    let stream = client
                        .group_users(&node.id, node.page.per_page)
                        .map_err(|e| RpcError::ldap("rpc groupUsers", e))?;
                    let rows = page_of(stream, node.page.page_num)
                        .await
                        .map_err(|e| RpcError::ldap("rpc groupUsers", e))?;
                    encode("rpc groupUsers", &rows)
                })
            }),
        );
        self
    }

    #[must_use]
    pub fn with_unit_users(mut self) -> Self {
        let client = self.client.clone();
        self.registry.register(
            METHOD_UNIT_USERS,
            Arc::new(move |params: String| {
                let client = client.clone();
                Box::pin(async move {
                    let node: NodeUsersParams = serde_json::from_str(&params)
                        .map_err(|e| RpcError::params("rpc unitUsers", e))?;
                    let stream = client
                        .ou_users(node.page.per_page, &[node.id.as_str()])
                        .map_err(|e| RpcError::ldap("rpc unitUsers", e))?;
                    let rows = page_of(stream, node.page.page_num)
                        .await
                        .map_err(|e| RpcError::ldap("rpc unitUsers", e))?;
                    encode("rpc unitUsers", &rows)
                })
            }),
        );
        self
    }

    pub fn build(self) -> MethodRegistry {
        self.registry
    }
}

fn encode<T: Serialize>(operation: &'static str, value: &T) -> Result<String, HandlerError> {
    serde_json::to_string(value)
        .map_err(|e| RpcError::encode(operation, e))
        .map_err(Into::into)
}

/// Advance the stream to the 1-based `page_num` and return that page.
///
/// A stream that ends cleanly before the page is reached yields an empty
/// list; a latched stream error is surfaced instead of swallowed.
pub(crate) async fn page_of<T: Clone + Send>(
    mut stream: ResultStream<T>,
    page_num: u32,
) -> Result<Vec<T>, LdapClientError> {
    let mut reached = 0u32;
    while stream.next().await {
        reached += 1;
        if reached < page_num {
            continue;
        }
        let mut page = Vec::new();
        stream.scan(|items| page.extend_from_slice(items));
        return Ok(page);
    }
    match stream.take_last_err() {
        Some(e) => Err(e),
        None => Ok(Vec::new()),
    }
}
