//! Wire envelopes and RPC payload shapes
//!
//! Every frame on the agent channel is one JSON envelope. `Params` and
//! `Data` carry JSON payloads as strings; the double encoding is part of
//! the wire protocol and must be preserved.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header naming the logical agent on channel establishment.
pub const IDENTIFY_HEADER: &str = "X-LDAP-URI";

/// Read/write buffer limit for one frame.
pub(crate) const MAX_MSG_SIZE: usize = 1024;

/// How long a peer may stay silent before the channel is considered dead.
pub(crate) const PONG_WAIT: Duration = Duration::from_secs(60);

/// Keepalive cadence: 80% of the pong wait.
pub(crate) const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 8 / 10);

/// Deadline for one outgoing frame.
pub(crate) const WRITE_WAIT: Duration = Duration::from_secs(10);

/// RPC method names.
pub const METHOD_AUTH: &str = "auth";
pub const METHOD_GROUPS: &str = "groups";
pub const METHOD_UNITS: &str = "units";
pub const METHOD_SEARCH: &str = "search";
pub const METHOD_GROUP_USERS: &str = "groupUsers";
pub const METHOD_UNIT_USERS: &str = "unitUsers";

/// Request envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlates the response; generated by the hub when empty.
    #[serde(rename = "GUID", default)]
    pub guid: String,
    #[serde(rename = "Method", default)]
    pub method: String,
    /// JSON payload, encoded as a string.
    #[serde(rename = "Params", default)]
    pub params: String,
}

/// Response envelope. `err` is empty on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(rename = "GUID", default)]
    pub guid: String,
    #[serde(rename = "Data", default)]
    pub data: String,
    #[serde(rename = "Err", default)]
    pub err: String,
}

/// `auth` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(rename = "Login", default)]
    pub login: String,
    #[serde(rename = "Pass", default)]
    pub pass: String,
}

/// Pagination: 1-based page number, page size in entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    #[serde(rename = "PerPage", default)]
    pub per_page: u32,
    #[serde(rename = "PageNum", default)]
    pub page_num: u32,
}

/// Pagination as sent by signed-integer callers (GraphQL shapes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPageParams {
    #[serde(rename = "PerPage", default)]
    pub per_page: i64,
    #[serde(rename = "PageNum", default)]
    pub page_num: i64,
}

impl SignedPageParams {
    /// Convert to the unsigned wire form, clamping negatives to zero.
    pub fn to_page(self) -> PageParams {
        PageParams {
            per_page: u32::try_from(self.per_page).unwrap_or(0),
            page_num: u32::try_from(self.page_num).unwrap_or(0),
        }
    }
}

/// `groupUsers` / `unitUsers` payload: a node identifier plus pagination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUsersParams {
    /// Group DN for `groupUsers`; organizational-unit name for `unitUsers`.
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Pag", default)]
    pub page: PageParams,
    #[serde(rename = "PagGql", default)]
    pub page_gql: SignedPageParams,
}

impl NodeUsersParams {
    /// Adopt the signed-integer pagination when the caller filled that form.
    pub fn load_gql(&mut self) {
        self.page = self.page_gql.to_page();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_round_trip() {
        let req = RpcRequest {
            guid: "g1".to_string(),
            method: "auth".to_string(),
            params: r#"{"Login":"alice","Pass":"p"}"#.to_string(),
        };
        let bytes = serde_json::to_string(&req).unwrap();
        let parsed: RpcRequest = serde_json::from_str(&bytes).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_response_envelope_round_trip() {
        let resp = RpcResponse {
            guid: "g1".to_string(),
            data: r#"{"DN":"cn=alice,dc=x"}"#.to_string(),
            err: String::new(),
        };
        let bytes = serde_json::to_string(&resp).unwrap();
        let parsed: RpcResponse = serde_json::from_str(&bytes).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_envelope_wire_field_names() {
        let req = RpcRequest {
            guid: "g".to_string(),
            method: "groups".to_string(),
            params: "{}".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"GUID\""));
        assert!(json.contains("\"Method\""));
        assert!(json.contains("\"Params\""));

        let resp = RpcResponse::default();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"GUID\""));
        assert!(json.contains("\"Data\""));
        assert!(json.contains("\"Err\""));
    }

    #[test]
    fn test_envelope_tolerates_missing_fields() {
        let req: RpcRequest = serde_json::from_str(r#"{"Method":"auth"}"#).unwrap();
        assert_eq!(req.guid, "");
        assert_eq!(req.method, "auth");
        assert_eq!(req.params, "");
    }

    #[test]
    fn test_signed_page_params_conversion() {
        let gql = SignedPageParams {
            per_page: 25,
            page_num: 3,
        };
        assert_eq!(
            gql.to_page(),
            PageParams {
                per_page: 25,
                page_num: 3
            }
        );

        let negative = SignedPageParams {
            per_page: -1,
            page_num: -5,
        };
        assert_eq!(negative.to_page(), PageParams::default());
    }

    #[test]
    fn test_node_users_load_gql() {
        let mut params = NodeUsersParams {
            id: "cn=ops,dc=x".to_string(),
            page: PageParams::default(),
            page_gql: SignedPageParams {
                per_page: 10,
                page_num: 2,
            },
        };
        params.load_gql();
        assert_eq!(params.page.per_page, 10);
        assert_eq!(params.page.page_num, 2);
    }

    #[test]
    fn test_ping_period_is_eighty_percent_of_pong_wait() {
        assert_eq!(PING_PERIOD, Duration::from_secs(48));
    }
}
