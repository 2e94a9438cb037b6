//! Directory domain records
//!
//! Wire-stable shapes handed to RPC callers. Field names are fixed by the
//! JSON protocol and must not change.

use serde::{Deserialize, Serialize};

/// A directory user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "DN", default)]
    pub dn: String,
    #[serde(rename = "CN", default)]
    pub cn: String,
    #[serde(rename = "Mail", default)]
    pub mail: String,
    #[serde(rename = "Phone", default)]
    pub phone: String,
    #[serde(rename = "Logon", default)]
    pub logon: String,
    /// JSON-encoded list of group DNs the user belongs to.
    #[serde(rename = "MemberOf", default)]
    pub member_of: String,
}

/// A directory group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Desc", default)]
    pub desc: String,
    #[serde(rename = "DN", default)]
    pub dn: String,
    #[serde(rename = "CN", default)]
    pub cn: String,
    #[serde(rename = "Member", default)]
    pub member: String,
}

/// An organizational unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "DN", default)]
    pub dn: String,
}

/// One row of a raw search: attribute name to values, plus a `DN` key.
pub type SearchRow = serde_json::Map<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_wire_field_names() {
        let user = User {
            name: "Alice".to_string(),
            dn: "cn=alice,dc=x".to_string(),
            logon: "alice".to_string(),
            ..User::default()
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("\"Name\":\"Alice\""));
        assert!(json.contains("\"DN\":\"cn=alice,dc=x\""));
        assert!(json.contains("\"Logon\":\"alice\""));
        assert!(json.contains("\"MemberOf\":\"\""));
    }

    #[test]
    fn test_group_round_trip() {
        let group = Group {
            name: "ops".to_string(),
            desc: "operators".to_string(),
            dn: "cn=ops,dc=x".to_string(),
            cn: "ops".to_string(),
            member: "cn=alice,dc=x".to_string(),
        };
        let json = serde_json::to_string(&group).unwrap();
        let parsed: Group = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, group);
    }
}
