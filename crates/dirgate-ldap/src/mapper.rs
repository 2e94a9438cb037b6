//! Entry-to-record mapping
//!
//! Reshapes raw directory entries into domain records. Each field walks a
//! fixed attribute fallback chain; the first non-empty value wins.

use crate::directory::DirEntry;
use crate::model::{Group, Unit, User};

pub(crate) fn map_to_user(entry: &DirEntry) -> User {
    User {
        name: entry
            .first_of(&[
                "name",
                "displayName",
                "cn",
                "sAMAccountName",
                "userPrincipalName",
            ])
            .to_string(),
        logon: entry
            .first_of(&["sAMAccountName", "userPrincipalName"])
            .to_string(),
        phone: entry
            .first_of(&["telephoneNumber", "mobile", "phone"])
            .to_string(),
        mail: entry.first_of(&["mail", "email"]).to_string(),
        dn: entry.dn.clone(),
        cn: entry.attr_first("cn").to_string(),
        member_of: serde_json::to_string(entry.attr_values("memberOf")).unwrap_or_default(),
    }
}

pub(crate) fn map_to_group(entry: &DirEntry) -> Group {
    Group {
        name: entry
            .first_of(&["name", "sAMAccountName", "userPrincipalName", "cn"])
            .to_string(),
        dn: entry.dn.clone(),
        cn: entry.attr_first("cn").to_string(),
        desc: entry.attr_first("description").to_string(),
        member: entry.attr_first("member").to_string(),
    }
}

pub(crate) fn map_to_unit(entry: &DirEntry) -> Unit {
    Unit {
        name: entry.first_of(&["ou", "name"]).to_string(),
        dn: entry.dn.clone(),
    }
}

/// Reduce a logon name to its bare account form: the `DOMAIN\` prefix is
/// dropped (everything up to the last backslash) and the `@realm` suffix is
/// dropped (everything from the first `@`). Case is preserved.
pub fn normalize_login(login: &str) -> String {
    let login = login.rsplit('\\').next().unwrap_or(login);
    let login = login.split('@').next().unwrap_or(login);
    login.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> DirEntry {
        let mut map = HashMap::new();
        for (name, values) in attrs {
            map.insert(
                (*name).to_string(),
                values.iter().map(|v| (*v).to_string()).collect(),
            );
        }
        DirEntry {
            dn: dn.to_string(),
            attrs: map,
        }
    }

    #[test]
    fn test_map_to_user_fallback_chain() {
        let e = entry(
            "cn=alice,ou=sales,dc=x",
            &[
                ("cn", &["alice"]),
                ("sAMAccountName", &["alice.a"]),
                ("mobile", &["555-0100"]),
                ("email", &["alice@x.example"]),
                ("memberOf", &["cn=ops,dc=x", "cn=dev,dc=x"]),
            ],
        );
        let user = map_to_user(&e);

        assert_eq!(user.name, "alice");
        assert_eq!(user.logon, "alice.a");
        assert_eq!(user.phone, "555-0100");
        assert_eq!(user.mail, "alice@x.example");
        assert_eq!(user.dn, "cn=alice,ou=sales,dc=x");
        assert_eq!(user.member_of, r#"["cn=ops,dc=x","cn=dev,dc=x"]"#);
    }

    #[test]
    fn test_map_to_user_prefers_name_attribute() {
        let e = entry(
            "cn=b,dc=x",
            &[("name", &["Bob B."]), ("displayName", &["ignored"])],
        );
        assert_eq!(map_to_user(&e).name, "Bob B.");
    }

    #[test]
    fn test_map_to_group() {
        let e = entry(
            "cn=ops,dc=x",
            &[
                ("cn", &["ops"]),
                ("description", &["operators"]),
                ("member", &["cn=alice,dc=x"]),
            ],
        );
        let group = map_to_group(&e);
        assert_eq!(group.name, "ops");
        assert_eq!(group.desc, "operators");
        assert_eq!(group.member, "cn=alice,dc=x");
    }

    #[test]
    fn test_map_to_unit() {
        let e = entry("ou=sales,dc=x", &[("ou", &["sales"])]);
        let unit = map_to_unit(&e);
        assert_eq!(unit.name, "sales");
        assert_eq!(unit.dn, "ou=sales,dc=x");
    }

    #[test]
    fn test_normalize_login() {
        assert_eq!(normalize_login(r"CORP\alice"), "alice");
        assert_eq!(normalize_login("alice@corp.example"), "alice");
        assert_eq!(normalize_login(r"CORP\alice@corp.example"), "alice");
        assert_eq!(normalize_login("alice"), "alice");
        assert_eq!(normalize_login("Alice.B"), "Alice.B");
    }

    #[test]
    fn test_normalize_login_idempotent() {
        for input in [r"CORP\alice", "alice@corp", "alice", r"a\b@c"] {
            let once = normalize_login(input);
            assert_eq!(normalize_login(&once), once);
        }
    }
}
