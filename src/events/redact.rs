//! Private-attribute redaction applied when serializing a [`User`]
//! into an outgoing event.

use crate::user::User;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RedactedUser {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "firstName", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,
    #[serde(rename = "privateAttrs", skip_serializing_if = "Vec::is_empty")]
    pub private_attrs: Vec<String>,
}

/// Redact `user` for outgoing events: any attribute named in the
/// union of `global_private` and the user's own
/// `private_attribute_names` is omitted (individually for `custom`
/// entries), and the sorted union of omitted names is reported back
/// as `private_attrs` so the backend can show what was hidden.
pub fn redact(user: &User, all_attributes_private: bool, global_private: &[String]) -> RedactedUser {
    let mut private: BTreeSet<&str> = global_private.iter().map(String::as_str).collect();
    for name in &user.private_attribute_names {
        private.insert(name.as_str());
    }

    let mut omitted: BTreeSet<String> = BTreeSet::new();
    let mut keep = |attr_name: &'static str, value: &Option<String>| -> Option<String> {
        match value {
            None => None,
            Some(v) => {
                if all_attributes_private || private.contains(attr_name) {
                    omitted.insert(attr_name.to_string());
                    None
                } else {
                    Some(v.clone())
                }
            }
        }
    };

    let secondary = keep("secondary", &user.secondary);
    let ip = keep("ip", &user.ip);
    let email = keep("email", &user.email);
    let name = keep("name", &user.name);
    let avatar = keep("avatar", &user.avatar);
    let first_name = keep("firstName", &user.first_name);
    let last_name = keep("lastName", &user.last_name);
    let country = keep("country", &user.country);

    let mut custom = HashMap::new();
    for (k, v) in &user.custom {
        if all_attributes_private || private.contains(k.as_str()) {
            omitted.insert(k.clone());
        } else {
            custom.insert(k.clone(), v.clone());
        }
    }

    RedactedUser {
        key: user.key.clone(),
        secondary,
        ip,
        email,
        name,
        avatar,
        first_name,
        last_name,
        country,
        anonymous: user.anonymous,
        custom,
        private_attrs: omitted.into_iter().collect(),
    }
}
