//! The user (evaluation context) model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A user being evaluated against flags.
///
/// `key` is the only required field. Built-in attributes are plain
/// `Option<String>` fields; anything else goes in `custom`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub key: String,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(rename = "firstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
    /// Attribute names to redact from outgoing events. Does not affect
    /// evaluation, only event serialization.
    #[serde(rename = "privateAttributeNames", default)]
    pub private_attribute_names: HashSet<String>,
}

impl User {
    /// Create a user from just a key, matching the minimal case most
    /// callers hit.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn builder(key: impl Into<String>) -> UserBuilder {
        UserBuilder(Self::new(key))
    }

    /// Resolve a user attribute by name for clause matching and
    /// bucketing. Built-in attributes take priority over `custom`;
    /// an unknown name falls back to `custom`, then `Value::Null`.
    pub fn attribute(&self, name: &str) -> Value {
        match name {
            "key" => Value::String(self.key.clone()),
            "secondary" => self.secondary.clone().map(Value::String).unwrap_or(Value::Null),
            "ip" => self.ip.clone().map(Value::String).unwrap_or(Value::Null),
            "email" => self.email.clone().map(Value::String).unwrap_or(Value::Null),
            "name" => self.name.clone().map(Value::String).unwrap_or(Value::Null),
            "avatar" => self.avatar.clone().map(Value::String).unwrap_or(Value::Null),
            "firstName" => self
                .first_name
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "lastName" => self
                .last_name
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "country" => self.country.clone().map(Value::String).unwrap_or(Value::Null),
            "anonymous" => Value::Bool(self.anonymous),
            _ => self.custom.get(name).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Fluent construction of a [`User`], mirroring the style of the
/// flag/segment builders used in tests.
pub struct UserBuilder(User);

#[allow(dead_code)]
impl UserBuilder {
    pub fn secondary(mut self, v: impl Into<String>) -> Self {
        self.0.secondary = Some(v.into());
        self
    }

    pub fn ip(mut self, v: impl Into<String>) -> Self {
        self.0.ip = Some(v.into());
        self
    }

    pub fn email(mut self, v: impl Into<String>) -> Self {
        self.0.email = Some(v.into());
        self
    }

    pub fn name(mut self, v: impl Into<String>) -> Self {
        self.0.name = Some(v.into());
        self
    }

    pub fn anonymous(mut self, v: bool) -> Self {
        self.0.anonymous = v;
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.custom.insert(key.into(), value.into());
        self
    }

    pub fn private_attribute(mut self, name: impl Into<String>) -> Self {
        self.0.private_attribute_names.insert(name.into());
        self
    }

    pub fn build(self) -> User {
        self.0
    }
}
