// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

//! Evaluation contexts. The canonical in-memory form is the single-kind
//! context; a multi-kind context is a collection of single-kind parts keyed
//! by kind. The legacy "user" JSON shape (no `kind` property, built-in
//! attributes at the top level) is preserved on the wire in both directions
//! so that older analytics schemas keep working.

use crate::attribute_value::AttributeValue;
use serde::{
    de::{self, Deserializer},
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};
use std::collections::BTreeMap;

pub const USER_KIND: &str = "user";
const MULTI_KIND: &str = "multi";

const BUILT_IN_NAMES: &[&str] = &[
    "name",
    "secondary",
    "email",
    "country",
    "ip",
    "avatar",
    "firstName",
    "lastName",
];

/// A single-kind part of a context: a key plus built-in and custom
/// attributes.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SingleContext {
    key: String,
    kind: String,
    name: Option<String>,
    secondary: Option<String>,
    email: Option<String>,
    country: Option<String>,
    ip: Option<String>,
    avatar: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    anonymous: bool,
    custom: BTreeMap<String, AttributeValue>,
    private_attributes: Vec<String>,
}

impl SingleContext {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn private_attribute_names(&self) -> &[String] {
        &self.private_attributes
    }

    /// Looks up an attribute by name, covering both the built-in attributes
    /// and the custom map. `key`, `kind`, and `anonymous` are addressable so
    /// that clauses can target them.
    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "key" => Some(AttributeValue::from(self.key.as_str())),
            "kind" => Some(AttributeValue::from(self.kind.as_str())),
            "secondary" => self.secondary.as_deref().map(AttributeValue::from),
            "ip" => self.ip.as_deref().map(AttributeValue::from),
            "country" => self.country.as_deref().map(AttributeValue::from),
            "email" => self.email.as_deref().map(AttributeValue::from),
            "firstName" => self.first_name.as_deref().map(AttributeValue::from),
            "lastName" => self.last_name.as_deref().map(AttributeValue::from),
            "avatar" => self.avatar.as_deref().map(AttributeValue::from),
            "name" => self.name.as_deref().map(AttributeValue::from),
            "anonymous" => Some(AttributeValue::Bool(self.anonymous)),
            custom => self.custom.get(custom).cloned(),
        }
    }

    /// All redactable attributes present on this context, as `(name, value)`
    /// pairs. `key`, `kind`, and `anonymous` are never redactable and are not
    /// included.
    pub fn redactable_attributes(&self) -> Vec<(String, AttributeValue)> {
        let mut attributes = Vec::new();
        for name in BUILT_IN_NAMES {
            if let Some(value) = self.attribute(name) {
                attributes.push((name.to_string(), value));
            }
        }
        for (name, value) in &self.custom {
            attributes.push((name.clone(), value.clone()));
        }
        attributes
    }

    pub fn is_custom_attribute(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    fn serialize_fields<S: SerializeMap>(&self, map: &mut S) -> Result<(), S::Error> {
        map.serialize_entry("key", &self.key)?;
        if let Some(v) = &self.secondary {
            map.serialize_entry("secondary", v)?;
        }
        if let Some(v) = &self.ip {
            map.serialize_entry("ip", v)?;
        }
        if let Some(v) = &self.country {
            map.serialize_entry("country", v)?;
        }
        if let Some(v) = &self.email {
            map.serialize_entry("email", v)?;
        }
        if let Some(v) = &self.first_name {
            map.serialize_entry("firstName", v)?;
        }
        if let Some(v) = &self.last_name {
            map.serialize_entry("lastName", v)?;
        }
        if let Some(v) = &self.avatar {
            map.serialize_entry("avatar", v)?;
        }
        if let Some(v) = &self.name {
            map.serialize_entry("name", v)?;
        }
        if self.anonymous {
            map.serialize_entry("anonymous", &self.anonymous)?;
        }
        if !self.custom.is_empty() {
            map.serialize_entry("custom", &self.custom)?;
        }
        if !self.private_attributes.is_empty() {
            map.serialize_entry("privateAttributeNames", &self.private_attributes)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Inner {
    Single(SingleContext),
    // keyed by kind; never contains a "multi" entry and has >= 2 parts
    Multi(BTreeMap<String, SingleContext>),
}

/// An evaluation context: who (or what) a flag is being evaluated for.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    inner: Inner,
}

impl Context {
    /// A plain user context with nothing but a key.
    pub fn new(key: impl Into<String>) -> Self {
        ContextBuilder::new(key).build()
    }

    pub fn builder(key: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(key)
    }

    pub fn multi_builder() -> MultiContextBuilder {
        MultiContextBuilder::default()
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.inner, Inner::Multi(_))
    }

    /// The context key used for analytics de-duplication and big-segment
    /// hashing. Kinds other than `user` are prefixed so that keys cannot
    /// collide across kinds; multi-kind contexts concatenate their parts.
    pub fn canonical_key(&self) -> String {
        fn escape(s: &str) -> String {
            s.replace('%', "%25").replace(':', "%3A")
        }
        match &self.inner {
            Inner::Single(part) if part.kind == USER_KIND => part.key.clone(),
            Inner::Single(part) => format!("{}:{}", part.kind, escape(&part.key)),
            Inner::Multi(parts) => parts
                .iter()
                .map(|(kind, part)| format!("{}:{}", kind, escape(&part.key)))
                .collect::<Vec<_>>()
                .join(":"),
        }
    }

    /// The key of the part with the given kind, defaulting to `user`.
    pub fn key_for_kind(&self, kind: Option<&str>) -> Option<&str> {
        self.part_for_kind(kind).map(|part| part.key.as_str())
    }

    /// Attribute lookup, kind-qualified for multi-kind contexts.
    pub fn attribute_by_kind(&self, kind: Option<&str>, name: &str) -> Option<AttributeValue> {
        self.part_for_kind(kind).and_then(|part| part.attribute(name))
    }

    fn part_for_kind(&self, kind: Option<&str>) -> Option<&SingleContext> {
        let kind = kind.unwrap_or(USER_KIND);
        match &self.inner {
            Inner::Single(part) => {
                if part.kind == kind {
                    Some(part)
                } else {
                    None
                }
            }
            Inner::Multi(parts) => parts.get(kind),
        }
    }

    /// Every single-kind part of this context; one element for single-kind
    /// contexts.
    pub fn parts(&self) -> Vec<&SingleContext> {
        match &self.inner {
            Inner::Single(part) => vec![part],
            Inner::Multi(parts) => parts.values().collect(),
        }
    }

    /// True when no part carries a usable key. Analytics and evaluation both
    /// reject such contexts.
    pub fn is_key_empty(&self) -> bool {
        self.parts().iter().any(|part| part.key.is_empty())
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.inner {
            Inner::Single(part) => {
                let mut map = serializer.serialize_map(None)?;
                // The user kind keeps the legacy wire shape with no "kind"
                // property at all.
                if part.kind != USER_KIND {
                    map.serialize_entry("kind", &part.kind)?;
                }
                part.serialize_fields(&mut map)?;
                map.end()
            }
            Inner::Multi(parts) => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("kind", MULTI_KIND)?;
                for (kind, part) in parts {
                    map.serialize_entry(kind, &SinglePartOnWire(part))?;
                }
                map.end()
            }
        }
    }
}

struct SinglePartOnWire<'a>(&'a SingleContext);

impl<'a> Serialize for SinglePartOnWire<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.0.serialize_fields(&mut map)?;
        map.end()
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartOnWire {
    key: String,
    secondary: Option<String>,
    ip: Option<String>,
    country: Option<String>,
    email: Option<String>,
    #[serde(rename = "firstName")]
    first_name: Option<String>,
    #[serde(rename = "lastName")]
    last_name: Option<String>,
    avatar: Option<String>,
    name: Option<String>,
    anonymous: Option<bool>,
    custom: BTreeMap<String, AttributeValue>,
    #[serde(rename = "privateAttributeNames")]
    private_attribute_names: Vec<String>,
}

impl PartOnWire {
    fn into_single(self, kind: String) -> SingleContext {
        SingleContext {
            key: self.key,
            kind,
            name: self.name,
            secondary: self.secondary,
            email: self.email,
            country: self.country,
            ip: self.ip,
            avatar: self.avatar,
            first_name: self.first_name,
            last_name: self.last_name,
            anonymous: self.anonymous.unwrap_or(false),
            custom: self.custom,
            private_attributes: self.private_attribute_names,
        }
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields =
            BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let kind = fields
            .get("kind")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match kind.as_deref() {
            None => {
                let part: PartOnWire =
                    serde_json::from_value(serde_json::Value::Object(
                        fields.into_iter().collect(),
                    ))
                    .map_err(de::Error::custom)?;
                Ok(Context {
                    inner: Inner::Single(part.into_single(USER_KIND.to_string())),
                })
            }
            Some(MULTI_KIND) => {
                fields.remove("kind");
                let mut parts = BTreeMap::new();
                for (kind, value) in fields {
                    let part: PartOnWire =
                        serde_json::from_value(value).map_err(de::Error::custom)?;
                    parts.insert(kind.clone(), part.into_single(kind));
                }
                if parts.len() < 2 {
                    return Err(de::Error::custom(
                        "multi-kind context requires at least two parts",
                    ));
                }
                Ok(Context {
                    inner: Inner::Multi(parts),
                })
            }
            Some(single) => {
                let single = single.to_string();
                fields.remove("kind");
                let part: PartOnWire =
                    serde_json::from_value(serde_json::Value::Object(
                        fields.into_iter().collect(),
                    ))
                    .map_err(de::Error::custom)?;
                Ok(Context {
                    inner: Inner::Single(part.into_single(single)),
                })
            }
        }
    }
}

/// Builder for single-kind contexts.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    part: SingleContext,
}

impl ContextBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            part: SingleContext {
                key: key.into(),
                kind: USER_KIND.to_string(),
                ..SingleContext::default()
            },
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.part.kind = kind.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.part.name = Some(name.into());
        self
    }

    pub fn secondary(mut self, secondary: impl Into<String>) -> Self {
        self.part.secondary = Some(secondary.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.part.email = Some(email.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.part.country = Some(country.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.part.ip = Some(ip.into());
        self
    }

    pub fn avatar(mut self, avatar: impl Into<String>) -> Self {
        self.part.avatar = Some(avatar.into());
        self
    }

    pub fn first_name(mut self, first_name: impl Into<String>) -> Self {
        self.part.first_name = Some(first_name.into());
        self
    }

    pub fn last_name(mut self, last_name: impl Into<String>) -> Self {
        self.part.last_name = Some(last_name.into());
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.part.anonymous = anonymous;
        self
    }

    pub fn custom(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.part.custom.insert(name.into(), value.into());
        self
    }

    /// Marks an attribute private for this context only; the processor-wide
    /// private list is configured separately.
    pub fn private_attribute(mut self, name: impl Into<String>) -> Self {
        self.part.private_attributes.push(name.into());
        self
    }

    pub fn build(self) -> Context {
        Context {
            inner: Inner::Single(self.part),
        }
    }
}

/// Builder for multi-kind contexts. Each part keeps its own kind; adding two
/// parts of the same kind keeps the last one.
#[derive(Clone, Debug, Default)]
pub struct MultiContextBuilder {
    parts: BTreeMap<String, SingleContext>,
}

impl MultiContextBuilder {
    pub fn add(mut self, context: Context) -> Self {
        for part in context.parts() {
            self.parts.insert(part.kind.clone(), part.clone());
        }
        self
    }

    pub fn build(self) -> Result<Context, String> {
        match self.parts.len() {
            0 => Err("multi-kind context requires at least one part".to_string()),
            1 => Ok(Context {
                inner: Inner::Single(self.parts.into_iter().next().map(|(_, p)| p).unwrap()),
            }),
            _ => Ok(Context {
                inner: Inner::Multi(self.parts),
            }),
        }
    }
}
