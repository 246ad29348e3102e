//! Core data types shared by the client and the migration engine.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Type tag of a data source property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Title,
    RichText,
    Number,
    Select,
    MultiSelect,
    Date,
    People,
    Files,
    Checkbox,
    Url,
    Email,
    PhoneNumber,
    Formula,
    Relation,
    Rollup,
    CreatedTime,
    CreatedBy,
    LastEditedTime,
    LastEditedBy,
    Status,
    UniqueId,
    /// A kind this tool has no dedicated handling for; copied through verbatim.
    Other(String),
}

impl PropertyKind {
    pub fn as_str(&self) -> &str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Number => "number",
            PropertyKind::Select => "select",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::Date => "date",
            PropertyKind::People => "people",
            PropertyKind::Files => "files",
            PropertyKind::Checkbox => "checkbox",
            PropertyKind::Url => "url",
            PropertyKind::Email => "email",
            PropertyKind::PhoneNumber => "phone_number",
            PropertyKind::Formula => "formula",
            PropertyKind::Relation => "relation",
            PropertyKind::Rollup => "rollup",
            PropertyKind::CreatedTime => "created_time",
            PropertyKind::CreatedBy => "created_by",
            PropertyKind::LastEditedTime => "last_edited_time",
            PropertyKind::LastEditedBy => "last_edited_by",
            PropertyKind::Status => "status",
            PropertyKind::UniqueId => "unique_id",
            PropertyKind::Other(s) => s,
        }
    }
}

impl From<&str> for PropertyKind {
    fn from(s: &str) -> Self {
        match s {
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "number" => PropertyKind::Number,
            "select" => PropertyKind::Select,
            "multi_select" => PropertyKind::MultiSelect,
            "date" => PropertyKind::Date,
            "people" => PropertyKind::People,
            "files" => PropertyKind::Files,
            "checkbox" => PropertyKind::Checkbox,
            "url" => PropertyKind::Url,
            "email" => PropertyKind::Email,
            "phone_number" => PropertyKind::PhoneNumber,
            "formula" => PropertyKind::Formula,
            "relation" => PropertyKind::Relation,
            "rollup" => PropertyKind::Rollup,
            "created_time" => PropertyKind::CreatedTime,
            "created_by" => PropertyKind::CreatedBy,
            "last_edited_time" => PropertyKind::LastEditedTime,
            "last_edited_by" => PropertyKind::LastEditedBy,
            "status" => PropertyKind::Status,
            "unique_id" => PropertyKind::UniqueId,
            other => PropertyKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema entry for one property: `{"id", "name", "type": kind, <kind>: config}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct PropertyDefinition {
    /// Server-assigned id; never sent back when creating properties
    pub id: Option<String>,
    /// Explicit name; set when renaming an existing property
    pub name: Option<String>,
    pub kind: PropertyKind,
    /// Kind-specific configuration object
    pub config: Value,
}

impl PropertyDefinition {
    pub fn new(kind: PropertyKind, config: Value) -> Self {
        Self {
            id: None,
            name: None,
            kind,
            config,
        }
    }

    /// Definition with an empty configuration object.
    pub fn empty(kind: PropertyKind) -> Self {
        Self::new(kind, json!({}))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Data source (or legacy database) a relation property points at.
    pub fn relation_target(&self) -> Option<&str> {
        if self.kind != PropertyKind::Relation {
            return None;
        }
        self.config
            .get("data_source_id")
            .or_else(|| self.config.get("database_id"))
            .and_then(Value::as_str)
    }

    /// Whether this is a relation linking records of `store_id` to each other.
    pub fn is_self_relation(&self, store_id: &str) -> bool {
        self.relation_target()
            .map(|target| same_id(target, store_id))
            .unwrap_or(false)
    }

    /// Partner property of a dual relation.
    pub fn synced_property(&self) -> Option<&str> {
        if self.kind != PropertyKind::Relation {
            return None;
        }
        self.config
            .pointer("/dual_property/synced_property_name")
            .and_then(Value::as_str)
    }

    /// Option list of select-like kinds.
    pub fn options(&self) -> &[Value] {
        self.config
            .get("options")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl TryFrom<Value> for PropertyDefinition {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err("property definition must be an object".to_string());
        };
        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .map(PropertyKind::from)
            .ok_or_else(|| "property definition is missing 'type'".to_string())?;
        let config = map.remove(kind.as_str()).unwrap_or_else(|| json!({}));
        let id = map.get("id").and_then(Value::as_str).map(str::to_string);
        let name = map.get("name").and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            id,
            name,
            kind,
            config,
        })
    }
}

impl From<PropertyDefinition> for Value {
    fn from(def: PropertyDefinition) -> Self {
        let mut map = Map::new();
        if let Some(id) = def.id {
            map.insert("id".to_string(), Value::String(id));
        }
        if let Some(name) = def.name {
            map.insert("name".to_string(), Value::String(name));
        }
        map.insert("type".to_string(), Value::String(def.kind.as_str().to_string()));
        map.insert(def.kind.as_str().to_string(), def.config);
        Value::Object(map)
    }
}

/// A data source (schema-bound record collection) as returned by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
}

impl DataSource {
    /// Plain-text title, joined from its rich text fragments.
    pub fn title_text(&self) -> String {
        plain_text(&self.title)
    }

    /// Name of the property holding each record's title.
    pub fn title_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, def)| def.kind == PropertyKind::Title)
            .map(|(name, _)| name.as_str())
    }
}

/// A record (page) fetched from the source data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub icon: Option<Value>,
    #[serde(default)]
    pub cover: Option<Value>,
}

impl SourceRecord {
    /// Kind tag carried by a property value.
    pub fn property_kind(&self, name: &str) -> Option<PropertyKind> {
        self.properties
            .get(name)
            .and_then(|value| value.get("type"))
            .and_then(Value::as_str)
            .map(PropertyKind::from)
    }

    /// Plain-text rendering of the record's title property.
    pub fn title_text(&self) -> String {
        self.properties
            .values()
            .find(|value| value.get("type").and_then(Value::as_str) == Some("title"))
            .and_then(|value| value.get("title"))
            .and_then(Value::as_array)
            .map(|fragments| plain_text(fragments))
            .unwrap_or_default()
    }
}

/// Concatenate the `plain_text` of rich text fragments.
pub fn plain_text(fragments: &[Value]) -> String {
    fragments
        .iter()
        .filter_map(|fragment| fragment.get("plain_text").and_then(Value::as_str))
        .collect()
}

/// Compare ids ignoring the dashes the API sometimes omits.
pub fn same_id(a: &str, b: &str) -> bool {
    let strip = |s: &str| s.chars().filter(|c| *c != '-').collect::<String>();
    strip(a).eq_ignore_ascii_case(&strip(b))
}
