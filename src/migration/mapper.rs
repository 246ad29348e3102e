//! Property mapping
//!
//! Translates source property definitions into destination definitions and
//! source property values into values the destination accepts. Both directions
//! are driven by one registry entry per [`PropertyKind`]; adding a kind means
//! adding a [`KindStrategy`] in [`strategy`]. Nothing here performs I/O.

use super::session::{HierarchyLink, TargetSchema};
use crate::config::{HierarchyConfig, MigrationConfig};
use crate::types::{PropertyDefinition, PropertyKind, SourceRecord};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A destination definition and the schema key it must be patched under.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedDefinition {
    pub name: String,
    pub definition: PropertyDefinition,
}

/// Result of mapping one property value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueOutcome {
    /// Write `value` under `name`
    Write { name: String, value: Value },
    /// Self-referential relation, resolved after every record exists
    Defer {
        link: HierarchyLink,
        related: Vec<String>,
    },
    /// Absent or empty value; leave the property out of the write
    Omit,
    /// The value cannot be written (computed kind, unknown self relation, ...)
    Skip(String),
}

/// Property values mapped for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    pub properties: Map<String, Value>,
    pub deferred: Vec<(HierarchyLink, Vec<String>)>,
    pub skipped: Vec<(String, String)>,
}

/// Inputs available to a value strategy.
struct ValueInput<'a> {
    name: &'a str,
    value: &'a Value,
    source_definition: Option<&'a PropertyDefinition>,
    mapper: &'a PropertyMapper,
}

type DefinitionFn = fn(&PropertyDefinition, &str, &TargetSchema) -> MappedDefinition;
type ValueFn = fn(&ValueInput<'_>) -> ValueOutcome;

/// How one property kind maps in both directions.
struct KindStrategy {
    to_definition: DefinitionFn,
    to_value: ValueFn,
}

fn entry(to_definition: DefinitionFn, to_value: ValueFn) -> KindStrategy {
    KindStrategy {
        to_definition,
        to_value,
    }
}

/// Registry of per-kind strategies.
fn strategy(kind: &PropertyKind) -> KindStrategy {
    match kind {
        PropertyKind::Title => entry(title_definition, title_value),
        PropertyKind::RichText => entry(empty_definition, rich_text_value),
        PropertyKind::Number => entry(copied_definition, number_value),
        PropertyKind::Select => entry(options_definition, select_value),
        PropertyKind::MultiSelect => entry(options_definition, multi_select_value),
        PropertyKind::Status => entry(status_definition, unsupported_value),
        PropertyKind::Date => entry(empty_definition, date_value),
        PropertyKind::People => entry(empty_definition, people_value),
        PropertyKind::Files => entry(empty_definition, files_value),
        PropertyKind::Checkbox => entry(empty_definition, checkbox_value),
        PropertyKind::Url => entry(empty_definition, url_value),
        PropertyKind::Email => entry(empty_definition, email_value),
        PropertyKind::PhoneNumber => entry(empty_definition, phone_value),
        PropertyKind::Relation => entry(copied_definition, relation_value),
        PropertyKind::UniqueId => entry(unique_id_definition, unique_id_value),
        PropertyKind::Formula | PropertyKind::Rollup => entry(copied_definition, unsupported_value),
        PropertyKind::CreatedTime
        | PropertyKind::CreatedBy
        | PropertyKind::LastEditedTime
        | PropertyKind::LastEditedBy => entry(empty_definition, unsupported_value),
        PropertyKind::Other(_) => entry(copied_definition, unsupported_value),
    }
}

/// Maps property definitions and values between source and destination.
#[derive(Debug, Clone)]
pub struct PropertyMapper {
    source_store_id: String,
    legacy_id_property: String,
    hierarchy: HierarchyConfig,
}

impl PropertyMapper {
    pub fn new(
        source_store_id: impl Into<String>,
        legacy_id_property: impl Into<String>,
        hierarchy: HierarchyConfig,
    ) -> Self {
        Self {
            source_store_id: source_store_id.into(),
            legacy_id_property: legacy_id_property.into(),
            hierarchy,
        }
    }

    pub fn from_config(source_store_id: impl Into<String>, config: &MigrationConfig) -> Self {
        Self::new(
            source_store_id,
            config.legacy_id_property.clone(),
            config.hierarchy.clone(),
        )
    }

    pub fn legacy_id_property(&self) -> &str {
        &self.legacy_id_property
    }

    /// Destination definition for a source property, with the key to patch it under.
    pub fn map_definition(
        &self,
        source: &PropertyDefinition,
        name: &str,
        target: &TargetSchema,
    ) -> MappedDefinition {
        (strategy(&source.kind).to_definition)(source, name, target)
    }

    /// Definition for the numeric property that keeps the source unique id.
    pub fn legacy_id_definition(&self) -> MappedDefinition {
        MappedDefinition {
            name: self.legacy_id_property.clone(),
            definition: PropertyDefinition::empty(PropertyKind::Number),
        }
    }

    /// Map one property of `record`.
    ///
    /// Dispatches on the destination kind: the existing destination definition
    /// when there is one, otherwise the kind the source definition maps to.
    pub fn map_value(
        &self,
        target: &TargetSchema,
        source_definitions: &BTreeMap<String, PropertyDefinition>,
        record: &SourceRecord,
        name: &str,
    ) -> ValueOutcome {
        let Some(value) = record.properties.get(name) else {
            return ValueOutcome::Omit;
        };
        let source_definition = source_definitions.get(name);

        let kind = match (target.get(name), source_definition) {
            (Some(existing), _) => existing.kind.clone(),
            (None, Some(source)) => self.map_definition(source, name, target).definition.kind,
            (None, None) => match record.property_kind(name) {
                Some(kind) => kind,
                None => return ValueOutcome::Omit,
            },
        };

        let input = ValueInput {
            name,
            value,
            source_definition,
            mapper: self,
        };
        (strategy(&kind).to_value)(&input)
    }

    /// Map every property of `record`.
    pub fn map_record(
        &self,
        target: &TargetSchema,
        source_definitions: &BTreeMap<String, PropertyDefinition>,
        record: &SourceRecord,
    ) -> MappedRecord {
        let mut mapped = MappedRecord::default();

        for name in record.properties.keys() {
            match self.map_value(target, source_definitions, record, name) {
                ValueOutcome::Write { name, value } => {
                    mapped.properties.insert(name, value);
                }
                ValueOutcome::Defer { link, related } => mapped.deferred.push((link, related)),
                ValueOutcome::Omit => {}
                ValueOutcome::Skip(reason) => mapped.skipped.push((name.clone(), reason)),
            }
        }

        mapped
    }

    /// Hierarchy side of a self-referential relation property, if it is one.
    fn hierarchy_link(&self, name: &str, definition: Option<&PropertyDefinition>) -> Option<HierarchyLink> {
        let definition = definition?;
        if !definition.is_self_relation(&self.source_store_id) {
            return None;
        }
        if name == self.hierarchy.parent_property {
            Some(HierarchyLink::Parent)
        } else if name == self.hierarchy.child_property {
            Some(HierarchyLink::Child)
        } else {
            None
        }
    }
}

fn self_relation<'a>(
    definitions: &'a BTreeMap<String, PropertyDefinition>,
    name: &str,
    source_store_id: &str,
) -> Option<&'a PropertyDefinition> {
    definitions
        .get(name)
        .filter(|definition| definition.is_self_relation(source_store_id))
}

/// Hierarchy pair to defer and resolve for a source schema.
///
/// The configured names are kept when the configured parent is a self relation
/// of the source; its dual partner, when declared, names the child side.
/// Otherwise the first dual self relation pair the schema declares is used, so
/// localized hierarchy names need no configuration. Falls back to `configured`.
pub fn detect_hierarchy(
    configured: &HierarchyConfig,
    source_store_id: &str,
    definitions: &BTreeMap<String, PropertyDefinition>,
) -> HierarchyConfig {
    if let Some(parent) = self_relation(definitions, &configured.parent_property, source_store_id) {
        let child_property = parent
            .synced_property()
            .filter(|synced| *synced != configured.parent_property)
            .map(str::to_string)
            .unwrap_or_else(|| configured.child_property.clone());
        return HierarchyConfig {
            parent_property: configured.parent_property.clone(),
            child_property,
        };
    }

    definitions
        .iter()
        .filter(|(_, definition)| definition.is_self_relation(source_store_id))
        .find_map(|(name, definition)| {
            let synced = definition.synced_property()?;
            if synced == name.as_str() || self_relation(definitions, synced, source_store_id).is_none() {
                return None;
            }
            Some(HierarchyConfig {
                parent_property: name.clone(),
                child_property: synced.to_string(),
            })
        })
        .unwrap_or_else(|| configured.clone())
}

// ---------- definition strategies ----------

fn empty_definition(source: &PropertyDefinition, name: &str, _: &TargetSchema) -> MappedDefinition {
    MappedDefinition {
        name: name.to_string(),
        definition: PropertyDefinition::empty(source.kind.clone()),
    }
}

/// Copy the kind configuration verbatim, minus the server-assigned id.
fn copied_definition(source: &PropertyDefinition, name: &str, _: &TargetSchema) -> MappedDefinition {
    let config = if source.config.is_null() {
        json!({})
    } else {
        source.config.clone()
    };
    MappedDefinition {
        name: name.to_string(),
        definition: PropertyDefinition::new(source.kind.clone(), config),
    }
}

fn options_definition(source: &PropertyDefinition, name: &str, _: &TargetSchema) -> MappedDefinition {
    MappedDefinition {
        name: name.to_string(),
        definition: PropertyDefinition::new(
            source.kind.clone(),
            json!({ "options": source.options() }),
        ),
    }
}

/// The destination already has a title property; rename it instead of adding one.
fn title_definition(_: &PropertyDefinition, name: &str, target: &TargetSchema) -> MappedDefinition {
    let existing = target.title_property().unwrap_or(name).to_string();
    MappedDefinition {
        name: existing,
        definition: PropertyDefinition::empty(PropertyKind::Title).with_name(name),
    }
}

/// Status cannot be created through the API; downgrade it to a select.
fn status_definition(source: &PropertyDefinition, name: &str, _: &TargetSchema) -> MappedDefinition {
    let options: Vec<Value> = source.options().iter().map(option_reference).collect();
    MappedDefinition {
        name: name.to_string(),
        definition: PropertyDefinition::new(PropertyKind::Select, json!({ "options": options }))
            .with_name(name),
    }
}

fn unique_id_definition(source: &PropertyDefinition, name: &str, _: &TargetSchema) -> MappedDefinition {
    let prefix = source.config.get("prefix").cloned().unwrap_or(Value::Null);
    MappedDefinition {
        name: name.to_string(),
        definition: PropertyDefinition::new(PropertyKind::UniqueId, json!({ "prefix": prefix })),
    }
}

// ---------- value strategies ----------

fn write(name: &str, key: &str, value: Value) -> ValueOutcome {
    let mut body = Map::new();
    body.insert(key.to_string(), value);
    ValueOutcome::Write {
        name: name.to_string(),
        value: Value::Object(body),
    }
}

fn non_empty_array<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value.get(key).and_then(Value::as_array).filter(|items| !items.is_empty())
}

fn non_null<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

/// Keep the identifying fields of a select/status option.
fn option_reference(option: &Value) -> Value {
    let mut reference = Map::new();
    for key in ["id", "name", "color"] {
        if let Some(field) = non_null(option, key) {
            reference.insert(key.to_string(), field.clone());
        }
    }
    Value::Object(reference)
}

fn title_value(input: &ValueInput<'_>) -> ValueOutcome {
    match non_empty_array(input.value, "title") {
        Some(fragments) => write(input.name, "title", Value::Array(fragments.clone())),
        None => ValueOutcome::Omit,
    }
}

fn rich_text_value(input: &ValueInput<'_>) -> ValueOutcome {
    match non_empty_array(input.value, "rich_text") {
        Some(fragments) => write(input.name, "rich_text", Value::Array(fragments.clone())),
        None => ValueOutcome::Omit,
    }
}

fn number_value(input: &ValueInput<'_>) -> ValueOutcome {
    match non_null(input.value, "number") {
        Some(number) => write(input.name, "number", number.clone()),
        None => ValueOutcome::Omit,
    }
}

/// Select values are matched by option name. A status value keeps the id,
/// name and color its downgraded option was created with.
fn select_value(input: &ValueInput<'_>) -> ValueOutcome {
    if let Some(option) = non_null(input.value, "status") {
        return write(input.name, "select", option_reference(option));
    }
    match non_null(input.value, "select").and_then(|option| non_null(option, "name")) {
        Some(name) => write(input.name, "select", json!({ "name": name })),
        None => ValueOutcome::Omit,
    }
}

fn multi_select_value(input: &ValueInput<'_>) -> ValueOutcome {
    let Some(options) = non_empty_array(input.value, "multi_select") else {
        return ValueOutcome::Omit;
    };
    let stripped = options
        .iter()
        .map(|option| {
            let mut option = option.clone();
            if let Some(fields) = option.as_object_mut() {
                fields.remove("id");
            }
            option
        })
        .collect();
    write(input.name, "multi_select", Value::Array(stripped))
}

fn date_value(input: &ValueInput<'_>) -> ValueOutcome {
    match non_null(input.value, "date") {
        Some(date) => write(input.name, "date", date.clone()),
        None => ValueOutcome::Omit,
    }
}

fn checkbox_value(input: &ValueInput<'_>) -> ValueOutcome {
    let checked = input
        .value
        .get("checkbox")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    write(input.name, "checkbox", Value::Bool(checked))
}

fn string_value(input: &ValueInput<'_>, key: &str) -> ValueOutcome {
    match input.value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
        Some(text) => write(input.name, key, Value::String(text.to_string())),
        None => ValueOutcome::Omit,
    }
}

fn url_value(input: &ValueInput<'_>) -> ValueOutcome {
    string_value(input, "url")
}

fn email_value(input: &ValueInput<'_>) -> ValueOutcome {
    string_value(input, "email")
}

fn phone_value(input: &ValueInput<'_>) -> ValueOutcome {
    string_value(input, "phone_number")
}

fn people_value(input: &ValueInput<'_>) -> ValueOutcome {
    let Some(people) = non_empty_array(input.value, "people") else {
        return ValueOutcome::Omit;
    };
    let ids = people
        .iter()
        .filter_map(|person| person.get("id").cloned())
        .map(|id| json!({ "id": id }))
        .collect();
    write(input.name, "people", Value::Array(ids))
}

/// Hosted files carry expiring URLs and cannot be re-linked; keep external ones.
fn files_value(input: &ValueInput<'_>) -> ValueOutcome {
    let Some(files) = non_empty_array(input.value, "files") else {
        return ValueOutcome::Omit;
    };
    let external: Vec<Value> = files
        .iter()
        .filter(|file| file.get("type").and_then(Value::as_str) == Some("external"))
        .map(|file| {
            json!({
                "name": file.get("name").cloned().unwrap_or(Value::Null),
                "type": "external",
                "external": file.get("external").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    if external.is_empty() {
        ValueOutcome::Skip("only hosted files, which cannot be re-linked".to_string())
    } else {
        write(input.name, "files", Value::Array(external))
    }
}

fn relation_value(input: &ValueInput<'_>) -> ValueOutcome {
    let Some(relations) = non_empty_array(input.value, "relation") else {
        return ValueOutcome::Omit;
    };
    let ids: Vec<String> = relations
        .iter()
        .filter_map(|relation| relation.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    if let Some(link) = input.mapper.hierarchy_link(input.name, input.source_definition) {
        return ValueOutcome::Defer { link, related: ids };
    }
    if input
        .source_definition
        .map(|def| def.is_self_relation(&input.mapper.source_store_id))
        .unwrap_or(false)
    {
        return ValueOutcome::Skip("self relation outside the hierarchy pair".to_string());
    }

    let references = ids.into_iter().map(|id| json!({ "id": id })).collect();
    write(input.name, "relation", Value::Array(references))
}

/// Unique ids are read-only; the ordinal goes to the legacy id property.
fn unique_id_value(input: &ValueInput<'_>) -> ValueOutcome {
    match input.value.pointer("/unique_id/number").filter(|n| !n.is_null()) {
        Some(number) => write(input.mapper.legacy_id_property(), "number", number.clone()),
        None => ValueOutcome::Omit,
    }
}

fn unsupported_value(input: &ValueInput<'_>) -> ValueOutcome {
    let kind = input
        .value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    ValueOutcome::Skip(format!("unsupported property type '{kind}'"))
}
