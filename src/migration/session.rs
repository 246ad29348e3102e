//! Per-run migration state
//!
//! A [`MigrationSession`] owns the mutable state of exactly one run: the cached
//! destination schema, the source → target identity map and the deferred
//! hierarchy links. It is created by the orchestrator, passed by reference
//! through each phase and dropped when the run ends.

use crate::types::{DataSource, PropertyDefinition};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Locally cached destination schema.
///
/// Grows monotonically over a run. The only entry ever removed is the
/// destination's original title property, when it is renamed to the source
/// title name.
#[derive(Debug, Clone, Default)]
pub struct TargetSchema {
    store_id: String,
    properties: BTreeMap<String, PropertyDefinition>,
}

impl TargetSchema {
    pub fn new(store_id: impl Into<String>, properties: BTreeMap<String, PropertyDefinition>) -> Self {
        Self {
            store_id: store_id.into(),
            properties,
        }
    }

    pub fn from_data_source(data_source: &DataSource) -> Self {
        Self::new(data_source.id.clone(), data_source.properties.clone())
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.get(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Name of the destination's title property.
    pub fn title_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, def)| def.kind == crate::types::PropertyKind::Title)
            .map(|(name, _)| name.as_str())
    }

    /// Apply a schema patch locally. A patch entry carrying a different `name`
    /// renames the keyed property.
    pub fn apply_patch(&mut self, patch: &BTreeMap<String, PropertyDefinition>) {
        for (key, definition) in patch {
            let name = definition.name.clone().unwrap_or_else(|| key.clone());
            let mut stored = definition.clone();
            if name != *key {
                if let Some(previous) = self.properties.remove(key) {
                    stored.id = stored.id.or(previous.id);
                }
            }
            stored.name = Some(name.clone());
            self.properties.insert(name, stored);
        }
    }

    /// Take in the schema the server reported after an update.
    pub fn absorb(&mut self, data_source: &DataSource) {
        for (name, definition) in &data_source.properties {
            self.properties.insert(name.clone(), definition.clone());
        }
    }
}

/// Source record id → created target record id.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    ids: HashMap<String, String>,
}

impl IdentityMap {
    pub fn insert(&mut self, source_id: impl Into<String>, target_id: impl Into<String>) {
        self.ids.insert(source_id.into(), target_id.into());
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.ids.get(source_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Map source ids to target ids, dropping ids that were never migrated.
    pub fn translate<'a>(&self, source_ids: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        source_ids
            .into_iter()
            .filter_map(|id| self.get(id).map(str::to_string))
            .collect()
    }
}

/// Which side of the self-referential hierarchy a relation property is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLink {
    Parent,
    Child,
}

impl fmt::Display for HierarchyLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyLink::Parent => f.write_str("parent"),
            HierarchyLink::Child => f.write_str("child"),
        }
    }
}

/// Source record id → related source record ids, for one hierarchy link.
#[derive(Debug, Clone, Default)]
pub struct RelationLookup {
    entries: BTreeMap<String, Vec<String>>,
}

impl RelationLookup {
    pub fn record(&mut self, source_id: impl Into<String>, related: Vec<String>) {
        self.entries.entry(source_id.into()).or_default().extend(related);
    }

    pub fn get(&self, source_id: &str) -> Option<&[String]> {
        self.entries.get(source_id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Phase of a record's migration in which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Content,
    Create,
    Replay,
    Comments,
    Relation,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::Content => "content",
            FailureStage::Create => "create",
            FailureStage::Replay => "replay",
            FailureStage::Comments => "comments",
            FailureStage::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// A record (or relation entry) that could not be migrated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub source_id: String,
    pub stage: FailureStage,
    pub message: String,
}

/// Mutable state of one migration run.
#[derive(Debug)]
pub struct MigrationSession {
    pub run_id: Uuid,
    pub source_store_id: String,
    pub dry_run: bool,
    pub schema: TargetSchema,
    pub identity: IdentityMap,
    pub parent_links: RelationLookup,
    pub child_links: RelationLookup,
    pub failures: Vec<RecordFailure>,
}

impl MigrationSession {
    pub fn new(
        run_id: Uuid,
        source_store_id: impl Into<String>,
        schema: TargetSchema,
        dry_run: bool,
    ) -> Self {
        Self {
            run_id,
            source_store_id: source_store_id.into(),
            dry_run,
            schema,
            identity: IdentityMap::default(),
            parent_links: RelationLookup::default(),
            child_links: RelationLookup::default(),
            failures: Vec::new(),
        }
    }

    /// Defer a self-referential relation until every record exists.
    pub fn defer(&mut self, link: HierarchyLink, source_id: &str, related: Vec<String>) {
        match link {
            HierarchyLink::Parent => self.parent_links.record(source_id, related),
            HierarchyLink::Child => self.child_links.record(source_id, related),
        }
    }

    pub fn lookup(&self, link: HierarchyLink) -> &RelationLookup {
        match link {
            HierarchyLink::Parent => &self.parent_links,
            HierarchyLink::Child => &self.child_links,
        }
    }

    pub fn target_store_id(&self) -> &str {
        self.schema.store_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyKind;

    fn title_schema() -> TargetSchema {
        let mut properties = BTreeMap::new();
        properties.insert(
            "Name".to_string(),
            PropertyDefinition {
                id: Some("title".to_string()),
                name: Some("Name".to_string()),
                kind: PropertyKind::Title,
                config: serde_json::json!({}),
            },
        );
        TargetSchema::new("target", properties)
    }

    #[test]
    fn test_apply_patch_adds_properties() {
        let mut schema = title_schema();
        let mut patch = BTreeMap::new();
        patch.insert("Tipo".to_string(), PropertyDefinition::empty(PropertyKind::Select));
        schema.apply_patch(&patch);

        assert!(schema.contains("Tipo"));
        assert!(schema.contains("Name"));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_apply_patch_renames_title() {
        let mut schema = title_schema();
        let mut patch = BTreeMap::new();
        patch.insert(
            "Name".to_string(),
            PropertyDefinition::empty(PropertyKind::Title).with_name("Nome"),
        );
        schema.apply_patch(&patch);

        assert!(!schema.contains("Name"));
        assert_eq!(schema.title_property(), Some("Nome"));
        assert_eq!(schema.get("Nome").unwrap().id.as_deref(), Some("title"));
    }

    #[test]
    fn test_identity_translate_drops_unmapped() {
        let mut identity = IdentityMap::default();
        identity.insert("a", "ta");
        identity.insert("b", "tb");

        let related = vec!["b".to_string(), "outside".to_string(), "a".to_string()];
        assert_eq!(identity.translate(&related), vec!["tb", "ta"]);
    }

    #[test]
    fn test_relation_lookup_accumulates() {
        let mut lookup = RelationLookup::default();
        lookup.record("a", vec!["b".into()]);
        lookup.record("a", vec!["c".into()]);

        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.get("a").unwrap(), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_session_defer_routes_by_link() {
        let run_id = Uuid::new_v4();
        let mut session = MigrationSession::new(run_id, "source", title_schema(), false);
        assert_eq!(session.run_id, run_id);
        session.defer(HierarchyLink::Parent, "a", vec!["b".into()]);
        session.defer(HierarchyLink::Child, "b", vec!["a".into()]);

        assert_eq!(session.lookup(HierarchyLink::Parent).len(), 1);
        assert_eq!(session.child_links.get("b").unwrap(), &["a".to_string()]);
        assert_eq!(session.target_store_id(), "target");
    }
}
