//! Destination schema creation and lazy evolution.
//!
//! The destination store starts with a title property only. Every other
//! property is added the first time a record carries a value for it.

use super::mapper::PropertyMapper;
use super::session::{MigrationSession, TargetSchema};
use crate::client::{CreateDatabase, RecordStore};
use crate::error::{MigrateError, Result};
use crate::events::{EventSink, MigrationEvent};
use crate::types::{DataSource, PropertyDefinition, PropertyKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Id given to the destination store when nothing is created.
pub const SIMULATED_STORE_ID: &str = "simulated-data-source";

/// Title property name used when the source reports none.
const DEFAULT_TITLE_PROPERTY: &str = "Name";

fn log_diagnosable(err: &MigrateError, action: &str) {
    if let Some(hint) = err.hint() {
        error!(error = %err, hint, "{} failed", action);
    }
}

/// Creates the destination store.
pub struct SchemaCloner<'a> {
    store: &'a dyn RecordStore,
    sink: &'a dyn EventSink,
}

impl<'a> SchemaCloner<'a> {
    pub fn new(store: &'a dyn RecordStore, sink: &'a dyn EventSink) -> Self {
        Self { store, sink }
    }

    /// Create a store titled `title` under `parent_page_id`, seeded with a title
    /// property only. The title property takes the source title property's name,
    /// so no source property can collide with a placeholder title. With
    /// `simulate` nothing is created and the returned schema carries
    /// [`SIMULATED_STORE_ID`].
    pub async fn create(
        &self,
        source: &DataSource,
        parent_page_id: &str,
        title: &str,
        simulate: bool,
    ) -> Result<TargetSchema> {
        let title = if title.trim().is_empty() {
            source.title_text()
        } else {
            title.to_string()
        };
        let title_property = source
            .title_property()
            .unwrap_or(DEFAULT_TITLE_PROPERTY)
            .to_string();
        let request = CreateDatabase {
            parent_page_id: parent_page_id.to_string(),
            title: title.clone(),
            title_property: title_property.clone(),
        };

        let schema = if simulate {
            debug!(payload = %request.payload(), "[dry-run] store creation skipped");
            let mut properties = BTreeMap::new();
            properties.insert(
                title_property.clone(),
                PropertyDefinition::empty(PropertyKind::Title).with_name(title_property.as_str()),
            );
            TargetSchema::new(SIMULATED_STORE_ID, properties)
        } else {
            let created = self.store.create_database(&request).await.map_err(|err| {
                log_diagnosable(&err, "creating the destination store");
                err
            })?;
            TargetSchema::from_data_source(&created)
        };

        self.sink.emit(MigrationEvent::StoreCreated {
            target_store_id: schema.store_id().to_string(),
            title,
            simulated: simulate,
        });
        Ok(schema)
    }
}

/// Adds properties to the destination schema the first time they are needed.
pub struct SchemaEvolver<'a> {
    store: &'a dyn RecordStore,
    mapper: &'a PropertyMapper,
    sink: &'a dyn EventSink,
}

impl<'a> SchemaEvolver<'a> {
    pub fn new(store: &'a dyn RecordStore, mapper: &'a PropertyMapper, sink: &'a dyn EventSink) -> Self {
        Self { store, mapper, sink }
    }

    /// Make sure every property in `mapped` exists in the destination schema.
    ///
    /// Missing properties are derived from `source_definitions` and added with a
    /// single patch; the session's cached schema is updated so later records
    /// never patch the same name again. A value whose definition cannot be
    /// derived is removed from `mapped`. Returns the names that were added.
    pub async fn ensure(
        &self,
        session: &mut MigrationSession,
        mapped: &mut Map<String, Value>,
        source_definitions: &BTreeMap<String, PropertyDefinition>,
    ) -> Result<Vec<String>> {
        let missing: Vec<String> = mapped
            .keys()
            .filter(|name| !session.schema.contains(name))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let mut patch = BTreeMap::new();
        let mut added = Vec::new();
        for name in missing {
            let derived = match source_definitions.get(&name) {
                Some(source) => self.mapper.map_definition(source, &name, &session.schema),
                None if name == self.mapper.legacy_id_property() => self.mapper.legacy_id_definition(),
                None => {
                    warn!(property = %name, "no definition available, value dropped");
                    mapped.remove(&name);
                    continue;
                }
            };
            patch.insert(derived.name, derived.definition);
            added.push(name);
        }
        if patch.is_empty() {
            return Ok(added);
        }

        if session.dry_run {
            debug!(properties = ?added, "[dry-run] schema patch skipped");
            session.schema.apply_patch(&patch);
        } else {
            let updated = self
                .store
                .update_data_source(session.target_store_id(), &patch)
                .await
                .map_err(|err| {
                    log_diagnosable(&err, "updating the destination schema");
                    err
                })?;
            session.schema.apply_patch(&patch);
            session.schema.absorb(&updated);
        }

        self.sink.emit(MigrationEvent::SchemaEvolved {
            properties: added.clone(),
        });
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockStore, StoreCall};
    use crate::config::HierarchyConfig;
    use crate::events::RecordingSink;
    use uuid::Uuid;
    use serde_json::json;

    fn source() -> DataSource {
        serde_json::from_value(json!({
            "id": "src",
            "title": [{ "plain_text": "Tasks" }],
            "properties": {
                "Nome": { "id": "title", "type": "title", "title": {} },
                "Tipo": { "id": "t", "type": "select", "select": { "options": [{ "id": "1", "name": "Bug", "color": "red" }] } },
                "ID": { "id": "u", "type": "unique_id", "unique_id": { "prefix": null } }
            }
        }))
        .unwrap()
    }

    fn mapped_values() -> Map<String, Value> {
        let mut mapped = Map::new();
        mapped.insert("Nome".into(), json!({ "title": [{ "text": { "content": "Task A" } }] }));
        mapped.insert("Tipo".into(), json!({ "select": { "name": "Bug" } }));
        mapped.insert("IdLegado".into(), json!({ "number": 42 }));
        mapped
    }

    fn mapper() -> PropertyMapper {
        PropertyMapper::new("src", "IdLegado", HierarchyConfig::default())
    }

    #[tokio::test]
    async fn test_simulated_clone_makes_no_calls() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let schema = SchemaCloner::new(&store, &sink)
            .create(&source(), "parent", "Copy", true)
            .await
            .unwrap();

        assert_eq!(schema.store_id(), SIMULATED_STORE_ID);
        assert_eq!(schema.title_property(), Some("Nome"));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clone_creates_title_only_store() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let schema = SchemaCloner::new(&store, &sink)
            .create(&source(), "parent", "", false)
            .await
            .unwrap();

        assert_eq!(schema.len(), 1);
        assert_eq!(
            store.calls()[0],
            StoreCall::CreateDatabase {
                parent_page_id: "parent".into(),
                title: "Tasks".into(),
                title_property: "Nome".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_evolve_patches_missing_once() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let schema = SchemaCloner::new(&store, &sink)
            .create(&source(), "parent", "Copy", false)
            .await
            .unwrap();
        let mut session = MigrationSession::new(Uuid::new_v4(), "src", schema, false);
        let mapper = mapper();
        let evolver = SchemaEvolver::new(&store, &mapper, &sink);
        let definitions = source().properties;

        let mut first = mapped_values();
        let added = evolver.ensure(&mut session, &mut first, &definitions).await.unwrap();
        let mut second = mapped_values();
        let again = evolver.ensure(&mut session, &mut second, &definitions).await.unwrap();

        // the title property was created under the source name already
        assert_eq!(added.len(), 2);
        assert!(added.contains(&"Tipo".to_string()));
        assert!(added.contains(&"IdLegado".to_string()));
        assert!(again.is_empty());
        assert!(session.schema.contains("Nome"));
        assert!(!session.schema.contains("Name"));
        assert_eq!(session.schema.get("IdLegado").unwrap().kind, PropertyKind::Number);

        let updates = store
            .calls()
            .into_iter()
            .filter(|call| matches!(call, StoreCall::UpdateDataSource { .. }))
            .count();
        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn test_evolve_drops_underivable_values() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let schema = SchemaCloner::new(&store, &sink)
            .create(&source(), "parent", "Copy", true)
            .await
            .unwrap();
        let mut session = MigrationSession::new(Uuid::new_v4(), "src", schema, true);
        let mapper = mapper();

        let mut mapped = Map::new();
        mapped.insert("Ghost".into(), json!({ "number": 1 }));
        let added = SchemaEvolver::new(&store, &mapper, &sink)
            .ensure(&mut session, &mut mapped, &BTreeMap::new())
            .await
            .unwrap();

        assert!(added.is_empty());
        assert!(mapped.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_evolves_cache_only() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let schema = SchemaCloner::new(&store, &sink)
            .create(&source(), "parent", "Copy", true)
            .await
            .unwrap();
        let mut session = MigrationSession::new(Uuid::new_v4(), "src", schema, true);
        let mapper = mapper();

        let mut mapped = mapped_values();
        SchemaEvolver::new(&store, &mapper, &sink)
            .ensure(&mut session, &mut mapped, &source().properties)
            .await
            .unwrap();

        assert!(session.schema.contains("Tipo"));
        assert!(store.calls().is_empty());
        assert!(sink
            .events()
            .iter()
            .any(|event| matches!(event, MigrationEvent::SchemaEvolved { .. })));
    }

    #[tokio::test]
    async fn test_evolve_missing_store_is_fatal() {
        let store = MockStore::new();
        let sink = RecordingSink::new();
        let mapper = mapper();
        let mut session = MigrationSession::new(Uuid::new_v4(), "src", TargetSchema::new("gone", BTreeMap::new()), false);

        let mut mapped = mapped_values();
        let result = SchemaEvolver::new(&store, &mapper, &sink)
            .ensure(&mut session, &mut mapped, &source().properties)
            .await;

        assert!(matches!(result, Err(MigrateError::NotFound { .. })));
    }
}
