//! Deferred hierarchy relations
//!
//! Parent/child links between migrated records can only be written once every
//! record in scope exists on the destination. The resolver runs after the last
//! batch, declares the hierarchy pair on the destination schema and rewrites
//! each deferred link through the identity map.

use super::session::{FailureStage, HierarchyLink, MigrationSession, RecordFailure};
use crate::client::RecordStore;
use crate::config::{FailurePolicy, HierarchyConfig, MigrationConfig};
use crate::error::{MigrateError, Result};
use crate::events::{EventSink, MigrationEvent};
use crate::types::{PropertyDefinition, PropertyKind};
use futures::stream::{self, TryStreamExt};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// One relation write against a created record.
#[derive(Debug, Clone)]
struct RelationUpdate {
    source_id: String,
    target_id: String,
    related: usize,
    properties: Map<String, Value>,
}

/// Writes deferred hierarchy links once every record exists.
pub struct RelationResolver<'a> {
    store: &'a dyn RecordStore,
    sink: &'a dyn EventSink,
    hierarchy: HierarchyConfig,
    concurrency: usize,
    policy: FailurePolicy,
}

impl<'a> RelationResolver<'a> {
    pub fn new(store: &'a dyn RecordStore, sink: &'a dyn EventSink, config: &MigrationConfig) -> Self {
        Self {
            store,
            sink,
            hierarchy: config.hierarchy.clone(),
            concurrency: config.relation_concurrency.max(1),
            policy: config.failure_policy,
        }
    }

    /// Resolve both hierarchy lookups of `session`. Returns the number of
    /// records whose relations were written.
    pub async fn resolve(&self, session: &mut MigrationSession) -> Result<usize> {
        if session.dry_run {
            debug!(
                parents = session.parent_links.len(),
                children = session.child_links.len(),
                "[dry-run] relation resolution skipped"
            );
            return Ok(0);
        }
        if session.parent_links.is_empty() && session.child_links.is_empty() {
            return Ok(0);
        }

        self.declare_pair(session).await?;

        let mut resolved = 0;
        for link in [HierarchyLink::Parent, HierarchyLink::Child] {
            resolved += self.pass(session, link).await?;
        }
        Ok(resolved)
    }

    fn property(&self, link: HierarchyLink) -> &str {
        match link {
            HierarchyLink::Parent => &self.hierarchy.parent_property,
            HierarchyLink::Child => &self.hierarchy.child_property,
        }
    }

    /// Declare parent/child as a synced dual relation on the destination.
    async fn declare_pair(&self, session: &mut MigrationSession) -> Result<()> {
        let target_store_id = session.target_store_id().to_string();
        let mut patch = BTreeMap::new();
        patch.insert(
            self.hierarchy.parent_property.clone(),
            PropertyDefinition::new(
                PropertyKind::Relation,
                json!({
                    "data_source_id": target_store_id,
                    "type": "dual_property",
                    "dual_property": { "synced_property_name": self.hierarchy.child_property },
                }),
            ),
        );

        let updated = self.store.update_data_source(&target_store_id, &patch).await?;
        session.schema.apply_patch(&patch);
        session.schema.absorb(&updated);
        Ok(())
    }

    fn updates(&self, session: &MigrationSession, link: HierarchyLink) -> Vec<RelationUpdate> {
        let property = self.property(link);
        session
            .lookup(link)
            .iter()
            .filter_map(|(source_id, related)| {
                let Some(target_id) = session.identity.get(source_id) else {
                    debug!(%source_id, "record was not migrated, relation skipped");
                    return None;
                };
                let translated = session.identity.translate(related);
                let relation: Vec<Value> = translated.iter().map(|id| json!({ "id": id })).collect();

                let mut properties = Map::new();
                properties.insert(property.to_string(), json!({ "relation": relation }));
                Some(RelationUpdate {
                    source_id: source_id.clone(),
                    target_id: target_id.to_string(),
                    related: translated.len(),
                    properties,
                })
            })
            .collect()
    }

    async fn pass(&self, session: &mut MigrationSession, link: HierarchyLink) -> Result<usize> {
        let updates = self.updates(session, link);
        let property = self.property(link);
        let resolved = AtomicUsize::new(0);
        let failures = Mutex::new(Vec::new());

        stream::iter(updates.into_iter().map(Ok::<_, MigrateError>))
            .try_for_each_concurrent(self.concurrency, |update| {
                let resolved = &resolved;
                let failures = &failures;
                async move {
                    match self.store.update_page(&update.target_id, &update.properties).await {
                        Ok(()) => {
                            resolved.fetch_add(1, Ordering::SeqCst);
                            self.sink.emit(MigrationEvent::RelationResolved {
                                property: property.to_string(),
                                target_id: update.target_id,
                                related: update.related,
                            });
                            Ok(())
                        }
                        Err(err) if self.policy == FailurePolicy::Continue => {
                            warn!(source_id = %update.source_id, error = %err, "relation write failed");
                            self.sink.emit(MigrationEvent::RecordFailed {
                                source_id: update.source_id.clone(),
                                stage: FailureStage::Relation.to_string(),
                                message: err.to_string(),
                            });
                            if let Ok(mut failures) = failures.lock() {
                                failures.push(RecordFailure {
                                    source_id: update.source_id,
                                    stage: FailureStage::Relation,
                                    message: err.to_string(),
                                });
                            }
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                }
            })
            .await?;

        let failures = failures
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session.failures.extend(failures);
        Ok(resolved.into_inner())
    }
}
