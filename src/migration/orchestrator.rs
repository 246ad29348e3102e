//! End-to-end migration run
//!
//! [`Migrator::run`] resolves the scope filter, pages through the source store,
//! creates the destination store, migrates records batch by batch and finally
//! resolves the deferred hierarchy links.

use super::content::ContentMigrator;
use super::mapper::{detect_hierarchy, PropertyMapper};
use super::paginator::{build_filter, FilterClause, Paginator};
use super::relations::RelationResolver;
use super::schema::{SchemaCloner, SchemaEvolver};
use super::session::{FailureStage, MigrationSession, RecordFailure};
use crate::client::{CreatePage, QueryRequest, RecordStore};
use crate::config::{FailurePolicy, MigrationConfig};
use crate::error::{MigrateError, Result};
use crate::events::{EventSink, MigrationEvent, TracingSink};
use crate::types::{PropertyKind, SourceRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What to migrate and where.
#[derive(Debug, Clone, Default)]
pub struct MigrationRequest {
    pub source_store_id: String,
    /// Page the destination store is created under
    pub parent_page_id: String,
    /// Destination store title; empty falls back to the source title
    pub title: String,
    pub dry_run: bool,
    /// Scope name followed by secondary filter values
    pub filter_values: Vec<String>,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub target_store_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_found: usize,
    /// Records fully migrated (simulated, in a dry run)
    pub records_migrated: usize,
    pub relations_resolved: usize,
    pub failures: Vec<RecordFailure>,
}

type StageResult<T> = std::result::Result<T, (FailureStage, MigrateError)>;

fn at(stage: FailureStage) -> impl FnOnce(MigrateError) -> (FailureStage, MigrateError) {
    move |err| (stage, err)
}

/// Drives a migration against a [`RecordStore`].
pub struct Migrator {
    store: Arc<dyn RecordStore>,
    config: MigrationConfig,
    sink: Arc<dyn EventSink>,
}

impl Migrator {
    pub fn new(store: Arc<dyn RecordStore>, config: MigrationConfig) -> Self {
        Self {
            store,
            config,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Turn positional filter values into filter clauses.
    ///
    /// With a scope configured, the first value names a scoping record whose id
    /// becomes a relation clause. Remaining values feed the configured
    /// secondary filters in order. Values with nowhere to go are rejected
    /// before any query, so a run never widens to the whole source store.
    pub async fn resolve_scope(&self, values: &[String]) -> Result<Vec<FilterClause>> {
        let slots = usize::from(self.config.scope.is_some()) + self.config.filters.len();
        if values.len() > slots {
            return Err(MigrateError::UnusedFilterValues(values[slots..].to_vec()));
        }

        let mut values = values.iter();
        let mut clauses = Vec::new();

        if let Some(scope) = &self.config.scope {
            if let Some(name) = values.next() {
                let lookup = [FilterClause::new(&scope.name_property, PropertyKind::RichText, name)];
                let request = QueryRequest {
                    start_cursor: None,
                    page_size: 1,
                    filter: build_filter(&lookup),
                };
                let page = self.store.query_data_source(&scope.store_id, &request).await?;
                let record = page
                    .results
                    .into_iter()
                    .next()
                    .ok_or_else(|| MigrateError::ScopeNotFound(name.clone()))?;

                info!(scope = %name, record_id = %record.id, "scope resolved");
                clauses.push(FilterClause::new(
                    &scope.relation_property,
                    PropertyKind::Relation,
                    record.id,
                ));
            }
        }

        for (filter, value) in self.config.filters.iter().zip(values) {
            clauses.push(FilterClause::new(
                &filter.property,
                PropertyKind::from(filter.kind.as_str()),
                value.as_str(),
            ));
        }
        Ok(clauses)
    }

    /// Run one migration.
    pub async fn run(&self, request: &MigrationRequest) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let store = self.store.as_ref();
        let sink = self.sink.as_ref();

        sink.emit(MigrationEvent::RunStarted {
            run_id,
            source_store_id: request.source_store_id.clone(),
            dry_run: request.dry_run,
        });

        let clauses = self.resolve_scope(&request.filter_values).await?;
        let records = Paginator::new(store)
            .with_page_size(self.config.page_size)
            .fetch(&request.source_store_id, &clauses)
            .await?;
        sink.emit(MigrationEvent::RecordsFetched {
            count: records.len(),
        });

        let source = store.retrieve_data_source(&request.source_store_id).await?;
        let schema = SchemaCloner::new(store, sink)
            .create(&source, &request.parent_page_id, &request.title, request.dry_run)
            .await?;

        let mut session =
            MigrationSession::new(run_id, &request.source_store_id, schema, request.dry_run);

        let hierarchy = detect_hierarchy(
            &self.config.hierarchy,
            &request.source_store_id,
            &source.properties,
        );
        if hierarchy != self.config.hierarchy {
            info!(
                parent = %hierarchy.parent_property,
                child = %hierarchy.child_property,
                "hierarchy pair taken from the source schema"
            );
        }
        let config = MigrationConfig {
            hierarchy,
            ..self.config.clone()
        };

        let mapper = PropertyMapper::from_config(&request.source_store_id, &config);
        let evolver = SchemaEvolver::new(store, &mapper, sink);
        let content = ContentMigrator::new(store, sink, request.dry_run);
        let delay = config.record_delay();
        let mut reported = HashSet::new();
        let mut migrated = 0;

        for (index, batch) in records.chunks(config.batch_size.max(1)).enumerate() {
            info!(batch = index + 1, size = batch.len(), "processing batch");

            for record in batch {
                let mapped = mapper.map_record(&session.schema, &source.properties, record);
                for (property, reason) in &mapped.skipped {
                    if reported.insert(property.clone()) {
                        warn!(%property, %reason, "property not migrated");
                    } else {
                        debug!(source_id = %record.id, %property, %reason, "property skipped");
                    }
                }
                for (link, related) in mapped.deferred {
                    session.defer(link, &record.id, related);
                }

                let mut properties = mapped.properties;
                evolver
                    .ensure(&mut session, &mut properties, &source.properties)
                    .await?;

                match self
                    .transfer_record(&mut session, &content, record, properties)
                    .await
                {
                    Ok(()) => migrated += 1,
                    Err((stage, err)) => self.record_failure(&mut session, record, stage, err)?,
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let relations_resolved = RelationResolver::new(store, sink, &config)
            .resolve(&mut session)
            .await?;

        sink.emit(MigrationEvent::RunFinished {
            run_id,
            migrated,
            failed: session.failures.len(),
        });

        Ok(MigrationReport {
            run_id,
            dry_run: request.dry_run,
            target_store_id: session.target_store_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            records_found: records.len(),
            records_migrated: migrated,
            relations_resolved,
            failures: session.failures,
        })
    }

    /// Fetch content, create the record and replay its content and comments.
    async fn transfer_record(
        &self,
        session: &mut MigrationSession,
        content: &ContentMigrator<'_>,
        record: &SourceRecord,
        properties: Map<String, Value>,
    ) -> StageResult<()> {
        let tree = content
            .fetch_tree(&record.id)
            .await
            .map_err(at(FailureStage::Content))?;
        let icon = self
            .rehost(content, "icon", record.icon.as_ref())
            .await
            .map_err(at(FailureStage::Content))?;
        let cover = self
            .rehost(content, "cover", record.cover.as_ref())
            .await
            .map_err(at(FailureStage::Content))?;

        if session.dry_run {
            self.sink.emit(MigrationEvent::RecordSimulated {
                source_id: record.id.clone(),
                properties: properties.keys().cloned().collect(),
            });
            debug!(source_id = %record.id, blocks = tree.len(), "[dry-run] record creation skipped");
            return Ok(());
        }

        let page = CreatePage {
            data_source_id: session.target_store_id().to_string(),
            properties,
            icon,
            cover,
        };
        let target_id = self
            .store
            .create_page(&page)
            .await
            .map_err(at(FailureStage::Create))?;
        session.identity.insert(record.id.clone(), target_id.clone());

        content
            .replay(&target_id, &tree)
            .await
            .map_err(at(FailureStage::Replay))?;
        content
            .replay_comments(&target_id, &record.id)
            .await
            .map_err(at(FailureStage::Comments))?;

        self.sink.emit(MigrationEvent::RecordMigrated {
            source_id: record.id.clone(),
            target_id,
        });
        Ok(())
    }

    async fn rehost(
        &self,
        content: &ContentMigrator<'_>,
        slot: &str,
        reference: Option<&Value>,
    ) -> Result<Option<Value>> {
        match reference {
            Some(reference) if !reference.is_null() => content.rehost_reference(slot, reference).await,
            _ => Ok(None),
        }
    }

    /// Apply the failure policy to a failed record.
    fn record_failure(
        &self,
        session: &mut MigrationSession,
        record: &SourceRecord,
        stage: FailureStage,
        err: MigrateError,
    ) -> Result<()> {
        self.sink.emit(MigrationEvent::RecordFailed {
            source_id: record.id.clone(),
            stage: stage.to_string(),
            message: err.to_string(),
        });

        match self.config.failure_policy {
            FailurePolicy::FailFast => {
                error!(source_id = %record.id, %stage, error = %err, "aborting migration");
                Err(err)
            }
            FailurePolicy::Continue => {
                session.failures.push(RecordFailure {
                    source_id: record.id.clone(),
                    stage,
                    message: err.to_string(),
                });
                Ok(())
            }
        }
    }
}
