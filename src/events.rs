//! Domain events emitted by the migration engine
//!
//! The engine reports progress as [`MigrationEvent`] values instead of printing.
//! [`TracingSink`] turns them into structured log lines; [`RecordingSink`] keeps
//! them in memory for assertions.

use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Something that happened during a migration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    RunStarted {
        run_id: Uuid,
        source_store_id: String,
        dry_run: bool,
    },
    RecordsFetched {
        count: usize,
    },
    StoreCreated {
        target_store_id: String,
        title: String,
        simulated: bool,
    },
    SchemaEvolved {
        properties: Vec<String>,
    },
    MediaRehosted {
        source_url: String,
        upload_id: String,
    },
    MediaSkipped {
        block_type: String,
        reason: String,
    },
    RecordMigrated {
        source_id: String,
        target_id: String,
    },
    RecordSimulated {
        source_id: String,
        properties: Vec<String>,
    },
    RecordFailed {
        source_id: String,
        stage: String,
        message: String,
    },
    RelationResolved {
        property: String,
        target_id: String,
        related: usize,
    },
    RunFinished {
        run_id: Uuid,
        migrated: usize,
        failed: usize,
    },
}

/// Receiver for migration events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MigrationEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: MigrationEvent) {
        match event {
            MigrationEvent::RunStarted {
                run_id,
                source_store_id,
                dry_run,
            } => info!(%run_id, %source_store_id, dry_run, "migration started"),
            MigrationEvent::RecordsFetched { count } => {
                info!(count, "source records fetched")
            }
            MigrationEvent::StoreCreated {
                target_store_id,
                title,
                simulated,
            } => info!(%target_store_id, %title, simulated, "destination store created"),
            MigrationEvent::SchemaEvolved { properties } => {
                info!(properties = ?properties, "destination schema evolved")
            }
            MigrationEvent::MediaRehosted {
                source_url,
                upload_id,
            } => info!(%source_url, %upload_id, "media re-hosted"),
            MigrationEvent::MediaSkipped { block_type, reason } => {
                warn!(%block_type, %reason, "content skipped")
            }
            MigrationEvent::RecordMigrated {
                source_id,
                target_id,
            } => info!(%source_id, %target_id, "record migrated"),
            MigrationEvent::RecordSimulated {
                source_id,
                properties,
            } => info!(%source_id, properties = ?properties, "[dry-run] record would be created"),
            MigrationEvent::RecordFailed {
                source_id,
                stage,
                message,
            } => warn!(%source_id, %stage, %message, "record failed"),
            MigrationEvent::RelationResolved {
                property,
                target_id,
                related,
            } => info!(%property, %target_id, related, "relation resolved"),
            MigrationEvent::RunFinished {
                run_id,
                migrated,
                failed,
            } => info!(%run_id, migrated, failed, "migration finished"),
        }
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: MigrationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
