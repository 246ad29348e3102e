pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod migration;
pub mod types;

pub use client::{MockStore, NotionClient, RecordStore};
pub use config::{FailurePolicy, MigrationConfig};
pub use error::{MigrateError, Result};
pub use events::{EventSink, MigrationEvent, RecordingSink, TracingSink};
pub use migration::{MigrationReport, MigrationRequest, Migrator};
