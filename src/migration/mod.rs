//! Schema-aware migration engine
//!
//! Leaves first: [`paginator`] reads the source, [`mapper`] translates
//! definitions and values, [`schema`] creates and evolves the destination,
//! [`content`] moves block trees and comments, [`relations`] writes the deferred
//! hierarchy links and [`orchestrator`] drives a run through all of them.

pub mod content;
pub mod mapper;
pub mod orchestrator;
pub mod paginator;
pub mod relations;
pub mod schema;
pub mod session;

pub use content::{ContentMigrator, ContentNode};
pub use mapper::{MappedDefinition, MappedRecord, PropertyMapper, ValueOutcome};
pub use orchestrator::{MigrationReport, MigrationRequest, Migrator};
pub use paginator::{build_filter, FilterClause, Paginator};
pub use relations::RelationResolver;
pub use schema::{SchemaCloner, SchemaEvolver, SIMULATED_STORE_ID};
pub use session::{
    FailureStage, HierarchyLink, IdentityMap, MigrationSession, RecordFailure, RelationLookup,
    TargetSchema,
};
