// CorePM workflow library - workflow configuration and status migration
// This exposes the core components for the admin CLI and for integration

pub mod config;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::{config, CorePmConfig, DatabaseConfig, ObservabilityConfig, WorkflowConfig};
pub use service::{MigrationReport, TypeDetails, TypeStats, WorkflowService, WorkflowUpdateReport};
pub use store::{EntityStore, InMemoryEntityStore, StoreError, StoreResult};
#[cfg(feature = "database")]
pub use store::{SqliteDatabase, SqliteEntityStore};
pub use telemetry::{create_migration_span, generate_correlation_id, init_telemetry};
pub use workflow::{
    EntityKind, FieldType, MigrationError, MigrationPlan, MigrationResult, NewTypeField,
    NewWorkflowType, StatusMapping, TypeField, TypeFieldUpdate, TypeKey, TypeMetadataUpdate,
    TypeScope, UpdatePlan, WorkflowEntity, WorkflowMigrationEngine, WorkflowType,
};
