// Workflow configuration and status migration
// Planning is read-only; writes go through the executor inside the caller's transaction

pub mod engine;
pub mod errors;
pub mod executor;
pub mod plan;
pub mod types;

pub use engine::{WorkflowMigrationEngine, DEFAULT_FALLBACK_STATUS};
pub use errors::{MigrationError, MigrationResult};
pub use executor::{apply_migration_plan, apply_update_plan, AppliedMigration, AppliedUpdate};
pub use plan::{
    DefaultRemap, DeletionDecision, MigrationInstruction, MigrationPlan, StatusRemap, UpdatePlan,
};
pub use types::{
    EntityKind, FieldType, NewTypeField, NewWorkflowType, StatusMap, StatusMapping, TypeField,
    TypeFieldUpdate, TypeKey, TypeMetadata, TypeMetadataUpdate, TypeScope, WorkflowEntity,
    WorkflowType,
};
