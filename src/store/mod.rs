//! Persistence seam for the workflow engine.
//!
//! The engine only ever talks to an [`EntityStore`]. Two implementations ship
//! with the crate: [`memory::InMemoryEntityStore`] and, with the `database`
//! feature, [`sqlite::SqliteEntityStore`], which wraps a single SQLite
//! transaction so validation reads and bulk writes commit together.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::workflow::types::{
    EntityKind, NewTypeField, NewWorkflowType, StatusMap, TypeField, TypeKey, TypeMetadata,
    TypeScope, WorkflowEntity, WorkflowType,
};

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

pub use memory::InMemoryEntityStore;
#[cfg(feature = "database")]
pub use sqlite::{SqliteDatabase, SqliteEntityStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store conflict: {reason}")]
    Conflict { reason: String },

    #[error("Invalid stored value: {reason}")]
    InvalidValue { reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations the workflow engine and service depend on.
///
/// Bulk methods are set-based and return the number of affected rows, so
/// applying the same statement twice converges on the same state.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_type(&self, key: TypeKey) -> StoreResult<Option<WorkflowType>>;

    async fn find_type_by_slug(
        &self,
        kind: EntityKind,
        scope: TypeScope,
        slug: &str,
    ) -> StoreResult<Option<WorkflowType>>;

    /// Insert the type together with its initial `fields`.
    async fn insert_type(&self, new_type: &NewWorkflowType) -> StoreResult<WorkflowType>;

    /// Returns false when no such type existed. Field definitions go with it.
    async fn delete_type(&self, key: TypeKey) -> StoreResult<bool>;

    async fn set_metadata(&self, key: TypeKey, metadata: &TypeMetadata) -> StoreResult<()>;

    /// Replace the workflow and stamp the record with `version`.
    async fn set_workflow(&self, key: TypeKey, workflow: &[String], version: i64) -> StoreResult<()>;

    /// Field definitions of a type, by `order` then id.
    async fn list_fields(&self, key: TypeKey) -> StoreResult<Vec<TypeField>>;

    async fn insert_field(&self, key: TypeKey, field: &NewTypeField) -> StoreResult<TypeField>;

    /// Only finds fields that belong to `key`.
    async fn find_field(&self, key: TypeKey, field_id: i64) -> StoreResult<Option<TypeField>>;

    async fn save_field(&self, field: &TypeField) -> StoreResult<()>;

    async fn delete_field(&self, key: TypeKey, field_id: i64) -> StoreResult<bool>;

    async fn count_by_type_and_status(&self, key: TypeKey, status: &str) -> StoreResult<u64>;

    async fn count_by_type(&self, key: TypeKey) -> StoreResult<u64>;

    /// `WHERE type = key AND status = old_status SET status = new_status`
    async fn bulk_update_status(
        &self,
        key: TypeKey,
        old_status: &str,
        new_status: &str,
    ) -> StoreResult<u64>;

    /// `WHERE type = source AND status = old_status SET type = dest, status = new_status`.
    /// Task rows also move to the destination's team.
    async fn reassign_status(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        old_status: &str,
        new_status: &str,
    ) -> StoreResult<u64>;

    /// `WHERE type = source AND status NOT IN excluded SET type = dest, status = new_status`.
    async fn reassign_remaining(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        excluded: &[String],
        new_status: &str,
    ) -> StoreResult<u64>;

    /// Move every entity of `source` to `dest`, mapping statuses through
    /// `status_map` and falling back to `default_status`.
    async fn bulk_reassign_type(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        status_map: &StatusMap,
        default_status: &str,
    ) -> StoreResult<u64> {
        let mut affected = 0;
        for (old_status, new_status) in status_map.iter() {
            affected += self.reassign_status(source, dest, old_status, new_status).await?;
        }
        let excluded: Vec<String> = status_map.keys().map(str::to_string).collect();
        affected += self
            .reassign_remaining(source, dest, &excluded, default_status)
            .await?;
        Ok(affected)
    }

    async fn insert_entity(
        &self,
        ty: &WorkflowType,
        title: &str,
        status: &str,
    ) -> StoreResult<WorkflowEntity>;

    async fn find_entity(&self, kind: EntityKind, id: i64) -> StoreResult<Option<WorkflowEntity>>;

    async fn update_entity_status(&self, kind: EntityKind, id: i64, status: &str) -> StoreResult<()>;
}
