use thiserror::Error;

use super::types::{EntityKind, TypeKey};
use crate::store::StoreError;

/// Everything that can stop a workflow operation.
///
/// All variants except `Store` are raised before the store is written to.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid workflow: {reason}")]
    InvalidWorkflow { reason: String },

    #[error("Target status '{status}' is not in the destination workflow")]
    TargetStatusNotInWorkflow { status: String },

    #[error("Status '{status}' is both a mapping target and a mapping source")]
    ChainedMapping { status: String },

    #[error("Status '{status}' has {count} entities. Provide a status mapping.")]
    UnmappedStatusInUse { status: String, count: u64 },

    #[error("Cannot migrate {0} to itself")]
    SameType(TypeKey),

    #[error("{0} not found")]
    TypeNotFound(TypeKey),

    #[error("{kind} #{id} not found")]
    EntityNotFound { kind: EntityKind, id: i64 },

    #[error("Cannot migrate between a {source_kind} type and a {dest_kind} type")]
    KindMismatch {
        source_kind: EntityKind,
        dest_kind: EntityKind,
    },

    #[error("{kind} types must be {expected}")]
    InvalidScope {
        kind: EntityKind,
        expected: &'static str,
    },

    #[error("Invalid slug '{slug}': use lowercase letters, digits and '-'")]
    InvalidSlug { slug: String },

    #[error("Invalid type metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Invalid field: {reason}")]
    InvalidField { reason: String },

    #[error("Field key '{key}' already exists for {type_key}")]
    DuplicateFieldKey { type_key: TypeKey, key: String },

    #[error("Field #{field_id} not found on {type_key}")]
    FieldNotFound { type_key: TypeKey, field_id: i64 },

    #[error("A {kind} type with slug '{slug}' already exists in this scope")]
    DuplicateSlug { kind: EntityKind, slug: String },

    #[error("Invalid status '{status}'. Must be one of: {workflow:?}")]
    StatusNotInWorkflow { status: String, workflow: Vec<String> },

    #[error("Cannot delete {key} with {count} existing entities. Migrate them first.")]
    TypeInUse { key: TypeKey, count: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrationError {
    /// True when the request itself was wrong and resubmitting a corrected
    /// request can succeed; false for store failures.
    pub fn is_validation(&self) -> bool {
        !matches!(self, MigrationError::Store(_))
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
