//! Admin operations over workflow types and their entities.
//!
//! Each operation looks up what it needs, validates through the engine and
//! only then writes. Callers pick the store: pass a transaction-scoped
//! `SqliteEntityStore` and commit afterwards to make the whole operation atomic.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{info, Instrument};

use crate::store::EntityStore;
use crate::telemetry::{create_migration_span, generate_correlation_id};
use crate::workflow::{
    apply_migration_plan, apply_update_plan, DeletionDecision, EntityKind, FieldType, MigrationError,
    MigrationResult, NewTypeField, NewWorkflowType, StatusMapping, TypeField, TypeFieldUpdate,
    TypeKey, TypeMetadataUpdate, TypeScope, WorkflowEntity, WorkflowMigrationEngine, WorkflowType,
};

static SLUG_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$"));

static FIELD_KEY_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$"));

fn matches_pattern(pattern: &LazyLock<Result<Regex, regex::Error>>, value: &str) -> bool {
    pattern
        .as_ref()
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Outcome of an in-place workflow edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowUpdateReport {
    pub updated_type: WorkflowType,
    pub remapped_entities: u64,
    pub removed_statuses: Vec<String>,
}

/// Outcome of moving every entity of one type into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub source: TypeKey,
    pub destination: TypeKey,
    pub destination_name: String,
    pub default_status: String,
    pub migrated: u64,
    /// One count per applied instruction, mapped remaps first.
    pub per_instruction: Vec<u64>,
}

/// A type together with its custom field definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDetails {
    #[serde(flatten)]
    pub ty: WorkflowType,
    pub fields: Vec<TypeField>,
}

/// Entity counts per status of a single type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    pub key: TypeKey,
    /// Workflow order; statuses without entities are left out.
    pub by_status: Vec<(String, u64)>,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowService {
    engine: WorkflowMigrationEngine,
}

impl WorkflowService {
    pub fn new(engine: WorkflowMigrationEngine) -> Self {
        Self { engine }
    }

    pub async fn create_type(
        &self,
        store: &dyn EntityStore,
        new_type: NewWorkflowType,
    ) -> MigrationResult<WorkflowType> {
        WorkflowMigrationEngine::validate_workflow(&new_type.workflow)?;
        if !matches_pattern(&SLUG_PATTERN, &new_type.slug) {
            return Err(MigrationError::InvalidSlug { slug: new_type.slug });
        }
        validate_name(&new_type.name)?;

        let mut keys = HashSet::new();
        for field in &new_type.fields {
            validate_new_field(field)?;
            if !keys.insert(field.key.as_str()) {
                return Err(MigrationError::InvalidField {
                    reason: format!("key '{}' is declared twice", field.key),
                });
            }
        }

        match (new_type.kind, new_type.scope) {
            (EntityKind::Project, TypeScope::Team(_)) => {
                return Err(MigrationError::InvalidScope {
                    kind: EntityKind::Project,
                    expected: "global",
                })
            }
            (EntityKind::Task, TypeScope::Global) => {
                return Err(MigrationError::InvalidScope {
                    kind: EntityKind::Task,
                    expected: "team-scoped",
                })
            }
            _ => {}
        }

        if store
            .find_type_by_slug(new_type.kind, new_type.scope, &new_type.slug)
            .await?
            .is_some()
        {
            return Err(MigrationError::DuplicateSlug {
                kind: new_type.kind,
                slug: new_type.slug,
            });
        }

        let created = store.insert_type(&new_type).await?;
        info!(type_key = %created.key, slug = %created.slug, fields = new_type.fields.len(), "Created type");
        Ok(created)
    }

    /// Edit name, description or color. The workflow and slug are untouched.
    pub async fn update_type_metadata(
        &self,
        store: &dyn EntityStore,
        key: TypeKey,
        update: TypeMetadataUpdate,
    ) -> MigrationResult<WorkflowType> {
        let mut ty = self.get_type(store, key).await?;
        let metadata = update.apply_to(&ty.metadata());
        validate_name(&metadata.name)?;

        store.set_metadata(key, &metadata).await?;
        info!(type_key = %key, name = %metadata.name, "Updated type metadata");
        ty.name = metadata.name;
        ty.description = metadata.description;
        ty.color = metadata.color;
        Ok(ty)
    }

    pub async fn describe_type(&self, store: &dyn EntityStore, key: TypeKey) -> MigrationResult<TypeDetails> {
        let ty = self.get_type(store, key).await?;
        let fields = store.list_fields(key).await?;
        Ok(TypeDetails { ty, fields })
    }

    pub async fn add_field(
        &self,
        store: &dyn EntityStore,
        key: TypeKey,
        field: NewTypeField,
    ) -> MigrationResult<TypeField> {
        self.get_type(store, key).await?;
        validate_new_field(&field)?;
        if store.list_fields(key).await?.iter().any(|f| f.key == field.key) {
            return Err(MigrationError::DuplicateFieldKey {
                type_key: key,
                key: field.key,
            });
        }

        let created = store.insert_field(key, &field).await?;
        info!(type_key = %key, field = %created.key, field_type = %created.field_type, "Added field");
        Ok(created)
    }

    pub async fn update_field(
        &self,
        store: &dyn EntityStore,
        key: TypeKey,
        field_id: i64,
        update: TypeFieldUpdate,
    ) -> MigrationResult<TypeField> {
        self.get_type(store, key).await?;
        let current = store
            .find_field(key, field_id)
            .await?
            .ok_or(MigrationError::FieldNotFound { type_key: key, field_id })?;

        let updated = update.apply_to(&current);
        validate_field_shape(&updated.label, updated.field_type, updated.options.as_deref())?;
        store.save_field(&updated).await?;
        info!(type_key = %key, field = %updated.key, "Updated field");
        Ok(updated)
    }

    pub async fn remove_field(&self, store: &dyn EntityStore, key: TypeKey, field_id: i64) -> MigrationResult<()> {
        self.get_type(store, key).await?;
        if !store.delete_field(key, field_id).await? {
            return Err(MigrationError::FieldNotFound { type_key: key, field_id });
        }
        info!(type_key = %key, field_id, "Removed field");
        Ok(())
    }

    pub async fn get_type(&self, store: &dyn EntityStore, key: TypeKey) -> MigrationResult<WorkflowType> {
        store
            .find_type(key)
            .await?
            .ok_or(MigrationError::TypeNotFound(key))
    }

    /// Replace a type's workflow, remapping entities as declared.
    pub async fn update_workflow(
        &self,
        store: &dyn EntityStore,
        key: TypeKey,
        new_workflow: Vec<String>,
        mappings: &[StatusMapping],
    ) -> MigrationResult<WorkflowUpdateReport> {
        let span = create_migration_span("update_workflow", key.kind, key.id, &generate_correlation_id());
        async {
            let current = self.get_type(store, key).await?;
            let plan = self
                .engine
                .plan_workflow_update(store, &current, new_workflow, mappings)
                .await?;
            let applied = apply_update_plan(store, &current, &plan).await?;

            Ok(WorkflowUpdateReport {
                updated_type: applied.updated_type,
                remapped_entities: applied.remapped_entities,
                removed_statuses: plan.removed_statuses,
            })
        }
        .instrument(span)
        .await
    }

    /// Move every entity of `source` into `dest`.
    pub async fn migrate_type(
        &self,
        store: &dyn EntityStore,
        source: TypeKey,
        dest: TypeKey,
        mappings: &[StatusMapping],
    ) -> MigrationResult<MigrationReport> {
        let span = create_migration_span("migrate_type", source.kind, source.id, &generate_correlation_id());
        async {
            if source == dest {
                return Err(MigrationError::SameType(source));
            }
            let source_type = self.get_type(store, source).await?;
            let dest_type = self.get_type(store, dest).await?;

            let plan = self
                .engine
                .plan_type_migration(store, &source_type, &dest_type, mappings)
                .await?;
            let applied = apply_migration_plan(store, &plan).await?;

            Ok(MigrationReport {
                source,
                destination: dest,
                destination_name: dest_type.name,
                default_status: plan.default_status,
                migrated: applied.migrated,
                per_instruction: applied.per_instruction,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn delete_type(&self, store: &dyn EntityStore, key: TypeKey) -> MigrationResult<()> {
        let span = create_migration_span("delete_type", key.kind, key.id, &generate_correlation_id());
        async {
            let ty = self.get_type(store, key).await?;
            match self.engine.plan_type_deletion(store, &ty).await? {
                DeletionDecision::Deny { count } => Err(MigrationError::TypeInUse { key, count }),
                DeletionDecision::Allow => {
                    if !store.delete_type(key).await? {
                        return Err(MigrationError::TypeNotFound(key));
                    }
                    info!(type_key = %key, "Deleted type");
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn type_stats(&self, store: &dyn EntityStore, key: TypeKey) -> MigrationResult<TypeStats> {
        let ty = self.get_type(store, key).await?;
        let mut by_status = Vec::new();
        for status in &ty.workflow {
            let count = store.count_by_type_and_status(key, status).await?;
            if count > 0 {
                by_status.push((status.clone(), count));
            }
        }
        let total = store.count_by_type(key).await?;
        Ok(TypeStats { key, by_status, total })
    }

    /// Create a project or task. Without an explicit status the entity starts
    /// in the type's first status.
    pub async fn create_entity(
        &self,
        store: &dyn EntityStore,
        type_key: TypeKey,
        title: &str,
        status: Option<&str>,
    ) -> MigrationResult<WorkflowEntity> {
        let ty = self.get_type(store, type_key).await?;
        let status = match status {
            Some(status) => {
                ensure_in_workflow(&ty, status)?;
                status.to_string()
            }
            None => self.engine.initial_status(&ty),
        };
        Ok(store.insert_entity(&ty, title, &status).await?)
    }

    pub async fn change_entity_status(
        &self,
        store: &dyn EntityStore,
        kind: EntityKind,
        id: i64,
        status: &str,
    ) -> MigrationResult<WorkflowEntity> {
        let mut entity = store
            .find_entity(kind, id)
            .await?
            .ok_or(MigrationError::EntityNotFound { kind, id })?;
        let ty = self.get_type(store, entity.type_key()).await?;
        ensure_in_workflow(&ty, status)?;

        store.update_entity_status(kind, id, status).await?;
        entity.status = status.to_string();
        Ok(entity)
    }
}

fn validate_name(name: &str) -> MigrationResult<()> {
    if name.trim().is_empty() {
        return Err(MigrationError::InvalidMetadata {
            reason: "name must not be blank".to_string(),
        });
    }
    Ok(())
}

fn validate_new_field(field: &NewTypeField) -> MigrationResult<()> {
    if !matches_pattern(&FIELD_KEY_PATTERN, &field.key) {
        return Err(MigrationError::InvalidField {
            reason: format!(
                "key '{}' must start with a lowercase letter or '_' and contain only lowercase letters, digits and '_'",
                field.key
            ),
        });
    }
    validate_field_shape(&field.label, field.field_type, field.options.as_deref())
}

fn validate_field_shape(label: &str, field_type: FieldType, options: Option<&[String]>) -> MigrationResult<()> {
    if label.trim().is_empty() {
        return Err(MigrationError::InvalidField {
            reason: "label must not be blank".to_string(),
        });
    }
    if field_type.has_options() && options.map_or(true, <[String]>::is_empty) {
        return Err(MigrationError::InvalidField {
            reason: format!("{field_type} fields need at least one option"),
        });
    }
    Ok(())
}

fn ensure_in_workflow(ty: &WorkflowType, status: &str) -> MigrationResult<()> {
    if ty.has_status(status) {
        Ok(())
    } else {
        Err(MigrationError::StatusNotInWorkflow {
            status: status.to_string(),
            workflow: ty.workflow.clone(),
        })
    }
}
