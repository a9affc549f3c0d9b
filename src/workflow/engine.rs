//! Workflow/status migration planning.
//!
//! The engine validates a proposed workflow edit or type-to-type migration
//! against the current entity distribution and produces a plan of set-based
//! instructions. Planning never writes: the only store calls it makes are
//! counts. Applying a plan is the job of [`super::executor`].

use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::errors::{MigrationError, MigrationResult};
use super::plan::{
    DefaultRemap, DeletionDecision, MigrationInstruction, MigrationPlan, StatusRemap, UpdatePlan,
};
use super::types::{StatusMap, StatusMapping, WorkflowType};
use crate::store::EntityStore;

/// Status used when a destination workflow is empty.
pub const DEFAULT_FALLBACK_STATUS: &str = "Backlog";

#[derive(Debug, Clone)]
pub struct WorkflowMigrationEngine {
    fallback_status: String,
}

impl Default for WorkflowMigrationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_STATUS)
    }
}

impl WorkflowMigrationEngine {
    pub fn new(fallback_status: impl Into<String>) -> Self {
        Self {
            fallback_status: fallback_status.into(),
        }
    }

    /// A workflow must be non-empty and must not repeat a status name.
    pub fn validate_workflow(workflow: &[String]) -> MigrationResult<()> {
        if workflow.is_empty() {
            return Err(MigrationError::InvalidWorkflow {
                reason: "workflow must contain at least one status".to_string(),
            });
        }
        let mut seen = HashSet::with_capacity(workflow.len());
        for status in workflow {
            if !seen.insert(status.as_str()) {
                return Err(MigrationError::InvalidWorkflow {
                    reason: format!("status '{status}' appears more than once"),
                });
            }
        }
        Ok(())
    }

    /// Status given to entities that land in `ty` without an explicit one.
    pub fn initial_status(&self, ty: &WorkflowType) -> String {
        ty.workflow
            .first()
            .cloned()
            .unwrap_or_else(|| self.fallback_status.clone())
    }

    /// Plan an in-place edit of `ty`'s workflow.
    ///
    /// Every mapping target must exist in `new_workflow` and must not itself be
    /// remapped. Every status dropped from the workflow must either be empty or
    /// be mapped. Mappings keyed on statuses that are not dropped are kept and
    /// applied as declared.
    pub async fn plan_workflow_update(
        &self,
        store: &dyn EntityStore,
        ty: &WorkflowType,
        new_workflow: Vec<String>,
        mappings: &[StatusMapping],
    ) -> MigrationResult<UpdatePlan> {
        Self::validate_workflow(&new_workflow)?;

        let new_set: HashSet<&str> = new_workflow.iter().map(String::as_str).collect();
        let removed: Vec<String> = ty
            .workflow
            .iter()
            .filter(|s| !new_set.contains(s.as_str()))
            .cloned()
            .collect();

        let status_map = StatusMap::from_mappings(mappings);

        for target in status_map.targets() {
            if !new_set.contains(target) {
                warn!(type_key = %ty.key, status = target, "Rejected workflow update: unknown target status");
                return Err(MigrationError::TargetStatusNotInWorkflow {
                    status: target.to_string(),
                });
            }
        }

        // each row must be remapped at most once, whatever order the
        // statements run in
        for (old_status, new_status) in status_map.iter() {
            if old_status != new_status && status_map.contains_key(new_status) {
                warn!(type_key = %ty.key, status = new_status, "Rejected workflow update: chained mapping");
                return Err(MigrationError::ChainedMapping {
                    status: new_status.to_string(),
                });
            }
        }

        for status in removed.iter().filter(|s| !status_map.contains_key(s)) {
            let count = store.count_by_type_and_status(ty.key, status).await?;
            debug!(type_key = %ty.key, status = %status, count, "Checked removed status");
            if count > 0 {
                warn!(type_key = %ty.key, status = %status, count, "Rejected workflow update: unmapped status in use");
                return Err(MigrationError::UnmappedStatusInUse {
                    status: status.clone(),
                    count,
                });
            }
        }

        let instructions: Vec<StatusRemap> = status_map
            .iter()
            .map(|(old_status, new_status)| StatusRemap {
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .collect();

        info!(
            type_key = %ty.key,
            removed = removed.len(),
            remaps = instructions.len(),
            "Planned workflow update"
        );

        Ok(UpdatePlan {
            type_key: ty.key,
            instructions,
            final_workflow: new_workflow,
            removed_statuses: removed,
            base_version: ty.version,
        })
    }

    /// Plan moving every entity of `source` into `dest`.
    ///
    /// Statuses found in the mapping are translated; everything else lands on
    /// the destination's first status (or the fallback label).
    pub async fn plan_type_migration(
        &self,
        store: &dyn EntityStore,
        source: &WorkflowType,
        dest: &WorkflowType,
        mappings: &[StatusMapping],
    ) -> MigrationResult<MigrationPlan> {
        if source.key == dest.key {
            return Err(MigrationError::SameType(source.key));
        }
        if source.kind() != dest.kind() {
            return Err(MigrationError::KindMismatch {
                source_kind: source.kind(),
                dest_kind: dest.kind(),
            });
        }

        let status_map = StatusMap::from_mappings(mappings);
        for target in status_map.targets() {
            if !dest.has_status(target) {
                warn!(source = %source.key, dest = %dest.key, status = target, "Rejected type migration: unknown target status");
                return Err(MigrationError::TargetStatusNotInWorkflow {
                    status: target.to_string(),
                });
            }
        }

        let affected_count = store.count_by_type(source.key).await?;
        let default_status = self.initial_status(dest);

        let mut instructions: Vec<MigrationInstruction> = status_map
            .iter()
            .map(|(old_status, new_status)| {
                MigrationInstruction::Remap(StatusRemap {
                    old_status: old_status.to_string(),
                    new_status: new_status.to_string(),
                })
            })
            .collect();
        instructions.push(MigrationInstruction::Default(DefaultRemap {
            excluded_old_statuses: status_map.keys().map(str::to_string).collect(),
            new_status: default_status.clone(),
        }));

        info!(
            source = %source.key,
            dest = %dest.key,
            affected_count,
            default_status = %default_status,
            "Planned type migration"
        );

        Ok(MigrationPlan {
            source: source.key,
            destination: dest.clone(),
            instructions,
            default_status,
            affected_count,
        })
    }

    /// A type may only be deleted once nothing references it.
    pub async fn plan_type_deletion(
        &self,
        store: &dyn EntityStore,
        ty: &WorkflowType,
    ) -> MigrationResult<DeletionDecision> {
        let count = store.count_by_type(ty.key).await?;
        if count == 0 {
            Ok(DeletionDecision::Allow)
        } else {
            debug!(type_key = %ty.key, count, "Deletion denied");
            Ok(DeletionDecision::Deny { count })
        }
    }
}
