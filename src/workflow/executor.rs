// Plan application - writes happen here and only here.
// Callers wrap these in one transaction (see `store::sqlite::SqliteDatabase::begin`).

use tracing::{debug, info};

use super::errors::MigrationResult;
use super::plan::{MigrationInstruction, MigrationPlan, UpdatePlan};
use super::types::WorkflowType;
use crate::store::EntityStore;

/// Result of applying an [`UpdatePlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub updated_type: WorkflowType,
    pub remapped_entities: u64,
}

/// Result of applying a [`MigrationPlan`]; `per_instruction` lines up with
/// `plan.instructions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub migrated: u64,
    pub per_instruction: Vec<u64>,
}

/// Run the status remaps in declared order, then assign the new workflow.
pub async fn apply_update_plan(
    store: &dyn EntityStore,
    current: &WorkflowType,
    plan: &UpdatePlan,
) -> MigrationResult<AppliedUpdate> {
    let mut remapped_entities = 0;
    for remap in &plan.instructions {
        let affected = store
            .bulk_update_status(plan.type_key, &remap.old_status, &remap.new_status)
            .await?;
        debug!(
            type_key = %plan.type_key,
            old_status = %remap.old_status,
            new_status = %remap.new_status,
            affected,
            "Applied status remap"
        );
        remapped_entities += affected;
    }

    store
        .set_workflow(plan.type_key, &plan.final_workflow, plan.next_version())
        .await?;

    info!(
        type_key = %plan.type_key,
        version = plan.next_version(),
        remapped_entities,
        "Workflow updated"
    );

    Ok(AppliedUpdate {
        updated_type: plan.updated_type(current),
        remapped_entities,
    })
}

/// Run every migration instruction in order.
pub async fn apply_migration_plan(
    store: &dyn EntityStore,
    plan: &MigrationPlan,
) -> MigrationResult<AppliedMigration> {
    let mut per_instruction = Vec::with_capacity(plan.instructions.len());
    for instruction in &plan.instructions {
        let affected = match instruction {
            MigrationInstruction::Remap(remap) => {
                store
                    .reassign_status(
                        plan.source,
                        &plan.destination,
                        &remap.old_status,
                        &remap.new_status,
                    )
                    .await?
            }
            MigrationInstruction::Default(default) => {
                store
                    .reassign_remaining(
                        plan.source,
                        &plan.destination,
                        &default.excluded_old_statuses,
                        &default.new_status,
                    )
                    .await?
            }
        };
        per_instruction.push(affected);
    }

    let migrated: u64 = per_instruction.iter().sum();
    info!(
        source = %plan.source,
        dest = %plan.destination.key,
        migrated,
        "Type migration applied"
    );

    Ok(AppliedMigration {
        migrated,
        per_instruction,
    })
}
