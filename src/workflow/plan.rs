use serde::{Deserialize, Serialize};

use super::types::{TypeKey, WorkflowType};

/// Move every entity in `old_status` to `new_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRemap {
    pub old_status: String,
    pub new_status: String,
}

/// Move every entity whose status is not listed in `excluded_old_statuses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRemap {
    pub excluded_old_statuses: Vec<String>,
    pub new_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationInstruction {
    Remap(StatusRemap),
    Default(DefaultRemap),
}

/// Validated plan for an in-place workflow edit.
///
/// Apply `instructions` in order, then assign `final_workflow`, inside one
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub type_key: TypeKey,
    pub instructions: Vec<StatusRemap>,
    pub final_workflow: Vec<String>,
    pub removed_statuses: Vec<String>,
    pub base_version: i64,
}

impl UpdatePlan {
    pub fn next_version(&self) -> i64 {
        self.base_version + 1
    }

    /// The type record as it reads once the plan is applied.
    pub fn updated_type(&self, current: &WorkflowType) -> WorkflowType {
        WorkflowType {
            workflow: self.final_workflow.clone(),
            version: self.next_version(),
            ..current.clone()
        }
    }
}

/// Validated plan for moving every entity of one type to another.
///
/// The instructions cover each source entity exactly once: one `Remap` per
/// mapped old status, then one `Default` for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source: TypeKey,
    pub destination: WorkflowType,
    pub instructions: Vec<MigrationInstruction>,
    pub default_status: String,
    pub affected_count: u64,
}

/// Outcome of a deletion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionDecision {
    Allow,
    Deny { count: u64 },
}

impl DeletionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DeletionDecision::Allow)
    }
}
