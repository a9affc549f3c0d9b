// Property-Based Testing for workflow edits and type migrations
// Generates arbitrary workflows, entity distributions and mappings against the in-memory store

use corepm_workflow::workflow::{
    apply_migration_plan, apply_update_plan, DeletionDecision, DEFAULT_FALLBACK_STATUS,
};
use corepm_workflow::{
    EntityKind, EntityStore, InMemoryEntityStore, MigrationError, NewWorkflowType, StatusMapping,
    TypeScope, WorkflowMigrationEngine, WorkflowType,
};
use proptest::prelude::*;
use proptest::sample::{subsequence, Index};

const STATUS_POOL: [&str; 6] = ["Backlog", "Todo", "Doing", "Review", "Done", "Archived"];

// Strategy for generating a workflow of distinct statuses drawn from the pool
fn workflow_strategy(min: usize) -> impl Strategy<Value = Vec<String>> {
    subsequence(STATUS_POOL.to_vec(), min..=STATUS_POOL.len())
        .prop_map(|names| names.into_iter().map(str::to_string).collect::<Vec<_>>())
        .prop_shuffle()
}

async fn seed_type(store: &InMemoryEntityStore, slug: &str, workflow: Vec<String>) -> WorkflowType {
    // bypasses service validation so empty workflows can be exercised
    store
        .insert_type(&NewWorkflowType {
            kind: EntityKind::Project,
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            color: None,
            scope: TypeScope::Global,
            workflow,
            fields: Vec::new(),
        })
        .await
        .unwrap()
}

async fn seed_entities(store: &InMemoryEntityStore, ty: &WorkflowType, status: &str, n: u8) {
    for i in 0..n {
        store.insert_entity(ty, &format!("{status}-{i}"), status).await.unwrap();
    }
}

proptest! {
    #[test]
    fn prop_covered_update_succeeds_with_requested_workflow(
        old in workflow_strategy(1),
        new in workflow_strategy(1),
        counts in prop::collection::vec(0u8..4, STATUS_POOL.len()),
        targets in prop::collection::vec(any::<Index>(), STATUS_POOL.len()),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryEntityStore::new();
            let ty = seed_type(&store, "t", old.clone()).await;

            let mut mappings = Vec::new();
            for (i, status) in old.iter().enumerate() {
                seed_entities(&store, &ty, status, counts[i]).await;
                if !new.contains(status) && counts[i] > 0 {
                    mappings.push(StatusMapping::new(status.clone(), targets[i].get(&new).clone()));
                }
            }

            let engine = WorkflowMigrationEngine::default();
            let plan = engine
                .plan_workflow_update(&store, &ty, new.clone(), &mappings)
                .await;
            prop_assert!(plan.is_ok(), "covered update rejected: {:?}", plan.err());
            let plan = plan.unwrap();
            prop_assert_eq!(&plan.final_workflow, &new);

            let applied = apply_update_plan(&store, &ty, &plan).await.unwrap();
            prop_assert_eq!(&applied.updated_type.workflow, &new);
            for entity in store.entities_of_type(ty.key).await {
                prop_assert!(new.contains(&entity.status), "{} left outside workflow", entity.status);
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_first_unmapped_removed_status_is_reported_with_count(
        old in workflow_strategy(2),
        new in workflow_strategy(1),
        counts in prop::collection::vec(0u8..4, STATUS_POOL.len()),
    ) {
        let removed: Vec<&String> = old.iter().filter(|s| !new.contains(*s)).collect();
        prop_assume!(!removed.is_empty());

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryEntityStore::new();
            let ty = seed_type(&store, "t", old.clone()).await;
            for (i, status) in old.iter().enumerate() {
                seed_entities(&store, &ty, status, counts[i]).await;
            }

            let expected = old
                .iter()
                .enumerate()
                .find(|(i, s)| !new.contains(*s) && counts[*i] > 0)
                .map(|(i, s)| (s.clone(), counts[i] as u64));

            let engine = WorkflowMigrationEngine::default();
            let result = engine.plan_workflow_update(&store, &ty, new.clone(), &[]).await;

            match (expected, result) {
                (Some((status, count)), Err(MigrationError::UnmappedStatusInUse { status: got, count: got_count })) => {
                    prop_assert_eq!(got, status);
                    prop_assert_eq!(got_count, count);
                }
                (None, Ok(_)) => {}
                (expected, result) => {
                    prop_assert!(false, "expected {:?}, got {:?}", expected, result.map(|p| p.final_workflow));
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_update_plan_is_idempotent(
        old in workflow_strategy(1),
        new in workflow_strategy(1),
        counts in prop::collection::vec(0u8..3, STATUS_POOL.len()),
        remap_kept in prop::collection::vec(any::<bool>(), STATUS_POOL.len()),
        targets in prop::collection::vec(any::<Index>(), STATUS_POOL.len()),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryEntityStore::new();
            let ty = seed_type(&store, "t", old.clone()).await;
            let mut mappings = Vec::new();
            for (i, status) in old.iter().enumerate() {
                seed_entities(&store, &ty, status, counts[i]).await;
                // removed statuses are always mapped, kept ones sometimes
                if !new.contains(status) || remap_kept[i] {
                    mappings.push(StatusMapping::new(status.clone(), targets[i].get(&new).clone()));
                }
            }
            let chained = mappings.iter().any(|m| {
                m.old_status != m.new_status
                    && mappings.iter().any(|other| other.old_status == m.new_status)
            });

            let engine = WorkflowMigrationEngine::default();
            let plan = match engine.plan_workflow_update(&store, &ty, new, &mappings).await {
                Err(MigrationError::ChainedMapping { .. }) => {
                    prop_assert!(chained, "mappings without a chain were rejected");
                    return Ok(());
                }
                other => other.unwrap(),
            };
            prop_assert!(!chained, "chained mappings were accepted");

            apply_update_plan(&store, &ty, &plan).await.unwrap();
            let once = store.entities_of_type(ty.key).await;
            let type_once = store.find_type(ty.key).await.unwrap();

            // every entity moved exactly once, by its original status
            let expected: Vec<String> = old
                .iter()
                .enumerate()
                .flat_map(|(i, status)| {
                    let target = mappings
                        .iter()
                        .find(|m| &m.old_status == status)
                        .map(|m| m.new_status.clone())
                        .unwrap_or_else(|| status.clone());
                    std::iter::repeat(target).take(counts[i] as usize)
                })
                .collect();
            let statuses: Vec<String> = once.iter().map(|e| e.status.clone()).collect();
            prop_assert_eq!(statuses, expected);

            apply_update_plan(&store, &ty, &plan).await.unwrap();
            prop_assert_eq!(store.entities_of_type(ty.key).await, once);
            prop_assert_eq!(store.find_type(ty.key).await.unwrap(), type_once);
            Ok(())
        })?;
    }

    #[test]
    fn prop_type_migration_moves_every_entity(
        source_workflow in workflow_strategy(1),
        dest_workflow in workflow_strategy(0),
        source_counts in prop::collection::vec(0u8..4, STATUS_POOL.len()),
        dest_existing in 0u8..3,
        mapped in prop::collection::vec((any::<bool>(), any::<Index>()), STATUS_POOL.len()),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryEntityStore::new();
            let source = seed_type(&store, "source", source_workflow.clone()).await;
            let dest = seed_type(&store, "dest", dest_workflow.clone()).await;

            let mut mappings = Vec::new();
            for (i, status) in source_workflow.iter().enumerate() {
                seed_entities(&store, &source, status, source_counts[i]).await;
                let (use_mapping, target) = &mapped[i];
                if *use_mapping && !dest_workflow.is_empty() {
                    mappings.push(StatusMapping::new(status.clone(), target.get(&dest_workflow).clone()));
                }
            }
            if let Some(first) = dest_workflow.first() {
                seed_entities(&store, &dest, first, dest_existing).await;
            }

            let source_before = store.count_by_type(source.key).await.unwrap();
            let dest_before = store.count_by_type(dest.key).await.unwrap();
            let before = store.entities_of_type(source.key).await;

            let engine = WorkflowMigrationEngine::default();
            let plan = engine
                .plan_type_migration(&store, &source, &dest, &mappings)
                .await
                .unwrap();
            let applied = apply_migration_plan(&store, &plan).await.unwrap();

            prop_assert_eq!(applied.migrated, source_before);
            prop_assert_eq!(store.count_by_type(source.key).await.unwrap(), 0);
            prop_assert_eq!(store.count_by_type(dest.key).await.unwrap(), dest_before + source_before);

            let default_status = dest_workflow
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_FALLBACK_STATUS.to_string());
            for entity in before {
                let moved = store.find_entity(EntityKind::Project, entity.id).await.unwrap().unwrap();
                let expected = mappings
                    .iter()
                    .find(|m| m.old_status == entity.status)
                    .map(|m| m.new_status.clone())
                    .unwrap_or_else(|| default_status.clone());
                prop_assert_eq!(moved.type_id, dest.key.id);
                prop_assert_eq!(moved.status, expected);
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_deletion_allowed_only_at_zero(count in 0u8..5) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryEntityStore::new();
            let ty = seed_type(&store, "t", vec!["Open".to_string()]).await;
            seed_entities(&store, &ty, "Open", count).await;

            let decision = WorkflowMigrationEngine::default()
                .plan_type_deletion(&store, &ty)
                .await
                .unwrap();
            prop_assert_eq!(decision.is_allowed(), count == 0);
            if count == 0 {
                prop_assert_eq!(decision, DeletionDecision::Allow);
            } else {
                prop_assert_eq!(decision, DeletionDecision::Deny { count: count as u64 });
            }
            Ok(())
        })?;
    }
}
