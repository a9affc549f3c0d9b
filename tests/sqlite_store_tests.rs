// SQLite-backed store: transactions, rollback on rejection, and bulk statements
#![cfg(feature = "database")]

use corepm_workflow::{
    EntityKind, EntityStore, FieldType, MigrationError, NewTypeField, NewWorkflowType,
    SqliteDatabase, StatusMapping, TypeFieldUpdate, TypeMetadataUpdate, TypeScope,
    WorkflowService, WorkflowType,
};
use tempfile::TempDir;

fn statuses(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

async fn memory_db() -> SqliteDatabase {
    SqliteDatabase::new("sqlite::memory:", 1, true)
        .await
        .expect("in-memory database should open")
}

async fn seed(db: &SqliteDatabase, slug: &str, workflow: &[&str], entities: &[(&str, usize)]) -> WorkflowType {
    let service = WorkflowService::default();
    let store = db.begin().await.unwrap();
    let ty = service
        .create_type(
            &store,
            NewWorkflowType {
                kind: EntityKind::Project,
                name: slug.to_string(),
                slug: slug.to_string(),
                description: None,
                color: None,
                scope: TypeScope::Global,
                workflow: statuses(workflow),
                fields: Vec::new(),
            },
        )
        .await
        .unwrap();
    for (status, n) in entities {
        for i in 0..*n {
            store
                .insert_entity(&ty, &format!("{slug}-{i}"), status)
                .await
                .unwrap();
        }
    }
    store.commit().await.unwrap();
    ty
}

#[tokio::test]
async fn test_workflow_update_commits_remap_and_version() {
    let db = memory_db().await;
    let ty = seed(&db, "delivery", &["Backlog", "Doing", "Done"], &[("Doing", 3)]).await;
    let service = WorkflowService::default();

    let store = db.begin().await.unwrap();
    let report = service
        .update_workflow(
            &store,
            ty.key,
            statuses(&["Backlog", "InProgress", "Done"]),
            &[StatusMapping::new("Doing", "InProgress")],
        )
        .await
        .unwrap();
    store.commit().await.unwrap();
    assert_eq!(report.remapped_entities, 3);

    let store = db.begin().await.unwrap();
    let stored = store.find_type(ty.key).await.unwrap().unwrap();
    assert_eq!(stored.workflow, statuses(&["Backlog", "InProgress", "Done"]));
    assert_eq!(stored.version, 2);
    assert_eq!(store.count_by_type_and_status(ty.key, "InProgress").await.unwrap(), 3);
    assert_eq!(store.count_by_type_and_status(ty.key, "Doing").await.unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_update_writes_nothing() {
    let db = memory_db().await;
    let ty = seed(&db, "delivery", &["Backlog", "Doing", "Done"], &[("Doing", 2)]).await;
    let service = WorkflowService::default();

    {
        let store = db.begin().await.unwrap();
        let err = service
            .update_workflow(&store, ty.key, statuses(&["Backlog", "InProgress", "Done"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnmappedStatusInUse { count: 2, .. }));
        // dropped without commit
    }

    let store = db.begin().await.unwrap();
    assert_eq!(store.find_type(ty.key).await.unwrap().unwrap(), ty);
    assert_eq!(store.count_by_type_and_status(ty.key, "Doing").await.unwrap(), 2);
}

#[tokio::test]
async fn test_dry_run_rollback_discards_migration() {
    let db = memory_db().await;
    let a = seed(&db, "a", &["Open", "Closed"], &[("Open", 3), ("Closed", 2)]).await;
    let b = seed(&db, "b", &["New", "Active", "Done"], &[]).await;
    let service = WorkflowService::default();

    let store = db.begin().await.unwrap();
    let report = service
        .migrate_type(&store, a.key, b.key, &[StatusMapping::new("Open", "Active")])
        .await
        .unwrap();
    assert_eq!(report.per_instruction, vec![3, 2]);
    store.rollback().await.unwrap();

    let store = db.begin().await.unwrap();
    assert_eq!(store.count_by_type(a.key).await.unwrap(), 5);
    assert_eq!(store.count_by_type(b.key).await.unwrap(), 0);
}

#[tokio::test]
async fn test_migration_and_delete_commit_together() {
    let db = memory_db().await;
    let a = seed(&db, "a", &["Open", "Closed"], &[("Open", 3), ("Closed", 2)]).await;
    let b = seed(&db, "b", &["New", "Active", "Done"], &[("Done", 1)]).await;
    let service = WorkflowService::default();

    let store = db.begin().await.unwrap();
    service
        .migrate_type(&store, a.key, b.key, &[StatusMapping::new("Open", "Active")])
        .await
        .unwrap();
    service.delete_type(&store, a.key).await.unwrap();
    store.commit().await.unwrap();

    let store = db.begin().await.unwrap();
    assert!(store.find_type(a.key).await.unwrap().is_none());
    assert_eq!(store.count_by_type(b.key).await.unwrap(), 6);
    assert_eq!(store.count_by_type_and_status(b.key, "Active").await.unwrap(), 3);
    assert_eq!(store.count_by_type_and_status(b.key, "New").await.unwrap(), 2);
}

#[tokio::test]
async fn test_database_file_is_created_and_reopened() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("corepm.db").display());

    let db = SqliteDatabase::new(&url, 2, true).await.unwrap();
    let ty = seed(&db, "delivery", &["Open"], &[("Open", 1)]).await;
    db.shutdown().await;

    let db = SqliteDatabase::new(&url, 2, true).await.unwrap();
    let store = db.begin().await.unwrap();
    assert_eq!(store.find_type(ty.key).await.unwrap().unwrap().slug, "delivery");
    assert_eq!(store.count_by_type(ty.key).await.unwrap(), 1);
}

#[tokio::test]
async fn test_field_definitions_persist_and_go_with_their_type() {
    let db = memory_db().await;
    let ty = seed(&db, "delivery", &["Backlog", "Done"], &[]).await;
    let service = WorkflowService::default();

    let store = db.begin().await.unwrap();
    let field = service
        .add_field(
            &store,
            ty.key,
            NewTypeField {
                key: "client_tier".to_string(),
                label: "Client tier".to_string(),
                field_type: FieldType::Multiselect,
                options: Some(statuses(&["gold", "silver"])),
                required: false,
                order: 1,
            },
        )
        .await
        .unwrap();
    service
        .update_field(
            &store,
            ty.key,
            field.id,
            TypeFieldUpdate {
                required: Some(true),
                ..TypeFieldUpdate::default()
            },
        )
        .await
        .unwrap();
    service
        .update_type_metadata(
            &store,
            ty.key,
            TypeMetadataUpdate {
                description: Some("Client projects".to_string()),
                color: Some("#3b82f6".to_string()),
                ..TypeMetadataUpdate::default()
            },
        )
        .await
        .unwrap();
    store.commit().await.unwrap();

    let store = db.begin().await.unwrap();
    let details = service.describe_type(&store, ty.key).await.unwrap();
    assert_eq!(details.ty.description.as_deref(), Some("Client projects"));
    assert_eq!(details.ty.color.as_deref(), Some("#3b82f6"));
    assert_eq!(details.ty.workflow, statuses(&["Backlog", "Done"]));
    assert_eq!(details.fields.len(), 1);
    assert!(details.fields[0].required);
    assert_eq!(details.fields[0].options, Some(statuses(&["gold", "silver"])));

    let err = service
        .add_field(
            &store,
            ty.key,
            NewTypeField {
                key: "client_tier".to_string(),
                label: "Tier".to_string(),
                field_type: FieldType::Text,
                options: None,
                required: false,
                order: 0,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateFieldKey { .. }));

    service.delete_type(&store, ty.key).await.unwrap();
    assert!(store.find_field(ty.key, field.id).await.unwrap().is_none());
    store.commit().await.unwrap();
}
