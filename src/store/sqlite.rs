use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{EntityStore, StoreError, StoreResult};
use crate::workflow::types::{
    EntityKind, FieldType, NewTypeField, NewWorkflowType, TypeField, TypeKey, TypeMetadata,
    TypeScope, WorkflowEntity, WorkflowType,
};

/// Table and column names for one entity kind.
struct Tables {
    types: &'static str,
    entities: &'static str,
    fields: &'static str,
    /// Column referencing the type, in both the entities and fields tables.
    type_column: &'static str,
    /// Expression selected as `team_id` from the types table.
    type_team: &'static str,
    /// Expression selected as `team_id` from the entities table.
    entity_team: &'static str,
}

fn tables(kind: EntityKind) -> Tables {
    match kind {
        EntityKind::Project => Tables {
            types: "project_types",
            entities: "projects",
            fields: "project_type_fields",
            type_column: "project_type_id",
            type_team: "NULL",
            entity_team: "NULL",
        },
        EntityKind::Task => Tables {
            types: "task_types",
            entities: "tasks",
            fields: "task_type_fields",
            type_column: "task_type_id",
            type_team: "team_id",
            entity_team: "team_id",
        },
    }
}

fn type_select(kind: EntityKind) -> String {
    let t = tables(kind);
    format!(
        "SELECT id, name, slug, description, color, workflow, version, {} AS team_id FROM {}",
        t.type_team, t.types
    )
}

fn entity_select(kind: EntityKind) -> String {
    let t = tables(kind);
    format!(
        "SELECT id, {} AS type_id, {} AS team_id, title, status FROM {}",
        t.type_column, t.entity_team, t.entities
    )
}

fn field_select(kind: EntityKind) -> String {
    let t = tables(kind);
    format!(
        "SELECT id, {} AS type_id, key, label, field_type, options, required, position FROM {}",
        t.type_column, t.fields
    )
}

fn row_to_type(kind: EntityKind, row: &SqliteRow) -> StoreResult<WorkflowType> {
    let workflow: String = row.try_get("workflow")?;
    let team_id: Option<i64> = row.try_get("team_id")?;
    Ok(WorkflowType {
        key: TypeKey {
            kind,
            id: row.try_get("id")?,
        },
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        color: row.try_get("color")?,
        scope: team_id.map(TypeScope::Team).unwrap_or(TypeScope::Global),
        workflow: serde_json::from_str(&workflow)?,
        version: row.try_get("version")?,
    })
}

fn row_to_entity(kind: EntityKind, row: &SqliteRow) -> StoreResult<WorkflowEntity> {
    Ok(WorkflowEntity {
        id: row.try_get("id")?,
        kind,
        type_id: row.try_get("type_id")?,
        team_id: row.try_get("team_id")?,
        title: row.try_get("title")?,
        status: row.try_get("status")?,
    })
}

fn row_to_field(kind: EntityKind, row: &SqliteRow) -> StoreResult<TypeField> {
    let field_type: String = row.try_get("field_type")?;
    let options: Option<String> = row.try_get("options")?;
    Ok(TypeField {
        id: row.try_get("id")?,
        type_key: TypeKey {
            kind,
            id: row.try_get("type_id")?,
        },
        key: row.try_get("key")?,
        label: row.try_get("label")?,
        field_type: FieldType::from_str(&field_type)
            .map_err(|reason| StoreError::InvalidValue { reason })?,
        options: options.map(|o| serde_json::from_str(&o)).transpose()?,
        required: row.try_get("required")?,
        order: row.try_get("position")?,
    })
}

async fn insert_field_row(
    conn: &mut SqliteConnection,
    key: TypeKey,
    field: &NewTypeField,
) -> StoreResult<TypeField> {
    let t = tables(key.kind);
    let sql = format!(
        "INSERT INTO {} ({}, key, label, field_type, options, required, position) VALUES (?, ?, ?, ?, ?, ?, ?)",
        t.fields, t.type_column
    );
    let options = field.options.as_ref().map(serde_json::to_string).transpose()?;
    let result = sqlx::query(&sql)
        .bind(key.id)
        .bind(&field.key)
        .bind(&field.label)
        .bind(field.field_type.as_str())
        .bind(options)
        .bind(field.required)
        .bind(field.order)
        .execute(conn)
        .await?;

    Ok(TypeField {
        id: result.last_insert_rowid(),
        type_key: key,
        key: field.key.clone(),
        label: field.label.clone(),
        field_type: field.field_type,
        options: field.options.clone(),
        required: field.required,
        order: field.order,
    })
}

fn require_team(kind: EntityKind, scope: TypeScope) -> StoreResult<Option<i64>> {
    match (kind, scope) {
        (EntityKind::Project, _) => Ok(None),
        (EntityKind::Task, TypeScope::Team(team_id)) => Ok(Some(team_id)),
        (EntityKind::Task, TypeScope::Global) => Err(StoreError::Conflict {
            reason: "task types must belong to a team".to_string(),
        }),
    }
}

/// Database manager owning the connection pool.
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open (creating if needed) the database and optionally run migrations.
    pub async fn new(database_url: &str, max_connections: u32, auto_migrate: bool) -> StoreResult<Self> {
        if !Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        if auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    /// Start a transaction. Everything done through the returned store is
    /// discarded unless [`SqliteEntityStore::commit`] is called.
    pub async fn begin(&self) -> StoreResult<SqliteEntityStore> {
        let tx = self.pool.begin().await?;
        Ok(SqliteEntityStore { tx: Mutex::new(tx) })
    }

    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

/// `EntityStore` bound to a single SQLite transaction.
pub struct SqliteEntityStore {
    tx: Mutex<Transaction<'static, Sqlite>>,
}

impl SqliteEntityStore {
    pub async fn commit(self) -> StoreResult<()> {
        self.tx.into_inner().commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.tx.into_inner().rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn find_type(&self, key: TypeKey) -> StoreResult<Option<WorkflowType>> {
        let sql = format!("{} WHERE id = ?", type_select(key.kind));
        let mut tx = self.tx.lock().await;
        let row = sqlx::query(&sql)
            .bind(key.id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| row_to_type(key.kind, &r)).transpose()
    }

    async fn find_type_by_slug(
        &self,
        kind: EntityKind,
        scope: TypeScope,
        slug: &str,
    ) -> StoreResult<Option<WorkflowType>> {
        let mut tx = self.tx.lock().await;
        let row = match require_team(kind, scope)? {
            Some(team_id) => {
                let sql = format!("{} WHERE slug = ? AND team_id = ?", type_select(kind));
                sqlx::query(&sql)
                    .bind(slug)
                    .bind(team_id)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            None => {
                let sql = format!("{} WHERE slug = ?", type_select(kind));
                sqlx::query(&sql).bind(slug).fetch_optional(&mut **tx).await?
            }
        };
        row.map(|r| row_to_type(kind, &r)).transpose()
    }

    async fn insert_type(&self, new_type: &NewWorkflowType) -> StoreResult<WorkflowType> {
        let workflow = serde_json::to_string(&new_type.workflow)?;
        let team_id = require_team(new_type.kind, new_type.scope)?;
        let mut tx = self.tx.lock().await;

        let result = match team_id {
            Some(team_id) => {
                sqlx::query(
                    "INSERT INTO task_types (team_id, name, slug, description, color, workflow, version) VALUES (?, ?, ?, ?, ?, ?, 1)",
                )
                .bind(team_id)
                .bind(&new_type.name)
                .bind(&new_type.slug)
                .bind(&new_type.description)
                .bind(&new_type.color)
                .bind(&workflow)
                .execute(&mut **tx)
                .await?
            }
            None => {
                sqlx::query(
                    "INSERT INTO project_types (name, slug, description, color, workflow, version) VALUES (?, ?, ?, ?, ?, 1)",
                )
                .bind(&new_type.name)
                .bind(&new_type.slug)
                .bind(&new_type.description)
                .bind(&new_type.color)
                .bind(&workflow)
                .execute(&mut **tx)
                .await?
            }
        };

        let key = TypeKey {
            kind: new_type.kind,
            id: result.last_insert_rowid(),
        };
        for field in &new_type.fields {
            insert_field_row(&mut **tx, key, field).await?;
        }

        Ok(WorkflowType {
            key,
            name: new_type.name.clone(),
            slug: new_type.slug.clone(),
            description: new_type.description.clone(),
            color: new_type.color.clone(),
            scope: new_type.scope,
            workflow: new_type.workflow.clone(),
            version: 1,
        })
    }

    async fn delete_type(&self, key: TypeKey) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", tables(key.kind).types);
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql).bind(key.id).execute(&mut **tx).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_metadata(&self, key: TypeKey, metadata: &TypeMetadata) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET name = ?, description = ?, color = ?, updated_at = datetime('now') WHERE id = ?",
            tables(key.kind).types
        );
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql)
            .bind(&metadata.name)
            .bind(&metadata.description)
            .bind(&metadata.color)
            .bind(key.id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                reason: format!("{key} disappeared"),
            });
        }
        Ok(())
    }

    async fn list_fields(&self, key: TypeKey) -> StoreResult<Vec<TypeField>> {
        let sql = format!(
            "{} WHERE {} = ? ORDER BY position, id",
            field_select(key.kind),
            tables(key.kind).type_column
        );
        let mut tx = self.tx.lock().await;
        let rows = sqlx::query(&sql).bind(key.id).fetch_all(&mut **tx).await?;
        rows.iter().map(|r| row_to_field(key.kind, r)).collect()
    }

    async fn insert_field(&self, key: TypeKey, field: &NewTypeField) -> StoreResult<TypeField> {
        let mut tx = self.tx.lock().await;
        insert_field_row(&mut **tx, key, field).await
    }

    async fn find_field(&self, key: TypeKey, field_id: i64) -> StoreResult<Option<TypeField>> {
        let sql = format!(
            "{} WHERE id = ? AND {} = ?",
            field_select(key.kind),
            tables(key.kind).type_column
        );
        let mut tx = self.tx.lock().await;
        let row = sqlx::query(&sql)
            .bind(field_id)
            .bind(key.id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| row_to_field(key.kind, &r)).transpose()
    }

    async fn save_field(&self, field: &TypeField) -> StoreResult<()> {
        let t = tables(field.type_key.kind);
        let sql = format!(
            "UPDATE {} SET label = ?, options = ?, required = ?, position = ? WHERE id = ? AND {} = ?",
            t.fields, t.type_column
        );
        let options = field.options.as_ref().map(serde_json::to_string).transpose()?;
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql)
            .bind(&field.label)
            .bind(options)
            .bind(field.required)
            .bind(field.order)
            .bind(field.id)
            .bind(field.type_key.id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                reason: format!("field #{} disappeared", field.id),
            });
        }
        Ok(())
    }

    async fn delete_field(&self, key: TypeKey, field_id: i64) -> StoreResult<bool> {
        let t = tables(key.kind);
        let sql = format!("DELETE FROM {} WHERE id = ? AND {} = ?", t.fields, t.type_column);
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql)
            .bind(field_id)
            .bind(key.id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_workflow(&self, key: TypeKey, workflow: &[String], version: i64) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET workflow = ?, version = ?, updated_at = datetime('now') WHERE id = ?",
            tables(key.kind).types
        );
        let encoded = serde_json::to_string(workflow)?;
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql)
            .bind(encoded)
            .bind(version)
            .bind(key.id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                reason: format!("{key} disappeared"),
            });
        }
        Ok(())
    }

    async fn count_by_type_and_status(&self, key: TypeKey, status: &str) -> StoreResult<u64> {
        let t = tables(key.kind);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ? AND status = ?",
            t.entities, t.type_column
        );
        let mut tx = self.tx.lock().await;
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(key.id)
            .bind(status)
            .fetch_one(&mut **tx)
            .await?;
        Ok(count as u64)
    }

    async fn count_by_type(&self, key: TypeKey) -> StoreResult<u64> {
        let t = tables(key.kind);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", t.entities, t.type_column);
        let mut tx = self.tx.lock().await;
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(key.id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(count as u64)
    }

    async fn bulk_update_status(
        &self,
        key: TypeKey,
        old_status: &str,
        new_status: &str,
    ) -> StoreResult<u64> {
        let t = tables(key.kind);
        let sql = format!(
            "UPDATE {} SET status = ?, updated_at = datetime('now') WHERE {} = ? AND status = ?",
            t.entities, t.type_column
        );
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql)
            .bind(new_status)
            .bind(key.id)
            .bind(old_status)
            .execute(&mut **tx)
            .await?;
        debug!(%key, old_status, new_status, rows = result.rows_affected(), "bulk_update_status");
        Ok(result.rows_affected())
    }

    async fn reassign_status(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        old_status: &str,
        new_status: &str,
    ) -> StoreResult<u64> {
        let t = tables(source.kind);
        let team_id = require_team(dest.kind(), dest.scope)?;
        let team_set = if team_id.is_some() { "team_id = ?, " } else { "" };
        let sql = format!(
            "UPDATE {} SET {} = ?, status = ?, {}updated_at = datetime('now') WHERE {} = ? AND status = ?",
            t.entities, t.type_column, team_set, t.type_column
        );

        let mut query = sqlx::query(&sql).bind(dest.key.id).bind(new_status);
        if let Some(team_id) = team_id {
            query = query.bind(team_id);
        }
        let mut tx = self.tx.lock().await;
        let result = query
            .bind(source.id)
            .bind(old_status)
            .execute(&mut **tx)
            .await?;
        debug!(%source, dest = %dest.key, old_status, new_status, rows = result.rows_affected(), "reassign_status");
        Ok(result.rows_affected())
    }

    async fn reassign_remaining(
        &self,
        source: TypeKey,
        dest: &WorkflowType,
        excluded: &[String],
        new_status: &str,
    ) -> StoreResult<u64> {
        let t = tables(source.kind);
        let team_id = require_team(dest.kind(), dest.scope)?;
        let team_set = if team_id.is_some() { "team_id = ?, " } else { "" };
        let exclusion = if excluded.is_empty() {
            String::new()
        } else {
            let placeholders = vec!["?"; excluded.len()].join(", ");
            format!(" AND status NOT IN ({placeholders})")
        };
        let sql = format!(
            "UPDATE {} SET {} = ?, status = ?, {}updated_at = datetime('now') WHERE {} = ?{}",
            t.entities, t.type_column, team_set, t.type_column, exclusion
        );

        let mut query = sqlx::query(&sql).bind(dest.key.id).bind(new_status);
        if let Some(team_id) = team_id {
            query = query.bind(team_id);
        }
        query = query.bind(source.id);
        for status in excluded {
            query = query.bind(status);
        }
        let mut tx = self.tx.lock().await;
        let result = query.execute(&mut **tx).await?;
        debug!(%source, dest = %dest.key, excluded = excluded.len(), new_status, rows = result.rows_affected(), "reassign_remaining");
        Ok(result.rows_affected())
    }

    async fn insert_entity(
        &self,
        ty: &WorkflowType,
        title: &str,
        status: &str,
    ) -> StoreResult<WorkflowEntity> {
        let team_id = require_team(ty.kind(), ty.scope)?;
        let mut tx = self.tx.lock().await;
        let result = match team_id {
            Some(team_id) => {
                sqlx::query("INSERT INTO tasks (team_id, task_type_id, title, status) VALUES (?, ?, ?, ?)")
                    .bind(team_id)
                    .bind(ty.key.id)
                    .bind(title)
                    .bind(status)
                    .execute(&mut **tx)
                    .await?
            }
            None => {
                sqlx::query("INSERT INTO projects (project_type_id, title, status) VALUES (?, ?, ?)")
                    .bind(ty.key.id)
                    .bind(title)
                    .bind(status)
                    .execute(&mut **tx)
                    .await?
            }
        };

        Ok(WorkflowEntity {
            id: result.last_insert_rowid(),
            kind: ty.kind(),
            type_id: ty.key.id,
            team_id,
            title: title.to_string(),
            status: status.to_string(),
        })
    }

    async fn find_entity(&self, kind: EntityKind, id: i64) -> StoreResult<Option<WorkflowEntity>> {
        let sql = format!("{} WHERE id = ?", entity_select(kind));
        let mut tx = self.tx.lock().await;
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?;
        row.map(|r| row_to_entity(kind, &r)).transpose()
    }

    async fn update_entity_status(&self, kind: EntityKind, id: i64, status: &str) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET status = ?, updated_at = datetime('now') WHERE id = ?",
            tables(kind).entities
        );
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql)
            .bind(status)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                reason: format!("{kind} #{id} disappeared"),
            });
        }
        Ok(())
    }
}
