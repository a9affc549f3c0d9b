use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use corepm_workflow::{
    config, init_telemetry, CorePmConfig, EntityKind, FieldType, MigrationError, NewTypeField,
    NewWorkflowType, SqliteDatabase, StatusMapping, TypeFieldUpdate, TypeKey, TypeMetadataUpdate,
    TypeScope, WorkflowMigrationEngine, WorkflowService,
};

#[derive(Parser)]
#[command(name = "corepm-workflow")]
#[command(about = "Manage project/task type workflows and migrate statuses safely")]
#[command(long_about = "Administers the ordered status workflows of project types and task types. \
                       Workflow edits and type migrations are validated against the entities that \
                       currently use each status before anything is written.")]
struct Cli {
    /// Database URL, overrides configuration
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations
    Init {
        /// Also write the effective configuration to corepm.toml
        #[arg(long)]
        write_config: bool,
    },
    /// Create a project type or task type
    CreateType {
        /// project or task
        kind: EntityKind,
        name: String,
        /// Ordered statuses, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        workflow: Vec<String>,
        /// Defaults to a slug derived from the name
        #[arg(long)]
        slug: Option<String>,
        /// Owning team (required for task types)
        #[arg(long)]
        team: Option<i64>,
        #[arg(long)]
        description: Option<String>,
        /// Display color, e.g. #3b82f6
        #[arg(long)]
        color: Option<String>,
    },
    /// Print a type and its custom fields as JSON
    ShowType { kind: EntityKind, id: i64 },
    /// Edit a type's name, description or color (an empty value clears description and color)
    UpdateType {
        kind: EntityKind,
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Add a custom field definition to a type
    AddField {
        kind: EntityKind,
        type_id: i64,
        /// Lowercase identifier, unique per type
        key: String,
        label: String,
        /// text, textarea, number, select, multiselect, url, date or checkbox
        field_type: FieldType,
        /// Allowed value for select fields (repeatable)
        #[arg(long = "option")]
        options: Vec<String>,
        #[arg(long)]
        required: bool,
        #[arg(long, default_value_t = 0)]
        order: i64,
    },
    /// Edit a custom field's label, options, required flag or order
    UpdateField {
        kind: EntityKind,
        type_id: i64,
        field_id: i64,
        #[arg(long)]
        label: Option<String>,
        /// Replaces the allowed values (repeatable)
        #[arg(long = "option")]
        options: Vec<String>,
        #[arg(long)]
        required: Option<bool>,
        #[arg(long)]
        order: Option<i64>,
    },
    /// Remove a custom field definition
    RemoveField {
        kind: EntityKind,
        type_id: i64,
        field_id: i64,
    },
    /// Entity counts per status for a type
    Stats { kind: EntityKind, id: i64 },
    /// Replace a type's workflow, remapping statuses that disappear
    UpdateWorkflow {
        kind: EntityKind,
        id: i64,
        /// New ordered statuses, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        workflow: Vec<String>,
        /// Status mapping OLD=NEW (repeatable)
        #[arg(long = "map")]
        mappings: Vec<StatusMapping>,
        /// Validate and report without committing
        #[arg(long)]
        dry_run: bool,
    },
    /// Move every entity of one type into another type
    MigrateType {
        kind: EntityKind,
        source: i64,
        dest: i64,
        /// Status mapping OLD=NEW (repeatable)
        #[arg(long = "map")]
        mappings: Vec<StatusMapping>,
        /// Validate and report without committing
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete a type that no entity references
    DeleteType { kind: EntityKind, id: i64 },
    /// Create a project or task
    CreateEntity {
        kind: EntityKind,
        type_id: i64,
        title: String,
        /// Defaults to the first status of the type's workflow
        #[arg(long)]
        status: Option<String>,
    },
    /// Change the status of a project or task
    SetStatus {
        kind: EntityKind,
        id: i64,
        status: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_file = CorePmConfig::load_env_file();
    let mut config = config()?.clone();
    if let Some(url) = cli.database.clone() {
        config.database.url = url;
    }
    init_telemetry(&config.observability)?;
    match env_file {
        Ok(true) => info!("Loaded environment variables from .env file"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    let outcome = tokio::runtime::Runtime::new()?.block_on(async { run(cli.command, &config).await });

    if let Err(e) = outcome {
        eprintln!("❌ {e}");
        std::process::exit(exit_code(&e));
    }
    Ok(())
}

/// 2 for rejected requests, 1 for everything else.
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<MigrationError>() {
        Some(e) if e.is_validation() => 2,
        _ => 1,
    }
}

fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Commands, config: &CorePmConfig) -> Result<()> {
    let db = SqliteDatabase::new(
        &config.database.url,
        config.database.max_connections,
        config.database.auto_migrate,
    )
    .await?;
    let service = WorkflowService::new(WorkflowMigrationEngine::new(
        config.workflow.fallback_status.clone(),
    ));

    let result = execute(command, config, &db, &service).await;
    db.shutdown().await;
    result
}

async fn execute(
    command: Commands,
    config: &CorePmConfig,
    db: &SqliteDatabase,
    service: &WorkflowService,
) -> Result<()> {
    let store = db.begin().await?;

    match command {
        Commands::Init { write_config } => {
            store.commit().await?;
            println!("✅ Database ready at {}", config.database.url);
            if write_config {
                config.save_to_file("corepm.toml")?;
                println!("✅ Configuration written to corepm.toml");
            }
        }
        Commands::CreateType {
            kind,
            name,
            workflow,
            slug,
            team,
            description,
            color,
        } => {
            let scope = team.map(TypeScope::Team).unwrap_or(TypeScope::Global);
            let slug = slug.unwrap_or_else(|| slugify(&name));
            let created = service
                .create_type(
                    &store,
                    NewWorkflowType {
                        kind,
                        name,
                        slug,
                        description,
                        color,
                        scope,
                        workflow,
                        fields: Vec::new(),
                    },
                )
                .await?;
            store.commit().await?;
            println!("✅ Created {} ({})", created.key, created.slug);
            println!("   Workflow: {}", created.workflow.join(" → "));
        }
        Commands::ShowType { kind, id } => {
            let details = service.describe_type(&store, TypeKey { kind, id }).await?;
            print_json(&details)?;
        }
        Commands::UpdateType {
            kind,
            id,
            name,
            description,
            color,
        } => {
            let updated = service
                .update_type_metadata(
                    &store,
                    TypeKey { kind, id },
                    TypeMetadataUpdate {
                        name,
                        description,
                        color,
                    },
                )
                .await?;
            store.commit().await?;
            println!("✅ Updated {} ({})", updated.key, updated.name);
        }
        Commands::AddField {
            kind,
            type_id,
            key,
            label,
            field_type,
            options,
            required,
            order,
        } => {
            let field = service
                .add_field(
                    &store,
                    TypeKey { kind, id: type_id },
                    NewTypeField {
                        key,
                        label,
                        field_type,
                        options: (!options.is_empty()).then_some(options),
                        required,
                        order,
                    },
                )
                .await?;
            store.commit().await?;
            println!("✅ Added {} field '{}' (#{})", field.field_type, field.key, field.id);
        }
        Commands::UpdateField {
            kind,
            type_id,
            field_id,
            label,
            options,
            required,
            order,
        } => {
            let field = service
                .update_field(
                    &store,
                    TypeKey { kind, id: type_id },
                    field_id,
                    TypeFieldUpdate {
                        label,
                        options: (!options.is_empty()).then_some(options),
                        required,
                        order,
                    },
                )
                .await?;
            store.commit().await?;
            println!("✅ Updated field '{}' (#{})", field.key, field.id);
        }
        Commands::RemoveField {
            kind,
            type_id,
            field_id,
        } => {
            let key = TypeKey { kind, id: type_id };
            service.remove_field(&store, key, field_id).await?;
            store.commit().await?;
            println!("✅ Removed field #{field_id} from {key}");
        }
        Commands::Stats { kind, id } => {
            let stats = service.type_stats(&store, TypeKey { kind, id }).await?;
            println!("📊 {} - {} {}", stats.key, stats.total, kind.plural());
            for (status, count) in &stats.by_status {
                println!("   {status}: {count}");
            }
        }
        Commands::UpdateWorkflow {
            kind,
            id,
            workflow,
            mappings,
            dry_run,
        } => {
            let report = service
                .update_workflow(&store, TypeKey { kind, id }, workflow, &mappings)
                .await?;
            if dry_run {
                store.rollback().await?;
                println!("🔍 Dry run - no changes were committed");
            } else {
                store.commit().await?;
            }
            println!(
                "✅ {} now at version {}: {}",
                report.updated_type.key,
                report.updated_type.version,
                report.updated_type.workflow.join(" → ")
            );
            println!("   Remapped {} {}", report.remapped_entities, kind.plural());
            if !report.removed_statuses.is_empty() {
                println!("   Removed statuses: {}", report.removed_statuses.join(", "));
            }
        }
        Commands::MigrateType {
            kind,
            source,
            dest,
            mappings,
            dry_run,
        } => {
            let report = service
                .migrate_type(&store, TypeKey { kind, id: source }, TypeKey { kind, id: dest }, &mappings)
                .await?;
            if dry_run {
                store.rollback().await?;
                println!("🔍 Dry run - no changes were committed");
            } else {
                store.commit().await?;
            }
            println!(
                "✅ Migrated {} {} to {} ({})",
                report.migrated,
                kind.plural(),
                report.destination_name,
                report.destination
            );
            println!("   Unmapped statuses landed on '{}'", report.default_status);
        }
        Commands::DeleteType { kind, id } => {
            let key = TypeKey { kind, id };
            service.delete_type(&store, key).await?;
            store.commit().await?;
            println!("✅ Deleted {key}");
        }
        Commands::CreateEntity {
            kind,
            type_id,
            title,
            status,
        } => {
            let entity = service
                .create_entity(&store, TypeKey { kind, id: type_id }, &title, status.as_deref())
                .await?;
            store.commit().await?;
            println!("✅ Created {} #{} in status '{}'", kind, entity.id, entity.status);
        }
        Commands::SetStatus { kind, id, status } => {
            let entity = service.change_entity_status(&store, kind, id, &status).await?;
            store.commit().await?;
            println!("✅ {} #{} is now '{}'", kind, entity.id, entity.status);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Client Delivery"), "client-delivery");
        assert_eq!(slugify("  R&D / Research "), "r-d-research");
    }

    #[test]
    fn test_exit_code_for_validation_errors() {
        let rejected = anyhow::Error::new(MigrationError::TypeNotFound(TypeKey::project(1)));
        assert_eq!(exit_code(&rejected), 2);

        let other = anyhow::anyhow!("disk full");
        assert_eq!(exit_code(&other), 1);
    }
}
