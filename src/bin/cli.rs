use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use object_rules::app::entity_catalog;
use object_rules::config::RulesConfig;
use object_rules::db;
use object_rules::events;
use object_rules::rules::{loader, RuleRegistry, RuleStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "object-rules maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Register every application's rules.json and persist them
    SyncRules {
        /// Directory holding one folder per application; defaults to RULES_ROOT
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the persisted rules
    ListRules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::SyncRules { root } => {
            let config = RulesConfig::from_env()?;
            let root = root
                .or_else(|| config.rules_root.clone())
                .context("no rules directory: pass --root or set RULES_ROOT")?;
            sync_rules(&root, &config).await?;
        }
        Commands::ListRules => {
            let pool = db::init().await?;
            print_rules(&RuleStore::new(pool)).await?;
        }
    }

    Ok(())
}

async fn sync_rules(root: &Path, config: &RulesConfig) -> anyhow::Result<()> {
    let pool = db::init().await?;
    let store = RuleStore::new(pool.clone());
    let catalog = entity_catalog();
    let registry = RuleRegistry::new(config.duplicates);

    let report = loader::sync_dir(root, &registry, &catalog)?;
    for rule in &report.registered {
        store.save(rule).await?;
        let event = events::build_event("synced", None, rule.as_ref())?;
        events::append_audit(&pool, &event).await?;
        println!("synced  {}.{} -> {}", rule.entity_type(), rule.codename(), rule.field_name());
    }
    for codename in &report.skipped {
        println!("skipped {}", codename);
    }

    println!(
        "{} rules synced, {} skipped from {}",
        report.registered.len(),
        report.skipped.len(),
        root.display()
    );
    Ok(())
}

async fn print_rules(store: &RuleStore) -> anyhow::Result<()> {
    println!("{:<16} {:<20} {:<20} {}", "Entity", "Codename", "Field", "View param");
    for stored in store.load_all().await? {
        let spec = stored.spec;
        println!(
            "{:<16} {:<20} {:<20} {}",
            stored.entity_type,
            spec.codename,
            spec.field_name.unwrap_or_default(),
            spec.view_param_pk.unwrap_or_default()
        );
    }
    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, else the crate's own folder
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
