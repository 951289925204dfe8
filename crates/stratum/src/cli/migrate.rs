use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing::info;

use stratum_core::config::StratumConfig;
use stratum_core::migration::{
    AppliedOutcome, Direction, MigrationContext, MigrationResult, MigrationStatus, Target,
};
use stratum_core::version::VersionStore;
use stratum_runtime::migrations::indexing;
use stratum_runtime::{Database, MigrationRegistry, MigrationRunner, PgVersionStore};

use super::logging;

/// Manage migrations of relational namespaces.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "stratum.toml", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Apply pending migrations.
    Up {
        /// Namespace to migrate (defaults to every configured namespace).
        #[arg(short, long)]
        namespace: Option<String>,

        /// Stop at this version instead of the latest.
        #[arg(long, requires = "namespace")]
        to: Option<u32>,
    },

    /// Roll back applied migrations.
    Down {
        /// Namespace to roll back.
        #[arg(short, long)]
        namespace: String,

        /// Version to roll back to.
        #[arg(long, conflicts_with = "steps", required_unless_present = "steps")]
        to: Option<u32>,

        /// Number of migrations to roll back.
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Show migration status.
    Status {
        /// Namespace to inspect (defaults to every configured namespace).
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

impl MigrateCommand {
    pub async fn execute(self, verbose: bool) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let config_path = Path::new(&self.config);
        if !config_path.exists() {
            bail!("Configuration file not found: {}", self.config);
        }
        let config = StratumConfig::from_file(config_path)?;
        logging::init(&config.logging, verbose);
        info!("Loaded configuration from {}", self.config);

        let mut registry = MigrationRegistry::new();
        indexing::register(&mut registry)?;

        let db = Database::from_config(&config.database).await?;
        db.health_check().await?;
        let store = Arc::new(PgVersionStore::from_config(
            db.pool().clone(),
            &config.migrations,
        )?);
        let runner = MigrationRunner::new(Arc::new(registry), store.clone());
        let ctx = MigrationContext::relational(db.pool().clone());

        let outcome = match self.action {
            MigrateAction::Up { namespace, to } => {
                print_header("Migrations");
                let namespaces = select_namespaces(namespace, &config, runner.registry())?;
                let mut failed = false;
                for ns in &namespaces {
                    let result = runner
                        .migrate(ns, &ctx, Direction::Up, Target::from(to))
                        .await?;
                    failed |= print_result(&result);
                }
                finish(failed)
            }

            MigrateAction::Down {
                namespace,
                to,
                steps,
            } => {
                print_header("Migrations");
                let namespace = select_namespaces(Some(namespace), &config, runner.registry())?
                    .remove(0);
                let result = match (to, steps) {
                    (Some(version), _) => {
                        runner
                            .migrate(&namespace, &ctx, Direction::Down, Target::Version(version))
                            .await?
                    }
                    (None, Some(steps)) => runner.rollback(&namespace, &ctx, steps).await?,
                    (None, None) => bail!("Either --to or --steps is required"),
                };
                let failed = print_result(&result);
                finish(failed)
            }

            MigrateAction::Status { namespace } => {
                print_header("Migration Status");
                let namespaces = select_namespaces(namespace, &config, runner.registry())?;
                for ns in &namespaces {
                    print_status(&runner.status(ns).await?);
                }
                print_untracked(store.as_ref(), runner.registry()).await?;
                Ok(())
            }
        };

        db.close().await;
        outcome
    }
}

/// Namespaces a command applies to, in run order.
fn select_namespaces(
    explicit: Option<String>,
    config: &StratumConfig,
    registry: &MigrationRegistry,
) -> Result<Vec<String>> {
    let namespaces = match explicit {
        Some(ns) => vec![ns],
        None if !config.migrations.namespaces.is_empty() => config.migrations.namespaces.clone(),
        None => registry.namespaces().into_iter().map(String::from).collect(),
    };

    for ns in &namespaces {
        if !registry.contains_namespace(ns) {
            bail!(
                "Unknown namespace '{}'. The command line drives relational namespaces only; \
                 directory namespaces are migrated by embedding stratum-runtime with a directory client.",
                ns
            );
        }
    }
    Ok(namespaces)
}

fn print_header(title: &str) {
    println!();
    println!("  {} {}", style("STRATUM").bold().cyan(), title);
    println!();
}

/// Print a run report. Returns true if the run failed.
fn print_result(result: &MigrationResult) -> bool {
    println!(
        "  {} {} ({})",
        style("→").dim(),
        style(&result.namespace).bold(),
        result.direction
    );

    if result.applied.is_empty() && result.is_success() {
        println!(
            "    {} Nothing to do, at version {}",
            style("ℹ").blue(),
            result.final_version
        );
    }

    for unit in &result.applied {
        match &unit.outcome {
            AppliedOutcome::Success => println!(
                "    {} v{} {} {}",
                style("✓").green(),
                unit.version,
                unit.description,
                style(format!("{}ms", unit.duration_ms)).dim()
            ),
            AppliedOutcome::Skipped { reason } => println!(
                "    {} v{} {} {}",
                style("○").yellow(),
                unit.version,
                unit.description,
                style(format!("skipped: {}", reason)).dim()
            ),
        }
        for warning in &unit.warnings {
            println!("      {} {}", style("!").yellow(), warning);
        }
    }

    match &result.error {
        Some(error) => {
            println!("    {} {}", style("✗").red(), error);
            println!(
                "    {} Recorded version: {}",
                style("ℹ").blue(),
                result.final_version
            );
            true
        }
        None => {
            if result.changed() {
                println!(
                    "    {} Version {} → {}",
                    style("✓").green(),
                    result.initial_version,
                    result.final_version
                );
            }
            false
        }
    }
}

fn print_status(status: &MigrationStatus) {
    let latest = status
        .latest
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {} at version {} (latest {})",
        style("→").dim(),
        style(&status.namespace).bold(),
        status.current,
        latest
    );

    for unit in &status.applied {
        let marker = if unit.reversible {
            style("↓").green().to_string()
        } else {
            style("-").dim().to_string()
        };
        println!(
            "    {} {} v{} {}",
            style("✓").green(),
            marker,
            unit.version,
            unit.description
        );
    }
    for unit in &status.pending {
        println!(
            "    {}   v{} {}",
            style("○").yellow(),
            unit.version,
            style(&unit.description).yellow()
        );
    }

    println!(
        "    {} {} applied, {} pending",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len()
    );
    println!();
}

/// List stored versions of namespaces this binary has no units for.
async fn print_untracked(store: &dyn VersionStore, registry: &MigrationRegistry) -> Result<()> {
    let untracked: Vec<_> = store
        .records()
        .await?
        .into_iter()
        .filter(|r| !registry.contains_namespace(&r.namespace))
        .collect();
    if untracked.is_empty() {
        return Ok(());
    }

    println!("  {} Other recorded namespaces:", style("ℹ").blue());
    for record in untracked {
        let updated = record
            .updated_at
            .map(|t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_default();
        println!(
            "    {} v{} {}",
            style(&record.namespace).cyan(),
            record.version,
            style(updated).dim()
        );
    }
    println!();
    Ok(())
}

fn finish(failed: bool) -> Result<()> {
    println!();
    if failed {
        bail!("Migration failed");
    }
    Ok(())
}
