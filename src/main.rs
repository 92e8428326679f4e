// src/main.rs - Linking jobs and ledger maintenance
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use log::{error, info};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use uuid::Uuid;

use linking_lib::adjudication::{adjudicate, Verdict};
use linking_lib::ledger::db::{PgDependentStore, PgLedger};
use linking_lib::ledger::Ledger;
use linking_lib::linking::db::PgRegistry;
use linking_lib::linking::party::PartySchema;
use linking_lib::linking::person::PersonSchema;
use linking_lib::linking::registry::RegistryStore;
use linking_lib::linking::{linked_row_json, EntitySchema, Linker};
use linking_lib::matching::labeler::{ConsoleLabeler, Labeler, NoLabeler};
use linking_lib::matching::matcher::{EditDistanceMatcher, LogisticMatcher, Matcher};
use linking_lib::models::records::{EntityKind, MessyRow};
use linking_lib::models::stats::LinkingStats;
use linking_lib::utils::config::LinkingConfig;
use linking_lib::utils::db_connect::{connect, get_pool_status};
use linking_lib::utils::env::load_env;

#[derive(Parser)]
#[command(name = "linker", about = "Links scraped legislative records to the canonical registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Person,
    Party,
}

impl From<KindArg> for EntityKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Person => EntityKind::Person,
            KindArg::Party => EntityKind::Party,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MatcherArg {
    Logistic,
    EditDistance,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger schema if it does not exist
    InitSchema,
    /// Link one or more JSON batches; each file runs as its own job
    Link {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "linked")]
        output_dir: PathBuf,
        #[arg(long, value_enum, default_value = "logistic")]
        matcher: MatcherArg,
        /// Ask on the terminal when the matcher needs training labels
        #[arg(long)]
        interactive: bool,
    },
    /// List pending decisions
    Pending {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Resolve one pending decision and fan it out
    Resolve {
        #[arg(long)]
        linking_id: Uuid,
        #[arg(long, conflicts_with = "deny")]
        approve: bool,
        #[arg(long)]
        deny: bool,
        #[arg(long, requires = "approve")]
        canonical_id: Option<i64>,
    },
}

fn build_matcher(kind: MatcherArg, config: &LinkingConfig, interactive: bool) -> Box<dyn Matcher> {
    match kind {
        MatcherArg::EditDistance => Box::new(EditDistanceMatcher),
        MatcherArg::Logistic => {
            let labeler: Box<dyn Labeler> = if interactive {
                Box::new(ConsoleLabeler::new())
            } else {
                Box::new(NoLabeler)
            };
            Box::new(LogisticMatcher::new(config.matcher.clone(), labeler))
        }
    }
}

/// The console labeler owns the terminal for the whole training pass, so only
/// one job may use it.
fn check_interactive(inputs: &[PathBuf], interactive: bool) -> Result<()> {
    if interactive && inputs.len() > 1 {
        bail!(
            "--interactive labels one batch at a time; got {} inputs",
            inputs.len()
        );
    }
    Ok(())
}

fn read_batch<R: DeserializeOwned>(path: &Path) -> Result<Vec<MessyRow<R>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse batch {}", path.display()))
}

async fn run_job<S>(
    input: PathBuf,
    output_dir: PathBuf,
    matcher: Box<dyn Matcher>,
    registry: Arc<dyn RegistryStore>,
    ledger: Ledger,
    config: LinkingConfig,
    interactive: bool,
) -> Result<LinkingStats>
where
    S: EntitySchema,
    S::Messy: DeserializeOwned,
{
    let batch: Vec<MessyRow<S::Messy>> = read_batch(&input)?;
    info!("Job {}: {} rows", input.display(), batch.len());

    let mut linker: Linker<S> = Linker::new(matcher, registry, ledger, &config);
    let linked = if interactive {
        // Training reads labels from stdin synchronously.
        tokio::task::block_in_place(|| Handle::current().block_on(linker.link(batch)))
    } else {
        linker.link(batch).await
    };
    let (rows, stats) =
        linked.with_context(|| format!("Linking failed for {}", input.display()))?;

    let out = rows
        .iter()
        .map(|row| linked_row_json(row, S::FK_COLUMN))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to serialize linked rows")?;
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    let path = output_dir.join(format!("{}.linked.json", stem));
    std::fs::write(&path, serde_json::to_string_pretty(&out)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Job {}: wrote {}", input.display(), path.display());
    Ok(stats)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let cli = Cli::parse();

    let config = LinkingConfig::from_env();
    config.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    let (connections, idle) = get_pool_status(&pool);
    info!("Pool status: {} connections, {} idle", connections, idle);

    let pg_ledger = Arc::new(PgLedger::new(pool.clone()));
    let ledger = Ledger::new(pg_ledger.clone(), Arc::new(PgDependentStore::new(pool.clone())));
    let registry: Arc<dyn RegistryStore> = Arc::new(PgRegistry::new(pool.clone()));

    match cli.command {
        Command::InitSchema => {
            pg_ledger.ensure_schema().await.context("Failed to create ledger schema")?;
        }
        Command::Link {
            kind,
            inputs,
            output_dir,
            matcher,
            interactive,
        } => {
            check_interactive(&inputs, interactive)?;
            pg_ledger.ensure_schema().await.context("Failed to create ledger schema")?;
            let start = Instant::now();
            let kind: EntityKind = kind.into();

            let handles = inputs.into_iter().map(|input| {
                let job_matcher = build_matcher(matcher, &config, interactive);
                let (registry, ledger, config, output_dir) =
                    (registry.clone(), ledger.clone(), config.clone(), output_dir.clone());
                tokio::spawn(async move {
                    let label = input.display().to_string();
                    let result = match kind {
                        EntityKind::Person => {
                            run_job::<PersonSchema>(
                                input,
                                output_dir,
                                job_matcher,
                                registry,
                                ledger,
                                config,
                                interactive,
                            )
                            .await
                        }
                        EntityKind::Party => {
                            run_job::<PartySchema>(
                                input,
                                output_dir,
                                job_matcher,
                                registry,
                                ledger,
                                config,
                                interactive,
                            )
                            .await
                        }
                    };
                    (label, result)
                })
            });

            let mut failures = 0;
            let mut total = LinkingStats::default();
            for joined in join_all(handles).await {
                let (label, result) = joined.context("Linking task panicked")?;
                match result {
                    Ok(stats) => {
                        total.total += stats.total;
                        total.certain += stats.certain;
                        total.dubious += stats.dubious;
                        total.distinct += stats.distinct;
                        total.unresolved += stats.unresolved;
                        total.pending_created += stats.pending_created;
                    }
                    Err(e) => {
                        error!("Job {} failed: {:?}", label, e);
                        failures += 1;
                    }
                }
            }
            info!(
                "All {} jobs finished in {:.2?}: {} rows, {} certain, {} dubious ({} new), {} distinct, {} unresolved",
                kind,
                start.elapsed(),
                total.total,
                total.certain,
                total.dubious,
                total.pending_created,
                total.distinct,
                total.unresolved
            );
            if failures > 0 {
                bail!("{} linking jobs failed", failures);
            }
        }
        Command::Pending { kind } => {
            let pending = ledger.list_pending(kind.map(EntityKind::from)).await?;
            for entry in &pending {
                println!(
                    "{:>6}  {}  {:<6}  {:>8}  {}",
                    entry.id,
                    entry.uuid,
                    entry.kind.as_str(),
                    entry
                        .canonical_entity_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".into()),
                    entry.messy_signature
                );
            }
            info!("{} pending decisions", pending.len());
        }
        Command::Resolve {
            linking_id,
            approve,
            deny,
            canonical_id,
        } => {
            let verdict = match (approve, deny) {
                (true, false) => Verdict::Approve { canonical_id },
                (false, true) => Verdict::Deny,
                _ => bail!("Pass exactly one of --approve or --deny"),
            };
            match adjudicate(&ledger, registry.as_ref(), linking_id, verdict).await? {
                Some(report) => info!(
                    "Resolved {}: {} updated, {} duplicates deleted, {} cleared",
                    linking_id, report.updated, report.deleted_duplicates, report.cleared
                ),
                None => info!("{} was not changed", linking_id),
            }
        }
    }

    Ok(())
}
