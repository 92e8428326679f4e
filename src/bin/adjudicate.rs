// src/bin/adjudicate.rs
//
// Interactive adjudication of pending linking decisions. Entries are shown
// oldest first; every verdict is fanned out before the next entry is shown.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use linking_lib::adjudication::{adjudicate, NewEntity, Verdict};
use linking_lib::ledger::db::{PgDependentStore, PgLedger};
use linking_lib::ledger::Ledger;
use linking_lib::linking::db::PgRegistry;
use linking_lib::linking::registry::RegistryStore;
use linking_lib::models::linking::LinkingDecision;
use linking_lib::models::records::{EntityId, EntityKind};
use linking_lib::models::stats::FanOutReport;
use linking_lib::utils::db_connect::connect;
use linking_lib::utils::env::load_env;

#[derive(Parser)]
#[command(name = "adjudicate", about = "Resolve pending linking decisions")]
struct Args {
    /// Only entries of this kind (person or party)
    #[arg(long)]
    kind: Option<String>,
    /// Stop after this many entries
    #[arg(long)]
    limit: Option<usize>,
}

enum Answer {
    Verdict(Verdict),
    Skip,
    Quit,
}

fn prompt(question: &str) -> Result<Option<String>> {
    print!("{}", question);
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok((read > 0).then(|| line.trim().to_string()))
}

fn ask_new_entity(kind: EntityKind) -> Result<Option<NewEntity>> {
    Ok(match kind {
        EntityKind::Person => {
            let Some(name) = prompt("  Name: ")? else { return Ok(None) };
            let Some(last_name) = prompt("  Last name: ")? else { return Ok(None) };
            Some(NewEntity::Person { name, last_name })
        }
        EntityKind::Party => {
            let Some(denomination) = prompt("  Denomination: ")? else { return Ok(None) };
            Some(NewEntity::Party { denomination })
        }
    })
}

fn ask(entry: &LinkingDecision, candidate: Option<&str>) -> Result<Answer> {
    println!("\n#{} [{}] {}", entry.id, entry.kind, entry.uuid);
    println!("  incoming : {}", entry.messy_signature);
    match (entry.canonical_entity_id, candidate) {
        (Some(id), Some(c)) => println!("  candidate: {} ({})", c, id),
        (Some(id), None) => println!("  candidate: id {} (not in registry)", id),
        (None, _) => println!("  candidate: none"),
    }

    loop {
        let Some(answer) = prompt("(a)pprove / (a <id>) approve as / (d)eny / (n)ew entity / (s)kip / (q)uit: ")?
        else {
            return Ok(Answer::Quit);
        };
        let mut parts = answer.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("a"), None) if entry.canonical_entity_id.is_some() => {
                return Ok(Answer::Verdict(Verdict::Approve { canonical_id: None }))
            }
            (Some("a"), None) => println!("No candidate attached; use 'a <id>'"),
            (Some("a"), Some(id)) => match id.parse::<EntityId>() {
                Ok(id) => {
                    return Ok(Answer::Verdict(Verdict::Approve {
                        canonical_id: Some(id),
                    }))
                }
                Err(_) => println!("'{}' is not an id", id),
            },
            (Some("d"), _) => return Ok(Answer::Verdict(Verdict::Deny)),
            (Some("n"), _) => match ask_new_entity(entry.kind)? {
                Some(new) => return Ok(Answer::Verdict(Verdict::CreateNew(new))),
                None => return Ok(Answer::Quit),
            },
            (Some("s"), _) => return Ok(Answer::Skip),
            (Some("q"), _) => return Ok(Answer::Quit),
            _ => println!("Unrecognized answer"),
        }
    }
}

async fn candidate_names(
    registry: &dyn RegistryStore,
    kind: Option<EntityKind>,
) -> Result<HashMap<(EntityKind, EntityId), String>> {
    let mut names = HashMap::new();
    if kind != Some(EntityKind::Party) {
        for p in registry.load_persons().await? {
            names.insert((EntityKind::Person, p.id), format!("{} {}", p.name, p.last_name));
        }
    }
    if kind != Some(EntityKind::Person) {
        for p in registry.load_parties().await? {
            names.insert((EntityKind::Party, p.id), p.denomination);
        }
    }
    Ok(names)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = Args::parse();
    let kind = match args.kind.as_deref() {
        Some(k) => Some(EntityKind::parse(k).with_context(|| format!("Unknown kind '{}'", k))?),
        None => None,
    };

    let pool = connect().await.context("Failed to connect to database")?;
    let ledger = Ledger::new(
        Arc::new(PgLedger::new(pool.clone())),
        Arc::new(PgDependentStore::new(pool.clone())),
    );
    let registry = PgRegistry::new(pool);

    let mut pending = ledger.list_pending(kind).await?;
    if let Some(limit) = args.limit {
        pending.truncate(limit);
    }
    if pending.is_empty() {
        info!("No pending decisions");
        return Ok(());
    }
    let names = candidate_names(&registry, kind).await?;

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );

    let mut totals = FanOutReport::default();
    let (mut resolved, mut skipped) = (0usize, 0usize);
    for entry in &pending {
        let candidate = entry
            .canonical_entity_id
            .and_then(|id| names.get(&(entry.kind, id)))
            .map(String::as_str);
        let answer = pb.suspend(|| ask(entry, candidate))?;
        match answer {
            Answer::Quit => break,
            Answer::Skip => skipped += 1,
            Answer::Verdict(verdict) => {
                match adjudicate(&ledger, &registry, entry.uuid, verdict).await {
                    Ok(Some(report)) => {
                        resolved += 1;
                        totals.updated += report.updated;
                        totals.deleted_duplicates += report.deleted_duplicates;
                        totals.cleared += report.cleared;
                    }
                    Ok(None) => skipped += 1,
                    Err(e) => warn!("Could not resolve {}: {}", entry.uuid, e),
                }
            }
        }
        pb.inc(1);
        pb.set_message(format!("{} resolved", resolved));
    }
    pb.finish_with_message(format!("{} resolved, {} skipped", resolved, skipped));

    info!(
        "Adjudication finished: {} resolved, {} skipped; {} rows relinked, {} duplicates deleted, {} rows cleared",
        resolved, skipped, totals.updated, totals.deleted_duplicates, totals.cleared
    );
    Ok(())
}
