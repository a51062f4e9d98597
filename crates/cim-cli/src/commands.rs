use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;

use cim_audit::{AuditEntry, AuditReader, ChainValidator, ValidationReport};
use cim_engine::{EngineConfig, MergeEngine, MergeRequest, MergeSummary, UndoSummary};
use cim_server::{FixtureBackend, MergeServer, SalonFixture, ServerConfig};
use cim_types::OrganizationId;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Merge(args) => cmd_merge(args, cli.format),
        Command::Undo(args) => cmd_undo(args, cli.format),
        Command::VerifyLog(args) => cmd_verify_log(args, cli.format),
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    let server = MergeServer::from_config(config)?;
    println!(
        "{} Merge server on {}",
        "✓".green().bold(),
        server.config().bind_addr.to_string().bold()
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}

/// A fixture loaded into an engine.
struct Session {
    backend: FixtureBackend,
    engine: MergeEngine,
}

impl Session {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let fixture =
            SalonFixture::load(path).with_context(|| format!("loading {}", path.display()))?;
        let backend = FixtureBackend::from_fixture(&fixture)?;
        let engine = backend.engine(EngineConfig::default(), Default::default());
        Ok(Self { backend, engine })
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        self.backend
            .to_fixture()?
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

pub fn merge_fixture(args: &MergeArgs) -> anyhow::Result<MergeSummary> {
    let session = Session::open(&args.fixture)?;
    let data = std::fs::read_to_string(&args.request)
        .with_context(|| format!("reading {}", args.request.display()))?;
    let request: MergeRequest = serde_json::from_str(&data).context("parsing merge request")?;

    let summary = session.engine.merge(&args.actor, &request)?;
    if args.write {
        session.save(&args.fixture)?;
    }
    Ok(summary)
}

pub fn undo_fixture(args: &UndoArgs) -> anyhow::Result<UndoSummary> {
    let session = Session::open(&args.fixture)?;
    let organization = match session.backend.audit.merge_log(&args.log)? {
        Some(log) => log.organization_id,
        None => bail!("no merge log {} in {}", args.log, args.fixture.display()),
    };

    let summary = session.engine.undo(&args.actor, &organization, &args.log)?;
    if args.write {
        session.save(&args.fixture)?;
    }
    Ok(summary)
}

/// Validate the audit entries stored in a fixture without loading them into
/// a log, so a broken chain is reported rather than refused.
pub fn verify_fixture(path: &Path) -> anyhow::Result<Vec<ValidationReport>> {
    let fixture =
        SalonFixture::load(path).with_context(|| format!("loading {}", path.display()))?;
    let mut chains: BTreeMap<OrganizationId, Vec<AuditEntry>> = BTreeMap::new();
    for entry in fixture.audit_entries {
        chains.entry(entry.organization_id()).or_default().push(entry);
    }
    Ok(chains
        .into_iter()
        .map(|(org, mut entries)| {
            entries.sort_by_key(AuditEntry::seq);
            ChainValidator::validate_entries(&org, &entries)
        })
        .collect())
}

fn cmd_merge(args: MergeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let summary = merge_fixture(&args)?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "success": true,
                "mergeLogId": summary.merge_log_id,
                "reparentingCounts": summary.reparenting_counts,
                "skippedTables": summary.skipped_tables,
                "alreadyMerged": summary.already_merged,
            }))?
        ),
        OutputFormat::Text => {
            println!(
                "{} Merge {} logged",
                "✓".green().bold(),
                summary.merge_log_id.to_string().yellow()
            );
            for (table, count) in &summary.reparenting_counts {
                println!("  {:<18} {}", table, count.to_string().bold());
            }
            for (table, reason) in &summary.skipped_tables {
                println!("  {:<18} {} ({})", table, "skipped".red(), reason.dimmed());
            }
            for id in &summary.already_merged {
                println!("  {} already merged", id.short_id().cyan());
            }
            print_saved(args.write, &args.fixture);
        }
    }
    Ok(())
}

fn cmd_undo(args: UndoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let summary = undo_fixture(&args)?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "success": true,
                "undoneAt": summary.undone_at,
                "restoredCounts": summary.restored_counts,
            }))?
        ),
        OutputFormat::Text => {
            println!(
                "{} Merge {} undone at {}",
                "✓".green().bold(),
                summary.merge_log_id.to_string().yellow(),
                summary.undone_at.to_rfc3339()
            );
            for (table, count) in &summary.restored_counts {
                println!("  {:<18} {}", table, count.to_string().bold());
            }
            print_saved(args.write, &args.fixture);
        }
    }
    Ok(())
}

fn cmd_verify_log(args: VerifyLogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let reports = verify_fixture(&args.fixture)?;
    let broken = reports.iter().filter(|r| !r.is_valid()).count();

    match format {
        OutputFormat::Json => {
            let orgs: Vec<_> = reports
                .iter()
                .map(|r| {
                    json!({
                        "organizationId": r.organization_id,
                        "entries": r.entry_count,
                        "merges": r.merge_count,
                        "undos": r.undo_count,
                        "violations": r
                            .violations
                            .iter()
                            .map(|v| json!({ "seq": v.seq, "description": v.description }))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&orgs)?);
        }
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("Audit log: no entries.");
            }
            for report in &reports {
                let status = if report.is_valid() {
                    "valid".green()
                } else {
                    "BROKEN".red().bold()
                };
                println!(
                    "{}  {} entries ({} merges, {} undos)  {}",
                    report.organization_id.short_id().cyan(),
                    report.entry_count,
                    report.merge_count,
                    report.undo_count,
                    status
                );
                for v in &report.violations {
                    println!("    seq {}: {:?} -- {}", v.seq, v.kind, v.description);
                }
            }
        }
    }

    if broken > 0 {
        bail!("{broken} organization(s) have a broken audit chain");
    }
    Ok(())
}

fn print_saved(write: bool, fixture: &Path) {
    if write {
        println!("  Saved to {}", fixture.display().to_string().bold());
    } else {
        println!("  {}", "Dry run: fixture not written (pass --write)".dimmed());
    }
}
