//! CLI binary for docnorm.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `NormalizeConfig` / `CorrectionSession` calls and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docnorm::{
    normalize_file, ActiveSource, CorrectionKind, CorrectionLedger, CorrectionRequest,
    CorrectionSession, EntityId, Manifest, NoopRender, NormalizeConfig, OpenAiRewrite,
    RewriteService,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Normalize a merged document in place
  docnorm normalize document.md -o document.md

  # Apply a manual correction to one entity
  docnorm correct ./report --entity E003 --content-file fixed.yaml --reason "wrong totals"

  # Let the model fix one entity
  docnorm correct ./report --entity E003 --issue "table values are garbled"

  # Document-wide AI corrections from one instruction
  docnorm batch ./report --instruction "fix all date formats to ISO 8601"

  # Rebuild the merged document from the entity files
  docnorm rebuild ./report

  # Show correction history
  docnorm show ./report --entity E003

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY     OpenAI API key (normalize, batch, --issue corrections)
  DOCNORM_MODEL      Override the model ID
"#;

/// Normalize and correct entity-segmented markdown documents.
#[derive(Parser, Debug)]
#[command(
    name = "docnorm",
    version,
    about = "Normalize and correct entity-segmented markdown documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCNORM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCNORM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the normalization judge over a merged document.
    Normalize {
        /// Merged markdown document to normalize.
        input: PathBuf,

        /// Write the result here (defaults to overwriting the input).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Model ID for the rewrite service.
        #[arg(long, env = "DOCNORM_MODEL", default_value = "gpt-4o")]
        model: String,

        /// Chunk byte budget.
        #[arg(long, default_value_t = docnorm::DEFAULT_CHUNK_BUDGET_BYTES)]
        budget: usize,

        /// Sampling temperature (0.0-2.0).
        #[arg(long, default_value_t = 0.2)]
        temperature: f32,

        /// Do not append the consolidated change-log section.
        #[arg(long)]
        no_change_log: bool,

        /// Per-call API timeout in seconds.
        #[arg(long, default_value_t = 120)]
        api_timeout: u64,
    },

    /// Apply one correction to an entity (manual content or AI-assisted).
    Correct {
        /// Document directory (manifest.json + entity files / document.md).
        dir: PathBuf,

        /// Entity id, e.g. E003.
        #[arg(long)]
        entity: String,

        /// File containing the corrected content (manual correction).
        #[arg(long, conflicts_with = "issue")]
        content_file: Option<PathBuf>,

        /// Reason recorded in the ledger (required with --content-file).
        #[arg(long, required_unless_present = "issue")]
        reason: Option<String>,

        /// Describe the problem and let the model fix it instead.
        #[arg(long)]
        issue: Option<String>,

        /// Which representation is ground truth.
        #[arg(long, value_enum, default_value = "files")]
        source: SourceArg,

        /// Model ID (AI corrections only).
        #[arg(long, env = "DOCNORM_MODEL", default_value = "gpt-4o")]
        model: String,
    },

    /// Propose and apply corrections across the whole document.
    Batch {
        /// Document directory.
        dir: PathBuf,

        /// Instruction describing what to fix everywhere.
        #[arg(long)]
        instruction: String,

        /// Which representation is ground truth.
        #[arg(long, value_enum, default_value = "files")]
        source: SourceArg,

        /// Print the proposals as JSON without applying them.
        #[arg(long)]
        dry_run: bool,

        /// Context byte budget for the proposal call.
        #[arg(long, default_value_t = docnorm::DEFAULT_CHUNK_BUDGET_BYTES)]
        budget: usize,

        /// Model ID.
        #[arg(long, env = "DOCNORM_MODEL", default_value = "gpt-4o")]
        model: String,
    },

    /// Rebuild the merged document from the per-entity files.
    Rebuild {
        /// Document directory.
        dir: PathBuf,
    },

    /// Show the manifest or one entity's correction history.
    Show {
        /// Document directory.
        dir: PathBuf,

        /// Entity id to show history for; omit for the manifest overview.
        #[arg(long)]
        entity: Option<String>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    Files,
    Merged,
}

impl From<SourceArg> for ActiveSource {
    fn from(v: SourceArg) -> Self {
        match v {
            SourceArg::Files => ActiveSource::EntityFiles,
            SourceArg::Merged => ActiveSource::MergedDocument,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Normalize {
            input,
            output,
            model,
            budget,
            temperature,
            no_change_log,
            api_timeout,
        } => {
            let config = NormalizeConfig::builder()
                .chunk_budget_bytes(budget)
                .model(&model)
                .temperature(temperature)
                .include_change_log(!no_change_log)
                .api_timeout_secs(api_timeout)
                .build()
                .context("Invalid configuration")?;

            let provider: Arc<dyn RewriteService> = Arc::new(
                OpenAiRewrite::from_env(&model, temperature, None, api_timeout)
                    .context("OpenAI provider not configured")?,
            );

            let target = output.unwrap_or_else(|| input.clone());
            let result = normalize_file(&input, &target, &provider, &config)
                .await
                .context("Normalization failed")?;

            if !cli.quiet {
                let merged = result.stats.merged_entities;
                eprintln!(
                    "{}  {} entities, {} chunks, {}ms  →  {}",
                    if merged == 0 { green("✔") } else { green("✔ (merges)") },
                    result.stats.total_entities,
                    result.stats.total_chunks,
                    result.stats.total_duration_ms,
                    bold(&target.display().to_string()),
                );
                eprintln!(
                    "   {} tokens in  /  {} tokens out",
                    dim(&result.stats.total_prompt_tokens.to_string()),
                    dim(&result.stats.total_completion_tokens.to_string()),
                );
            }
        }

        Command::Correct {
            dir,
            entity,
            content_file,
            reason,
            issue,
            source,
            model,
        } => {
            let id: EntityId = entity.parse().context("Invalid entity id")?;
            let mut session = CorrectionSession::open(&dir, source.into(), Box::new(NoopRender))
                .context("Failed to open document directory")?;

            let correction = if let Some(issue) = issue {
                let rewrite: Arc<dyn RewriteService> = Arc::new(
                    OpenAiRewrite::from_env(&model, 0.2, None, 120)
                        .context("OpenAI provider not configured")?,
                );
                session
                    .ai_correct_entity(&rewrite, id, &issue)
                    .await
                    .context("AI correction failed")?
            } else {
                let path = content_file.context("--content-file or --issue is required")?;
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                session
                    .apply(CorrectionRequest {
                        entity_id: id,
                        kind: CorrectionKind::Manual,
                        corrected_content: content,
                        reason: reason.context("--reason is required")?,
                        prompt: None,
                    })
                    .context("Correction failed")?
            };

            let location = session.regenerate().context("Regeneration failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} corrected  →  {}",
                    green("✔"),
                    bold(&correction.entity_id.to_string()),
                    dim(&location.display().to_string()),
                );
            }
        }

        Command::Batch {
            dir,
            instruction,
            source,
            dry_run,
            budget,
            model,
        } => {
            let mut session = CorrectionSession::open(&dir, source.into(), Box::new(NoopRender))
                .context("Failed to open document directory")?;
            let rewrite: Arc<dyn RewriteService> = Arc::new(
                OpenAiRewrite::from_env(&model, 0.2, None, 120)
                    .context("OpenAI provider not configured")?,
            );

            let proposals = session
                .propose_corrections(&rewrite, &instruction, budget)
                .await
                .context("Proposal call failed")?;

            if dry_run {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&proposals)
                        .context("Failed to serialise proposals")?
                );
                return Ok(());
            }

            let outcome = session
                .apply_batch(proposals, Some(&instruction))
                .context("Batch correction failed")?;

            if !cli.quiet {
                eprintln!(
                    "{}  {} applied, {} failed  →  {}",
                    if outcome.failures.is_empty() {
                        green("✔")
                    } else {
                        red("⚠")
                    },
                    outcome.applied.len(),
                    outcome.failures.len(),
                    bold(&outcome.location.display().to_string()),
                );
                for f in &outcome.failures {
                    eprintln!("   {} {}: {}", red("✗"), f.entity_id, f.error);
                }
            }
        }

        Command::Rebuild { dir } => {
            let manifest = Manifest::load(&dir).context("Failed to load manifest")?;
            let path = docnorm::rebuild(&manifest, &dir).context("Rebuild failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} entities  →  {}",
                    green("✔"),
                    manifest.entities.len(),
                    bold(&path.display().to_string()),
                );
            }
        }

        Command::Show { dir, entity } => {
            let manifest = Manifest::load(&dir).context("Failed to load manifest")?;
            match entity {
                Some(raw) => {
                    let id: EntityId = raw.parse().context("Invalid entity id")?;
                    let ledger =
                        CorrectionLedger::load(&dir).context("Failed to load ledger")?;
                    let history = ledger.history(id);
                    if history.is_empty() {
                        println!("{id}: no corrections");
                    }
                    for c in history {
                        println!(
                            "{}  {:?}  {}",
                            c.timestamp.to_rfc3339(),
                            c.kind,
                            c.reason
                        );
                    }
                }
                None => {
                    if let Some(title) = &manifest.document_title {
                        println!("{}", bold(title));
                    }
                    for e in &manifest.entities {
                        println!(
                            "{}  {:<10}  page {:>3}  {}  {}",
                            e.id,
                            e.entity_type.to_string(),
                            e.page,
                            e.file,
                            if e.corrected { green("corrected") } else { String::new() },
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
