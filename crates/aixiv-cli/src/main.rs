//! aiXiv - research-paper lifecycle CLI
//!
//! The `aixiv` command drives papers through drafting, review, revision
//! and arena ranking.
//!
//! ## Commands
//!
//! - `criteria`: Print the L0-L5 maturity criteria
//! - `config`: Print the effective configuration
//! - `pipeline`: Draft a paper for a topic, then review it
//! - `review`: Submit a paper from a JSON file and review it

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn, Level};

use aixiv_core::fakes::ScriptedCompletion;
use aixiv_core::{
    format_audit_log, format_criteria, format_eval_report, format_leaderboard, CompletionService,
    HttpCompletionClient, LeaderboardFilter, NewPaper, Orchestrator, PaperId, PaperSection,
    PaperState, ProgressKind, RailConfig, RunOutcome, Stores,
};
use aixiv_state::{DbTarget, SurrealDecisionLog};

#[derive(Parser)]
#[command(name = "aixiv")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "aiXiv research-paper lifecycle", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "AIXIV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct RunOpts {
    /// Answer every model call from canned responses
    #[arg(long)]
    offline: bool,

    /// Record decisions in SurrealDB (SURREALDB_* variables, else files under AIXIV_DB_PATH)
    #[arg(long)]
    remote_log: bool,

    /// Print the decision audit log when done
    #[arg(long)]
    audit: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the L0-L5 maturity criteria
    Criteria,

    /// Print the effective configuration as TOML
    Config,

    /// Draft a paper for a topic and send it through review
    Pipeline {
        /// Research topic
        topic: String,

        /// Paper category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Author name (repeatable)
        #[arg(long = "author")]
        authors: Vec<String>,

        #[command(flatten)]
        opts: RunOpts,
    },

    /// Submit a paper from a JSON file and review it
    Review {
        /// Paper file: {"title", "abstract", "authors", "categories", "sections": [{"name", "content"}]}
        file: PathBuf,

        /// Revise and re-review until the paper leaves the revision loop
        #[arg(long)]
        revise: bool,

        #[command(flatten)]
        opts: RunOpts,
    },
}

/// Paper as read from disk.
#[derive(Debug, Deserialize)]
struct PaperFile {
    title: String,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    sections: Vec<PaperSection>,
}

impl From<PaperFile> for NewPaper {
    fn from(f: PaperFile) -> Self {
        NewPaper {
            title: f.title,
            abstract_text: f.abstract_text,
            authors: f.authors,
            categories: f.categories,
            sections: f.sections,
        }
    }
}

fn read_paper(path: &Path) -> Result<NewPaper> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read paper file {}", path.display()))?;
    let file: PaperFile = serde_json::from_str(&text)
        .with_context(|| format!("Invalid paper file {}", path.display()))?;
    Ok(file.into())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    aixiv_core::init_tracing(cli.json, level);

    let config = RailConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Criteria => {
            println!("{}", format_criteria());
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Pipeline {
            topic,
            categories,
            authors,
            opts,
        } => cmd_pipeline(config, &topic, authors, categories, &opts).await,
        Commands::Review { file, revise, opts } => {
            cmd_review(config, &file, revise, &opts).await
        }
    }
}

async fn build(config: RailConfig, opts: &RunOpts) -> Result<Orchestrator> {
    let completion: Arc<dyn CompletionService> = if opts.offline {
        Arc::new(ScriptedCompletion::new())
    } else {
        Arc::new(
            HttpCompletionClient::new(config.completion.clone())
                .context("Failed to build completion client")?,
        )
    };

    let mut stores = Stores::in_memory();
    stores.decisions = if opts.remote_log {
        let (target, scope) = DbTarget::resolve(|k| std::env::var(k).ok());
        info!(backend = ?target, namespace = %scope.namespace, "connecting decision log");
        Arc::new(
            SurrealDecisionLog::connect(&target, &scope)
                .await
                .with_context(|| format!("Failed to connect decision log at {target:?}"))?,
        )
    } else {
        Arc::new(
            SurrealDecisionLog::in_memory()
                .await
                .context("Failed to open in-memory decision log")?,
        )
    };

    let orch = Orchestrator::builder()
        .config(config)
        .stores(stores)
        .completion(completion)
        .build()?;
    spawn_progress_logger(&orch);
    Ok(orch)
}

fn spawn_progress_logger(orch: &Orchestrator) {
    let mut events = orch.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match &event.kind {
                ProgressKind::StageStarted { stage, attempt } => {
                    info!(run_id = %event.run_id, stage = %stage, attempt, "stage started")
                }
                ProgressKind::StageSucceeded { stage, attempt } => {
                    info!(run_id = %event.run_id, stage = %stage, attempt, "stage succeeded")
                }
                ProgressKind::StageFailed {
                    stage,
                    attempt,
                    error,
                    will_retry,
                } => warn!(
                    run_id = %event.run_id,
                    stage = %stage,
                    attempt,
                    will_retry,
                    error = %error,
                    "stage failed"
                ),
                ProgressKind::RunCompleted { status } => {
                    info!(run_id = %event.run_id, status = status.as_str(), "run completed")
                }
            }
        }
    });
}

async fn cmd_pipeline(
    config: RailConfig,
    topic: &str,
    authors: Vec<String>,
    categories: Vec<String>,
    opts: &RunOpts,
) -> Result<()> {
    let orch = build(config, opts).await?;

    let drafted = orch
        .draft_paper(topic, authors, categories)
        .await?
        .wait()
        .await
        .context("Writer run failed")?;
    let paper_id = drafted.paper.paper_id.clone();
    println!("Drafted \"{}\" ({})", drafted.paper.title, paper_id);

    let reviewed = review_once(&orch, &paper_id).await?;
    report(&orch, &reviewed, opts).await
}

async fn cmd_review(config: RailConfig, file: &Path, revise: bool, opts: &RunOpts) -> Result<()> {
    let paper = read_paper(file)?;
    let orch = build(config, opts).await?;
    let submitted = orch.submit(paper).await?;
    println!("Submitted \"{}\" ({})", submitted.title, submitted.paper_id);

    let mut outcome = review_once(&orch, &submitted.paper_id).await?;
    while revise && outcome.paper.state == PaperState::Revision {
        let (run_id, proposal) = orch.suggest_revisions(&submitted.paper_id).await?;
        println!(
            "Revision proposal: {} suggestions, {} sections rewritten",
            proposal.suggestions.len(),
            proposal.revised_sections.len()
        );
        let revised = orch.accept_revision(&submitted.paper_id, &run_id).await?;
        println!("Resubmitted as v{}", revised.version);
        outcome = review_once(&orch, &submitted.paper_id).await?;
    }
    report(&orch, &outcome, opts).await
}

async fn review_once(orch: &Orchestrator, paper_id: &PaperId) -> Result<RunOutcome> {
    let outcome = orch
        .request_review(paper_id)
        .await?
        .wait()
        .await
        .context("Review run failed")?;
    println!(
        "Review cycle {}: {}",
        outcome.paper.review_cycles, outcome.paper.state
    );
    Ok(outcome)
}

async fn report(orch: &Orchestrator, outcome: &RunOutcome, opts: &RunOpts) -> Result<()> {
    let paper_id = &outcome.paper.paper_id;

    println!();
    println!("{}", format_eval_report(&outcome.score_cards));
    if let Some(assessment) = &outcome.assessment {
        println!("Maturity: {}", assessment.level);
        for step in &assessment.next_steps {
            println!("  next: {step}");
        }
        for gap in &assessment.unmet {
            println!("  unmet: {gap}");
        }
    }

    if outcome.paper.state == PaperState::Accepted {
        match orch.promote_to_arena(paper_id).await {
            Ok(p) => println!("Published to arena ({})", p.state),
            Err(e) => println!("Not promoted: {e}"),
        }
        let board = orch.leaderboard(&LeaderboardFilter::default()).await?;
        println!("{}", format_leaderboard(&board));
    }

    if opts.audit {
        let decisions = orch.decisions(paper_id).await?;
        println!("{}", format_audit_log(&decisions));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn paper_file_parses_with_optional_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"title": "T", "abstract": "A",
                "sections": [{{"name": "introduction", "content": "x"}}]}}"#
        )
        .unwrap();

        let paper = read_paper(file.path()).unwrap();
        assert_eq!(paper.title, "T");
        assert_eq!(paper.abstract_text, "A");
        assert!(paper.categories.is_empty());
        assert_eq!(paper.sections.len(), 1);
    }

    #[test]
    fn missing_paper_file_is_reported() {
        let err = read_paper(Path::new("/nonexistent/paper.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read paper file"));
    }

    #[test]
    fn cli_parses_repeatable_options() {
        let cli = Cli::try_parse_from([
            "aixiv",
            "pipeline",
            "sparse recovery",
            "--category",
            "imaging",
            "--category",
            "ml",
            "--offline",
        ])
        .unwrap();
        match cli.command {
            Commands::Pipeline {
                categories, opts, ..
            } => {
                assert_eq!(categories, vec!["imaging", "ml"]);
                assert!(opts.offline);
            }
            _ => panic!("expected pipeline"),
        }
    }

    #[tokio::test]
    async fn offline_pipeline_reaches_the_arena() {
        let mut config = RailConfig::default();
        config.retry.backoff_base_ms = 0;
        let opts = RunOpts {
            offline: true,
            remote_log: false,
            audit: false,
        };
        let orch = build(config, &opts).await.unwrap();
        let drafted = orch
            .draft_paper("sparse recovery", vec![], vec!["imaging".into()])
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        let reviewed = review_once(&orch, &drafted.paper.paper_id).await.unwrap();
        assert_eq!(reviewed.paper.state, PaperState::Accepted);
        assert!(orch.promote_to_arena(&drafted.paper.paper_id).await.is_ok());
    }
}
