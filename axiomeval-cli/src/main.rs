// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Axiomeval CLI
//!
//! Runs evaluation datasets through the pipeline and inspects run output.

use anyhow::{Context, Result};
use axiomeval_core::{AxiomStore, CaseOutcome, CitationStatus, EvaluatorConfig, RunSummary};
use axiomeval_evals::{
    client_from_config, load_dataset, AnswerSource, AssessorAnswerSource, AssessorGateway,
    AxiomValidator, CompletionOptions, EvaluationPipeline, PromptRenderer, TemplateRegistry,
    DEFAULT_ANSWER_SYSTEM_PROMPT,
};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

mod run_dir;

/// Config file picked up from the working directory when --config is absent
const DEFAULT_CONFIG_FILE: &str = "axiomeval.toml";

#[derive(Parser)]
#[command(name = "axiomeval")]
#[command(about = "Entity-level evaluation of generated answers against axioms", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (json or text)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a dataset and write a run directory
    Run {
        /// Dataset file (JSON array or JSONL)
        #[arg(short, long, default_value = "data/eval_dataset.json")]
        data_path: PathBuf,

        /// Run directory (default: <runs_dir>/<timestamp>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Axiom file (overrides paths.axioms)
        #[arg(short, long)]
        axioms: Option<PathBuf>,

        /// System prompt file for generating missing answers
        #[arg(long)]
        system_prompt: Option<PathBuf>,

        /// Evaluate only the first N rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Summarize an existing run directory
    Report {
        /// Run directory containing outcomes.jsonl
        #[arg(short, long)]
        run_dir: PathBuf,

        /// Also list failed cases and invalid citations
        #[arg(long)]
        details: bool,
    },

    /// Check the axiom citations in a piece of text
    ValidateCitations {
        /// Text to check; "-" reads stdin
        text: String,

        /// Axiom file (overrides paths.axioms)
        #[arg(short, long)]
        axioms: Option<PathBuf>,
    },

    /// List the axioms in the registry
    Axioms {
        /// Axiom file (overrides paths.axioms)
        #[arg(short, long)]
        axioms: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            data_path,
            output,
            axioms,
            system_prompt,
            limit,
        } => {
            let (dir, outcomes, summary) = run_dataset(
                &config,
                &data_path,
                output,
                axioms.as_deref(),
                system_prompt.as_deref(),
                limit,
            )
            .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for outcome in &outcomes {
                    println!("{}", outcome_line(outcome));
                }
                println!();
                println!("✓ {}", summary);
                println!("  Outcomes written to {}", dir.display());
            }
        }

        Commands::Report { run_dir, details } => {
            let outcomes = run_dir::read_outcomes(&run_dir)?;
            let run_id = match run_dir::read_summary(&run_dir)? {
                Some(summary) => summary.run_id,
                None => run_dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unknown".to_string()),
            };
            let summary = RunSummary::from_outcomes(run_id, &outcomes);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
                if details {
                    print_details(&outcomes);
                }
            }
        }

        Commands::ValidateCitations { text, axioms } => {
            let store = load_axioms(&config, axioms.as_deref())?;
            let text = if text == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read text from stdin")?;
                buf
            } else {
                text
            };

            let citations = AxiomValidator::new(Arc::new(store)).validate(&text);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&citations)?);
            } else if citations.is_empty() {
                println!("No axiom citations found");
            } else {
                for citation in &citations {
                    let marker = if citation.valid { "✓" } else { "✗" };
                    println!("{} {} ({})", marker, citation.id, status_label(citation.status));
                }
            }
        }

        Commands::Axioms { axioms } => {
            let store = load_axioms(&config, axioms.as_deref())?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&store.list())?);
            } else {
                println!("{} axioms", store.len());
                for axiom in store.list() {
                    println!("  {} [{}] {}", axiom.id, axiom.category, axiom.description);
                }
            }
        }
    }

    Ok(())
}

/// Explicit config file, else `axiomeval.toml` if present, else defaults;
/// environment variables are applied on top
fn load_config(path: Option<&Path>) -> Result<EvaluatorConfig> {
    let mut config = match path {
        Some(path) => EvaluatorConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            EvaluatorConfig::from_path(DEFAULT_CONFIG_FILE)
                .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG_FILE))?
        }
        None => EvaluatorConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn load_axioms(config: &EvaluatorConfig, override_path: Option<&Path>) -> Result<AxiomStore> {
    let path = override_path.unwrap_or(&config.paths.axioms);
    let store = AxiomStore::from_path(path)
        .with_context(|| format!("Failed to load axioms from {}", path.display()))?;
    if store.is_empty() {
        warn!("Axiom registry {} is empty", path.display());
    }
    Ok(store)
}

async fn run_dataset(
    config: &EvaluatorConfig,
    data_path: &Path,
    output: Option<PathBuf>,
    axioms_path: Option<&Path>,
    system_prompt_path: Option<&Path>,
    limit: Option<usize>,
) -> Result<(PathBuf, Vec<CaseOutcome>, RunSummary)> {
    config.validate().context("Invalid configuration")?;

    let axioms = Arc::new(load_axioms(config, axioms_path)?);
    let mut rows = load_dataset(data_path)
        .with_context(|| format!("Failed to load dataset {}", data_path.display()))?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    let client = client_from_config(&config.assessor, None)?;
    info!(
        "Assessor {} with {} axioms",
        client.model_name(),
        axioms.len()
    );
    let pipeline = EvaluationPipeline::from_config(config, client, axioms.clone())?;

    let answer_source = if rows.iter().any(|row| row.needs_answer()) {
        let system_prompt = match system_prompt_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read system prompt {}", path.display()))?,
            None => DEFAULT_ANSWER_SYSTEM_PROMPT.to_string(),
        };
        let answer_client = client_from_config(&config.assessor, Some(&system_prompt))?;
        let gateway = AssessorGateway::from_config(answer_client, config);
        let renderer = PromptRenderer::new(Arc::new(
            TemplateRegistry::from_config(&config.paths).context("Failed to load prompts")?,
        ));
        Some(
            AssessorAnswerSource::new(Arc::new(gateway), renderer, &axioms)
                .context("Invalid answer prompt templates")?
                .with_options(CompletionOptions::from_config(&config.assessor)),
        )
    } else {
        None
    };

    let started_at = chrono::Local::now();
    let outcomes = pipeline
        .evaluate_rows(
            rows,
            answer_source.as_ref().map(|s| s as &dyn AnswerSource),
        )
        .await;

    let run_id = uuid::Uuid::new_v4().to_string();
    let summary = RunSummary::from_outcomes(run_id, &outcomes);
    let dir = output.unwrap_or_else(|| run_dir::timestamped_dir(&config.paths.runs_dir, &started_at));
    run_dir::write_run(&dir, &outcomes, &summary)?;
    info!("{}", summary);

    Ok((dir, outcomes, summary))
}

fn case_label(outcome: &CaseOutcome) -> String {
    match &outcome.case().id {
        Some(id) => id.clone(),
        None => truncate(&outcome.case().user_query, 48),
    }
}

fn outcome_line(outcome: &CaseOutcome) -> String {
    match outcome {
        CaseOutcome::Evaluated { report } => format!(
            "✓ {:<24} score {:.3}  ({}/{} entities, {} citations)",
            case_label(outcome),
            report.score,
            report.breakdown.matched_count,
            report.breakdown.entity_count,
            report.breakdown.citation_count
        ),
        CaseOutcome::Failed { error, .. } => format!(
            "✗ {:<24} {}: {}",
            case_label(outcome),
            error.kind.as_str(),
            error.message
        ),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Run: {}", summary.run_id);
    println!("  Cases:      {}", summary.total);
    println!("  Evaluated:  {}", summary.evaluated);
    println!("  Failed:     {}", summary.failed);
    if let (Some(mean), Some(min), Some(max)) =
        (summary.mean_score, summary.min_score, summary.max_score)
    {
        println!("  Score:      mean {:.3}, min {:.3}, max {:.3}", mean, min, max);
    }
    println!("  Invalid citations: {}", summary.invalid_citations);
    for (kind, count) in &summary.failures_by_kind {
        println!("  {:<20} {}", kind.as_str(), count);
    }
}

fn print_details(outcomes: &[CaseOutcome]) {
    let failed: Vec<_> = outcomes.iter().filter(|o| o.is_failed()).collect();
    if !failed.is_empty() {
        println!();
        println!("Failed cases:");
        for outcome in failed {
            println!("  {}", outcome_line(outcome));
        }
    }

    let with_invalid: Vec<_> = outcomes
        .iter()
        .filter_map(|o| o.report().map(|r| (o, r)))
        .filter(|(_, r)| r.invalid_citations().next().is_some())
        .collect();
    if !with_invalid.is_empty() {
        println!();
        println!("Invalid citations:");
        for (outcome, report) in with_invalid {
            let ids: Vec<String> = report
                .invalid_citations()
                .map(|c| format!("{} ({})", c.id, status_label(c.status)))
                .collect();
            println!("  {:<24} {}", case_label(outcome), ids.join(", "));
        }
    }
}

fn status_label(status: CitationStatus) -> &'static str {
    match status {
        CitationStatus::Resolved => "resolved",
        CitationStatus::Unknown => "not in registry",
        CitationStatus::Malformed => "malformed",
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
