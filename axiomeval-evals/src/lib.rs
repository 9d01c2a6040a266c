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

//! Axiomeval Evaluation Pipeline
//!
//! Scores assistant answers against reference answers:
//!
//! 1. [`EntityExtractor`] pulls category-tagged entities out of the query,
//!    the generated answer and the expected answer.
//! 2. [`SemanticMatcher`] asks the assessor model whether each expected
//!    entity behaves the same way in the generated answer.
//! 3. [`AxiomValidator`] checks `[AXIOM-NNN]` citations in the generated
//!    answer against the axiom registry.
//! 4. [`ScoreAggregator`] folds verdicts and citations into a report.
//!
//! [`EvaluationPipeline`] wires the stages together and runs batches with
//! bounded concurrency, per-case timeouts and an optional report cache.
//!
//! # Example
//!
//! ```rust,no_run
//! use axiomeval_core::{AxiomStore, EvaluationCase, EvaluationRequest, EvaluatorConfig};
//! use axiomeval_evals::{client_from_config, EvaluationPipeline};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = EvaluatorConfig::default();
//! config.apply_env();
//! config.validate()?;
//!
//! let client = client_from_config(&config.assessor, None)?;
//! let axioms = Arc::new(AxiomStore::from_path(&config.paths.axioms)?);
//! let pipeline = EvaluationPipeline::from_config(&config, client, axioms)?;
//!
//! let case = EvaluationCase::new(
//!     "Will quitting smoking lower my premium?",
//!     "Yes, non-smokers pay lower premiums [AXIOM-001].",
//!     "Premiums decrease for non-smokers.",
//! );
//! let report = pipeline.evaluate(EvaluationRequest::new(case)).await?;
//! println!("score: {:.2}", report.score);
//! # Ok(())
//! # }
//! ```

use axiomeval_core::FailureKind;
use std::time::Duration;
use thiserror::Error;

pub mod aggregator;
pub mod answers;
pub mod cache;
pub mod citations;
pub mod dataset;
pub mod extraction;
pub mod gateway;
pub mod llm_client;
pub mod matcher;
pub mod pipeline;
pub mod prompts;

mod response;

pub use aggregator::ScoreAggregator;
pub use answers::{
    render_constitution, AnswerSource, AssessorAnswerSource, DEFAULT_ANSWER_SYSTEM_PROMPT,
};
pub use cache::{CacheStats, ReportCache};
pub use citations::{AxiomValidator, CitationScanner, Segment};
pub use dataset::{load_dataset, parse_dataset, DatasetError, DatasetRow};
pub use extraction::{parse_extraction, EntityExtractor};
pub use gateway::AssessorGateway;
pub use llm_client::{
    client_from_config, AssessorClient, AssessorError, AssessorResponse, AzureOpenAIClient,
    CompletionOptions, OpenAIClient, TokenUsage,
};
pub use matcher::{parse_verdicts, SemanticMatcher};
pub use pipeline::EvaluationPipeline;
pub use prompts::{PromptRenderer, Template, TemplateError, TemplateRegistry, TemplateVariables};

/// Errors that end the evaluation of one case
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Assessor still failing after {attempts} attempts: {message}")]
    TransientGateway { attempts: u32, message: String },

    #[error("Assessor rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Failed to parse entity extraction: {0}")]
    ExtractionParse(String),

    #[error("Malformed assessor response: {0}")]
    MalformedResponse(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Case timed out after {timeout:?}")]
    CaseTimeout { timeout: Duration },

    #[error("No generated answer available: {0}")]
    AnswerUnavailable(String),
}

impl EvalError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EvalError::TransientGateway { .. } => FailureKind::TransientGateway,
            EvalError::GatewayRejected(_) => FailureKind::GatewayRejected,
            EvalError::ExtractionParse(_) => FailureKind::ExtractionParse,
            EvalError::MalformedResponse(_) => FailureKind::MalformedResponse,
            EvalError::Template(_) => FailureKind::Configuration,
            EvalError::CaseTimeout { .. } => FailureKind::Timeout,
            EvalError::AnswerUnavailable(_) => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
