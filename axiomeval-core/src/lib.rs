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

//! Axiomeval Core
//!
//! Data model shared by the evaluation pipeline: cases, entity lists,
//! verdicts, axiom citations, reports, configuration and retry policy.

pub mod axiom;
pub mod case;
pub mod config;
pub mod report;
pub mod resilience;
pub mod verdict;

pub use axiom::{
    Axiom, AxiomCitation, AxiomId, AxiomStore, AxiomStoreError, CitationStatus, AXIOM_ID_DIGITS,
    AXIOM_ID_PREFIX,
};
pub use case::{
    Entity, EntityCategory, EntityExtraction, EntityList, EntityOrigin, EntitySource,
    EvaluationCase, EvaluationRequest,
};
pub use config::{
    AssessorConfig, ConfigError, EvaluatorConfig, MatchStrategy, MatchingConfig, PathsConfig,
    PipelineConfig, Provider, RetryConfig, ScoringConfig, StrategyKind,
};
pub use report::{
    CaseFailure, CaseOutcome, EvaluationReport, FailureKind, RunSummary, ScoreBreakdown,
};
pub use resilience::{retry, RetryError, RetryPolicy, Retryable};
pub use verdict::{EntityVerdict, VerdictStatus};
