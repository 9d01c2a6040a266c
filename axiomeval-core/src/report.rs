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

//! Evaluation reports, per-case outcomes and run summaries

use crate::axiom::AxiomCitation;
use crate::case::{EntityExtraction, EntityOrigin, EvaluationCase};
use crate::verdict::EntityVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the final score was composed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub entity_count: usize,
    pub matched_count: usize,

    /// Mean verdict accuracy; 0.0 when there are no entities
    pub mean_accuracy: f64,

    pub citation_count: usize,
    pub invalid_citation_count: usize,

    /// Fraction of valid citations, `None` when nothing was cited
    pub citation_validity: Option<f64>,

    /// Amount subtracted from the mean accuracy for invalid citations
    pub citation_penalty: f64,
}

/// Terminal artifact of evaluating one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub case: EvaluationCase,
    pub case_fingerprint: String,
    pub entity_origin: EntityOrigin,
    pub entities: EntityExtraction,

    /// One verdict per expected-answer entity, in entity-list order
    pub verdicts: Vec<EntityVerdict>,

    /// Citations in order of first appearance
    pub citations: Vec<AxiomCitation>,

    /// Final score in [0, 1]
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationReport {
    pub fn invalid_citations(&self) -> impl Iterator<Item = &AxiomCitation> {
        self.citations.iter().filter(|c| !c.valid)
    }
}

/// Category of a case that could not be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientGateway,
    GatewayRejected,
    ExtractionParse,
    MalformedResponse,
    Configuration,
    Timeout,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientGateway => "transient_gateway",
            FailureKind::GatewayRejected => "gateway_rejected",
            FailureKind::ExtractionParse => "extraction_parse",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::Configuration => "configuration",
            FailureKind::Timeout => "timeout",
            FailureKind::Internal => "internal",
        }
    }
}

/// Why a case failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one case within a batch
///
/// A failed case is never reported as a zero score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Evaluated {
        report: Box<EvaluationReport>,
    },
    Failed {
        case: EvaluationCase,
        error: CaseFailure,
    },
}

impl CaseOutcome {
    pub fn evaluated(report: EvaluationReport) -> Self {
        CaseOutcome::Evaluated {
            report: Box::new(report),
        }
    }

    pub fn failed(case: EvaluationCase, kind: FailureKind, message: impl Into<String>) -> Self {
        CaseOutcome::Failed {
            case,
            error: CaseFailure {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn case(&self) -> &EvaluationCase {
        match self {
            CaseOutcome::Evaluated { report } => &report.case,
            CaseOutcome::Failed { case, .. } => case,
        }
    }

    pub fn report(&self) -> Option<&EvaluationReport> {
        match self {
            CaseOutcome::Evaluated { report } => Some(&**report),
            CaseOutcome::Failed { .. } => None,
        }
    }

    /// Score of an evaluated case; `None` for failures
    pub fn score(&self) -> Option<f64> {
        self.report().map(|r| r.score)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CaseOutcome::Failed { .. })
    }
}

/// Aggregate statistics over a batch of outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub evaluated: usize,
    pub failed: usize,

    /// Statistics over evaluated cases only
    pub mean_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,

    pub invalid_citations: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
}

impl RunSummary {
    pub fn from_outcomes(run_id: impl Into<String>, outcomes: &[CaseOutcome]) -> Self {
        let scores: Vec<f64> = outcomes.iter().filter_map(CaseOutcome::score).collect();

        let mut failures_by_kind = BTreeMap::new();
        for outcome in outcomes {
            if let CaseOutcome::Failed { error, .. } = outcome {
                *failures_by_kind.entry(error.kind).or_insert(0) += 1;
            }
        }

        let invalid_citations = outcomes
            .iter()
            .filter_map(CaseOutcome::report)
            .map(|r| r.invalid_citations().count())
            .sum();

        let mean_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        Self {
            run_id: run_id.into(),
            total: outcomes.len(),
            evaluated: scores.len(),
            failed: outcomes.len() - scores.len(),
            mean_score,
            min_score: scores.iter().copied().reduce(f64::min),
            max_score: scores.iter().copied().reduce(f64::max),
            invalid_citations,
            failures_by_kind,
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Run {}: {}/{} evaluated, {} failed",
            self.run_id, self.evaluated, self.total, self.failed
        )?;
        if let Some(mean) = self.mean_score {
            write!(f, ", mean score {:.3}", mean)?;
        }
        if self.invalid_citations > 0 {
            write!(f, ", {} invalid citations", self.invalid_citations)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axiom::{AxiomCitation, AxiomStore};
    use crate::verdict::VerdictStatus;

    fn report(score: f64, citations: Vec<AxiomCitation>) -> EvaluationReport {
        let case = EvaluationCase::new("q", "g", "e");
        EvaluationReport {
            case_fingerprint: case.fingerprint(),
            case,
            entity_origin: EntityOrigin::Supplied,
            entities: EntityExtraction::supplied(["premium"]),
            verdicts: vec![EntityVerdict::not_matched("premium", VerdictStatus::Absent)],
            citations,
            score,
            breakdown: ScoreBreakdown {
                entity_count: 1,
                matched_count: 0,
                mean_accuracy: score,
                citation_count: 0,
                invalid_citation_count: 0,
                citation_validity: None,
                citation_penalty: 0.0,
            },
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_separates_failures_from_zero_scores() {
        let store = AxiomStore::default();
        let outcomes = vec![
            CaseOutcome::evaluated(report(0.0, vec![])),
            CaseOutcome::evaluated(report(
                1.0,
                vec![AxiomCitation::resolve("AXIOM-999".into(), &store)],
            )),
            CaseOutcome::failed(
                EvaluationCase::new("q2", "g2", "e2"),
                FailureKind::TransientGateway,
                "timed out",
            ),
        ];

        let summary = RunSummary::from_outcomes("run-1", &outcomes);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.mean_score, Some(0.5));
        assert_eq!(summary.min_score, Some(0.0));
        assert_eq!(summary.max_score, Some(1.0));
        assert_eq!(summary.invalid_citations, 1);
        assert_eq!(
            summary.failures_by_kind.get(&FailureKind::TransientGateway),
            Some(&1)
        );
    }

    #[test]
    fn test_empty_summary() {
        let summary = RunSummary::from_outcomes("empty", &[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.mean_score, None);
        assert_eq!(summary.to_string(), "Run empty: 0/0 evaluated, 0 failed");
    }

    #[test]
    fn test_outcome_serialization_tags_status() {
        let failed = CaseOutcome::failed(
            EvaluationCase::new("q", "g", "e"),
            FailureKind::ExtractionParse,
            "missing section",
        );
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "extraction_parse");
        assert!(failed.score().is_none());

        let evaluated = CaseOutcome::evaluated(report(0.0, vec![]));
        let json = serde_json::to_value(&evaluated).unwrap();
        assert_eq!(json["status"], "evaluated");
        assert_eq!(json["report"]["score"], 0.0);

        let back: CaseOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.score(), Some(0.0));
    }
}
