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

//! Score aggregation
//!
//! The case score is the mean verdict accuracy. Citations are reported in
//! the breakdown and only affect the score when an invalid-citation penalty
//! is configured. Everything here is pure: the same verdicts, citations and
//! penalty always give the same score.

use axiomeval_core::{
    AxiomCitation, EntityExtraction, EntityOrigin, EntityVerdict, EvaluationReport,
    EvaluationRequest, ScoreBreakdown, ScoringConfig,
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator {
    invalid_citation_penalty: f64,
}

impl ScoreAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new().with_invalid_citation_penalty(config.invalid_citation_penalty)
    }

    /// Amount subtracted from the score per invalid citation
    pub fn with_invalid_citation_penalty(mut self, penalty: f64) -> Self {
        self.invalid_citation_penalty = if penalty.is_finite() {
            penalty.max(0.0)
        } else {
            0.0
        };
        self
    }

    pub fn aggregate(
        &self,
        verdicts: &[EntityVerdict],
        citations: &[AxiomCitation],
    ) -> (f64, ScoreBreakdown) {
        let mut total_accuracy = 0.0;
        let mut matched_count = 0;
        for verdict in verdicts {
            debug_assert!(
                verdict.is_well_formed(),
                "malformed verdict for {:?}: matched={} accuracy={}",
                verdict.entity,
                verdict.matched,
                verdict.accuracy
            );
            if verdict.matched {
                matched_count += 1;
                total_accuracy += clamp_unit(verdict.accuracy);
            }
        }

        let mean_accuracy = if verdicts.is_empty() {
            0.0
        } else {
            clamp_unit(total_accuracy / verdicts.len() as f64)
        };

        let invalid_citation_count = citations.iter().filter(|c| !c.valid).count();
        let citation_validity = if citations.is_empty() {
            None
        } else {
            Some((citations.len() - invalid_citation_count) as f64 / citations.len() as f64)
        };

        let score =
            clamp_unit(mean_accuracy - invalid_citation_count as f64 * self.invalid_citation_penalty);

        let breakdown = ScoreBreakdown {
            entity_count: verdicts.len(),
            matched_count,
            mean_accuracy,
            citation_count: citations.len(),
            invalid_citation_count,
            citation_validity,
            citation_penalty: mean_accuracy - score,
        };

        (score, breakdown)
    }

    /// Assemble the final report for `request`
    pub fn build_report(
        &self,
        request: &EvaluationRequest,
        entity_origin: EntityOrigin,
        entities: EntityExtraction,
        verdicts: Vec<EntityVerdict>,
        citations: Vec<AxiomCitation>,
        evaluated_at: DateTime<Utc>,
    ) -> EvaluationReport {
        let (score, breakdown) = self.aggregate(&verdicts, &citations);
        EvaluationReport {
            case: request.case.clone(),
            case_fingerprint: request.fingerprint(),
            entity_origin,
            entities,
            verdicts,
            citations,
            score,
            breakdown,
            evaluated_at,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
