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

//! Per-entity match verdicts

use serde::{Deserialize, Serialize};

/// How an expected-answer entity fared in the generated answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// Present with the same behavior/direction
    Matched,
    /// Not mentioned in the generated answer
    Absent,
    /// Present but with the opposite behavior/direction
    Contradicted,
    /// Present but the behavior described has nothing to do with the reference
    Unrelated,
    /// The judgment for this entity could not be read from the response
    Unparseable,
}

impl VerdictStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "matched" | "match" | "supported" | "equivalent" => Some(VerdictStatus::Matched),
            "absent" | "missing" | "not_found" | "not found" => Some(VerdictStatus::Absent),
            "contradicted" | "contradiction" | "contradictory" | "opposite" => {
                Some(VerdictStatus::Contradicted)
            }
            "unrelated" | "different" | "mismatch" => Some(VerdictStatus::Unrelated),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, VerdictStatus::Matched)
    }
}

/// Judgment for one expected-answer entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVerdict {
    pub entity: String,
    pub matched: bool,
    /// 0.0 unless matched; otherwise the assessor's similarity confidence.
    /// The matcher reports a zero-confidence match as `unrelated`.
    pub accuracy: f64,
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl EntityVerdict {
    /// A matched verdict; accuracy is clamped into [0, 1]
    pub fn matched(entity: impl Into<String>, accuracy: f64) -> Self {
        let accuracy = if accuracy.is_finite() {
            accuracy.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            entity: entity.into(),
            matched: true,
            accuracy,
            status: VerdictStatus::Matched,
            rationale: None,
        }
    }

    /// A non-matching verdict with accuracy 0
    pub fn not_matched(entity: impl Into<String>, status: VerdictStatus) -> Self {
        debug_assert!(!status.is_match());
        Self {
            entity: entity.into(),
            matched: false,
            accuracy: 0.0,
            status,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Accuracy is finite, within [0, 1], and zero when not matched
    pub fn is_well_formed(&self) -> bool {
        self.accuracy.is_finite()
            && (0.0..=1.0).contains(&self.accuracy)
            && (self.matched || self.accuracy == 0.0)
            && self.matched == self.status.is_match()
    }
}
