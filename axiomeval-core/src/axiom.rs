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

//! Axiom registry and citation records
//!
//! Axioms are the numbered policy rules the assistant grounds its answers in.
//! The registry is loaded once at startup and shared read-only between
//! concurrent evaluations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Prefix of every axiom identifier
pub const AXIOM_ID_PREFIX: &str = "AXIOM-";

/// Number of digits in a well-formed axiom identifier
pub const AXIOM_ID_DIGITS: usize = 3;

/// Axiom identifier such as `AXIOM-001`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxiomId(String);

impl AxiomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `AXIOM-` followed by exactly three ASCII digits
    pub fn is_well_formed(&self) -> bool {
        self.0
            .strip_prefix(AXIOM_ID_PREFIX)
            .map(|digits| {
                digits.len() == AXIOM_ID_DIGITS && digits.bytes().all(|b| b.is_ascii_digit())
            })
            .unwrap_or(false)
    }

    /// Citation token as it appears in answer text
    pub fn citation_token(&self) -> String {
        format!("[{}]", self.0)
    }
}

impl fmt::Display for AxiomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AxiomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A numbered policy rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axiom {
    pub id: AxiomId,
    pub subject: String,
    pub entity: String,
    pub trigger: String,
    pub conditions: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Error)]
pub enum AxiomStoreError {
    #[error("Failed to read axiom file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid axiom JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read-only registry of axioms keyed by id
#[derive(Debug, Clone, Default)]
pub struct AxiomStore {
    axioms: BTreeMap<AxiomId, Axiom>,
}

impl AxiomStore {
    /// Build a store; a later axiom with a repeated id replaces the earlier one
    pub fn new(axioms: impl IntoIterator<Item = Axiom>) -> Self {
        Self {
            axioms: axioms.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    /// Parse a JSON array of axioms
    ///
    /// Fields beyond the axiom schema (`object`, `link`, `amendments`, ...)
    /// are ignored.
    pub fn from_json(json: &str) -> Result<Self, AxiomStoreError> {
        let axioms: Vec<Axiom> = serde_json::from_str(json)?;
        let store = Self::new(axioms);

        let malformed = store
            .axioms
            .keys()
            .filter(|id| !id.is_well_formed())
            .count();
        if malformed > 0 {
            tracing::warn!(
                "Axiom registry contains {} ids outside the {}NNN format",
                malformed,
                AXIOM_ID_PREFIX
            );
        }

        Ok(store)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AxiomStoreError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| AxiomStoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, id: &AxiomId) -> Option<&Axiom> {
        self.axioms.get(id)
    }

    pub fn contains(&self, id: &AxiomId) -> bool {
        self.axioms.contains_key(id)
    }

    /// All axioms in id order
    pub fn list(&self) -> Vec<&Axiom> {
        self.axioms.values().collect()
    }

    pub fn len(&self) -> usize {
        self.axioms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axioms.is_empty()
    }
}

/// Resolution of a citation against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStatus {
    /// Well-formed and present in the registry
    Resolved,
    /// Well-formed but not in the registry
    Unknown,
    /// Not of the `AXIOM-NNN` form
    Malformed,
}

/// An axiom citation found in generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxiomCitation {
    pub id: AxiomId,
    pub valid: bool,
    pub status: CitationStatus,
}

impl AxiomCitation {
    /// Resolve `id` against `store`
    pub fn resolve(id: AxiomId, store: &AxiomStore) -> Self {
        let status = if !id.is_well_formed() {
            CitationStatus::Malformed
        } else if store.contains(&id) {
            CitationStatus::Resolved
        } else {
            CitationStatus::Unknown
        };
        Self {
            id,
            valid: status == CitationStatus::Resolved,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSTITUTION: &str = r#"[
        {
            "id": "AXIOM-001",
            "subject": "Policyholder",
            "entity": "Premium",
            "trigger": "Smoking",
            "conditions": "Active tobacco use in the last 12 months",
            "description": "Tobacco use increases the premium.",
            "category": "Habit",
            "object": "ignored",
            "amendments": []
        },
        {
            "id": "AXIOM-002",
            "subject": "Policyholder",
            "entity": "Premium",
            "trigger": "Exercise",
            "conditions": "Verified activity tracker",
            "description": "Regular exercise may reduce the premium.",
            "category": "Physical activity"
        }
    ]"#;

    #[test]
    fn test_load_from_json_ignores_extra_fields() {
        let store = AxiomStore::from_json(CONSTITUTION).unwrap();
        assert_eq!(store.len(), 2);

        let axiom = store.get(&AxiomId::from("AXIOM-001")).unwrap();
        assert_eq!(axiom.trigger, "Smoking");
        assert_eq!(axiom.category, "Habit");
        assert!(store.get(&AxiomId::from("AXIOM-999")).is_none());
    }

    #[test]
    fn test_list_in_id_order() {
        let store = AxiomStore::from_json(CONSTITUTION).unwrap();
        let ids: Vec<&str> = store.list().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["AXIOM-001", "AXIOM-002"]);
    }

    #[test]
    fn test_missing_field_is_error() {
        let err = AxiomStore::from_json(r#"[{"id": "AXIOM-001"}]"#).unwrap_err();
        assert!(matches!(err, AxiomStoreError::Json(_)));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constitution.json");
        std::fs::write(&path, CONSTITUTION).unwrap();

        let store = AxiomStore::from_path(&path).unwrap();
        assert!(store.contains(&AxiomId::from("AXIOM-002")));

        let err = AxiomStore::from_path(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, AxiomStoreError::Io { .. }));
    }

    #[test]
    fn test_id_well_formed() {
        assert!(AxiomId::from("AXIOM-001").is_well_formed());
        assert!(!AxiomId::from("AXIOM-12").is_well_formed());
        assert!(!AxiomId::from("AXIOM-1234").is_well_formed());
        assert!(!AxiomId::from("axiom-001").is_well_formed());
        assert_eq!(AxiomId::from("AXIOM-007").citation_token(), "[AXIOM-007]");
    }

    #[test]
    fn test_citation_resolution() {
        let store = AxiomStore::from_json(CONSTITUTION).unwrap();

        let resolved = AxiomCitation::resolve("AXIOM-001".into(), &store);
        assert!(resolved.valid);
        assert_eq!(resolved.status, CitationStatus::Resolved);

        let unknown = AxiomCitation::resolve("AXIOM-999".into(), &store);
        assert!(!unknown.valid);
        assert_eq!(unknown.status, CitationStatus::Unknown);

        let malformed = AxiomCitation::resolve("AXIOM-12".into(), &store);
        assert!(!malformed.valid);
        assert_eq!(malformed.status, CitationStatus::Malformed);
    }
}
