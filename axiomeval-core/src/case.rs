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

//! Evaluation cases and the entity lists extracted from them
//!
//! A case is the (query, generated answer, expected answer) triple submitted
//! to the pipeline. Entity lists are produced once per case, either by the
//! extractor or supplied by the caller, and never change afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One (query, generated answer, expected answer) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationCase {
    /// Optional dataset row identifier; not part of scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Question asked by the user
    pub user_query: String,

    /// Answer produced by the assistant under evaluation
    pub generated_answer: String,

    /// Reference answer
    pub expected_answer: String,
}

impl EvaluationCase {
    pub fn new(
        user_query: impl Into<String>,
        generated_answer: impl Into<String>,
        expected_answer: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_query: user_query.into(),
            generated_answer: generated_answer.into(),
            expected_answer: expected_answer.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Stable content fingerprint (blake3 over the three texts)
    ///
    /// The id is excluded so that the same triple under two dataset ids maps
    /// to the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for field in [
            &self.user_query,
            &self.generated_answer,
            &self.expected_answer,
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }
}

/// A case plus an optional caller-supplied entity list
///
/// When `entities` is present the extraction stage is skipped and only the
/// listed entities are matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub case: EvaluationCase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,
}

impl EvaluationRequest {
    pub fn new(case: EvaluationCase) -> Self {
        Self {
            case,
            entities: None,
        }
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Fingerprint of the case and, when present, the supplied entities
    pub fn fingerprint(&self) -> String {
        match &self.entities {
            None => self.case.fingerprint(),
            Some(entities) => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(self.case.fingerprint().as_bytes());
                for entity in entities {
                    hasher.update(&(entity.len() as u64).to_le_bytes());
                    hasher.update(entity.as_bytes());
                }
                hex::encode(&hasher.finalize().as_bytes()[..16])
            }
        }
    }
}

/// Which text an entity was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    UserQuery,
    LlmAnswer,
    ExpectedAnswer,
}

impl EntitySource {
    pub const ALL: [EntitySource; 3] = [
        EntitySource::UserQuery,
        EntitySource::LlmAnswer,
        EntitySource::ExpectedAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntitySource::UserQuery => "user_query",
            EntitySource::LlmAnswer => "llm_answer",
            EntitySource::ExpectedAnswer => "expected_answer",
        }
    }

    /// Key of this source's section in an extraction response
    pub fn response_key(&self) -> &'static str {
        match self {
            EntitySource::UserQuery => "user_query_entities",
            EntitySource::LlmAnswer => "llm_answer_entities",
            EntitySource::ExpectedAnswer => "expected_answer_entities",
        }
    }
}

impl fmt::Display for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity category
///
/// Declaration order is the iteration order of an [`EntityList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    PhysicalActivity,
    MedicalBehavior,
    PhysicalCharacteristic,
    Habit,
    HealthOutcome,
    /// Caller-supplied entities and flat extraction lists
    Uncategorized,
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::PhysicalActivity => "physical_activity",
            EntityCategory::MedicalBehavior => "medical_behavior",
            EntityCategory::PhysicalCharacteristic => "physical_characteristic",
            EntityCategory::Habit => "habit",
            EntityCategory::HealthOutcome => "health_outcome",
            EntityCategory::Uncategorized => "uncategorized",
        }
    }

    /// Parse a category label as written by the assessor model
    ///
    /// Case, separators (`-`, `_`, space) and a trailing plural `s` are
    /// ignored, so "Physical Activities" and "physical-activity" agree.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(|c| c.to_lowercase())
            .collect();
        let singular = normalized
            .strip_suffix("ies")
            .map(|stem| format!("{stem}y"))
            .or_else(|| normalized.strip_suffix('s').map(str::to_string))
            .unwrap_or_else(|| normalized.clone());

        match singular.as_str() {
            "physicalactivity" => Some(EntityCategory::PhysicalActivity),
            "medicalbehavior" | "medicalbehaviour" => Some(EntityCategory::MedicalBehavior),
            "physicalcharacteristic" => Some(EntityCategory::PhysicalCharacteristic),
            "habit" => Some(EntityCategory::Habit),
            "healthoutcome" => Some(EntityCategory::HealthOutcome),
            "uncategorized" | "other" => Some(EntityCategory::Uncategorized),
            _ => None,
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An atomic entity string with its category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub category: EntityCategory,
}

/// Set of entities from one source
///
/// Insertion collapses duplicates (trimmed, case-insensitive) onto the first
/// occurrence. Entities are kept sorted by category, then by first
/// appearance, so two lists built from the same input iterate identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityList {
    pub source: EntitySource,
    entities: Vec<Entity>,
}

impl EntityList {
    pub fn new(source: EntitySource) -> Self {
        Self {
            source,
            entities: Vec::new(),
        }
    }

    /// Build an uncategorized list from caller-supplied names
    pub fn from_names<I, S>(source: EntitySource, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new(source);
        for name in names {
            list.insert(name.as_ref(), EntityCategory::Uncategorized);
        }
        list
    }

    /// Insert an entity; returns false for blanks and duplicates
    pub fn insert(&mut self, name: &str, category: EntityCategory) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let key = name.to_lowercase();
        if self.entities.iter().any(|e| e.name.to_lowercase() == key) {
            return false;
        }

        // Insert after the last entity of the same or an earlier category
        let position = self
            .entities
            .iter()
            .rposition(|e| e.category <= category)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.entities.insert(
            position,
            Entity {
                name: name.to_string(),
                category,
            },
        );
        true
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entity names in list order
    pub fn names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }

    pub fn by_category(&self, category: EntityCategory) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.category == category)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Where the expected-answer entities of a report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOrigin {
    Extracted,
    Supplied,
}

/// Entity lists for all three sources of a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityExtraction {
    pub user_query: EntityList,
    pub llm_answer: EntityList,
    pub expected_answer: EntityList,
}

impl EntityExtraction {
    pub fn empty() -> Self {
        Self {
            user_query: EntityList::new(EntitySource::UserQuery),
            llm_answer: EntityList::new(EntitySource::LlmAnswer),
            expected_answer: EntityList::new(EntitySource::ExpectedAnswer),
        }
    }

    /// Extraction for caller-supplied expected-answer entities
    pub fn supplied<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            expected_answer: EntityList::from_names(EntitySource::ExpectedAnswer, names),
            ..Self::empty()
        }
    }

    pub fn get(&self, source: EntitySource) -> &EntityList {
        match source {
            EntitySource::UserQuery => &self.user_query,
            EntitySource::LlmAnswer => &self.llm_answer,
            EntitySource::ExpectedAnswer => &self.expected_answer,
        }
    }

    pub fn get_mut(&mut self, source: EntitySource) -> &mut EntityList {
        match source {
            EntitySource::UserQuery => &mut self.user_query,
            EntitySource::LlmAnswer => &mut self.llm_answer,
            EntitySource::ExpectedAnswer => &mut self.expected_answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_aliases() {
        assert_eq!(
            EntityCategory::parse("Physical Activities"),
            Some(EntityCategory::PhysicalActivity)
        );
        assert_eq!(
            EntityCategory::parse("medical-behavior"),
            Some(EntityCategory::MedicalBehavior)
        );
        assert_eq!(
            EntityCategory::parse("physical_characteristics"),
            Some(EntityCategory::PhysicalCharacteristic)
        );
        assert_eq!(EntityCategory::parse("HABITS"), Some(EntityCategory::Habit));
        assert_eq!(
            EntityCategory::parse("health outcomes"),
            Some(EntityCategory::HealthOutcome)
        );
        assert_eq!(EntityCategory::parse("diet plan"), None);
    }

    #[test]
    fn test_entity_list_dedup_and_order() {
        let mut list = EntityList::new(EntitySource::ExpectedAnswer);
        assert!(list.insert("premium", EntityCategory::HealthOutcome));
        assert!(list.insert("smoking", EntityCategory::Habit));
        assert!(list.insert("running", EntityCategory::PhysicalActivity));
        assert!(!list.insert("  Smoking ", EntityCategory::Habit));
        assert!(!list.insert("   ", EntityCategory::Habit));
        assert!(list.insert("drinking", EntityCategory::Habit));

        assert_eq!(
            list.names(),
            vec!["running", "smoking", "drinking", "premium"]
        );
        assert_eq!(list.by_category(EntityCategory::Habit).count(), 2);
    }

    #[test]
    fn test_fingerprint_ignores_id() {
        let a = EvaluationCase::new("q", "g", "e").with_id("row-1");
        let b = EvaluationCase::new("q", "g", "e").with_id("row-2");
        let c = EvaluationCase::new("q", "g", "e2");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        let a = EvaluationCase::new("ab", "c", "");
        let b = EvaluationCase::new("a", "bc", "");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_request_fingerprint_includes_entities() {
        let case = EvaluationCase::new("q", "g", "e");
        let plain = EvaluationRequest::new(case.clone());
        let supplied = EvaluationRequest::new(case.clone()).with_entities(vec!["bmi".into()]);

        assert_eq!(plain.fingerprint(), case.fingerprint());
        assert_ne!(plain.fingerprint(), supplied.fingerprint());
    }

    #[test]
    fn test_supplied_extraction() {
        let extraction = EntityExtraction::supplied(["smoking habit", "premium"]);
        assert!(extraction.user_query.is_empty());
        assert!(extraction.llm_answer.is_empty());
        assert_eq!(
            extraction.get(EntitySource::ExpectedAnswer).names(),
            vec!["smoking habit", "premium"]
        );
    }

    #[test]
    fn test_case_serde_skips_missing_id() {
        let case = EvaluationCase::new("q", "g", "e");
        let json = serde_json::to_value(&case).unwrap();
        assert!(json.get("id").is_none());

        let back: EvaluationCase = serde_json::from_value(json).unwrap();
        assert_eq!(back, case);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        fn arb_category() -> impl Strategy<Value = EntityCategory> {
            prop::sample::select(vec![
                EntityCategory::PhysicalActivity,
                EntityCategory::MedicalBehavior,
                EntityCategory::PhysicalCharacteristic,
                EntityCategory::Habit,
                EntityCategory::HealthOutcome,
                EntityCategory::Uncategorized,
            ])
        }

        proptest! {
            #[test]
            fn prop_insert_dedups_and_orders_by_category(
                inserts in prop::collection::vec(("[a-cA-C ]{0,3}", arb_category()), 0..24)
            ) {
                let mut list = EntityList::new(EntitySource::ExpectedAnswer);
                let mut accepted = Vec::new();
                for (name, category) in &inserts {
                    if list.insert(name, *category) {
                        accepted.push((name.trim().to_string(), *category));
                    }
                }

                let keys: BTreeSet<String> =
                    list.entities().iter().map(|e| e.name.to_lowercase()).collect();
                prop_assert_eq!(keys.len(), list.len());
                for (name, _) in &inserts {
                    let key = name.trim().to_lowercase();
                    prop_assert!(key.is_empty() || keys.contains(&key));
                }

                // Category order, insertion order within a category
                accepted.sort_by_key(|(_, category)| *category);
                let actual: Vec<(String, EntityCategory)> = list
                    .entities()
                    .iter()
                    .map(|e| (e.name.clone(), e.category))
                    .collect();
                prop_assert_eq!(actual, accepted);
            }
        }
    }
}
