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

//! Entity extraction using the assessor model
//!
//! One call per case extracts entities from all three texts. The response
//! must carry a section per source:
//!
//! ```json
//! {
//!   "user_query_entities": {"habit": ["smoking"], "health_outcome": ["premium"]},
//!   "llm_answer_entities": {"habit": ["smoking"], "health_outcome": ["premium"]},
//!   "expected_answer_entities": ["premium", "non-smoker"]
//! }
//! ```
//!
//! A section is either an object keyed by category or a flat list (stored as
//! uncategorized). Entities are plain strings; anything else fails the case.

use crate::gateway::AssessorGateway;
use crate::llm_client::CompletionOptions;
use crate::prompts::{self, PromptRenderer, TemplateError, ENTITY_EXTRACTION};
use crate::response::{json_type, parse_json_object};
use crate::EvalError;
use axiomeval_core::{EntityCategory, EntityExtraction, EntityList, EntitySource, EvaluationCase};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Variables supplied to the extraction template
pub const EXTRACTION_VARIABLES: [&str; 3] = ["user_query", "llm_answer", "expected_answer"];

pub struct EntityExtractor {
    gateway: Arc<AssessorGateway>,
    renderer: PromptRenderer,
    options: CompletionOptions,
}

impl EntityExtractor {
    /// Fails if the extraction template is missing or needs unknown variables
    pub fn new(gateway: Arc<AssessorGateway>, renderer: PromptRenderer) -> Result<Self, TemplateError> {
        renderer.check(ENTITY_EXTRACTION, &EXTRACTION_VARIABLES)?;
        Ok(Self {
            gateway,
            renderer,
            options: CompletionOptions::default().with_json_mode(true),
        })
    }

    /// Sampling options; JSON mode is always on
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options.with_json_mode(true);
        self
    }

    pub async fn extract(&self, case: &EvaluationCase) -> Result<EntityExtraction, EvalError> {
        let prompt = self.renderer.render(
            ENTITY_EXTRACTION,
            &prompts::variables([
                ("user_query", case.user_query.as_str()),
                ("llm_answer", case.generated_answer.as_str()),
                ("expected_answer", case.expected_answer.as_str()),
            ]),
        )?;

        let response = self.gateway.complete(&prompt, &self.options).await?;
        let extraction = parse_extraction(&response)?;

        debug!(
            "Extracted {}/{}/{} entities (query/answer/expected)",
            extraction.user_query.len(),
            extraction.llm_answer.len(),
            extraction.expected_answer.len()
        );
        Ok(extraction)
    }
}

/// Parse an extraction response into one entity list per source
pub fn parse_extraction(text: &str) -> Result<EntityExtraction, EvalError> {
    let root = parse_json_object(text).map_err(EvalError::ExtractionParse)?;
    let mut extraction = EntityExtraction::empty();

    for source in EntitySource::ALL {
        let key = source.response_key();
        let section = root
            .get(key)
            .ok_or_else(|| EvalError::ExtractionParse(format!("missing section {}", key)))?;
        let list = extraction.get_mut(source);

        match section {
            Value::Array(items) => insert_all(list, key, items, EntityCategory::Uncategorized)?,
            Value::Object(categories) => {
                for (label, items) in categories {
                    let category = EntityCategory::parse(label).ok_or_else(|| {
                        EvalError::ExtractionParse(format!("unknown category {:?} in {}", label, key))
                    })?;
                    let path = format!("{}.{}", key, label);
                    match items {
                        Value::Array(items) => insert_all(list, &path, items, category)?,
                        Value::Null => {}
                        other => {
                            return Err(EvalError::ExtractionParse(format!(
                                "{} is {}, expected a list of entities",
                                path,
                                json_type(other)
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(EvalError::ExtractionParse(format!(
                    "{} is {}, expected a list or an object of lists",
                    key,
                    json_type(other)
                )))
            }
        }
    }

    Ok(extraction)
}

fn insert_all(
    list: &mut EntityList,
    path: &str,
    items: &[Value],
    category: EntityCategory,
) -> Result<(), EvalError> {
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::String(name) => {
                list.insert(name, category);
            }
            other => {
                return Err(EvalError::ExtractionParse(format!(
                    "{}[{}] is {}, expected an entity string",
                    path,
                    i,
                    json_type(other)
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{AssessorClient, AssessorError, AssessorResponse};
    use async_trait::async_trait;
    use axiomeval_core::RetryPolicy;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockLLMClient {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AssessorClient for MockLLMClient {
        async fn complete(
            &self,
            prompt: &str,
            options: &CompletionOptions,
        ) -> Result<AssessorResponse, AssessorError> {
            assert!(options.json_mode);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(AssessorResponse::text(self.response.clone(), "mock"))
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    fn extractor(response: &str) -> (EntityExtractor, Arc<MockLLMClient>) {
        let client = Arc::new(MockLLMClient {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let gateway = AssessorGateway::new(client.clone()).with_retry_policy(RetryPolicy::none());
        let extractor =
            EntityExtractor::new(Arc::new(gateway), PromptRenderer::with_builtins()).unwrap();
        (extractor, client)
    }

    #[tokio::test]
    async fn test_extract_categorized_entities() {
        let response = r#"```json
{
  "user_query_entities": {"habit": ["smoking"], "health_outcome": ["premium"]},
  "llm_answer_entities": {"health_outcome": ["Premium", "premium"], "habit": ["Smoking"]},
  "expected_answer_entities": {"health_outcome": ["premium decrease"], "habit": ["non-smoker"], "physical_activity": []}
}
```"#;
        let (extractor, client) = extractor(response);
        let case = EvaluationCase::new(
            "Does quitting smoking lower my premium?",
            "Smoking raises your Premium.",
            "Premiums decrease for non-smokers.",
        );

        let extraction = extractor.extract(&case).await.unwrap();

        assert_eq!(extraction.user_query.names(), vec!["smoking", "premium"]);
        assert_eq!(extraction.llm_answer.names(), vec!["Smoking", "Premium"]);
        assert_eq!(
            extraction.expected_answer.names(),
            vec!["non-smoker", "premium decrease"]
        );
        assert_eq!(
            extraction.expected_answer.entities()[0].category,
            EntityCategory::Habit
        );

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("User query: Does quitting smoking lower my premium?"));
    }

    #[test]
    fn test_flat_lists_are_uncategorized() {
        let extraction = parse_extraction(
            r#"{"user_query_entities": [], "llm_answer_entities": ["bmi"], "expected_answer_entities": ["BMI", " bmi ", "age"]}"#,
        )
        .unwrap();

        assert!(extraction.user_query.is_empty());
        assert_eq!(extraction.expected_answer.names(), vec!["BMI", "age"]);
        assert!(extraction
            .expected_answer
            .entities()
            .iter()
            .all(|e| e.category == EntityCategory::Uncategorized));
    }

    #[test]
    fn test_rejects_nested_entities() {
        let err = parse_extraction(
            r#"{"user_query_entities": [], "llm_answer_entities": [],
                "expected_answer_entities": {"habit": [{"name": "smoking", "relation": "increases"}]}}"#,
        )
        .unwrap_err();
        match err {
            EvalError::ExtractionParse(msg) => {
                assert!(msg.contains("expected_answer_entities.habit[0]"), "{msg}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_missing_section_and_unknown_category() {
        assert!(matches!(
            parse_extraction(r#"{"user_query_entities": [], "llm_answer_entities": []}"#),
            Err(EvalError::ExtractionParse(ref msg)) if msg.contains("expected_answer_entities")
        ));
        assert!(matches!(
            parse_extraction(
                r#"{"user_query_entities": {"diet plan": ["keto"]}, "llm_answer_entities": [], "expected_answer_entities": []}"#
            ),
            Err(EvalError::ExtractionParse(ref msg)) if msg.contains("diet plan")
        ));
        assert!(matches!(
            parse_extraction("I could not find any entities."),
            Err(EvalError::ExtractionParse(_))
        ));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..3)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_entities_are_atomic_strings(items in prop::collection::vec(arb_json(), 0..6)) {
            let body = json!({
                "user_query_entities": [],
                "llm_answer_entities": {"habit": []},
                "expected_answer_entities": {"habit": items.clone()},
            });
            let all_strings = items.iter().all(Value::is_string);

            match parse_extraction(&body.to_string()) {
                Ok(extraction) => {
                    prop_assert!(all_strings);
                    for entity in extraction.expected_answer.entities() {
                        prop_assert!(!entity.name.is_empty());
                        prop_assert_eq!(entity.name.trim(), entity.name.as_str());
                        prop_assert!(items.iter().any(|v| v.as_str().map(str::trim) == Some(entity.name.as_str())));
                    }
                }
                Err(err) => {
                    prop_assert!(!all_strings);
                    prop_assert!(matches!(err, EvalError::ExtractionParse(_)));
                }
            }
        }
    }
}
