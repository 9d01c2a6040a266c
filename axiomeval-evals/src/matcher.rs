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

//! Semantic matching of expected-answer entities
//!
//! For every expected entity the assessor judges whether the generated
//! answer describes the same behavior (direction, effect) as the expected
//! answer. Entities go out one per call or in batches, with bounded
//! parallelism, and verdicts always come back in input order.

use crate::gateway::AssessorGateway;
use crate::llm_client::CompletionOptions;
use crate::prompts::{self, PromptRenderer, TemplateError, ENTITY_MATCH};
use crate::response::{json_type, parse_json_object};
use crate::EvalError;
use axiomeval_core::{EntityVerdict, MatchStrategy, MatchingConfig, VerdictStatus};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Variables supplied to the match template
pub const MATCH_VARIABLES: [&str; 3] = ["entity_list", "llm_answer", "expected_answer"];

pub struct SemanticMatcher {
    gateway: Arc<AssessorGateway>,
    renderer: PromptRenderer,
    strategy: MatchStrategy,
    max_concurrency: usize,
    options: CompletionOptions,
}

impl SemanticMatcher {
    /// Fails if the match template is missing or needs unknown variables
    pub fn new(gateway: Arc<AssessorGateway>, renderer: PromptRenderer) -> Result<Self, TemplateError> {
        renderer.check(ENTITY_MATCH, &MATCH_VARIABLES)?;
        let defaults = MatchingConfig::default();
        Ok(Self {
            gateway,
            renderer,
            strategy: defaults.strategy(),
            max_concurrency: defaults.max_concurrency,
            options: CompletionOptions::default().with_json_mode(true),
        })
    }

    pub fn from_config(
        gateway: Arc<AssessorGateway>,
        renderer: PromptRenderer,
        config: &MatchingConfig,
    ) -> Result<Self, TemplateError> {
        Ok(Self::new(gateway, renderer)?
            .with_strategy(config.strategy())
            .with_max_concurrency(config.max_concurrency))
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Match calls in flight at once for one case
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sampling options; JSON mode is always on
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options.with_json_mode(true);
        self
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Judge a single entity
    pub async fn match_entity(
        &self,
        generated: &str,
        expected: &str,
        entity: &str,
    ) -> Result<EntityVerdict, EvalError> {
        let mut verdicts = self
            .match_batch(generated, expected, &[entity.to_string()])
            .await?;
        Ok(verdicts
            .pop()
            .unwrap_or_else(|| EntityVerdict::not_matched(entity, VerdictStatus::Unparseable)))
    }

    /// Judge every entity; the result is in the order of `entities`
    pub async fn match_all(
        &self,
        generated: &str,
        expected: &str,
        entities: &[String],
    ) -> Result<Vec<EntityVerdict>, EvalError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = match self.strategy {
            MatchStrategy::PerEntity => 1,
            MatchStrategy::Batched { batch_size } => batch_size.max(1),
        };
        let batches: Vec<&[String]> = entities.chunks(batch_size).collect();
        debug!(
            "Matching {} entities in {} calls (concurrency {})",
            entities.len(),
            batches.len(),
            self.max_concurrency
        );

        let mut results: Vec<(usize, Vec<EntityVerdict>)> = stream::iter(batches.into_iter().enumerate())
            .map(|(idx, batch)| async move {
                self.match_batch(generated, expected, batch)
                    .await
                    .map(|verdicts| (idx, verdicts))
            })
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await?;

        // Completion order is arbitrary; restore input order
        results.sort_by_key(|(idx, _)| *idx);
        Ok(results.into_iter().flat_map(|(_, verdicts)| verdicts).collect())
    }

    async fn match_batch(
        &self,
        generated: &str,
        expected: &str,
        batch: &[String],
    ) -> Result<Vec<EntityVerdict>, EvalError> {
        let entity_list = serde_json::to_string(batch)
            .map_err(|e| EvalError::MalformedResponse(format!("entity list: {}", e)))?;
        let prompt = self.renderer.render(
            ENTITY_MATCH,
            &prompts::variables([
                ("entity_list", entity_list.as_str()),
                ("llm_answer", generated),
                ("expected_answer", expected),
            ]),
        )?;

        let response = self.gateway.complete(&prompt, &self.options).await?;
        parse_verdicts(&response, batch)
    }
}

fn normalize(entity: &str) -> String {
    entity.trim().to_lowercase()
}

/// Read one verdict per entity out of a match response
///
/// The body must be a JSON object with a `verdicts` array. Entities without a
/// usable entry in that array come back as `unparseable` with accuracy 0.
pub fn parse_verdicts<S: AsRef<str>>(
    text: &str,
    entities: &[S],
) -> Result<Vec<EntityVerdict>, EvalError> {
    let root = parse_json_object(text).map_err(EvalError::MalformedResponse)?;
    let entries = match root.get("verdicts") {
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(EvalError::MalformedResponse(format!(
                "verdicts is {}, expected an array",
                json_type(other)
            )))
        }
        None => {
            return Err(EvalError::MalformedResponse(
                "missing verdicts array".to_string(),
            ))
        }
    };

    let mut by_entity: HashMap<String, &Value> = HashMap::new();
    for entry in entries {
        if let Some(name) = entry.get("entity").and_then(Value::as_str) {
            by_entity.entry(normalize(name)).or_insert(entry);
        }
    }

    let verdicts = entities
        .iter()
        .map(|entity| {
            let entity = entity.as_ref();
            let entry = by_entity.get(&normalize(entity)).copied().or_else(|| {
                // A lone verdict for a lone entity is accepted even if renamed
                (entities.len() == 1 && entries.len() == 1).then(|| &entries[0])
            });

            let Some(entry) = entry else {
                warn!("No verdict for entity {:?}", entity);
                return EntityVerdict::not_matched(entity, VerdictStatus::Unparseable)
                    .with_rationale("missing from assessor response");
            };

            verdict_from_entry(entity, entry).unwrap_or_else(|reason| {
                warn!("Unparseable verdict for entity {:?}: {}", entity, reason);
                EntityVerdict::not_matched(entity, VerdictStatus::Unparseable).with_rationale(reason)
            })
        })
        .collect();

    Ok(verdicts)
}

fn verdict_from_entry(entity: &str, entry: &Value) -> Result<EntityVerdict, String> {
    if !entry.is_object() {
        return Err(format!("verdict is {}", json_type(entry)));
    }

    let matched_flag = match entry.get("matched") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(other) => return Err(format!("matched is {}", json_type(other))),
    };

    let status = match entry.get("status").and_then(Value::as_str) {
        Some(label) => {
            VerdictStatus::parse(label).ok_or_else(|| format!("unknown status {:?}", label))?
        }
        None => match matched_flag {
            Some(true) => VerdictStatus::Matched,
            Some(false) => VerdictStatus::Unrelated,
            None => return Err("missing status".to_string()),
        },
    };

    if matched_flag.is_some_and(|flag| flag != status.is_match()) {
        return Err(format!(
            "matched flag disagrees with status {:?}",
            status
        ));
    }

    let verdict = if status.is_match() {
        let accuracy = match entry.get("accuracy") {
            None | Some(Value::Null) => 1.0,
            Some(value) => value
                .as_f64()
                .ok_or_else(|| format!("accuracy is {}", json_type(value)))?,
        };
        if !(0.0..=1.0).contains(&accuracy) {
            return Err(format!("accuracy {} outside [0, 1]", accuracy));
        }
        if accuracy == 0.0 {
            // No confidence in the match
            EntityVerdict::not_matched(entity, VerdictStatus::Unrelated)
        } else {
            EntityVerdict::matched(entity, accuracy)
        }
    } else {
        EntityVerdict::not_matched(entity, status)
    };

    let rationale = entry
        .get("rationale")
        .or_else(|| entry.get("reason"))
        .and_then(Value::as_str);
    Ok(match rationale {
        Some(rationale) => verdict.with_rationale(rationale),
        None => verdict,
    })
}
