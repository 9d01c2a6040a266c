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

//! Prompt templates and rendering
//!
//! Templates use two placeholder styles:
//!
//! - `{name}` for case-level values (the extraction prompt)
//! - `{{name}}` or `{{ name }}` for batch/list values (the match prompt)
//!
//! Names are identifiers. Any other brace usage, such as the JSON examples
//! embedded in the prompts, is copied verbatim. Rendering is a single pass:
//! substituted values are never scanned for placeholders.

use axiomeval_core::PathsConfig;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Template id of the entity extraction prompt
pub const ENTITY_EXTRACTION: &str = "entity_extraction";

/// Template id of the entity match prompt
pub const ENTITY_MATCH: &str = "entity_match";

/// Template id of the per-axiom constitution section
pub const CONSTITUTION: &str = "constitution";

/// Template id of the answer prompt wrapping constitution and question
pub const USER_PROMPT: &str = "user_prompt";

/// Values bound to placeholder names
pub type TemplateVariables = HashMap<String, String>;

/// Build [`TemplateVariables`] from name/value pairs
pub fn variables<I, K, V>(pairs: I) -> TemplateVariables
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Template {template} has no value for placeholder {variable}")]
    MissingVariable { template: String, variable: String },

    #[error("Failed to read templates from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .expect("placeholder regex is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaceholderStyle {
    /// `{name}`
    Single,
    /// `{{name}}`
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placeholder {
    pub name: String,
    pub style: PlaceholderStyle,
}

/// A parsed prompt template
#[derive(Debug, Clone)]
pub struct Template {
    id: String,
    body: String,
    placeholders: Vec<Placeholder>,
}

impl Template {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut placeholders = Vec::new();
        for caps in placeholder_regex().captures_iter(&body) {
            let placeholder = match (caps.get(1), caps.get(2)) {
                (Some(name), _) => Placeholder {
                    name: name.as_str().to_string(),
                    style: PlaceholderStyle::Double,
                },
                (None, Some(name)) => Placeholder {
                    name: name.as_str().to_string(),
                    style: PlaceholderStyle::Single,
                },
                (None, None) => continue,
            };
            if !placeholders.contains(&placeholder) {
                placeholders.push(placeholder);
            }
        }

        Self {
            id: id.into(),
            body,
            placeholders,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Placeholders in order of first appearance
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Distinct placeholder names regardless of style
    pub fn variable_names(&self) -> BTreeSet<&str> {
        self.placeholders.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn render(&self, vars: &TemplateVariables) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.body.len());
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(&self.body) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1).or_else(|| caps.get(2)))
            else {
                continue;
            };
            let value = vars
                .get(name.as_str())
                .ok_or_else(|| TemplateError::MissingVariable {
                    template: self.id.clone(),
                    variable: name.as_str().to_string(),
                })?;

            rendered.push_str(&self.body[last..whole.start()]);
            rendered.push_str(value);
            last = whole.end();
        }
        rendered.push_str(&self.body[last..]);

        Ok(rendered)
    }
}

/// Immutable set of templates keyed by id
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in evaluation and answer templates
    pub fn with_builtins() -> Self {
        Self::new()
            .with_template(ENTITY_EXTRACTION, DEFAULT_ENTITY_EXTRACTION_PROMPT)
            .with_template(ENTITY_MATCH, DEFAULT_ENTITY_MATCH_PROMPT)
            .with_template(CONSTITUTION, DEFAULT_CONSTITUTION_PROMPT)
            .with_template(USER_PROMPT, DEFAULT_USER_PROMPT)
    }

    /// Built-ins overridden by `paths.prompts_dir`, if set
    pub fn from_config(paths: &PathsConfig) -> Result<Self, TemplateError> {
        match &paths.prompts_dir {
            Some(dir) => Self::with_builtins().with_dir(dir),
            None => Ok(Self::with_builtins()),
        }
    }

    /// Add or replace a template
    pub fn with_template(mut self, id: &str, body: &str) -> Self {
        self.templates
            .insert(id.to_string(), Template::new(id, body));
        self
    }

    /// Add or replace templates from `<id>_prompt.md` files in `dir`
    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let io_err = |source| TemplateError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix("_prompt.md"))
            else {
                continue;
            };
            let body = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.display().to_string(),
                source,
            })?;
            self.templates
                .insert(id.to_string(), Template::new(id, body));
            loaded += 1;
        }

        tracing::debug!("Loaded {} prompt templates from {}", loaded, dir.display());
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn ids(&self) -> BTreeSet<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

/// Renders registered templates
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    registry: Arc<TemplateRegistry>,
}

impl PromptRenderer {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn with_builtins() -> Self {
        Self::new(Arc::new(TemplateRegistry::with_builtins()))
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn render(
        &self,
        template_id: &str,
        vars: &TemplateVariables,
    ) -> Result<String, TemplateError> {
        self.registry
            .get(template_id)
            .ok_or_else(|| TemplateError::UnknownTemplate(template_id.to_string()))?
            .render(vars)
    }

    /// Check that `template_id` exists and needs no variable outside `provided`
    ///
    /// Components call this at construction so a bad template fails at
    /// startup instead of on the first case.
    pub fn check(&self, template_id: &str, provided: &[&str]) -> Result<(), TemplateError> {
        let template = self
            .registry
            .get(template_id)
            .ok_or_else(|| TemplateError::UnknownTemplate(template_id.to_string()))?;

        match template
            .variable_names()
            .into_iter()
            .find(|name| !provided.contains(name))
        {
            Some(missing) => Err(TemplateError::MissingVariable {
                template: template_id.to_string(),
                variable: missing.to_string(),
            }),
            None => Ok(()),
        }
    }
}

pub const DEFAULT_ENTITY_EXTRACTION_PROMPT: &str = r#"You are evaluating answers produced by a health-insurance assistant.

Extract the entities mentioned in each of the three texts below. An entity is an
atomic string naming a fact, activity or attribute, for example "smoking",
"BMI" or "premium". Return plain strings only: no relationships, no objects,
no nested lists.

Classify every entity into exactly one category:
- physical_activity: exercise, sports, movement
- medical_behavior: check-ups, medication, treatment adherence
- physical_characteristic: age, weight, BMI, blood pressure
- habit: smoking, drinking, diet, sleep
- health_outcome: premiums, risk, mortality, coverage effects

User query: {user_query}

LLM answer: {llm_answer}

Expected answer: {expected_answer}

Respond in JSON format, using an empty list when a category has no entities:
{
  "user_query_entities": {"physical_activity": [], "medical_behavior": [], "physical_characteristic": [], "habit": [], "health_outcome": []},
  "llm_answer_entities": {"physical_activity": [], "medical_behavior": [], "physical_characteristic": [], "habit": [], "health_outcome": []},
  "expected_answer_entities": {"physical_activity": [], "medical_behavior": [], "physical_characteristic": [], "habit": [], "health_outcome": []}
}"#;

pub const DEFAULT_ENTITY_MATCH_PROMPT: &str = r#"You compare how entities behave in two answers to the same health-insurance question.

ENTITIES:
{{entity_list}}

GENERATED ANSWER:
{{llm_answer}}

EXPECTED ANSWER:
{{expected_answer}}

For each entity, judge the generated answer against the expected answer:
- matched: the entity appears with the same behavior and direction. Paraphrases count.
- absent: the generated answer does not mention the entity.
- contradicted: the behavior or direction is opposite (expected "premium goes down", generated "premium goes up").
- unrelated: the entity appears but with behavior unrelated to the expected answer.

Give accuracy as your confidence in [0, 1] that the behavior matches; use 0 unless the status is matched.

Respond in JSON format with one verdict per entity, in the order given:
{
  "verdicts": [
    {"entity": "entity text", "status": "matched", "accuracy": 0.9, "rationale": "short reason"}
  ]
}"#;

pub const DEFAULT_CONSTITUTION_PROMPT: &str = r#"### {{ id }}
- Subject: {{ subject }}
- Object: {{ object }}
- Link: {{ link }}
- Conditions: {{ conditions }}
- Description: {{ description }}
- Amendments: {{ amendments }}
"#;

pub const DEFAULT_USER_PROMPT: &str = r#"Answer the question using the constitution below.

Every statement about premiums must follow from one or more axioms. Cite each
axiom you rely on by its id in square brackets, for example [AXIOM-001]. If no
axiom covers the question, say so instead of guessing.

# Constitution

{{ constitution }}

# Question

{{ question }}"#;
