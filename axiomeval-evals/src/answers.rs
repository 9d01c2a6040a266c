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

//! Answers for dataset rows that arrive without one
//!
//! The assistant sees the whole axiom registry: every axiom is rendered
//! through the `constitution` template, and the sections are joined into the
//! `user_prompt` template together with the question.

use crate::gateway::AssessorGateway;
use crate::llm_client::CompletionOptions;
use crate::prompts::{variables, PromptRenderer, TemplateError, CONSTITUTION, USER_PROMPT};
use crate::EvalError;
use async_trait::async_trait;
use axiomeval_core::AxiomStore;
use std::sync::Arc;

pub const DEFAULT_ANSWER_SYSTEM_PROMPT: &str =
    "You are a senior actuary who analyzes health-insurance premium rates. \
     Ground every answer in the company's axioms and cite them as [AXIOM-NNN].";

const CONSTITUTION_VARIABLES: &[&str] = &[
    "id",
    "subject",
    "object",
    "link",
    "conditions",
    "description",
    "amendments",
];

const USER_PROMPT_VARIABLES: &[&str] = &["constitution", "question"];

/// Produces the assistant answer for a query
#[async_trait]
pub trait AnswerSource: Send + Sync {
    async fn answer(&self, user_query: &str) -> Result<String, EvalError>;
}

/// Render every axiom, in id order, through the `constitution` template
pub fn render_constitution(
    renderer: &PromptRenderer,
    axioms: &AxiomStore,
) -> Result<String, TemplateError> {
    let mut constitution = String::new();
    for axiom in axioms.list() {
        let section = renderer.render(
            CONSTITUTION,
            &variables([
                ("id", axiom.id.to_string()),
                ("subject", axiom.subject.clone()),
                ("object", axiom.entity.clone()),
                ("link", axiom.trigger.clone()),
                ("conditions", axiom.conditions.clone()),
                ("description", axiom.description.clone()),
                ("amendments", format!("Category: {}", axiom.category)),
            ]),
        )?;
        constitution.push_str(&section);
        constitution.push('\n');
    }
    Ok(constitution)
}

/// Asks the assistant model through a gateway
///
/// The gateway's client carries the assistant system prompt; the user
/// message is the rendered `user_prompt` template.
pub struct AssessorAnswerSource {
    gateway: Arc<AssessorGateway>,
    renderer: PromptRenderer,
    constitution: String,
    options: CompletionOptions,
}

impl AssessorAnswerSource {
    /// The constitution is rendered here, once, since the registry is read-only
    pub fn new(
        gateway: Arc<AssessorGateway>,
        renderer: PromptRenderer,
        axioms: &AxiomStore,
    ) -> Result<Self, TemplateError> {
        renderer.check(CONSTITUTION, CONSTITUTION_VARIABLES)?;
        renderer.check(USER_PROMPT, USER_PROMPT_VARIABLES)?;
        let constitution = render_constitution(&renderer, axioms)?;
        tracing::debug!(
            "Answer prompt constitution: {} axioms, {} chars",
            axioms.len(),
            constitution.len()
        );

        Ok(Self {
            gateway,
            renderer,
            constitution,
            options: CompletionOptions::default(),
        })
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options.with_json_mode(false);
        self
    }

    /// User message sent for `user_query`
    pub fn prompt(&self, user_query: &str) -> Result<String, TemplateError> {
        self.renderer.render(
            USER_PROMPT,
            &variables([
                ("constitution", self.constitution.as_str()),
                ("question", user_query),
            ]),
        )
    }
}

#[async_trait]
impl AnswerSource for AssessorAnswerSource {
    async fn answer(&self, user_query: &str) -> Result<String, EvalError> {
        let prompt = self.prompt(user_query)?;
        let answer = self.gateway.complete(&prompt, &self.options).await?;
        if answer.trim().is_empty() {
            return Err(EvalError::AnswerUnavailable(
                "assistant returned an empty answer".to_string(),
            ));
        }
        Ok(answer)
    }
}
