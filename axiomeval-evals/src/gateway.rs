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

//! Timeout and retry around a single assessor completion

use crate::llm_client::{AssessorClient, AssessorError, CompletionOptions};
use crate::EvalError;
use axiomeval_core::{retry, EvaluatorConfig, RetryError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One logical model invocation per `complete` call
///
/// Holds no per-call state, so a single gateway is shared by every stage and
/// every concurrent case.
#[derive(Clone)]
pub struct AssessorGateway {
    client: Arc<dyn AssessorClient>,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl AssessorGateway {
    pub fn new(client: Arc<dyn AssessorClient>) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::exponential(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(client: Arc<dyn AssessorClient>, config: &EvaluatorConfig) -> Self {
        Self::new(client)
            .with_retry_policy(config.retry.policy())
            .with_request_timeout(config.assessor.request_timeout())
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Timeout for each attempt, not the whole call
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Send `prompt` and return the raw completion text
    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, EvalError> {
        let client = &self.client;
        let timeout = self.request_timeout;

        let result = retry(&self.retry_policy, move |attempt| async move {
            debug!(
                "Assessor call attempt {} ({} prompt chars)",
                attempt,
                prompt.len()
            );
            match tokio::time::timeout(timeout, client.complete(prompt, options)).await {
                Ok(result) => result,
                Err(_) => Err(AssessorError::Timeout(timeout)),
            }
        })
        .await;

        match result {
            Ok(response) => {
                let (input_cost, output_cost) = client.cost_per_token();
                debug!(
                    "Assessor {} used {} tokens (${:.6})",
                    response.model,
                    response.usage.total_tokens,
                    response.usage.calculate_cost(input_cost, output_cost)
                );
                Ok(response.content)
            }
            Err(err) => Err(into_eval_error(err)),
        }
    }
}

fn into_eval_error(err: RetryError<AssessorError>) -> EvalError {
    match err {
        RetryError::Exhausted {
            attempts,
            last_error,
        } => EvalError::TransientGateway {
            attempts,
            message: last_error.to_string(),
        },
        RetryError::Permanent { error, .. } => match error {
            AssessorError::InvalidResponse(_) | AssessorError::Json(_) => {
                EvalError::MalformedResponse(error.to_string())
            }
            other => EvalError::GatewayRejected(other.to_string()),
        },
    }
}
