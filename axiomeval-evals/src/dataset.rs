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

//! Evaluation datasets
//!
//! A dataset is a JSON array of rows, or one JSON row per line (JSONL):
//!
//! ```json
//! {"id": 1, "query": "...", "generated_answer": "...", "expected_answer": "...", "entities": ["..."]}
//! ```
//!
//! `generated_answer` and `entities` are optional. `user_query` and `query`
//! are accepted for the question.

use axiomeval_core::{EvaluationCase, EvaluationRequest};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid dataset JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid dataset row on line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    #[serde(
        default,
        deserialize_with = "deserialize_row_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(alias = "query")]
    pub user_query: String,

    #[serde(default, alias = "llm_answer", skip_serializing_if = "Option::is_none")]
    pub generated_answer: Option<String>,

    pub expected_answer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,
}

/// Row ids may be strings or numbers
fn deserialize_row_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(id)) => Ok(Some(id)),
        Some(serde_json::Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(D::Error::custom(format!("invalid row id {}", other))),
    }
}

impl DatasetRow {
    /// Whether an answer must be generated before evaluation
    pub fn needs_answer(&self) -> bool {
        self.generated_answer
            .as_deref()
            .map_or(true, |answer| answer.trim().is_empty())
    }

    /// Case for this row with `generated_answer` filled in
    pub fn case_with_answer(&self, generated_answer: impl Into<String>) -> EvaluationCase {
        let case = EvaluationCase::new(
            self.user_query.clone(),
            generated_answer,
            self.expected_answer.clone(),
        );
        match &self.id {
            Some(id) => case.with_id(id.clone()),
            None => case,
        }
    }

    /// Request for this row, using `generated_answer` when the row has none
    pub fn into_request(self, generated_answer: Option<String>) -> EvaluationRequest {
        let answer = generated_answer
            .or_else(|| self.generated_answer.clone())
            .unwrap_or_default();
        let request = EvaluationRequest::new(self.case_with_answer(answer));
        match self.entities {
            Some(entities) => request.with_entities(entities),
            None => request,
        }
    }
}

pub fn parse_dataset(contents: &str) -> Result<Vec<DatasetRow>, DatasetError> {
    if contents.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(contents)?);
    }

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| DatasetError::Line {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<DatasetRow>, DatasetError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let rows = parse_dataset(&contents)?;
    tracing::info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}
