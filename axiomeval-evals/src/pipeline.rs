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

//! End-to-end case evaluation
//!
//! Per case: citations are read from the raw generated answer, entities are
//! extracted (or taken from the request), expected-answer entities are
//! matched, and the aggregator builds the report. Batches run with a cap on
//! concurrent cases; every case gets its own deadline, and a failing case
//! becomes a [`CaseOutcome::Failed`] without stopping the batch.

use crate::aggregator::ScoreAggregator;
use crate::answers::AnswerSource;
use crate::cache::{CacheStats, ReportCache};
use crate::citations::AxiomValidator;
use crate::dataset::DatasetRow;
use crate::extraction::EntityExtractor;
use crate::gateway::AssessorGateway;
use crate::llm_client::{AssessorClient, CompletionOptions};
use crate::matcher::SemanticMatcher;
use crate::prompts::{PromptRenderer, TemplateError, TemplateRegistry};
use crate::EvalError;
use axiomeval_core::{
    AxiomStore, CaseOutcome, EntityExtraction, EntityOrigin, EvaluationReport, EvaluationRequest,
    EvaluatorConfig, PipelineConfig,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct EvaluationPipeline {
    extractor: EntityExtractor,
    matcher: SemanticMatcher,
    validator: AxiomValidator,
    aggregator: ScoreAggregator,
    cache: Option<ReportCache>,
    max_concurrent_cases: usize,
    case_timeout: Duration,
}

impl EvaluationPipeline {
    /// Pipeline with default matching, scoring and concurrency and no cache
    pub fn new(
        gateway: Arc<AssessorGateway>,
        renderer: PromptRenderer,
        axioms: Arc<AxiomStore>,
    ) -> Result<Self, TemplateError> {
        let defaults = PipelineConfig::default();
        Ok(Self {
            extractor: EntityExtractor::new(gateway.clone(), renderer.clone())?,
            matcher: SemanticMatcher::new(gateway, renderer)?,
            validator: AxiomValidator::new(axioms),
            aggregator: ScoreAggregator::new(),
            cache: None,
            max_concurrent_cases: defaults.max_concurrent_cases,
            case_timeout: defaults.case_timeout(),
        })
    }

    pub fn from_config(
        config: &EvaluatorConfig,
        client: Arc<dyn AssessorClient>,
        axioms: Arc<AxiomStore>,
    ) -> Result<Self, EvalError> {
        let renderer =
            PromptRenderer::new(Arc::new(TemplateRegistry::from_config(&config.paths)?));
        let gateway = Arc::new(AssessorGateway::from_config(client, config));
        let options = CompletionOptions::from_config(&config.assessor);

        let mut pipeline = Self {
            extractor: EntityExtractor::new(gateway.clone(), renderer.clone())?
                .with_options(options),
            matcher: SemanticMatcher::from_config(gateway, renderer, &config.matching)?
                .with_options(options),
            validator: AxiomValidator::new(axioms),
            aggregator: ScoreAggregator::from_config(&config.scoring),
            cache: None,
            max_concurrent_cases: config.pipeline.max_concurrent_cases.max(1),
            case_timeout: config.pipeline.case_timeout(),
        };
        if config.pipeline.enable_cache {
            pipeline = pipeline.with_cache(ReportCache::new(config.pipeline.cache_ttl_secs));
        }
        Ok(pipeline)
    }

    pub fn with_cache(mut self, cache: ReportCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_concurrent_cases(mut self, max_concurrent_cases: usize) -> Self {
        self.max_concurrent_cases = max_concurrent_cases.max(1);
        self
    }

    /// Deadline for one case, retries included
    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    pub fn with_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_matcher(mut self, matcher: SemanticMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn validator(&self) -> &AxiomValidator {
        &self.validator
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ReportCache::stats)
    }

    /// Evaluate one case under the case deadline
    pub async fn evaluate(&self, request: EvaluationRequest) -> Result<EvaluationReport, EvalError> {
        self.with_deadline(self.evaluate_cached(&request)).await
    }

    async fn with_deadline<T>(
        &self,
        work: impl Future<Output = Result<T, EvalError>>,
    ) -> Result<T, EvalError> {
        tokio::time::timeout(self.case_timeout, work)
            .await
            .unwrap_or_else(|_| {
                Err(EvalError::CaseTimeout {
                    timeout: self.case_timeout,
                })
            })
    }

    async fn evaluate_cached(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationReport, EvalError> {
        let key = ReportCache::key(request);
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key).await {
                debug!("Report cache hit for {}", key);
                let mut report = (*cached).clone();
                report.case = request.case.clone();
                return Ok(report);
            }
        }

        let report = self.run_stages(request).await?;

        if let Some(cache) = &self.cache {
            cache.insert(key, report.clone()).await;
        }
        Ok(report)
    }

    async fn run_stages(&self, request: &EvaluationRequest) -> Result<EvaluationReport, EvalError> {
        let case = &request.case;

        // Citations only need the raw answer text
        let citations = self.validator.validate(&case.generated_answer);

        let (entity_origin, entities) = match &request.entities {
            Some(names) => (EntityOrigin::Supplied, EntityExtraction::supplied(names)),
            None => (EntityOrigin::Extracted, self.extractor.extract(case).await?),
        };

        let verdicts = self
            .matcher
            .match_all(
                &case.generated_answer,
                &case.expected_answer,
                &entities.expected_answer.names(),
            )
            .await?;

        let report = self.aggregator.build_report(
            request,
            entity_origin,
            entities,
            verdicts,
            citations,
            Utc::now(),
        );
        info!(
            "Evaluated case {}: score {:.3} ({}/{} entities matched, {} citations)",
            case_label(request),
            report.score,
            report.breakdown.matched_count,
            report.breakdown.entity_count,
            report.breakdown.citation_count
        );
        Ok(report)
    }

    /// Evaluate one case, turning errors into a failed outcome
    pub async fn evaluate_outcome(&self, request: EvaluationRequest) -> CaseOutcome {
        let case = request.case.clone();
        let label = case_label(&request);
        match self.evaluate(request).await {
            Ok(report) => CaseOutcome::evaluated(report),
            Err(err) => {
                error!("Case {} failed: {}", label, err);
                CaseOutcome::failed(case, err.kind(), err.to_string())
            }
        }
    }

    /// Evaluate a batch; outcomes are in request order
    pub async fn evaluate_batch(&self, requests: Vec<EvaluationRequest>) -> Vec<CaseOutcome> {
        let total = requests.len();
        info!(
            "Evaluating {} cases ({} at a time)",
            total, self.max_concurrent_cases
        );

        let outcomes: Vec<CaseOutcome> = stream::iter(requests)
            .map(|request| self.evaluate_outcome(request))
            .buffered(self.max_concurrent_cases)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        info!("Batch finished: {} evaluated, {} failed", total - failed, failed);
        outcomes
    }

    /// Evaluate dataset rows, asking `answers` for rows without an answer
    pub async fn evaluate_rows(
        &self,
        rows: Vec<DatasetRow>,
        answers: Option<&dyn AnswerSource>,
    ) -> Vec<CaseOutcome> {
        info!(
            "Evaluating {} dataset rows ({} at a time)",
            rows.len(),
            self.max_concurrent_cases
        );

        stream::iter(rows)
            .map(|row| async move {
                if !row.needs_answer() {
                    return self.evaluate_outcome(row.into_request(None)).await;
                }

                // Answer generation and evaluation share one deadline
                let unanswered = row.case_with_answer(String::new());
                let mut answered = None;
                let result = self
                    .with_deadline(async {
                        let answer = match answers {
                            Some(source) => source.answer(&row.user_query).await?,
                            None => {
                                return Err(EvalError::AnswerUnavailable(
                                    "row has no generated_answer and no answer source is configured"
                                        .to_string(),
                                ))
                            }
                        };
                        let request = row.into_request(Some(answer));
                        answered = Some(request.case.clone());
                        self.evaluate_cached(&request).await
                    })
                    .await;

                match result {
                    Ok(report) => CaseOutcome::evaluated(report),
                    Err(err) => {
                        let case = answered.unwrap_or(unanswered);
                        error!("Case {:?} failed: {}", case.user_query, err);
                        CaseOutcome::failed(case, err.kind(), err.to_string())
                    }
                }
            })
            .buffered(self.max_concurrent_cases)
            .collect()
            .await
    }
}

fn case_label(request: &EvaluationRequest) -> String {
    match &request.case.id {
        Some(id) => id.clone(),
        None => request.fingerprint()[..8].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{AssessorError, AssessorResponse};
    use async_trait::async_trait;
    use axiomeval_core::{
        Axiom, AxiomId, CitationStatus, EvaluationCase, FailureKind, RetryPolicy, VerdictStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers extraction and match prompts with canned JSON
    struct MockLLMClient {
        extraction_calls: AtomicUsize,
        match_calls: AtomicUsize,
        delay: Duration,
    }

    impl MockLLMClient {
        fn new() -> Self {
            Self {
                extraction_calls: AtomicUsize::new(0),
                match_calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl AssessorClient for MockLLMClient {
        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<AssessorResponse, AssessorError> {
            tokio::time::sleep(self.delay).await;

            let content = if prompt.contains("user_query_entities") {
                self.extraction_calls.fetch_add(1, Ordering::SeqCst);
                r#"{
                    "user_query_entities": {"habit": ["smoking"]},
                    "llm_answer_entities": {"habit": ["smoking"], "health_outcome": ["premium increase"]},
                    "expected_answer_entities": {"habit": ["smoking"], "health_outcome": ["premium increase", "coverage denial"]}
                }"#
            } else {
                self.match_calls.fetch_add(1, Ordering::SeqCst);
                r#"{"verdicts": [
                    {"entity": "smoking", "status": "matched", "accuracy": 1.0},
                    {"entity": "premium increase", "status": "matched", "accuracy": 0.5},
                    {"entity": "coverage denial", "status": "absent"},
                    {"entity": "bmi", "status": "contradicted"}
                ]}"#
            };
            Ok(AssessorResponse::text(content, "mock"))
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    fn axioms() -> Arc<AxiomStore> {
        Arc::new(AxiomStore::new([Axiom {
            id: AxiomId::new("AXIOM-001"),
            subject: "Insurer".to_string(),
            entity: "premium".to_string(),
            trigger: "smoking".to_string(),
            conditions: String::new(),
            description: "Smokers pay higher premiums".to_string(),
            category: "pricing".to_string(),
        }]))
    }

    fn pipeline(client: Arc<MockLLMClient>) -> EvaluationPipeline {
        let gateway = AssessorGateway::new(client).with_retry_policy(RetryPolicy::none());
        EvaluationPipeline::new(Arc::new(gateway), PromptRenderer::with_builtins(), axioms()).unwrap()
    }

    fn case() -> EvaluationCase {
        EvaluationCase::new(
            "Does smoking change my premium?",
            "Smoking increases your premium [AXIOM-001] [AXIOM-042].",
            "Premiums increase for smokers; coverage may be denied.",
        )
    }

    #[tokio::test]
    async fn test_evaluate_extracted_case() {
        let client = Arc::new(MockLLMClient::new());
        let report = pipeline(client.clone())
            .evaluate(EvaluationRequest::new(case()))
            .await
            .unwrap();

        assert_eq!(report.entity_origin, EntityOrigin::Extracted);
        let entities: Vec<&str> = report.verdicts.iter().map(|v| v.entity.as_str()).collect();
        assert_eq!(entities, vec!["smoking", "premium increase", "coverage denial"]);
        assert_eq!(report.verdicts[2].status, VerdictStatus::Absent);
        assert_eq!(report.score, 0.5);

        assert_eq!(report.citations.len(), 2);
        assert_eq!(report.citations[1].status, CitationStatus::Unknown);
        assert_eq!(report.breakdown.citation_validity, Some(0.5));

        assert_eq!(client.extraction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.match_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_supplied_entities_skip_extraction() {
        let client = Arc::new(MockLLMClient::new());
        let request = EvaluationRequest::new(case())
            .with_entities(vec!["BMI".to_string(), "smoking".to_string()]);

        let report = pipeline(client.clone()).evaluate(request).await.unwrap();

        assert_eq!(report.entity_origin, EntityOrigin::Supplied);
        assert_eq!(report.entities.expected_answer.names(), vec!["BMI", "smoking"]);
        assert_eq!(report.verdicts[0].status, VerdictStatus::Contradicted);
        assert_eq!(report.score, 0.5);
        assert_eq!(client.extraction_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_skips_repeat_calls() {
        let client = Arc::new(MockLLMClient::new());
        let pipeline = pipeline(client.clone()).with_cache(ReportCache::new(60));

        let first = pipeline
            .evaluate(EvaluationRequest::new(case().with_id("a")))
            .await
            .unwrap();
        let second = pipeline
            .evaluate(EvaluationRequest::new(case().with_id("b")))
            .await
            .unwrap();

        assert_eq!(first.score, second.score);
        assert_eq!(second.case.id.as_deref(), Some("b"));
        assert_eq!(client.extraction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.cache_stats().unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_case_timeout_fails_case_without_caching() {
        let client = Arc::new(MockLLMClient {
            delay: Duration::from_millis(200),
            ..MockLLMClient::new()
        });
        let pipeline = pipeline(client)
            .with_cache(ReportCache::new(60))
            .with_case_timeout(Duration::from_millis(20));

        let outcome = pipeline.evaluate_outcome(EvaluationRequest::new(case())).await;

        match outcome {
            CaseOutcome::Failed { error, .. } => assert_eq!(error.kind, FailureKind::Timeout),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(pipeline.cache_stats().unwrap().entry_count, 0);
    }

    struct FixedAnswer;

    #[async_trait]
    impl AnswerSource for FixedAnswer {
        async fn answer(&self, _user_query: &str) -> Result<String, EvalError> {
            Ok("Smokers pay more [AXIOM-001].".to_string())
        }
    }

    #[tokio::test]
    async fn test_evaluate_rows_fills_missing_answers() {
        let rows: Vec<DatasetRow> = serde_json::from_str(
            r#"[
                {"id": 1, "query": "Does smoking matter?", "expected_answer": "Premiums increase for smokers."},
                {"id": 2, "query": "Does smoking matter?", "generated_answer": "No.", "expected_answer": "Premiums increase for smokers."}
            ]"#,
        )
        .unwrap();
        let pipeline = pipeline(Arc::new(MockLLMClient::new()));

        let outcomes = pipeline.evaluate_rows(rows.clone(), Some(&FixedAnswer)).await;
        assert_eq!(
            outcomes[0].case().generated_answer,
            "Smokers pay more [AXIOM-001]."
        );
        assert_eq!(outcomes[1].case().generated_answer, "No.");
        assert!(outcomes.iter().all(|o| !o.is_failed()));

        let outcomes = pipeline.evaluate_rows(rows, None).await;
        match &outcomes[0] {
            CaseOutcome::Failed { error, case } => {
                assert_eq!(error.kind, FailureKind::Internal);
                assert_eq!(case.id.as_deref(), Some("1"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!outcomes[1].is_failed());
    }

    struct SlowAnswer;

    #[async_trait]
    impl AnswerSource for SlowAnswer {
        async fn answer(&self, _user_query: &str) -> Result<String, EvalError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("Smokers pay more [AXIOM-001].".to_string())
        }
    }

    #[tokio::test]
    async fn test_answer_generation_counts_toward_case_deadline() {
        let rows: Vec<DatasetRow> = serde_json::from_str(
            r#"[{"id": "slow", "query": "Does smoking matter?", "expected_answer": "Premiums increase for smokers."}]"#,
        )
        .unwrap();
        let client = Arc::new(MockLLMClient::new());
        let pipeline = pipeline(client.clone()).with_case_timeout(Duration::from_millis(20));

        let outcomes = pipeline.evaluate_rows(rows, Some(&SlowAnswer)).await;

        match &outcomes[0] {
            CaseOutcome::Failed { error, case } => {
                assert_eq!(error.kind, FailureKind::Timeout);
                assert_eq!(error.message, "Case timed out after 20ms");
                assert_eq!(case.id.as_deref(), Some("slow"));
                assert_eq!(case.generated_answer, "");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(client.extraction_calls.load(Ordering::SeqCst), 0);
    }
}
