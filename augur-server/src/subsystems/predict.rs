//! Prediction subsystem — scores every response of a form.
//!
//! For each response the payload is built from the form's questions, the
//! external predictor is called, and the outcome is recorded in the slot that
//! matches the response's position. Up to `max_concurrency` predictor calls run
//! at once, each bounded by `call_timeout`.
//!
//! Only a missing form, a failed store read, or cancellation fails the batch.
//! A failed predictor call becomes an `"Error"` / `"-"` row and the batch goes on.

use std::time::Duration;

use augur_core::{
    AugurConfig, AugurError, FeatureSchema, FormStore, PredictionResult, Predictor,
    PredictorError,
};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-batch limits.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_concurrency: usize,
    pub call_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// The call budget covers every retry attempt and the backoff between them,
/// so `predictor.max_retries` is not cut short by the batch.
impl From<&AugurConfig> for BatchOptions {
    fn from(config: &AugurConfig) -> Self {
        Self {
            max_concurrency: config.prediction.max_concurrency,
            call_timeout: config.predictor.call_budget(),
        }
    }
}

/// Results of one batch, in response order, plus counts.
#[derive(Debug)]
pub struct PredictionReport {
    pub form_id: Uuid,
    pub schema_version: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PredictionResult>,
}

/// Score every response of `form_id`.
///
/// # Returns
/// * `Ok(PredictionReport)` - exactly one result per response, in storage order
/// * `Err(AugurError::NotFound)` - form does not exist; no predictor call is made
/// * `Err(AugurError::StoreUnavailable)` - the store could not be read
/// * `Err(AugurError::Cancelled)` - `cancel` fired before the batch finished
pub async fn get_predictions(
    form_id: Uuid,
    store: &dyn FormStore,
    predictor: &dyn Predictor,
    schema: &FeatureSchema,
    options: &BatchOptions,
    cancel: &CancellationToken,
) -> Result<PredictionReport, AugurError> {
    let form = store
        .find_form_by_id(form_id)
        .await?
        .ok_or(AugurError::NotFound(form_id))?;

    let responses = store.find_responses_by_form_id(form_id).await?;
    let total = responses.len();

    tracing::info!(
        form_id = %form_id,
        responses = total,
        schema = %schema.version,
        predictor = predictor.name(),
        "Starting prediction batch"
    );

    let questions = &form.questions;
    let call_timeout = options.call_timeout;
    let mut slots: Vec<Option<PredictionResult>> = (0..total).map(|_| None).collect();
    let mut failed = 0;

    let mut outcomes = std::pin::pin!(stream::iter(responses.into_iter().enumerate())
        .map(|(index, response)| async move {
            let payload = schema.build_payload(questions, &response.answers);

            let outcome = match tokio::time::timeout(call_timeout, predictor.predict(&payload)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PredictorError::Timeout(call_timeout)),
            };

            if let Err(e) = &outcome {
                tracing::warn!(
                    form_id = %response.form_id,
                    response_id = %response.id,
                    present_features = payload.present_count(),
                    error = %e,
                    "Prediction failed, recording error placeholder"
                );
            }

            let ok = outcome.is_ok();
            (index, ok, PredictionResult::from_outcome(&response, payload, outcome))
        })
        .buffer_unordered(options.max_concurrency.max(1)));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(form_id = %form_id, "Prediction batch cancelled");
                return Err(AugurError::Cancelled);
            }
            next = outcomes.next() => match next {
                Some((index, ok, result)) => {
                    if !ok {
                        failed += 1;
                    }
                    slots[index] = Some(result);
                }
                None => break,
            },
        }
    }

    let results: Vec<PredictionResult> = slots.into_iter().flatten().collect();

    tracing::info!(
        form_id = %form_id,
        total,
        succeeded = total - failed,
        failed,
        "Prediction batch complete"
    );

    Ok(PredictionReport {
        form_id,
        schema_version: schema.version.clone(),
        total,
        succeeded: total - failed,
        failed,
        results,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use augur_core::{Answer, FeaturePayload, Form, MemoryFormStore, Prediction, Question, Response};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Mock predictors (no HTTP)
    // ------------------------------------------------------------------

    /// Scores "Pass" with confidence 0.9; fails for payloads whose Gender is
    /// listed in `fail_for`.
    struct MockPredictor {
        fail_for: HashSet<String>,
        calls: AtomicUsize,
    }

    impl MockPredictor {
        fn new(fail_for: &[&str]) -> Self {
            Self {
                fail_for: fail_for.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Predictor for MockPredictor {
        async fn predict(&self, payload: &FeaturePayload) -> Result<Prediction, PredictorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gender = payload.get("Gender").unwrap_or_default();
            if self.fail_for.contains(gender) {
                return Err(PredictorError::Api {
                    code: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(Prediction {
                prediction: json!("Pass"),
                confidence: json!(0.9),
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    /// Sleeps longer for earlier responses so completions arrive out of order,
    /// and tracks the peak number of concurrent calls.
    struct SlowPredictor {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowPredictor {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Predictor for SlowPredictor {
        async fn predict(&self, payload: &FeaturePayload) -> Result<Prediction, PredictorError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let rank: u64 = payload
                .get("AttendanceRate")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(60 - rank * 10)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Prediction {
                prediction: json!(format!("rank-{}", rank)),
                confidence: json!(1.0),
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Never answers; used for timeout and cancellation.
    struct HangingPredictor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Predictor for HangingPredictor {
        async fn predict(&self, payload: &FeaturePayload) -> Result<Prediction, PredictorError> {
            self.seen
                .lock()
                .unwrap()
                .push(payload.get("Gender").unwrap_or_default().to_string());
            if payload.get("Gender") == Some("Male") {
                return Ok(Prediction {
                    prediction: json!("Pass"),
                    confidence: json!(0.81),
                });
            }
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn survey() -> Form {
        Form::new(
            Uuid::new_v4(),
            "Student survey",
            vec![
                Question::new("q1", "Gender"),
                Question::new("q2", "Attendance Rate %"),
            ],
        )
    }

    async fn seed(store: &MemoryFormStore, form: &Form, genders: &[&str]) -> Vec<Uuid> {
        store.insert_form(form).await.unwrap();
        let mut ids = Vec::new();
        for (i, gender) in genders.iter().enumerate() {
            let response = Response::new(
                form.id,
                Some(Uuid::new_v4()),
                vec![Answer::new("q1", *gender), Answer::new("q2", i.to_string())],
            );
            store.insert_response(&response).await.unwrap();
            ids.push(response.id);
        }
        ids
    }

    fn options(max_concurrency: usize) -> BatchOptions {
        BatchOptions {
            max_concurrency,
            call_timeout: Duration::from_secs(5),
        }
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_one_result_per_response_in_order() {
        let store = MemoryFormStore::new();
        let form = survey();
        let ids = seed(&store, &form, &["Male", "Female", "Other", "Male"]).await;
        let predictor = MockPredictor::new(&[]);

        let report = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(4),
            &CancellationToken::new(),
        )
        .await
        .expect("batch should succeed");

        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 0);
        let result_ids: Vec<Uuid> = report.results.iter().map(|r| r.response_id).collect();
        assert_eq!(result_ids, ids);
        assert!(report.results.iter().all(|r| r.prediction == json!("Pass")));
        assert_eq!(predictor.calls(), 4);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["Male", "Female", "Male", "Other"]).await;
        let predictor = MockPredictor::new(&["Female", "Other"]);

        let report = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let errors: Vec<bool> = report
            .results
            .iter()
            .map(|r| r.prediction == json!("Error"))
            .collect();
        assert_eq!(errors, vec![false, true, false, true]);
        assert_eq!(report.failed, 2);
        assert_eq!(report.results[1].prediction, json!("Error"));
        assert_eq!(report.results[1].confidence, json!("-"));
        assert_eq!(report.results[1].raw_data.get("Gender"), Some("Female"));
        assert_eq!(report.results[0].prediction, json!("Pass"));
    }

    #[tokio::test]
    async fn test_missing_form_is_not_found_without_calls() {
        let store = MemoryFormStore::new();
        let predictor = MockPredictor::new(&[]);
        let missing = Uuid::new_v4();

        let result = get_predictions(
            missing,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(4),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(AugurError::NotFound(id)) if id == missing));
        assert_eq!(predictor.calls(), 0);
    }

    #[tokio::test]
    async fn test_form_without_responses_is_empty_report() {
        let store = MemoryFormStore::new();
        let form = survey();
        store.insert_form(&form).await.unwrap();
        let predictor = MockPredictor::new(&[]);

        let report = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(4),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.total, 0);
        assert!(report.results.is_empty());
        assert_eq!(predictor.calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_completion_keeps_response_order() {
        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["a", "b", "c", "d", "e"]).await;
        let predictor = SlowPredictor::new();

        let report = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let labels: Vec<String> = report
            .results
            .iter()
            .map(|r| r.prediction.as_str().unwrap().to_string())
            .collect();
        assert_eq!(labels, vec!["rank-0", "rank-1", "rank-2", "rank-3", "rank-4"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["a", "b", "c", "d", "e", "f"]).await;
        let predictor = SlowPredictor::new();

        get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(predictor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_row() {
        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["Male", "Female"]).await;
        let predictor = HangingPredictor {
            seen: Mutex::new(Vec::new()),
        };

        let report = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &BatchOptions {
                max_concurrency: 2,
                call_timeout: Duration::from_millis(50),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].prediction, json!("Pass"));
        assert_eq!(report.results[0].confidence, json!(0.81));
        assert_eq!(report.results[1].prediction, json!("Error"));
        assert_eq!(report.results[1].confidence, json!("-"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_batch() {
        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["Female", "Other"]).await;
        let predictor = HangingPredictor {
            seen: Mutex::new(Vec::new()),
        };
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(2),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(AugurError::Cancelled)));
        assert_eq!(predictor.seen.lock().unwrap().len(), 2);
    }

    /// Form lookups succeed, response reads fail.
    struct UnavailableStore {
        form: Form,
    }

    #[async_trait]
    impl FormStore for UnavailableStore {
        async fn find_form_by_id(&self, id: Uuid) -> Result<Option<Form>, AugurError> {
            Ok((id == self.form.id).then(|| self.form.clone()))
        }

        async fn find_responses_by_form_id(&self, _form_id: Uuid) -> Result<Vec<Response>, AugurError> {
            Err(AugurError::StoreUnavailable("connection reset".to_string()))
        }

        async fn insert_form(&self, _form: &Form) -> Result<(), AugurError> {
            Ok(())
        }

        async fn insert_response(&self, _response: &Response) -> Result<(), AugurError> {
            Ok(())
        }

        async fn health(&self) -> Result<String, AugurError> {
            Err(AugurError::StoreUnavailable("connection reset".to_string()))
        }

        fn name(&self) -> &str {
            "unavailable"
        }
    }

    /// A real answer whose label happens to be the error sentinel.
    struct SentinelLabelPredictor;

    #[async_trait]
    impl Predictor for SentinelLabelPredictor {
        async fn predict(&self, _payload: &FeaturePayload) -> Result<Prediction, PredictorError> {
            Ok(Prediction {
                prediction: json!("Error"),
                confidence: json!("-"),
            })
        }

        fn name(&self) -> &str {
            "sentinel"
        }
    }

    #[tokio::test]
    async fn test_store_unavailable_fails_batch_without_calls() {
        let store = UnavailableStore { form: survey() };
        let predictor = MockPredictor::new(&[]);

        let result = get_predictions(
            store.form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &options(4),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(AugurError::StoreUnavailable(_))));
        assert_eq!(predictor.calls(), 0);
    }

    #[tokio::test]
    async fn test_failures_counted_from_call_outcome() {
        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["Male", "Female"]).await;

        let report = get_predictions(
            form.id,
            &store,
            &SentinelLabelPredictor,
            &FeatureSchema::student_outcome_v1(),
            &options(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.results[0].prediction, json!("Error"));
    }

    #[tokio::test]
    async fn test_retries_fit_inside_call_budget() {
        use augur_core::config::PredictorConfig;
        use augur_core::HttpPredictor;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"prediction": "Fail", "confidence": 0.4}))
                    .set_delay(Duration::from_secs(3)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"prediction": "Pass", "confidence": 0.8})),
            )
            .mount(&server)
            .await;

        let config = PredictorConfig {
            url: format!("{}/predict", server.uri()),
            timeout_seconds: 1,
            max_retries: 2,
            retry_delay_ms: 1,
        };
        let batch = BatchOptions {
            max_concurrency: 1,
            call_timeout: config.call_budget(),
        };
        let predictor = HttpPredictor::new(config).unwrap();

        let store = MemoryFormStore::new();
        let form = survey();
        seed(&store, &form, &["Male"]).await;

        let report = get_predictions(
            form.id,
            &store,
            &predictor,
            &FeatureSchema::student_outcome_v1(),
            &batch,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.results[0].prediction, json!("Pass"));
        assert_eq!(report.results[0].confidence, json!(0.8));
    }

    #[test]
    fn test_batch_options_default() {
        let options = BatchOptions::default();
        assert_eq!(options.max_concurrency, 4);
        assert_eq!(options.call_timeout, Duration::from_secs(10));
    }
}
