//! Experiment dispatcher
//!
//! Fans one prompt out to every configured model at once and settles all of
//! the calls before returning:
//! - Each call runs on its own task with its own timeout
//! - A failed, timed-out or panicking call becomes a failed result for that
//!   model only; its siblings are never cancelled
//! - The returned run has exactly one entry per distinct configured id

use crate::backend::{BackendRequest, BackendResponse, ModelBackendClient};
use crate::error::BackendError;
use crate::types::{ExperimentOptions, ExperimentResult, ExperimentRun, ModelId, ModelRoster};
use arena_scoring::QualityScorer;
use futures::future::join_all;
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Concurrent settle-all dispatcher over a [`ModelBackendClient`]
pub struct ExperimentDispatcher {
    /// Provider transport
    client: Arc<dyn ModelBackendClient>,
    /// Prices and capabilities
    roster: ModelRoster,
    /// Bound on each call attempt
    timeout: Duration,
    /// Extra attempts after a retryable failure
    max_retries: u32,
    /// Response scorer
    scorer: QualityScorer,
}

impl std::fmt::Debug for ExperimentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentDispatcher")
            .field("roster", &self.roster)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl ExperimentDispatcher {
    /// Create dispatcher with the default timeout
    #[must_use]
    pub fn new(client: Arc<dyn ModelBackendClient>, roster: ModelRoster) -> Self {
        Self {
            client,
            roster,
            timeout: DEFAULT_TIMEOUT,
            max_retries: 0,
            scorer: QualityScorer,
        }
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// With retries for timeouts and transport errors
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Configured models
    #[inline]
    #[must_use]
    pub fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    /// Per-call timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `prompt` to every model in `model_ids` and wait for all of them
    ///
    /// Never fails: per-model failures are folded into the run. Repeated ids
    /// are dispatched once.
    pub async fn run(
        &self,
        prompt: &str,
        model_ids: &[ModelId],
        options: &ExperimentOptions,
    ) -> ExperimentRun {
        let models: IndexSet<&ModelId> = model_ids.iter().collect();
        info!(models = models.len(), "Dispatching experiment");
        let started = Instant::now();

        let calls = models.into_iter().map(|model| {
            let request = BackendRequest::new(
                model.clone(),
                prompt,
                options,
                self.roster.supports_system_prompt(model.as_str()),
            );
            let client = Arc::clone(&self.client);
            let handle = tokio::spawn(timed_call(client, request, self.timeout, self.max_retries));
            async move { (model.clone(), handle.await) }
        });

        // Settle-all barrier
        let settled = join_all(calls).await;

        let run: ExperimentRun = settled
            .into_iter()
            .map(|(model, joined)| {
                let outcome = joined.unwrap_or_else(|e| Err(join_failure(e)));
                let result = self.assemble(&model, outcome);
                (model, result)
            })
            .collect();

        let summary = run.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Experiment settled"
        );
        run
    }

    /// Turn one call outcome into a result
    fn assemble(
        &self,
        model: &ModelId,
        outcome: Result<(BackendResponse, f64), BackendError>,
    ) -> ExperimentResult {
        match outcome {
            Ok((response, elapsed_seconds)) => {
                let Some(total) = response
                    .prompt_tokens
                    .checked_add(response.completion_tokens)
                else {
                    let e = BackendError::MalformedResponse(format!(
                        "token counts overflow ({} prompt, {} completion)",
                        response.prompt_tokens, response.completion_tokens
                    ));
                    warn!(model = %model, error = %e, "Model call failed");
                    return ExperimentResult::failed(e.to_string());
                };
                let cost = self.roster.cost(model.as_str(), total);
                let quality = self.scorer.score(&response.text);
                debug!(
                    model = %model,
                    elapsed_secs = elapsed_seconds,
                    tokens = total,
                    cost,
                    "Model call succeeded"
                );
                ExperimentResult::success(
                    response.text,
                    elapsed_seconds,
                    response.prompt_tokens,
                    response.completion_tokens,
                    cost,
                    quality,
                )
            }
            Err(e) => {
                warn!(model = %model, error = %e, "Model call failed");
                ExperimentResult::failed(e.to_string())
            }
        }
    }
}

/// Invoke the backend under `timeout`, measuring wall time from dispatch
///
/// Retryable failures are retried up to `max_retries` times; each attempt
/// gets the full timeout.
async fn timed_call(
    client: Arc<dyn ModelBackendClient>,
    request: BackendRequest,
    timeout: Duration,
    max_retries: u32,
) -> Result<(BackendResponse, f64), BackendError> {
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, client.invoke(request.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::Timeout {
                secs: timeout.as_secs_f64(),
            }),
        };
        match outcome {
            Ok(response) => return Ok((response, started.elapsed().as_secs_f64())),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                debug!(model = %request.model, attempt, error = %e, "Retrying model call");
            }
            Err(e) => return Err(e),
        }
    }
}

fn join_failure(error: JoinError) -> BackendError {
    if !error.is_panic() {
        return BackendError::Panicked("call was cancelled".to_string());
    }
    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    BackendError::Panicked(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockModelBackendClient;
    use crate::types::ModelDescriptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(names: &[&str]) -> Vec<ModelId> {
        names.iter().map(|n| ModelId::from(*n)).collect()
    }

    fn roster() -> ModelRoster {
        ModelRoster::new([
            ModelDescriptor::new("m1", 0.03),
            ModelDescriptor::new("m2", 0.0001),
            ModelDescriptor::new("plain", 0.0).without_system_prompt(),
        ])
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let mut mock = MockModelBackendClient::new();
        mock.expect_invoke().times(2).returning(|req| {
            if req.model.as_str() == "m1" {
                Ok(BackendResponse::new("The cat sat. The cat slept.", 40, 60))
            } else {
                Err(BackendError::Transport("connection reset".into()))
            }
        });

        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster());
        let run = dispatcher
            .run("prompt", &ids(&["m1", "m2"]), &ExperimentOptions::default())
            .await;

        assert_eq!(run.len(), 2);

        let m1 = run.get("m1").unwrap();
        assert!(m1.failure.is_none());
        assert_eq!(m1.total_tokens, 100);
        assert!((m1.cost - 0.003).abs() < 1e-12);
        assert!(m1.quality.overall > 0.0);

        let m2 = run.get("m2").unwrap();
        assert_eq!(
            m2.failure.as_deref(),
            Some("transport error: connection reset")
        );
        assert_eq!(m2.elapsed_seconds, 0.0);
        assert_eq!(m2.total_tokens, 0);
        assert_eq!(m2.cost, 0.0);
        assert!(m2.quality.is_zero());
    }

    #[tokio::test]
    async fn unknown_model_is_free() {
        let mut mock = MockModelBackendClient::new();
        mock.expect_invoke()
            .returning(|_| Ok(BackendResponse::new("ok", 500, 500)));

        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster());
        let run = dispatcher
            .run("p", &ids(&["unlisted"]), &ExperimentOptions::default())
            .await;

        let r = run.get("unlisted").unwrap();
        assert!(r.is_success());
        assert_eq!(r.cost, 0.0);
    }

    #[tokio::test]
    async fn duplicate_ids_dispatch_once() {
        let mut mock = MockModelBackendClient::new();
        mock.expect_invoke()
            .times(2)
            .returning(|_| Ok(BackendResponse::new("ok", 1, 1)));

        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster());
        let run = dispatcher
            .run("p", &ids(&["m1", "m2", "m1"]), &ExperimentOptions::default())
            .await;

        let keys: Vec<&str> = run.models().map(ModelId::as_str).collect();
        assert_eq!(keys, ["m1", "m2"]);
    }

    #[tokio::test]
    async fn empty_model_list_yields_empty_run() {
        let mock = MockModelBackendClient::new();
        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster());
        let run = dispatcher.run("p", &[], &ExperimentOptions::default()).await;
        assert!(run.is_empty());
    }

    #[tokio::test]
    async fn system_prompt_respects_capability() {
        let mut mock = MockModelBackendClient::new();
        mock.expect_invoke()
            .withf(|req| req.model.as_str() == "m1")
            .times(1)
            .returning(|req| {
                assert_eq!(req.system_prompt(), Some("Be brief"));
                assert_eq!(req.temperature, 0.2);
                assert_eq!(req.max_tokens, 64);
                Ok(BackendResponse::new("ok", 1, 1))
            });
        mock.expect_invoke()
            .withf(|req| req.model.as_str() == "plain")
            .times(1)
            .returning(|req| {
                assert_eq!(req.system_prompt(), None);
                assert_eq!(req.prompt(), "p");
                Ok(BackendResponse::new("ok", 1, 1))
            });

        let options = ExperimentOptions::default()
            .with_system_prompt("Be brief")
            .with_temperature(0.2)
            .with_max_tokens(64);
        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster());
        let run = dispatcher.run("p", &ids(&["m1", "plain"]), &options).await;

        assert!(run.iter().all(|(_, r)| r.is_success()));
    }

    #[tokio::test]
    async fn token_overflow_fails_only_that_model() {
        let mut mock = MockModelBackendClient::new();
        mock.expect_invoke().times(2).returning(|req| {
            if req.model.as_str() == "m1" {
                Ok(BackendResponse::new("ok", u64::MAX, 1))
            } else {
                Ok(BackendResponse::new("ok", 2, 2))
            }
        });

        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster());
        let run = dispatcher
            .run("p", &ids(&["m1", "m2"]), &ExperimentOptions::default())
            .await;

        assert_eq!(run.len(), 2);
        let m1 = run.get("m1").unwrap();
        assert!(m1
            .failure
            .as_deref()
            .unwrap()
            .starts_with("malformed provider response: token counts overflow"));
        assert_eq!(m1.total_tokens, 0);
        assert_eq!(m1.cost, 0.0);
        assert_eq!(run.get("m2").unwrap().total_tokens, 4);
    }

    /// Backend that drops the first `failures` calls with a transport error
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelBackendClient for Flaky {
        async fn invoke(&self, _request: BackendRequest) -> Result<BackendResponse, BackendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(BackendError::Transport("connection reset".into()))
            } else {
                Ok(BackendResponse::new("recovered", 3, 4))
            }
        }
    }

    #[tokio::test]
    async fn transport_errors_are_retried_up_to_limit() {
        let flaky = Arc::new(Flaky::new(2));
        let dispatcher = ExperimentDispatcher::new(flaky.clone(), roster()).with_max_retries(2);
        let run = dispatcher
            .run("p", &ids(&["m1"]), &ExperimentOptions::default())
            .await;

        assert_eq!(run.get("m1").unwrap().text, "recovered");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_off_by_default() {
        let flaky = Arc::new(Flaky::new(1));
        let dispatcher = ExperimentDispatcher::new(flaky.clone(), roster());
        let run = dispatcher
            .run("p", &ids(&["m1"]), &ExperimentOptions::default())
            .await;

        assert_eq!(
            run.get("m1").unwrap().failure.as_deref(),
            Some("transport error: connection reset")
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_requests_are_not_retried() {
        let mut mock = MockModelBackendClient::new();
        mock.expect_invoke()
            .times(1)
            .returning(|_| Err(BackendError::Rejected("bad key".into())));

        let dispatcher = ExperimentDispatcher::new(Arc::new(mock), roster()).with_max_retries(3);
        let run = dispatcher
            .run("p", &ids(&["m1"]), &ExperimentOptions::default())
            .await;

        assert!(!run.get("m1").unwrap().is_success());
    }

    /// Backend that hangs for one model and panics for another
    struct Unruly;

    #[async_trait]
    impl ModelBackendClient for Unruly {
        async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            match request.model.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(BackendResponse::new("too late", 1, 1))
                }
                "crash" => panic!("provider exploded"),
                _ => Ok(BackendResponse::new("fine", 2, 3)),
            }
        }
    }

    #[tokio::test]
    async fn timeout_and_panic_are_isolated() {
        let dispatcher = ExperimentDispatcher::new(Arc::new(Unruly), roster())
            .with_timeout(Duration::from_millis(50));

        let run = dispatcher
            .run(
                "p",
                &ids(&["slow", "crash", "m1"]),
                &ExperimentOptions::default(),
            )
            .await;

        assert_eq!(run.len(), 3);
        assert_eq!(
            run.get("slow").unwrap().failure.as_deref(),
            Some("request timed out after 0.05s")
        );
        assert_eq!(
            run.get("crash").unwrap().failure.as_deref(),
            Some("backend call panicked: provider exploded")
        );
        let ok = run.get("m1").unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.total_tokens, 5);
    }
}
