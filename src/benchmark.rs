use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::client::{ApiClient, FailureKind, RunError, TokenEvent};
use crate::config::Config;
use crate::stats::{aggregate, ModelResult};

/// Raw timing sample from one request attempt. Created once, immutable
/// thereafter.
///
/// Timing fields are `None` rather than zero when the run failed before
/// they could be measured; zero would be indistinguishable from an
/// instantaneous real response.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSample {
    /// Request dispatch to first answer-phase token, in milliseconds.
    pub ttft_ms: Option<f64>,
    /// Request dispatch to stream completion, in milliseconds.
    pub total_latency_ms: Option<f64>,
    /// Answer-phase tokens only. Retained for an interrupted stream as a
    /// diagnostic even though the sample is excluded from statistics.
    pub token_count: Option<u32>,
    /// Tokens per second over the generation phase (total minus TTFT).
    pub generation_speed: Option<f64>,
    pub error: Option<FailureKind>,
}

impl RunSample {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn request_failure() -> Self {
        RunSample {
            ttft_ms: None,
            total_latency_ms: None,
            token_count: None,
            generation_speed: None,
            error: Some(FailureKind::RequestError),
        }
    }
}

/// Folds the event stream of one run into a `RunSample`.
///
/// Only answer-phase events set the first-token time: a reasoning phase of
/// any length leaves TTFT unset until the user-visible response begins.
struct RunAccumulator {
    start: Instant,
    first_answer: Option<Instant>,
    answer_tokens: u32,
}

impl RunAccumulator {
    fn new(start: Instant) -> Self {
        Self {
            start,
            first_answer: None,
            answer_tokens: 0,
        }
    }

    fn observe(&mut self, event: &TokenEvent) {
        if let TokenEvent::Answer { at, tokens } = event {
            if self.first_answer.is_none() {
                self.first_answer = Some(*at);
            }
            self.answer_tokens += tokens;
        }
    }

    fn finish(self, end: Instant) -> RunSample {
        let total_latency_ms = duration_ms(end - self.start);

        let Some(first) = self.first_answer else {
            // Stream completed without a single answer token.
            return RunSample {
                ttft_ms: None,
                total_latency_ms: Some(total_latency_ms),
                token_count: None,
                generation_speed: None,
                error: Some(FailureKind::EmptyResponse),
            };
        };

        let ttft_ms = duration_ms(first - self.start);
        let generation_ms = total_latency_ms - ttft_ms;
        let generation_speed = if generation_ms > 0.0 {
            self.answer_tokens as f64 / (generation_ms / 1000.0)
        } else {
            0.0
        };

        RunSample {
            ttft_ms: Some(ttft_ms),
            total_latency_ms: Some(total_latency_ms),
            token_count: Some(self.answer_tokens),
            generation_speed: Some(generation_speed),
            error: None,
        }
    }

    fn fail(self, error: &RunError) -> RunSample {
        let kind = error.kind();
        // Partial token count survives an interrupted stream for diagnostics.
        let token_count = match kind {
            FailureKind::StreamInterrupted => Some(self.answer_tokens),
            _ => None,
        };

        RunSample {
            ttft_ms: None,
            total_latency_ms: None,
            token_count,
            generation_speed: None,
            error: Some(kind),
        }
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Issue exactly one request and reduce its event stream into a sample.
///
/// All four failure categories stay local to the returned sample; nothing
/// propagates as an error from here.
pub async fn execute_run(
    client: &ApiClient,
    model: &str,
    prompt: &str,
    max_tokens: u32,
) -> RunSample {
    let start = Instant::now();
    let mut acc = RunAccumulator::new(start);

    let mut stream = match client.open_stream(model, prompt, max_tokens).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Request to {} failed before first byte: {}", model, e);
            return RunSample::request_failure();
        }
    };

    loop {
        match stream.next_event().await {
            Ok(Some(event)) => acc.observe(&event),
            Ok(None) => break,
            Err(e) => {
                debug!("Run against {} failed mid-stream: {}", model, e);
                return acc.fail(&e);
            }
        }
    }

    if let Some(reported) = stream.reported_completion_tokens() {
        debug!(
            "{}: provider reported {} completion tokens, measured {} answer tokens",
            model,
            reported,
            acc.answer_tokens
        );
    }

    acc.finish(Instant::now())
}

/// Benchmark one model: warmup runs (discarded), then the measured runs.
///
/// Runs are strictly sequential within a model so one run's network
/// contention cannot skew the next. A failed run keeps its slot in the
/// returned samples and never aborts the remaining runs; there are no
/// retries.
pub async fn run_model(client: &ApiClient, config: &Config, model: &str) -> Vec<RunSample> {
    for i in 0..config.warmup {
        debug!("Warmup {}/{} for {}", i + 1, config.warmup, model);
        let _ = execute_run(client, model, &config.prompt, config.max_tokens).await;
    }

    let mut samples = Vec::with_capacity(config.runs);
    for i in 0..config.runs {
        let sample = execute_run(client, model, &config.prompt, config.max_tokens).await;
        match sample.error {
            None => debug!(
                "{} run {}/{}: ttft {:.1} ms, {} tokens",
                model,
                i + 1,
                config.runs,
                sample.ttft_ms.unwrap_or_default(),
                sample.token_count.unwrap_or_default()
            ),
            Some(kind) => info!("{} run {}/{} failed: {:?}", model, i + 1, config.runs, kind),
        }
        samples.push(sample);
    }

    samples
}

/// Drives the benchmark across the requested set of models.
pub struct BenchmarkRunner {
    client: Arc<ApiClient>,
    config: Config,
}

impl BenchmarkRunner {
    pub fn new(client: Arc<ApiClient>, config: Config) -> Self {
        Self { client, config }
    }

    /// Benchmark every requested model and return one result per model, in
    /// the requested order.
    ///
    /// Models run concurrently up to the configured limit while each model's
    /// own runs stay sequential. Results are joined in request order, so the
    /// output order never depends on completion order. A model whose every
    /// run fails is recorded with a 0/N ratio; an empty model set yields an
    /// empty result.
    pub async fn run(&self) -> Result<Vec<ModelResult>> {
        if self.config.models.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Benchmarking {} model(s): {} run(s), {} warmup",
            self.config.models.len(),
            self.config.runs,
            self.config.warmup
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(self.config.models.len());

        for model in self.config.models.clone() {
            let client = Arc::clone(&self.client);
            let config = self.config.clone();
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore should never be closed");
                let samples = run_model(&client, &config, &model).await;
                aggregate(&model, &samples)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await?);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warp::Filter;

    #[test]
    fn test_reasoning_phase_excluded_from_ttft() {
        let start = Instant::now();
        let mut acc = RunAccumulator::new(start);

        // 500ms reasoning phase, then a 100ms gap before the first answer
        // token: TTFT must land at ~600ms, not ~500ms.
        acc.observe(&TokenEvent::Reasoning {
            at: start + Duration::from_millis(500),
            tokens: 10,
        });
        acc.observe(&TokenEvent::Answer {
            at: start + Duration::from_millis(600),
            tokens: 1,
        });

        let sample = acc.finish(start + Duration::from_millis(700));
        let ttft = sample.ttft_ms.unwrap();
        assert!((ttft - 600.0).abs() < 1e-6, "ttft was {}", ttft);
        assert_eq!(sample.token_count, Some(1));
    }

    #[test]
    fn test_generation_speed_exact() {
        let start = Instant::now();
        let mut acc = RunAccumulator::new(start);

        acc.observe(&TokenEvent::Answer {
            at: start + Duration::from_millis(1000),
            tokens: 256,
        });

        // total 3000ms, ttft 1000ms => 256 tokens over 2 seconds
        let sample = acc.finish(start + Duration::from_millis(3000));
        assert_eq!(sample.generation_speed, Some(128.0));
    }

    #[test]
    fn test_zero_generation_time_guards_division() {
        let start = Instant::now();
        let mut acc = RunAccumulator::new(start);

        let at = start + Duration::from_millis(100);
        acc.observe(&TokenEvent::Answer { at, tokens: 5 });

        let sample = acc.finish(at);
        assert_eq!(sample.generation_speed, Some(0.0));
    }

    #[test]
    fn test_stream_without_answer_tokens_is_empty_response() {
        let start = Instant::now();
        let mut acc = RunAccumulator::new(start);

        acc.observe(&TokenEvent::Reasoning {
            at: start + Duration::from_millis(200),
            tokens: 30,
        });

        let sample = acc.finish(start + Duration::from_millis(300));
        assert_eq!(sample.error, Some(FailureKind::EmptyResponse));
        assert!(sample.ttft_ms.is_none());
        assert!(sample.total_latency_ms.is_some());
    }

    #[test]
    fn test_interrupted_run_keeps_partial_token_count() {
        let start = Instant::now();
        let mut acc = RunAccumulator::new(start);

        acc.observe(&TokenEvent::Answer {
            at: start + Duration::from_millis(100),
            tokens: 7,
        });

        let sample = acc.fail(&RunError::StreamInterrupted("reset".to_string()));
        assert_eq!(sample.error, Some(FailureKind::StreamInterrupted));
        assert_eq!(sample.token_count, Some(7));
        assert!(sample.ttft_ms.is_none());
    }

    const SSE_BODY: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"thinking\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: [DONE]\n\n"
    );

    async fn spawn_stub_server(requests: Arc<AtomicUsize>) -> SocketAddr {
        let completions = warp::path!("chat" / "completions")
            .and(warp::post())
            .and(warp::body::json())
            .map(move |body: serde_json::Value| {
                requests.fetch_add(1, Ordering::Relaxed);
                let model = body["model"].as_str().unwrap_or_default();
                if model == "always-fails" {
                    warp::http::Response::builder()
                        .status(500)
                        .body("boom".to_string())
                        .expect("response")
                } else {
                    warp::http::Response::builder()
                        .header("content-type", "text/event-stream")
                        .body(SSE_BODY.to_string())
                        .expect("response")
                }
            });

        let (addr, server) = warp::serve(completions).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn stub_config(addr: SocketAddr, models: Vec<&str>, runs: usize, warmup: usize) -> Config {
        Config {
            base_url: format!("http://{}", addr),
            api_key: "test-key".to_string(),
            models: models.into_iter().map(str::to_string).collect(),
            runs,
            warmup,
            max_tokens: 64,
            prompt: "hello".to_string(),
            timeout: Duration::from_secs(5),
            concurrency: 1,
        }
    }

    fn stub_client(config: &Config) -> Arc<ApiClient> {
        Arc::new(
            ApiClient::new(&config.base_url, &config.api_key, config.timeout, 4).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_successful_run_measures_answer_tokens_only() {
        let requests = Arc::new(AtomicUsize::new(0));
        let addr = spawn_stub_server(Arc::clone(&requests)).await;
        let config = stub_config(addr, vec!["glm-4.7"], 1, 0);
        let client = stub_client(&config);

        let sample = execute_run(&client, "glm-4.7", &config.prompt, config.max_tokens).await;
        assert!(sample.is_success());
        assert!(sample.ttft_ms.is_some());
        assert!(sample.total_latency_ms.is_some());
        // "hello" and " world", one token each; the reasoning fragment is
        // not counted.
        assert_eq!(sample.token_count, Some(2));
    }

    #[tokio::test]
    async fn test_request_error_has_no_timing() {
        let requests = Arc::new(AtomicUsize::new(0));
        let addr = spawn_stub_server(Arc::clone(&requests)).await;
        let config = stub_config(addr, vec!["always-fails"], 1, 0);
        let client = stub_client(&config);

        let sample = execute_run(&client, "always-fails", &config.prompt, config.max_tokens).await;
        assert_eq!(sample.error, Some(FailureKind::RequestError));
        assert!(sample.ttft_ms.is_none());
        assert!(sample.total_latency_ms.is_none());
        assert!(sample.generation_speed.is_none());
    }

    #[tokio::test]
    async fn test_warmup_runs_do_not_appear_in_samples() {
        let requests = Arc::new(AtomicUsize::new(0));
        let addr = spawn_stub_server(Arc::clone(&requests)).await;
        let config = stub_config(addr, vec!["glm-4.7"], 3, 2);
        let client = stub_client(&config);

        let samples = run_model(&client, &config, "glm-4.7").await;
        assert_eq!(samples.len(), 3);
        // warmup requests still hit the server
        assert_eq!(requests.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_failing_model_does_not_abort_suite() {
        let requests = Arc::new(AtomicUsize::new(0));
        let addr = spawn_stub_server(Arc::clone(&requests)).await;
        let config = stub_config(addr, vec!["glm-4.7", "always-fails"], 3, 0);
        let client = stub_client(&config);

        let runner = BenchmarkRunner::new(client, config);
        let results = runner.run().await.unwrap();

        assert_eq!(results.len(), 2);
        // Requested order preserved.
        assert_eq!(results[0].model, "glm-4.7");
        assert_eq!(results[1].model, "always-fails");

        assert_eq!(results[0].success_ratio(), "3/3");
        assert!(results[0].ttft_avg_ms.is_some());
        assert!(results[0].latency_avg_ms.is_some());

        assert_eq!(results[1].success_ratio(), "0/3");
        assert!(results[1].ttft_avg_ms.is_none());
        assert!(results[1].latency_avg_ms.is_none());
    }

    #[tokio::test]
    async fn test_empty_model_set_yields_empty_suite() {
        let requests = Arc::new(AtomicUsize::new(0));
        let addr = spawn_stub_server(Arc::clone(&requests)).await;
        let config = stub_config(addr, vec![], 3, 1);
        let client = stub_client(&config);

        let runner = BenchmarkRunner::new(client, config);
        let results = runner.run().await.unwrap();
        assert!(results.is_empty());
        assert_eq!(requests.load(Ordering::Relaxed), 0);
    }
}
