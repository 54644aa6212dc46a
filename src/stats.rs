use serde::Serialize;

use crate::benchmark::RunSample;

/// Aggregate statistics for one model over its measured runs.
///
/// Field names and units (milliseconds, tokens/second) are the serialization
/// contract with the table/JSON renderers and any file consumer. Statistics
/// are `None` (JSON null) when no successful run exists, so a consumer can
/// tell "no data" from a true zero measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResult {
    pub model: String,
    pub ttft_avg_ms: Option<f64>,
    pub ttft_std_ms: Option<f64>,
    pub speed_avg_tokens_per_sec: Option<f64>,
    pub speed_std_tokens_per_sec: Option<f64>,
    pub latency_avg_ms: Option<f64>,
    pub latency_std_ms: Option<f64>,
    /// Mean answer-token count of successful runs, unrounded. Renderers
    /// round for display.
    pub tokens_avg: Option<f64>,
    pub runs: usize,
    pub successful_runs: usize,
}

impl ModelResult {
    pub fn success_ratio(&self) -> String {
        format!("{}/{}", self.successful_runs, self.runs)
    }
}

/// Reduce one model's measured samples into a `ModelResult`.
///
/// Pure function: no hidden state, deterministic for a given input. Failed
/// samples count toward the success ratio but never feed the numeric
/// statistics. An empty slice yields a `0/0` ratio with null statistics.
pub fn aggregate(model: &str, samples: &[RunSample]) -> ModelResult {
    let successes: Vec<&RunSample> = samples.iter().filter(|s| s.is_success()).collect();

    let ttfts: Vec<f64> = successes.iter().filter_map(|s| s.ttft_ms).collect();
    let speeds: Vec<f64> = successes.iter().filter_map(|s| s.generation_speed).collect();
    let latencies: Vec<f64> = successes.iter().filter_map(|s| s.total_latency_ms).collect();
    let tokens: Vec<f64> = successes
        .iter()
        .filter_map(|s| s.token_count)
        .map(f64::from)
        .collect();

    let (ttft_avg_ms, ttft_std_ms) = metric_stats(&ttfts);
    let (speed_avg_tokens_per_sec, speed_std_tokens_per_sec) = metric_stats(&speeds);
    let (latency_avg_ms, latency_std_ms) = metric_stats(&latencies);
    let (tokens_avg, _) = metric_stats(&tokens);

    ModelResult {
        model: model.to_string(),
        ttft_avg_ms,
        ttft_std_ms,
        speed_avg_tokens_per_sec,
        speed_std_tokens_per_sec,
        latency_avg_ms,
        latency_std_ms,
        tokens_avg,
        runs: samples.len(),
        successful_runs: successes.len(),
    }
}

fn metric_stats(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let mean = mean(values);
    (Some(mean), Some(sample_std_dev(values, mean)))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected sample standard deviation. A spread cannot be computed
/// from fewer than two points, so those report 0.0 rather than erroring.
fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
