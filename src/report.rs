use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::stats::ModelResult;

/// Final report handed to the renderers and the file-save path.
///
/// Rows keep the requested model order.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub configuration: RunConfiguration,
    pub results: Vec<ModelResult>,
    pub summary: SuiteSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfiguration {
    pub endpoint: String,
    pub runs: usize,
    pub warmup: usize,
    pub max_tokens: u32,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub total_models: usize,
    pub successful_models: usize,
}

impl SuiteReport {
    pub fn new(config: &Config, results: Vec<ModelResult>) -> Self {
        let summary = SuiteSummary {
            total_models: results.len(),
            successful_models: results.iter().filter(|r| r.successful_runs > 0).count(),
        };

        SuiteReport {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            configuration: RunConfiguration {
                endpoint: config.base_url.clone(),
                runs: config.runs,
                warmup: config.warmup,
                max_tokens: config.max_tokens,
                concurrency: config.concurrency,
            },
            results,
            summary,
        }
    }

    pub fn print_table(&self) {
        let model_width = self
            .results
            .iter()
            .map(|r| r.model.len())
            .chain(std::iter::once("Model".len()))
            .max()
            .unwrap_or(5);

        println!(
            "{:<width$}  {:>15}  {:>15}  {:>17}  {:>7}  {:>8}",
            "Model",
            "TTFT (ms)",
            "Speed (t/s)",
            "Latency (ms)",
            "Tokens",
            "Success",
            width = model_width
        );
        println!(
            "{}  {}  {}  {}  {}  {}",
            "-".repeat(model_width),
            "-".repeat(15),
            "-".repeat(15),
            "-".repeat(17),
            "-".repeat(7),
            "-".repeat(8)
        );

        for result in &self.results {
            println!(
                "{:<width$}  {:>15}  {:>15}  {:>17}  {:>7}  {:>8}",
                result.model,
                format_stat(result.ttft_avg_ms, result.ttft_std_ms),
                format_stat(
                    result.speed_avg_tokens_per_sec,
                    result.speed_std_tokens_per_sec
                ),
                format_stat(result.latency_avg_ms, result.latency_std_ms),
                format_tokens(result.tokens_avg),
                result.success_ratio(),
                width = model_width
            );
        }
    }

    pub fn print_json(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// `mean ± std` cell, or `-` when the model produced no data. Null must
/// render differently from a true zero measurement.
fn format_stat(avg: Option<f64>, std: Option<f64>) -> String {
    match (avg, std) {
        (Some(avg), Some(std)) => format!("{:.1} ± {:.1}", avg, std),
        _ => "-".to_string(),
    }
}

fn format_tokens(avg: Option<f64>) -> String {
    match avg {
        Some(avg) => format!("{:.0}", avg),
        None => "-".to_string(),
    }
}
