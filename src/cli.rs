use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zai-bench")]
#[command(author, version, about = "Benchmark Z.AI coding-plan models for TTFT and generation speed", long_about = None)]
pub struct Cli {
    /// API key (or set the ZAI_API_KEY environment variable)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Comma-separated list of models to benchmark (default: all discovered)
    #[arg(long)]
    pub models: Option<String>,

    /// List available models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Number of measured runs per model
    #[arg(long, default_value_t = 3)]
    pub runs: usize,

    /// Number of warmup runs per model (discarded from statistics)
    #[arg(long, default_value_t = 1)]
    pub warmup: usize,

    /// Maximum tokens to generate per request
    #[arg(long, default_value_t = 256)]
    pub max_tokens: u32,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Save results to a JSON file
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Base URL of the API endpoint
    #[arg(long, default_value = crate::config::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Number of models benchmarked at once; runs within a model stay sequential
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Override the benchmark prompt
    #[arg(long)]
    pub prompt: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Split a comma-separated `--models` value into identifiers, dropping blanks.
pub fn parse_model_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_model_list() {
        assert_eq!(
            parse_model_list("glm-4.7, glm-4.6-air ,glm-5"),
            vec!["glm-4.7", "glm-4.6-air", "glm-5"]
        );
        assert_eq!(parse_model_list(""), Vec::<String>::new());
        assert_eq!(parse_model_list("glm-5,,"), vec!["glm-5"]);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["zai-bench"]).unwrap();
        assert_eq!(cli.runs, 3);
        assert_eq!(cli.warmup, 1);
        assert_eq!(cli.max_tokens, 256);
        assert_eq!(cli.output, OutputFormat::Table);
        assert_eq!(cli.concurrency, 1);
    }
}
