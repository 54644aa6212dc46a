use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.z.ai/api/coding/paas/v4";

/// Default prompt: a coding task long enough to exercise steady-state
/// generation at the default max_tokens.
pub const DEFAULT_PROMPT: &str = "Write a Python function that implements a binary search tree \
     with insert, delete, and search operations. Include proper \
     type hints and docstrings.";

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    /// Models in caller-supplied order; output rows preserve this order.
    pub models: Vec<String>,
    pub runs: usize,
    pub warmup: usize,
    pub max_tokens: u32,
    pub prompt: String,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("API key must not be empty");
        }

        if self.max_tokens == 0 {
            anyhow::bail!("max_tokens must be greater than 0");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.timeout.is_zero() {
            anyhow::bail!("timeout must be greater than 0");
        }

        // runs == 0 is allowed: the suite then reports 0/0 per model.
        Ok(())
    }
}

/// Resolve the API key from the command line or the environment.
///
/// A missing key is a configuration error surfaced before any run is
/// attempted.
pub fn resolve_api_key(flag: Option<String>) -> anyhow::Result<String> {
    if let Some(key) = flag.filter(|k| !k.is_empty()) {
        return Ok(key);
    }

    match std::env::var("ZAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => anyhow::bail!(
            "API key required. Set the ZAI_API_KEY environment variable or use --api-key."
        ),
    }
}
