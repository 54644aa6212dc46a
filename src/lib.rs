pub mod benchmark;
pub mod cli;
pub mod client;
pub mod config;
pub mod report;
pub mod stats;
pub mod tokenizer;

pub use benchmark::{BenchmarkRunner, RunSample};
pub use cli::Cli;
pub use client::{ApiClient, FailureKind, RunError, TokenEvent};
pub use config::Config;
pub use report::SuiteReport;
pub use stats::{aggregate, ModelResult};
