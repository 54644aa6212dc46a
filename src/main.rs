use anyhow::Result;
use log::{debug, info, LevelFilter};
use ringlog::{LogBuilder, MultiLogBuilder, Output, Stderr};
use std::sync::Arc;
use std::time::Duration;
use zai_bench::cli::{parse_model_list, OutputFormat};
use zai_bench::config::{self, DEFAULT_PROMPT};
use zai_bench::report::SuiteReport;
use zai_bench::{ApiClient, BenchmarkRunner, Cli, Config};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Logging goes to stderr so stdout stays clean for results
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let output: Box<dyn Output> = Box::new(Stderr::new());
    let log = LogBuilder::new()
        .output(output)
        .build()
        .expect("failed to initialize logger");

    let _drain = MultiLogBuilder::new()
        .level_filter(log_level)
        .default(log)
        .build()
        .start();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let api_key = config::resolve_api_key(cli.api_key.clone())?;
    let timeout = Duration::from_secs(cli.timeout);

    let client = Arc::new(ApiClient::new(
        &cli.base_url,
        &api_key,
        timeout,
        cli.concurrency,
    )?);

    if cli.list_models {
        println!("Available models:");
        for model in client.list_models().await {
            println!("  {}", model);
        }
        return Ok(());
    }

    let models = match &cli.models {
        Some(list) => parse_model_list(list),
        None => {
            info!("No models specified, querying server for available models");
            client.list_models().await
        }
    };

    let config = Config {
        base_url: cli.base_url.clone(),
        api_key,
        models,
        runs: cli.runs,
        warmup: cli.warmup,
        max_tokens: cli.max_tokens,
        prompt: cli
            .prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        timeout,
        concurrency: cli.concurrency,
    };
    config.validate()?;

    if cli.output == OutputFormat::Table {
        println!("Z.AI Model Benchmark");
        println!("   Endpoint: {}", config.base_url);
        println!("   Models: {}", config.models.len());
        println!(
            "   Runs: {} measured, {} warmup, max {} tokens",
            config.runs, config.warmup, config.max_tokens
        );
        println!();
    }

    debug!("Initializing benchmark runner");
    let runner = BenchmarkRunner::new(client, config.clone());
    let results = runner.run().await?;
    info!("Benchmark completed");

    let report = SuiteReport::new(&config, results);
    match cli.output {
        OutputFormat::Table => report.print_table(),
        OutputFormat::Json => report.print_json()?,
    }

    if let Some(path) = &cli.save {
        report.save(path).await?;
        println!();
        println!("Results saved to {}", path.display());
    }

    Ok(())
}
