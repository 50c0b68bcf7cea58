use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use argus::Config;
use argus::alerts::{Alert, AlertEvaluator, Recovery, SkippedRule};
use argus::benchmark::{BenchmarkConfig, BenchmarkEvent, BenchmarkOrchestrator};
use argus::config::{Args, Command, Inventory};
use argus::provider::OpenAiCompatibleClient;
use argus::storage::{InMemoryStorage, Storage};
use argus::telemetry;
use argus::uptime::{UptimeCheckRecord, UptimeChecker};

/// Cancel `token` on SIGTERM or Ctrl+C.
async fn shutdown_signal(token: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling in-flight probes...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, cancelling in-flight probes...");
        },
    }
    token.cancel();
}

#[derive(Serialize)]
struct CheckReport {
    checks: Vec<UptimeCheckRecord>,
    alerts: Vec<Alert>,
    skipped_rules: Vec<SkippedRule>,
    recoveries: Vec<Recovery>,
}

async fn seeded_storage(inventory: &Inventory) -> anyhow::Result<Arc<InMemoryStorage>> {
    let storage = Arc::new(InMemoryStorage::new());
    for rule in &inventory.rules {
        storage.put_alert_rule(rule.clone()).await?;
    }
    Ok(storage)
}

async fn check(config: &Config, inventory: &Inventory, cancel: CancellationToken) -> anyhow::Result<CheckReport> {
    let client = Arc::new(OpenAiCompatibleClient::new()?);
    let checker = UptimeChecker::new(
        client,
        config.uptime.clone(),
        config.probe,
        config.throttle,
        &config.prompt_catalog(),
    )?;
    let storage = seeded_storage(inventory).await?;

    let checks = checker.run_uptime_cycle(&inventory.models, &cancel).await;
    storage.append_uptime_checks(&checks).await?;

    let evaluator = AlertEvaluator::new(storage);
    let evaluation = evaluator.evaluate(&checks).await?;
    let recoveries = evaluator.detect_recoveries(&checks).await?;

    Ok(CheckReport {
        checks,
        alerts: evaluation.created,
        skipped_rules: evaluation.skipped,
        recoveries,
    })
}

async fn benchmark(
    config: &Config,
    inventory: &Inventory,
    command: BenchmarkArgs,
    cancel: CancellationToken,
) -> anyhow::Result<argus::benchmark::BenchmarkReport> {
    let models = if command.models.is_empty() {
        inventory.models.iter().filter(|m| m.enabled).cloned().collect()
    } else {
        command
            .models
            .iter()
            .map(|label| {
                inventory
                    .model(label)
                    .cloned()
                    .with_context(|| format!("no model labelled '{label}' is configured"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let mut bench = BenchmarkConfig::new(models, &config.benchmark, config.throttle);
    bench.name = command.name;
    if let Some(prompt_pack) = command.prompt_pack {
        bench.prompt_pack = prompt_pack;
    }
    if let Some(runs) = command.runs {
        bench.runs = runs;
    }
    if let Some(warmup_runs) = command.warmup_runs {
        bench.warmup_runs = warmup_runs;
    }
    if let Some(max_tokens) = command.max_tokens {
        bench.max_tokens = max_tokens;
    }

    let client = Arc::new(OpenAiCompatibleClient::new()?);
    let storage = seeded_storage(inventory).await?;
    let orchestrator = BenchmarkOrchestrator::new(client, config.probe, storage, Arc::new(config.prompt_catalog()));

    let mut handle = orchestrator.run(bench).await?;
    let mut cancelled = false;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                handle.cancel();
            }
            event = handle.next_event() => match event {
                Some(BenchmarkEvent::Result { result, completed, total }) => {
                    tracing::info!(
                        model_name = %result.model_name,
                        success = result.is_success(),
                        completed,
                        total,
                        "Probe finished"
                    );
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    Ok(handle.finish().await?)
}

struct BenchmarkArgs {
    models: Vec<String>,
    prompt_pack: Option<String>,
    runs: Option<u32>,
    warmup_runs: Option<u32>,
    max_tokens: Option<u32>,
    name: Option<String>,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args)?;
    config.validate()?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.log_format)?;
    tracing::debug!("{:?}", args);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match args.command.unwrap_or(Command::Check) {
        Command::PromptPacks => {
            for pack in config.prompt_catalog().list() {
                println!("{:<16} {:<28} ~{} tokens", pack.id, pack.name, pack.expected_tokens);
            }
        }
        Command::Check => {
            let inventory = config.inventory()?;
            print_json(&check(&config, &inventory, cancel).await?)?;
        }
        Command::Benchmark {
            models,
            prompt_pack,
            runs,
            warmup_runs,
            max_tokens,
            name,
        } => {
            let inventory = config.inventory()?;
            let command = BenchmarkArgs {
                models,
                prompt_pack,
                runs,
                warmup_runs,
                max_tokens,
                name,
            };
            print_json(&benchmark(&config, &inventory, command, cancel).await?)?;
        }
    }

    Ok(())
}
