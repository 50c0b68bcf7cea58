mod common;

use std::sync::Arc;
use std::time::Duration;

use argus::benchmark::{BenchmarkConfig, BenchmarkOrchestrator, BenchmarkSettings, RunState, percentile};
use argus::prompt_packs::PromptPackCatalog;
use argus::probes::{ProbeConfig, ProbeRequest};
use argus::probes::ProbeExecutor;
use argus::provider::{MockProviderClient, MockResponse, StreamChunk};
use argus::storage::{InMemoryStorage, Storage};
use argus::throttle::{ThrottleConfig, ThrottleController};
use tokio_util::sync::CancellationToken;

fn orchestrator(
    mock: &Arc<MockProviderClient>,
    storage: &Arc<InMemoryStorage>,
) -> BenchmarkOrchestrator<MockProviderClient, InMemoryStorage> {
    BenchmarkOrchestrator::new(
        mock.clone(),
        ProbeConfig::default(),
        storage.clone(),
        Arc::new(PromptPackCatalog::builtin()),
    )
}

#[tokio::test(start_paused = true)]
async fn warmups_are_executed_but_never_reported() {
    let mock = Arc::new(MockProviderClient::new());
    let storage = Arc::new(InMemoryStorage::new());
    let names = ["gpt-4o", "claude-3-5-sonnet", "llama3"];
    common::healthy(&mock, &names, Duration::from_millis(20));

    let account = common::account("prod", "openai");
    let settings = BenchmarkSettings {
        runs: 2,
        warmup_runs: 1,
        ..Default::default()
    };
    let config = BenchmarkConfig::new(common::models(&account, &names), &settings, ThrottleConfig::default());

    let report = orchestrator(&mock, &storage).run_to_completion(config).await.unwrap();

    assert_eq!(mock.call_count(), 9);
    assert_eq!(report.results.len(), 6);
    assert_eq!(report.warmups_discarded, 3);
    assert!(report.results.iter().all(|r| !r.is_warmup && r.is_success()));
    assert_eq!(report.run.state, RunState::Completed);

    assert_eq!(report.statistics.len(), 3);
    for stats in &report.statistics {
        assert_eq!(stats.stats.sample_count, 2);
        assert_eq!(stats.stats.error_count, 0);
    }
    assert_eq!(report.overall.sample_count, 6);

    let persisted = storage.list_probe_results(report.run.id).await.unwrap();
    assert_eq!(persisted.len(), 6);
    let run = storage.get_benchmark_run(report.run.id).await.unwrap();
    assert_eq!(run.state, RunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn global_cap_bounds_concurrent_streams() {
    let mock = Arc::new(MockProviderClient::new());
    let storage = Arc::new(InMemoryStorage::new());

    let openai: Vec<String> = (0..6).map(|i| format!("openai-model-{i}")).collect();
    let groq: Vec<String> = (0..6).map(|i| format!("groq-model-{i}")).collect();
    let openai_names: Vec<&str> = openai.iter().map(String::as_str).collect();
    let groq_names: Vec<&str> = groq.iter().map(String::as_str).collect();
    common::healthy(&mock, &openai_names, Duration::from_millis(100));
    common::healthy(&mock, &groq_names, Duration::from_millis(100));

    let mut models = common::models(&common::account("openai", "openai"), &openai_names);
    models.extend(common::models(&common::account("groq", "groq"), &groq_names));

    let settings = BenchmarkSettings {
        runs: 2,
        warmup_runs: 0,
        ..Default::default()
    };
    let throttle = ThrottleConfig {
        global_limit: 4,
        provider_limit: 10,
        model_limit: 3,
    };
    let config = BenchmarkConfig::new(models, &settings, throttle);

    let report = orchestrator(&mock, &storage).run_to_completion(config).await.unwrap();

    assert_eq!(report.results.len(), 24);
    assert!(mock.peak_in_flight() <= 4, "peak was {}", mock.peak_in_flight());
    assert!(mock.peak_in_flight() >= 1);
    assert_eq!(mock.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn same_model_name_on_two_accounts_has_separate_model_caps() {
    let mock = Arc::new(MockProviderClient::new());
    let storage = Arc::new(InMemoryStorage::new());
    common::healthy(&mock, &["gpt-4o"], Duration::from_millis(100));

    let mut models = common::models(&common::account("openai-prod", "openai"), &["gpt-4o"]);
    models.extend(common::models(&common::account("openrouter", "openrouter"), &["gpt-4o"]));

    let settings = BenchmarkSettings {
        runs: 1,
        warmup_runs: 0,
        ..Default::default()
    };
    let throttle = ThrottleConfig {
        global_limit: 10,
        provider_limit: 10,
        model_limit: 1,
    };
    let config = BenchmarkConfig::new(models, &settings, throttle);

    let report = orchestrator(&mock, &storage).run_to_completion(config).await.unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.statistics.len(), 2);
    assert_eq!(mock.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn streamed_timing_is_measured_from_chunk_arrival() {
    let mock = Arc::new(MockProviderClient::new());
    let account = common::account("prod", "openai");
    let model = &common::models(&account, &["gpt-4o"])[0];

    mock.add_response(
        "gpt-4o",
        MockResponse::Stream(vec![
            (Duration::from_millis(150), Ok(StreamChunk::content("To"))),
            (Duration::from_millis(100), Ok(StreamChunk::content(" be"))),
            (Duration::from_millis(100), Ok(StreamChunk::content(" or"))),
            (Duration::from_millis(150), Ok(StreamChunk::content(" not"))),
            (Duration::from_millis(200), Ok(StreamChunk::content(" to be"))),
            (Duration::ZERO, Ok(StreamChunk::usage(20, 50))),
        ]),
    );

    let executor = ProbeExecutor::new(mock.clone(), ProbeConfig::default());
    let throttle = ThrottleController::new(ThrottleConfig::default()).unwrap();
    let request = ProbeRequest::for_model(model, "Write a sonnet".into(), 200, false);

    let result = executor.execute(&request, &throttle, &CancellationToken::new()).await;
    let metrics = result.metrics().expect("probe should succeed");

    assert!((metrics.ttft_ms - 150.0).abs() < 0.5, "ttft {}", metrics.ttft_ms);
    assert!((metrics.total_latency_ms - 700.0).abs() < 0.5, "total {}", metrics.total_latency_ms);
    assert_eq!(metrics.output_tokens, 50);
    assert_eq!(metrics.input_tokens, 20);
    assert!((metrics.tps - 50.0 / 0.7).abs() < 0.1, "tps {}", metrics.tps);
    assert!(
        (metrics.tps_excluding_ttft - 50.0 / 0.55).abs() < 0.1,
        "tps excluding ttft {}",
        metrics.tps_excluding_ttft
    );
}

#[test]
fn percentiles_interpolate_linearly() {
    let values: Vec<f64> = (1..=100).map(|i| f64::from(i) * 10.0).collect();

    let reference = |p: f64| {
        let rank = p / 100.0 * (values.len() - 1) as f64;
        let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
        values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
    };

    assert_eq!(percentile(&values, 50.0), Some(505.0));
    assert!((percentile(&values, 95.0).unwrap() - 950.5).abs() < 1e-9);
    assert!((percentile(&values, 99.0).unwrap() - 990.1).abs() < 1e-9);
    for p in [50.0, 95.0, 99.0] {
        assert_eq!(percentile(&values, p), Some(reference(p)));
    }
}
