// CLI commands for evaluating code against the judge
use anyhow::{bail, Context, Result};
use std::fs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use verdict_common::{Config, ExecutionResult, Language, TestCase};
use verdict_core::{
    EvaluationOutcome, EvaluationSession, EvaluationState, FileProblemCatalog, Judge0Client,
    Orchestrator, OrchestratorSettings, ProblemCatalog, RedisSubmissionStore, SubmissionDraft,
};

use crate::EvaluateArgs;

fn load_config(args: &EvaluateArgs) -> Config {
    let mut config = Config::from_env();
    if let Some(timeout_ms) = args.timeout_ms {
        config.evaluation_timeout_ms = timeout_ms;
    }
    config
}

/// Read a test case file: a JSON array of {stdin, expected_output}
pub fn load_test_cases(path: &str) -> Result<Vec<TestCase>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read test file {}", path))?;
    let cases: Vec<TestCase> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test file {}", path))?;
    Ok(cases)
}

async fn build_draft(args: &EvaluateArgs, config: &Config) -> Result<SubmissionDraft> {
    let source_code = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read source file {}", args.file))?;

    let test_cases = match &args.tests {
        Some(path) => load_test_cases(path)?,
        None => {
            let catalog = FileProblemCatalog::load(&config.problems_path).with_context(|| {
                format!("Failed to load problem catalog from {}", config.problems_path)
            })?;
            catalog
                .test_data(&args.problem)
                .await
                .with_context(|| format!("No test data for problem '{}'", args.problem))?
                .test_cases
        }
    };

    let (stdin, expected_outputs): (Vec<String>, Vec<String>) = test_cases
        .into_iter()
        .map(|tc| (tc.stdin, tc.expected_output))
        .unzip();

    Ok(SubmissionDraft {
        source_code,
        language: args.language.clone(),
        stdin,
        expected_outputs,
        problem_ref: args.problem.clone(),
    })
}

fn orchestrator(config: &Config) -> Result<Orchestrator> {
    let backend = Judge0Client::new(config).context("Failed to build judge HTTP client")?;
    Ok(Orchestrator::new(
        Arc::new(backend),
        OrchestratorSettings::from_config(config),
    ))
}

pub async fn run(args: &EvaluateArgs) -> Result<()> {
    let config = load_config(args);
    let draft = build_draft(args, &config).await?;
    let orchestrator = orchestrator(&config)?;

    println!("🚀 Running {} test case(s) on {}...", draft.stdin.len(), config.judge_url);

    let session = Arc::new(EvaluationSession::new("cli"));
    let handle = orchestrator.run_code(&session, draft)?;
    cancel_on_ctrl_c(handle.cancellation_token());

    let outcome = handle.outcome().await;
    report(&outcome, args.json)
}

pub async fn submit(args: &EvaluateArgs, user: &str) -> Result<()> {
    let config = load_config(args);
    let draft = build_draft(args, &config).await?;

    let store = RedisSubmissionStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    let orchestrator = orchestrator(&config)?.with_store(Arc::new(store));

    println!(
        "📝 Submitting {} for problem '{}' as {}...",
        args.file, args.problem, user
    );

    let session = Arc::new(EvaluationSession::new(user));
    let handle = orchestrator.submit_code(&session, draft, user)?;
    cancel_on_ctrl_c(handle.cancellation_token());

    let outcome = handle.outcome().await;
    if let Some(id) = outcome.submission_id {
        println!("💾 Submission recorded: {}", id);
    }
    report(&outcome, args.json)
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Cancelling evaluation...");
            token.cancel();
        }
    });
}

fn report(outcome: &EvaluationOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else if let Some(result) = &outcome.result {
        println!();
        for case in &result.test_results {
            let mark = if case.passed { "✅" } else { "❌" };
            let time = case
                .time_ms
                .map(|t| format!("{}ms", t))
                .unwrap_or_else(|| "-".to_string());
            let memory = case
                .memory_kb
                .map(|m| format!("{}KB", m))
                .unwrap_or_else(|| "-".to_string());
            match case.error_kind {
                Some(kind) => println!("  {} Test {}: {:?} ({}, {})", mark, case.index + 1, kind, time, memory),
                None => println!("  {} Test {} ({}, {})", mark, case.index + 1, time, memory),
            }
            if !case.passed {
                if let Some(output) = case.compile_output.as_deref().filter(|o| !o.is_empty()) {
                    println!("      compile output: {}", output.trim_end());
                } else {
                    println!("      expected: {:?}", case.expected_output);
                    println!("      actual:   {:?}", case.stdout.as_deref().unwrap_or(""));
                }
            }
        }

        println!();
        for line in summary_lines(result) {
            println!("{}", line);
        }
    }

    if let Some(warning) = &outcome.persistence_warning {
        println!("⚠️  {}", warning);
    }

    match &outcome.state {
        EvaluationState::Completed { .. } => Ok(()),
        EvaluationState::Failed { reason, .. } => bail!("Evaluation failed: {}", reason),
        other => bail!("Evaluation ended in unexpected state: {}", other.name()),
    }
}

fn summary_lines(result: &ExecutionResult) -> Vec<String> {
    let summary = result.summary();
    let mut lines = vec![format!(
        "📊 {} - {}/{} passed",
        result.status, result.passed_test_cases, result.total_test_cases
    )];
    if let Some(rate) = summary.success_rate {
        lines.push(format!("  success:    {:.1}%", rate));
    }
    if let Some(avg) = summary.average_time_ms {
        lines.push(format!("  avg time:   {:.1}ms", avg));
    }
    if let Some(avg) = summary.average_memory_kb {
        lines.push(format!("  avg memory: {:.0}KB", avg));
    }
    lines
}

pub fn list_languages() {
    println!("📋 Supported Languages:\n");
    for language in Language::all_variants() {
        println!(
            "  {:<12} {:<12} (judge id {})",
            language.to_string(),
            language.display_name(),
            language.judge_id()
        );
    }
}
