use chaos_compose::{ComposeCli, ComposeError, LogCapture};
use chaos_core::config::{ConfigError, DeadlinePolicy, RunConfig, RunOptions};
use chaos_core::plan::load_plan;
use chaos_core::validation::{render_errors, Validate, ValidationIssue, ValidationLevel};
use chaos_verify::{resolve_test_command, VerifyError};
use chaosd::{
    spawn_deadline, spawn_interrupt_listener, stop_channel, ChaosPlanExecutor, CommandTestRunner,
    ComposeScenarioExecutor, Orchestrator, ReportError,
};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Injects scaling faults into a docker-compose project while re-running a
/// test command until it passes again.
#[derive(Debug, Parser)]
#[command(name = "docker-chaos", version)]
struct Cli {
    /// Compose file describing the project [default: ./docker-compose.yml]
    #[arg(long = "composeFile", alias = "compose-file", value_name = "PATH")]
    compose_file: Option<PathBuf>,

    /// Chaos plan file (JSON, or TOML when it ends in .toml)
    #[arg(long, value_name = "PATH")]
    plan: Option<PathBuf>,

    /// Directory for captured compose logs; must not exist yet
    #[arg(long = "logPath", alias = "log-path", value_name = "DIR")]
    log_path: Option<PathBuf>,

    /// Run duration in milliseconds [default: 30000]
    #[arg(long, value_name = "MS")]
    duration: Option<u64>,

    /// Compose project name
    #[arg(long = "projectName", alias = "project-name", value_name = "NAME")]
    project_name: Option<String>,

    /// Compose executable, e.g. "docker compose" [default: docker-compose]
    #[arg(long, value_name = "BIN")]
    compose_bin: Option<String>,

    /// Failed test runs tolerated before moving on to the next scenario
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Delay between failed test runs, in milliseconds
    #[arg(long, value_name = "MS")]
    retry_backoff_ms: Option<u64>,

    /// What the deadline does to the test loop: detach, drain or abort
    #[arg(long, value_name = "POLICY")]
    deadline_policy: Option<DeadlinePolicy>,

    /// Write the run report as JSON to this path on exit
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Test command, with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn into_options(self) -> (RunOptions, Option<PathBuf>) {
        let options = RunOptions {
            compose_file: self.compose_file,
            plan: self.plan,
            log_path: self.log_path,
            duration_ms: self.duration,
            project_name: self.project_name,
            command: self.command,
            compose_bin: self.compose_bin,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
            deadline_policy: self.deadline_policy,
        };
        (options, self.report)
    }
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("failed to read current directory: {source}")]
    CurrentDir {
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    InvalidConfig(String),
    #[error("invalid test command: {0}")]
    TestCommand(#[from] VerifyError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return;
        }
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    init_tracing();

    if let Err(err) = run(cli).await {
        eprintln!("docker-chaos failed: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> Result<(), MainError> {
    let cwd = env::current_dir().map_err(|source| MainError::CurrentDir { source })?;
    let (options, report_path) = cli.into_options();

    let config = RunConfig::resolve(options, &cwd, &env::temp_dir(), chrono::Utc::now())?;
    check_issues(&config.validate())?;

    let plan = load_plan(&config.plan_path).map_err(ConfigError::from)?;
    check_issues(&plan.validate())?;

    let test_command = resolve_test_command(&config.test_command, &cwd)?;
    config.prepare_log_dir()?;

    tracing::info!("Test: {test_command}");
    tracing::info!("Chaos Plan: {}", config.plan_path.display());
    tracing::info!(
        project = %config.project_name,
        "Docker-compose: {}",
        config.compose_file.display()
    );
    tracing::info!("Logs: {}", config.log_path.display());

    let cli = ComposeCli::from_command_line(&config.compose_bin);
    let capture = LogCapture::start(
        &cli,
        &config.compose_file,
        &config.project_name,
        &config.log_path,
    )?;
    let capture = Arc::new(Mutex::new(capture));

    let executor = ComposeScenarioExecutor::new(
        cli,
        config.compose_file.clone(),
        config.project_name.clone(),
    );
    let scheduler = ChaosPlanExecutor::new(plan, executor).map_err(ConfigError::from)?;
    let runner = CommandTestRunner::new(test_command, cwd);
    let mut orchestrator = Orchestrator::new(runner, scheduler, config.retry);

    let (stop, stop_rx) = stop_channel();
    let deadline_capture = Arc::clone(&capture);
    let deadline = spawn_deadline(
        config.duration,
        config.deadline_policy,
        stop.clone(),
        move || async move {
            stop_capture(&deadline_capture).await;
        },
    );
    let interrupt = spawn_interrupt_listener(stop);

    let reason = orchestrator.run(stop_rx).await;
    tracing::info!(?reason, "test loop stopped");

    deadline.abort();
    interrupt.abort();
    stop_capture(&capture).await;

    let report = orchestrator.report();
    report.log_summary();
    if let Some(path) = report_path {
        report.write_json(&path)?;
        tracing::info!(path = %path.display(), "run report written");
    }
    Ok(())
}

async fn stop_capture(capture: &Mutex<LogCapture>) {
    if let Err(err) = capture.lock().await.stop().await {
        tracing::warn!(error = %err, "failed to stop log capture");
    }
}

fn check_issues(issues: &[ValidationIssue]) -> Result<(), MainError> {
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        tracing::warn!(code = issue.code, "{}", issue.message);
    }
    match render_errors(issues) {
        Some(message) => Err(MainError::InvalidConfig(message)),
        None => Ok(()),
    }
}
