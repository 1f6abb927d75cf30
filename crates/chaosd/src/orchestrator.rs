//! Retry-then-advance loop: run the tests until they pass, inject the next
//! scenario, repeat.
//!
//! The loop is a two-state machine driven one transition at a time by
//! [`Orchestrator::step`]. Exactly one test run or scenario application is
//! in flight at any moment; `step` takes `&mut self`, so the cursor and the
//! retry counter are only ever touched by a single sequential chain.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chaos_core::config::RetryPolicy;
use chaos_verify::{run_test, TestCommand, TestRunResult, VerifyError};
use tokio::time::Instant;

use crate::deadline::{StopReceiver, StopRequest};
use crate::report::RunReport;
use crate::scheduler::{ChaosPlanExecutor, ScenarioExecutor};

/// Runs the user's test command once.
pub trait TestRunner {
    fn run_tests(&mut self) -> impl Future<Output = Result<TestRunResult, VerifyError>> + Send;
}

#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: TestCommand,
    cwd: PathBuf,
}

impl CommandTestRunner {
    pub fn new(command: TestCommand, cwd: PathBuf) -> Self {
        Self { command, cwd }
    }
}

impl TestRunner for CommandTestRunner {
    async fn run_tests(&mut self) -> Result<TestRunResult, VerifyError> {
        run_test(&self.command, &self.cwd).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    RunningTest,
    ApplyingScenario,
}

/// The transition taken by one call to [`Orchestrator::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The test failed; the same command runs again next.
    TestFailed { attempt: u32 },
    /// The test passed after `retries` failures; a scenario is applied next.
    TestPassed {
        attempt: u32,
        retries: u32,
        recovery: Duration,
    },
    /// The retry cap was hit; the next scenario is applied anyway.
    RetriesExhausted { retries: u32 },
    ScenarioApplied { scenario: String },
    /// Scenario application failed. The failure is logged and the loop goes
    /// back to running tests as if the scenario had been applied.
    ScenarioFailureIgnored { scenario: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    retry_count: u32,
    last_cycle_start: Instant,
    current_scenario: Option<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            retry_count: 0,
            last_cycle_start: Instant::now(),
            current_scenario: None,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_cycle_start(&self) -> Instant {
        self.last_cycle_start
    }

    /// The scenario most recently applied (or attempted).
    pub fn current_scenario(&self) -> Option<&str> {
        self.current_scenario.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Drained,
    Aborted,
}

pub struct Orchestrator<R, E> {
    runner: R,
    scheduler: ChaosPlanExecutor<E>,
    retry: RetryPolicy,
    phase: LoopPhase,
    state: RunState,
    report: RunReport,
}

impl<R: TestRunner, E: ScenarioExecutor> Orchestrator<R, E> {
    pub fn new(runner: R, scheduler: ChaosPlanExecutor<E>, retry: RetryPolicy) -> Self {
        Self {
            runner,
            scheduler,
            retry,
            phase: LoopPhase::RunningTest,
            state: RunState::new(),
            report: RunReport::default(),
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn scheduler(&self) -> &ChaosPlanExecutor<E> {
        &self.scheduler
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Performs exactly one state transition.
    pub async fn step(&mut self) -> Transition {
        match self.phase {
            LoopPhase::RunningTest => self.run_tests_once().await,
            LoopPhase::ApplyingScenario => self.apply_next_scenario().await,
        }
    }

    /// Steps until a stop is requested. A `Drain` request is honoured
    /// between steps; an `Abort` request also cancels the step in flight.
    /// Without a stop request this never returns.
    pub async fn run(&mut self, mut stop: StopReceiver) -> StopReason {
        loop {
            match *stop.borrow() {
                Some(StopRequest::Abort) => return StopReason::Aborted,
                Some(StopRequest::Drain) => return StopReason::Drained,
                None => {}
            }

            let phase = self.phase;
            tokio::select! {
                _ = self.step() => {}
                _ = wait_for_abort(&mut stop) => {
                    tracing::warn!(?phase, "aborting step in flight");
                    return StopReason::Aborted;
                }
            }
        }
    }

    async fn run_tests_once(&mut self) -> Transition {
        let attempt = self.state.retry_count.saturating_add(1);
        tracing::info!(attempt, "Running tests... Attempt {attempt}");

        let result = self.runner.run_tests().await;
        self.report.test_runs += 1;

        let passed = match &result {
            Ok(run) if run.passed() => true,
            Ok(run) => {
                tracing::warn!(
                    attempt,
                    exit_code = ?run.exit_code,
                    stdout = %run.stdout.trim_end(),
                    stderr = %run.stderr.trim_end(),
                    "Tests errored out!"
                );
                false
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "Tests errored out!");
                false
            }
        };

        if passed {
            let retries = self.state.retry_count;
            let recovery = self.state.last_cycle_start.elapsed();
            tracing::info!(
                retries,
                recovery_secs = recovery.as_secs_f64(),
                "Test run succeeded! Number of retries: {retries}. Time until recovery: {:.3} seconds",
                recovery.as_secs_f64()
            );
            self.report
                .record_recovery(self.state.current_scenario.clone(), retries, recovery);
            self.state.retry_count = 0;
            self.phase = LoopPhase::ApplyingScenario;
            return Transition::TestPassed {
                attempt,
                retries,
                recovery,
            };
        }

        self.report.failed_runs += 1;
        self.state.retry_count = self.state.retry_count.saturating_add(1);

        if self.retry.is_exhausted(self.state.retry_count) {
            let retries = self.state.retry_count;
            tracing::warn!(
                retries,
                scenario = ?self.state.current_scenario,
                "retry cap reached; moving on to the next scenario"
            );
            self.report.retries_exhausted += 1;
            self.state.retry_count = 0;
            self.phase = LoopPhase::ApplyingScenario;
            return Transition::RetriesExhausted { retries };
        }

        if !self.retry.backoff.is_zero() {
            tokio::time::sleep(self.retry.backoff).await;
        }

        Transition::TestFailed { attempt }
    }

    async fn apply_next_scenario(&mut self) -> Transition {
        let transition = match self.scheduler.run_next_scenario().await {
            Ok(applied) => {
                self.report.scenarios_applied += 1;
                self.state.current_scenario = Some(applied.name.clone());
                Transition::ScenarioApplied {
                    scenario: applied.name,
                }
            }
            Err(err) => {
                let (stdout, stderr) = err.captured_output().unwrap_or_default();
                tracing::error!(
                    error = %err,
                    stdout = %stdout.trim_end(),
                    stderr = %stderr.trim_end(),
                    "Error setting up scenario"
                );
                self.report.scenario_failures += 1;
                let scenario = err.scenario().to_string();
                self.state.current_scenario = Some(scenario.clone());
                Transition::ScenarioFailureIgnored {
                    scenario,
                    error: err.to_string(),
                }
            }
        };

        self.state.last_cycle_start = Instant::now();
        self.phase = LoopPhase::RunningTest;
        transition
    }
}

async fn wait_for_abort(stop: &mut StopReceiver) {
    loop {
        if stop.changed().await.is_err() {
            // Every sender is gone; no abort can arrive any more.
            std::future::pending::<()>().await;
        }
        if *stop.borrow() == Some(StopRequest::Abort) {
            return;
        }
    }
}
