//! Cyclic scenario scheduling over a chaos plan.

use std::future::Future;
use std::path::PathBuf;

use chaos_compose::{ComposeCli, ComposeError};
use chaos_core::plan::{ChaosPlan, PlanError, Scenario};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to apply scenario `{scenario}`: {source}")]
    Compose {
        scenario: String,
        #[source]
        source: ComposeError,
    },
    #[error("failed to apply scenario `{scenario}`: {message}")]
    Rejected { scenario: String, message: String },
}

impl ScenarioError {
    pub fn scenario(&self) -> &str {
        match self {
            ScenarioError::Compose { scenario, .. } | ScenarioError::Rejected { scenario, .. } => {
                scenario
            }
        }
    }

    /// `(stdout, stderr)` of the scaling process, when it ran.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            ScenarioError::Compose { source, .. } => source.captured_output(),
            ScenarioError::Rejected { .. } => None,
        }
    }
}

/// Applies one scenario's scaling changes to the running containers.
pub trait ScenarioExecutor {
    fn apply(
        &mut self,
        scenario: &Scenario,
    ) -> impl Future<Output = Result<(), ScenarioError>> + Send;
}

/// Applies scenarios through `<compose> scale` against one project.
#[derive(Debug, Clone)]
pub struct ComposeScenarioExecutor {
    cli: ComposeCli,
    compose_file: PathBuf,
    project_name: String,
}

impl ComposeScenarioExecutor {
    pub fn new(cli: ComposeCli, compose_file: PathBuf, project_name: impl Into<String>) -> Self {
        Self {
            cli,
            compose_file,
            project_name: project_name.into(),
        }
    }
}

impl ScenarioExecutor for ComposeScenarioExecutor {
    async fn apply(&mut self, scenario: &Scenario) -> Result<(), ScenarioError> {
        self.cli
            .scale(
                &self.compose_file,
                &self.project_name,
                scenario.modifications(),
            )
            .await
            .map(|_| ())
            .map_err(|source| ScenarioError::Compose {
                scenario: scenario.name().to_string(),
                source,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedScenario {
    pub index: usize,
    pub name: String,
}

/// Owns the plan cursor. The cursor always lies in `[0, plan.len())`; after
/// the k-th call to [`ChaosPlanExecutor::run_next_scenario`] it is `k % len`.
#[derive(Debug)]
pub struct ChaosPlanExecutor<E> {
    plan: ChaosPlan,
    executor: E,
    cursor: usize,
}

impl<E: ScenarioExecutor> ChaosPlanExecutor<E> {
    pub fn new(plan: ChaosPlan, executor: E) -> Result<Self, PlanError> {
        if plan.is_empty() {
            return Err(PlanError::Empty);
        }
        Ok(Self {
            plan,
            executor,
            cursor: 0,
        })
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn plan(&self) -> &ChaosPlan {
        &self.plan
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Applies the scenario at the cursor and advances the cursor, wrapping
    /// after the last scenario. The cursor moves even when the application
    /// fails or the returned future is dropped early.
    pub async fn run_next_scenario(&mut self) -> Result<AppliedScenario, ScenarioError> {
        let index = self.cursor;
        let Some(scenario) = self.plan.get(index) else {
            return Err(ScenarioError::Rejected {
                scenario: format!("#{index}"),
                message: "scenario cursor is outside the plan".to_string(),
            });
        };
        self.cursor = (index + 1) % self.plan.len();

        tracing::info!(index, "Starting scenario {scenario}");
        self.executor.apply(scenario).await?;

        Ok(AppliedScenario {
            index,
            name: scenario.name().to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chaos_core::plan::ServiceScale;
    use std::collections::HashSet;

    /// Records applied scenario names; fails for the names in `failing`.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingExecutor {
        pub(crate) applied: Vec<String>,
        pub(crate) failing: HashSet<String>,
    }

    impl RecordingExecutor {
        pub(crate) fn failing_on(names: &[&str]) -> Self {
            Self {
                applied: Vec::new(),
                failing: names.iter().map(|name| name.to_string()).collect(),
            }
        }
    }

    impl ScenarioExecutor for RecordingExecutor {
        async fn apply(&mut self, scenario: &Scenario) -> Result<(), ScenarioError> {
            self.applied.push(scenario.name().to_string());
            if self.failing.contains(scenario.name()) {
                return Err(ScenarioError::Rejected {
                    scenario: scenario.name().to_string(),
                    message: "injected failure".to_string(),
                });
            }
            Ok(())
        }
    }

    pub(crate) fn mk_plan(names: &[&str]) -> ChaosPlan {
        let scenarios = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                Scenario::new(*name, vec![ServiceScale::new("api", idx as u32)]).expect("scenario")
            })
            .collect();
        ChaosPlan::new(scenarios).expect("plan")
    }

    #[tokio::test]
    async fn traverses_plan_cyclically_in_order() {
        let mut scheduler =
            ChaosPlanExecutor::new(mk_plan(&["s0", "s1", "s2"]), RecordingExecutor::default())
                .expect("scheduler");

        for call in 1..=4usize {
            scheduler.run_next_scenario().await.expect("apply");
            assert_eq!(scheduler.cursor(), call % 3);
        }

        assert_eq!(scheduler.executor().applied, vec!["s0", "s1", "s2", "s0"]);
    }

    #[tokio::test]
    async fn cursor_advances_even_when_application_fails() {
        let mut scheduler = ChaosPlanExecutor::new(
            mk_plan(&["ok", "broken", "after"]),
            RecordingExecutor::failing_on(&["broken"]),
        )
        .expect("scheduler");

        let applied = scheduler.run_next_scenario().await.expect("first");
        assert_eq!(applied, AppliedScenario { index: 0, name: "ok".to_string() });

        let err = scheduler.run_next_scenario().await.expect_err("second fails");
        assert_eq!(err.scenario(), "broken");
        assert_eq!(scheduler.cursor(), 2);

        let applied = scheduler.run_next_scenario().await.expect("third");
        assert_eq!(applied.name, "after");
        assert_eq!(scheduler.cursor(), 0);
    }

    #[tokio::test]
    async fn single_scenario_plan_reapplies_itself() {
        let mut scheduler = ChaosPlanExecutor::new(mk_plan(&["only"]), RecordingExecutor::default())
            .expect("scheduler");
        scheduler.run_next_scenario().await.expect("first");
        scheduler.run_next_scenario().await.expect("second");

        assert_eq!(scheduler.cursor(), 0);
        assert_eq!(scheduler.executor().applied, vec!["only", "only"]);
    }

    #[test]
    fn empty_plan_never_reaches_the_scheduler() {
        let err = ChaosPlan::new(Vec::new()).expect_err("empty plan must fail");
        assert!(matches!(err, PlanError::Empty));

        let scheduler = ChaosPlanExecutor::new(mk_plan(&["s0"]), RecordingExecutor::default())
            .expect("non-empty plan");
        assert_eq!(scheduler.plan().len(), 1);
        assert_eq!(scheduler.cursor(), 0);
    }

    #[tokio::test]
    async fn compose_executor_wraps_scaling_failures() {
        let cli = ComposeCli::new("sh").with_prefix_args(["-c", "echo nope >&2; exit 1", "sh"]);
        let mut executor =
            ComposeScenarioExecutor::new(cli, PathBuf::from("/x/docker-compose.yml"), "proj");
        let scenario = Scenario::new("api-down", vec![ServiceScale::new("api", 0)]).expect("scenario");

        let err = executor.apply(&scenario).await.expect_err("scale fails");
        assert_eq!(err.scenario(), "api-down");
        assert_eq!(err.captured_output().map(|(_, stderr)| stderr.trim()), Some("nope"));
    }
}
