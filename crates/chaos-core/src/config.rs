//! Run configuration resolved from command-line options.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::plan::PlanError;

pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";
pub const DEFAULT_COMPOSE_BIN: &str = "docker-compose";
pub const DEFAULT_DURATION_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("a docker-compose.yml file could not be found at {path}: {source}")]
    ComposeFileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a plan file is needed so we know how to create chaos")]
    MissingPlan,
    #[error("plan file {path} could not be resolved: {source}")]
    PlanNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a project name is needed so we know where to create chaos")]
    MissingProjectName,
    #[error("you need to pass the command to be executed")]
    MissingCommand,
    #[error("log path {path} already exists. Aborting")]
    LogPathExists { path: PathBuf },
    #[error("failed to create log directory {path}: {source}")]
    CreateLogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid deadline policy `{0}` (expected detach, drain or abort)")]
    InvalidDeadlinePolicy(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// What happens to the orchestration loop when the run duration elapses.
///
/// Log capture is stopped under every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// The loop keeps scheduling cycles in the background.
    #[default]
    Detach,
    /// The loop exits once the step in flight completes.
    Drain,
    /// The step in flight is cancelled and the loop exits.
    Abort,
}

impl DeadlinePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadlinePolicy::Detach => "detach",
            DeadlinePolicy::Drain => "drain",
            DeadlinePolicy::Abort => "abort",
        }
    }

}

impl fmt::Display for DeadlinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeadlinePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detach" => Ok(DeadlinePolicy::Detach),
            "drain" => Ok(DeadlinePolicy::Drain),
            "abort" => Ok(DeadlinePolicy::Abort),
            _ => Err(ConfigError::InvalidDeadlinePolicy(value.to_string())),
        }
    }
}

/// How failed test runs are retried before the next scenario is applied.
///
/// The default retries immediately and without limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: Option<u32>,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Returns true once `retry_count` failed attempts exhaust the cap.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        self.max_retries
            .is_some_and(|max_retries| retry_count >= max_retries)
    }
}

/// Raw options as supplied on the command line, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub compose_file: Option<PathBuf>,
    pub plan: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub duration_ms: Option<u64>,
    pub project_name: Option<String>,
    pub command: Vec<String>,
    pub compose_bin: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub deadline_policy: Option<DeadlinePolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub compose_file: PathBuf,
    pub plan_path: PathBuf,
    pub log_path: PathBuf,
    pub duration: Duration,
    pub project_name: String,
    /// Program followed by its arguments.
    pub test_command: Vec<String>,
    pub compose_bin: String,
    pub retry: RetryPolicy,
    pub deadline_policy: DeadlinePolicy,
}

impl RunConfig {
    /// Applies defaults and checks every fatal precondition, in the order an
    /// operator would fix them. Relative paths are resolved against `cwd`.
    /// Nothing is created on disk; see [`RunConfig::prepare_log_dir`].
    pub fn resolve(
        options: RunOptions,
        cwd: &Path,
        temp_root: &Path,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let compose_candidate = options
            .compose_file
            .map(|path| cwd.join(path))
            .unwrap_or_else(|| cwd.join(DEFAULT_COMPOSE_FILE));
        let compose_file = fs::canonicalize(&compose_candidate).map_err(|source| {
            ConfigError::ComposeFileNotFound {
                path: compose_candidate.clone(),
                source,
            }
        })?;

        let plan = options.plan.ok_or(ConfigError::MissingPlan)?;

        let project_name = options
            .project_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingProjectName)?;

        let plan_candidate = cwd.join(plan);
        let plan_path =
            fs::canonicalize(&plan_candidate).map_err(|source| ConfigError::PlanNotFound {
                path: plan_candidate.clone(),
                source,
            })?;

        let test_command = command_argv(options.command);
        if test_command
            .first()
            .map_or(true, |program| program.trim().is_empty())
        {
            return Err(ConfigError::MissingCommand);
        }

        let log_path = match options.log_path {
            Some(path) => {
                let path = cwd.join(path);
                if path.exists() {
                    return Err(ConfigError::LogPathExists { path });
                }
                path
            }
            None => default_log_path(temp_root, now),
        };

        // A zero duration falls back to the default rather than ending the run at once.
        let duration_ms = options
            .duration_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_DURATION_MS);

        let compose_bin = options
            .compose_bin
            .map(|bin| bin.trim().to_string())
            .filter(|bin| !bin.is_empty())
            .unwrap_or_else(|| DEFAULT_COMPOSE_BIN.to_string());

        Ok(Self {
            compose_file,
            plan_path,
            log_path,
            duration: Duration::from_millis(duration_ms),
            project_name,
            test_command,
            compose_bin,
            retry: RetryPolicy {
                max_retries: options.max_retries,
                backoff: Duration::from_millis(options.retry_backoff_ms.unwrap_or(0)),
            },
            deadline_policy: options.deadline_policy.unwrap_or_default(),
        })
    }

    pub fn prepare_log_dir(&self) -> Result<(), ConfigError> {
        if self.log_path.exists() {
            return Err(ConfigError::LogPathExists {
                path: self.log_path.clone(),
            });
        }
        fs::create_dir_all(&self.log_path).map_err(|source| ConfigError::CreateLogDir {
            path: self.log_path.clone(),
            source,
        })
    }
}

/// A single positional is a whole command line and is split on whitespace.
/// Several positionals are already an argv and are kept as given.
fn command_argv(command: Vec<String>) -> Vec<String> {
    match command.as_slice() {
        [line] => line.split_whitespace().map(str::to_string).collect(),
        _ => command,
    }
}

/// `<temp_root>/logs-<ISO-8601 timestamp>`.
pub fn default_log_path(temp_root: &Path, now: DateTime<Utc>) -> PathBuf {
    temp_root.join(format!(
        "logs-{}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            fs::write(dir.path().join("docker-compose.yml"), "services: {}\n")
                .expect("write compose");
            fs::write(dir.path().join("plan.json"), "{}").expect("write plan");
            let now = Utc
                .with_ymd_and_hms(2026, 10, 16, 9, 30, 0)
                .single()
                .expect("timestamp");
            Self { dir, now }
        }

        fn options(&self) -> RunOptions {
            RunOptions {
                plan: Some(PathBuf::from("plan.json")),
                project_name: Some("proj".to_string()),
                command: vec!["./run-tests.sh".to_string(), "--fast".to_string()],
                ..RunOptions::default()
            }
        }

        fn resolve(&self, options: RunOptions) -> Result<RunConfig, ConfigError> {
            RunConfig::resolve(options, self.dir.path(), self.dir.path(), self.now)
        }
    }

    #[test]
    fn resolve_applies_defaults() {
        let fixture = Fixture::new();
        let config = fixture.resolve(fixture.options()).expect("resolve");

        let root = fs::canonicalize(fixture.dir.path()).expect("canonical root");
        assert_eq!(config.compose_file, root.join("docker-compose.yml"));
        assert_eq!(config.plan_path, root.join("plan.json"));
        assert_eq!(config.duration, Duration::from_millis(30_000));
        assert_eq!(config.compose_bin, "docker-compose");
        assert_eq!(config.test_command, vec!["./run-tests.sh", "--fast"]);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.deadline_policy, DeadlinePolicy::Detach);
        assert_eq!(
            config.log_path,
            fixture.dir.path().join("logs-2026-10-16T09:30:00.000Z")
        );
    }

    #[test]
    fn separate_command_arguments_keep_their_spaces() {
        let fixture = Fixture::new();
        let mut options = fixture.options();
        options.command = vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()];

        let config = fixture.resolve(options).expect("resolve");
        assert_eq!(config.test_command, vec!["sh", "-c", "exit 1"]);
    }

    #[test]
    fn single_command_line_is_split_on_whitespace() {
        let fixture = Fixture::new();
        let mut options = fixture.options();
        options.command = vec!["  ./run-tests.sh   --fast ".to_string()];

        let config = fixture.resolve(options).expect("resolve");
        assert_eq!(config.test_command, vec!["./run-tests.sh", "--fast"]);

        let mut options = fixture.options();
        options.command = vec!["   ".to_string()];
        assert!(matches!(
            fixture.resolve(options),
            Err(ConfigError::MissingCommand)
        ));
    }

    #[test]
    fn zero_duration_falls_back_to_default() {
        let fixture = Fixture::new();
        let mut options = fixture.options();
        options.duration_ms = Some(0);
        let config = fixture.resolve(options).expect("resolve");
        assert_eq!(config.duration, Duration::from_millis(DEFAULT_DURATION_MS));
    }

    #[test]
    fn missing_compose_file_is_reported_first() {
        let fixture = Fixture::new();
        let options = RunOptions {
            compose_file: Some(PathBuf::from("missing.yml")),
            ..RunOptions::default()
        };
        let err = fixture.resolve(options).expect_err("missing compose file");
        assert!(matches!(err, ConfigError::ComposeFileNotFound { .. }));
    }

    #[test]
    fn missing_required_options_are_fatal() {
        let fixture = Fixture::new();

        let mut options = fixture.options();
        options.plan = None;
        assert!(matches!(
            fixture.resolve(options),
            Err(ConfigError::MissingPlan)
        ));

        let mut options = fixture.options();
        options.project_name = Some("   ".to_string());
        assert!(matches!(
            fixture.resolve(options),
            Err(ConfigError::MissingProjectName)
        ));

        let mut options = fixture.options();
        options.command.clear();
        assert!(matches!(
            fixture.resolve(options),
            Err(ConfigError::MissingCommand)
        ));

        let mut options = fixture.options();
        options.plan = Some(PathBuf::from("nope.json"));
        assert!(matches!(
            fixture.resolve(options),
            Err(ConfigError::PlanNotFound { .. })
        ));
    }

    #[test]
    fn existing_log_path_is_rejected() {
        let fixture = Fixture::new();
        fs::create_dir(fixture.dir.path().join("logs")).expect("mkdir logs");

        let mut options = fixture.options();
        options.log_path = Some(PathBuf::from("logs"));
        let err = fixture.resolve(options).expect_err("existing log path");
        assert!(err.to_string().contains("already exists. Aborting"));
    }

    #[test]
    fn prepare_log_dir_creates_directory_once() {
        let fixture = Fixture::new();
        let mut options = fixture.options();
        options.log_path = Some(PathBuf::from("out/logs"));
        let config = fixture.resolve(options).expect("resolve");

        config.prepare_log_dir().expect("create log dir");
        assert!(config.log_path.is_dir());

        let err = config.prepare_log_dir().expect_err("second create");
        assert!(matches!(err, ConfigError::LogPathExists { .. }));
    }

    #[test]
    fn retry_and_deadline_options_are_carried() {
        let fixture = Fixture::new();
        let mut options = fixture.options();
        options.max_retries = Some(5);
        options.retry_backoff_ms = Some(250);
        options.deadline_policy = Some(DeadlinePolicy::Drain);
        options.compose_bin = Some("docker".to_string());

        let config = fixture.resolve(options).expect("resolve");
        assert_eq!(config.retry.max_retries, Some(5));
        assert_eq!(config.retry.backoff, Duration::from_millis(250));
        assert_eq!(config.deadline_policy, DeadlinePolicy::Drain);
        assert_eq!(config.compose_bin, "docker");
    }

    #[test]
    fn retry_policy_exhaustion() {
        assert!(!RetryPolicy::default().is_exhausted(u32::MAX));

        let capped = RetryPolicy {
            max_retries: Some(2),
            backoff: Duration::ZERO,
        };
        assert!(!capped.is_exhausted(1));
        assert!(capped.is_exhausted(2));
    }

    #[test]
    fn deadline_policy_parses_case_insensitively() {
        assert_eq!("Drain".parse::<DeadlinePolicy>().ok(), Some(DeadlinePolicy::Drain));
        assert_eq!(" abort ".parse::<DeadlinePolicy>().ok(), Some(DeadlinePolicy::Abort));

        let err = "later".parse::<DeadlinePolicy>().expect_err("unknown policy");
        assert!(err.to_string().contains("invalid deadline policy `later`"));
    }
}
