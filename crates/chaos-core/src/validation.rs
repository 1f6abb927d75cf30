//! Non-fatal and fatal checks on a resolved run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::RunConfig;
use crate::plan::ChaosPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for RunConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.project_name.chars().any(char::is_whitespace) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "project_name.whitespace",
                message: format!(
                    "project name `{}` contains whitespace and cannot be passed to compose",
                    self.project_name
                ),
            });
        }

        if self.retry.max_retries == Some(0) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "retry.max_retries.zero",
                message: "max retries of 0 would skip every failed test run".to_string(),
            });
        }

        if self.retry.max_retries.is_none() && !self.retry.backoff.is_zero() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "retry.backoff.uncapped",
                message: "retry backoff is set without a retry cap; failing tests retry forever"
                    .to_string(),
            });
        }

        if self.duration < Duration::from_secs(1) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "duration.short",
                message: format!(
                    "run duration {}ms is shorter than a typical test run",
                    self.duration.as_millis()
                ),
            });
        }

        issues
    }
}

impl Validate for ChaosPlan {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for scenario in self.scenarios() {
            if !seen.insert(scenario.name()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "plan.scenario.duplicate_name",
                    message: format!(
                        "scenario name `{}` is used more than once; progress logs will be ambiguous",
                        scenario.name()
                    ),
                });
            }

            let mut services = HashSet::new();
            for modification in scenario.modifications() {
                if !services.insert(modification.service.as_str()) {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Warning,
                        code: "plan.scenario.duplicate_service",
                        message: format!(
                            "scenario `{}` scales `{}` more than once; compose keeps the last value",
                            scenario.name(),
                            modification.service
                        ),
                    });
                }
            }
        }

        if self.len() == 1 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "plan.single_scenario",
                message: "plan has a single scenario; it is re-applied after every passing run"
                    .to_string(),
            });
        }

        issues
    }
}

/// Errors only, rendered as `code: message` pairs joined by `; `.
pub fn render_errors(issues: &[ValidationIssue]) -> Option<String> {
    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}
