//! Chaos plan model and plan-file loading.
//!
//! A plan is an ordered, non-empty list of scenarios. Each scenario is an
//! ordered list of `service=replicas` pairs that are applied in one scaling
//! call. Plans are read once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read plan file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse json plan: {source}")]
    ParseJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse toml plan: {source}")]
    ParseToml {
        #[source]
        source: toml::de::Error,
    },
    #[error("chaos plan must contain at least one scenario")]
    Empty,
    #[error("scenario `{scenario}` has no modifications")]
    EmptyScenario { scenario: String },
    #[error(
        "scenario `{scenario}` modification #{index} must map exactly one service to a replica count (found {keys} keys)"
    )]
    InvalidModification {
        scenario: String,
        index: usize,
        keys: usize,
    },
    #[error("scenario `{scenario}` has a modification with an empty service name")]
    EmptyServiceName { scenario: String },
}

/// Desired replica count for one compose service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceScale {
    pub service: String,
    pub replicas: u32,
}

impl ServiceScale {
    pub fn new(service: impl Into<String>, replicas: u32) -> Self {
        Self {
            service: service.into(),
            replicas,
        }
    }
}

impl fmt::Display for ServiceScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.service, self.replicas)
    }
}

/// A named set of scaling changes applied together.
/// Only built through [`Scenario::new`], so it is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    name: String,
    modifications: Vec<ServiceScale>,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        modifications: Vec<ServiceScale>,
    ) -> Result<Self, PlanError> {
        let name = name.into();
        if modifications.is_empty() {
            return Err(PlanError::EmptyScenario { scenario: name });
        }
        if modifications
            .iter()
            .any(|modification| modification.service.trim().is_empty())
        {
            return Err(PlanError::EmptyServiceName { scenario: name });
        }
        Ok(Self {
            name,
            modifications,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modifications(&self) -> &[ServiceScale] {
        &self.modifications
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.name)?;
        for (idx, modification) in self.modifications.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{modification}")?;
        }
        f.write_str(")")
    }
}

/// Ordered, immutable, non-empty sequence of scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChaosPlan {
    scenarios: Vec<Scenario>,
}

impl ChaosPlan {
    pub fn new(scenarios: Vec<Scenario>) -> Result<Self, PlanError> {
        if scenarios.is_empty() {
            return Err(PlanError::Empty);
        }
        Ok(Self { scenarios })
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn get(&self, index: usize) -> Option<&Scenario> {
        self.scenarios.get(index)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Always false: [`ChaosPlan::new`] is the only constructor.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Json,
    Toml,
}

impl PlanFormat {
    /// `.toml` files are read as TOML, everything else as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => PlanFormat::Toml,
            _ => PlanFormat::Json,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    scenarios: Vec<ScenarioFile>,
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    name: Option<String>,
    modifications: Vec<BTreeMap<String, u32>>,
}

pub fn parse_plan(contents: &str, format: PlanFormat) -> Result<ChaosPlan, PlanError> {
    let raw: PlanFile = match format {
        PlanFormat::Json => {
            serde_json::from_str(contents).map_err(|source| PlanError::ParseJson { source })?
        }
        PlanFormat::Toml => {
            toml::from_str(contents).map_err(|source| PlanError::ParseToml { source })?
        }
    };

    let scenarios = raw
        .scenarios
        .into_iter()
        .enumerate()
        .map(|(idx, scenario)| scenario_from_file(idx, scenario))
        .collect::<Result<Vec<_>, _>>()?;

    ChaosPlan::new(scenarios)
}

pub fn load_plan(path: impl AsRef<Path>) -> Result<ChaosPlan, PlanError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| PlanError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_plan(&body, PlanFormat::from_path(path_ref))
}

fn scenario_from_file(idx: usize, raw: ScenarioFile) -> Result<Scenario, PlanError> {
    let name = raw
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("scenario-{}", idx + 1));

    let mut modifications = Vec::with_capacity(raw.modifications.len());
    for (index, entry) in raw.modifications.into_iter().enumerate() {
        if entry.len() != 1 {
            return Err(PlanError::InvalidModification {
                scenario: name,
                index,
                keys: entry.len(),
            });
        }
        modifications.extend(
            entry
                .into_iter()
                .map(|(service, replicas)| ServiceScale::new(service, replicas)),
        );
    }

    Scenario::new(name, modifications)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JSON_PLAN: &str = r#"
{
  "scenarios": [
    { "name": "api-down", "modifications": [ { "api": 0 } ] },
    { "name": "api-up", "modifications": [ { "api": 3 }, { "db": 1 } ] }
  ]
}
"#;

    #[test]
    fn parses_json_plan_in_file_order() {
        let plan = parse_plan(JSON_PLAN, PlanFormat::Json).expect("parse plan");

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.scenarios()[0].name(), "api-down");
        assert_eq!(
            plan.scenarios()[1].modifications(),
            &[ServiceScale::new("api", 3), ServiceScale::new("db", 1)]
        );
    }

    #[test]
    fn parses_toml_plan_and_defaults_missing_names() {
        let plan = parse_plan(
            r#"
[[scenarios]]
modifications = [ { web = 0 } ]

[[scenarios]]
name = "  "
modifications = [ { web = 2 }, { worker = 4 } ]
"#,
            PlanFormat::Toml,
        )
        .expect("parse toml plan");

        assert_eq!(plan.scenarios()[0].name(), "scenario-1");
        assert_eq!(plan.scenarios()[1].name(), "scenario-2");
        assert_eq!(plan.scenarios()[1].to_string(), "scenario-2 (web=2 worker=4)");
    }

    #[test]
    fn rejects_empty_plan() {
        let err = parse_plan(r#"{ "scenarios": [] }"#, PlanFormat::Json)
            .expect_err("empty plan must fail");
        assert!(matches!(err, PlanError::Empty));

        assert!(matches!(ChaosPlan::new(Vec::new()), Err(PlanError::Empty)));
    }

    #[test]
    fn rejects_multi_key_and_empty_modifications() {
        let err = parse_plan(
            r#"{ "scenarios": [ { "name": "bad", "modifications": [ { "a": 1, "b": 2 } ] } ] }"#,
            PlanFormat::Json,
        )
        .expect_err("two keys in one modification");
        assert!(matches!(
            err,
            PlanError::InvalidModification { index: 0, keys: 2, .. }
        ));

        let err = parse_plan(
            r#"{ "scenarios": [ { "name": "none", "modifications": [] } ] }"#,
            PlanFormat::Json,
        )
        .expect_err("scenario without modifications");
        assert!(err.to_string().contains("scenario `none` has no modifications"));
    }

    #[test]
    fn rejects_blank_service_names() {
        let err = Scenario::new("blank", vec![ServiceScale::new(" ", 1)])
            .expect_err("blank service");
        assert!(matches!(err, PlanError::EmptyServiceName { .. }));
    }

    #[test]
    fn negative_replica_counts_fail_to_parse() {
        let err = parse_plan(
            r#"{ "scenarios": [ { "modifications": [ { "api": -1 } ] } ] }"#,
            PlanFormat::Json,
        )
        .expect_err("negative replicas");
        assert!(matches!(err, PlanError::ParseJson { .. }));
    }

    #[test]
    fn format_is_picked_from_extension() {
        assert_eq!(PlanFormat::from_path(Path::new("plan.toml")), PlanFormat::Toml);
        assert_eq!(PlanFormat::from_path(Path::new("plan.TOML")), PlanFormat::Toml);
        assert_eq!(PlanFormat::from_path(Path::new("plan.json")), PlanFormat::Json);
        assert_eq!(PlanFormat::from_path(Path::new("plan")), PlanFormat::Json);
    }

    #[test]
    fn load_plan_reads_file_and_reports_missing_path() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tempfile");
        file.write_all(JSON_PLAN.as_bytes()).expect("write plan");

        let plan = load_plan(file.path()).expect("load plan");
        assert_eq!(plan.len(), 2);

        let err = load_plan("/definitely/missing/plan.json").expect_err("missing file");
        assert!(matches!(err, PlanError::Read { .. }));
    }
}
