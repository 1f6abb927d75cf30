//! Runs the user's test command once and captures its result.

use std::path::Path;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;

use crate::command::TestCommand;
use crate::error::VerifyError;
use crate::types::{TestOutcome, TestRunResult};

/// Runs `command` to completion in `cwd`.
///
/// A non-zero exit is a `Failed` result, not an error; `Err` means the
/// process could not be started at all. The child is killed if the returned
/// future is dropped before it completes.
pub async fn run_test(command: &TestCommand, cwd: &Path) -> Result<TestRunResult, VerifyError> {
    let rendered = command.to_string();
    let started_at = Utc::now();

    let output = Command::new(&command.program)
        .args(&command.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| VerifyError::Io {
            command: rendered.clone(),
            source,
        })?;

    let outcome = if output.status.success() {
        TestOutcome::Passed
    } else {
        TestOutcome::Failed
    };

    Ok(TestRunResult {
        command: rendered,
        outcome,
        exit_code: output.status.code(),
        started_at,
        finished_at: Utc::now(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
