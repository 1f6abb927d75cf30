//! Continuous capture of compose project logs into a run directory.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Child;

use crate::command::ComposeCli;
use crate::error::ComposeError;

pub const COMPOSE_LOG_FILE: &str = "compose.log";
pub const COMPOSE_STDERR_LOG_FILE: &str = "compose.stderr.log";

/// A running `logs --follow` process whose output lands in the log directory.
///
/// The process is killed when the capture is stopped or dropped.
#[derive(Debug)]
pub struct LogCapture {
    child: Option<Child>,
    command: String,
    log_file: PathBuf,
    stderr_file: PathBuf,
}

impl LogCapture {
    /// Spawns the follower. Must be called from within a tokio runtime.
    pub fn start(
        cli: &ComposeCli,
        compose_file: &Path,
        project_name: &str,
        log_dir: &Path,
    ) -> Result<Self, ComposeError> {
        let log_file = log_dir.join(COMPOSE_LOG_FILE);
        let stderr_file = log_dir.join(COMPOSE_STDERR_LOG_FILE);
        let stdout = create_log_file(&log_file)?;
        let stderr = create_log_file(&stderr_file)?;

        let mut args = cli.project_args(compose_file, project_name);
        args.extend(["logs", "--follow", "--no-color"].map(OsString::from));
        let command = cli.render(&args);

        let child = cli
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ComposeError::Io {
                command: command.clone(),
                source,
            })?;

        tracing::info!(command = %command, log_file = %log_file.display(), "log capture started");

        Ok(Self {
            child: Some(child),
            command,
            log_file,
            stderr_file,
        })
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn stderr_file(&self) -> &Path {
        &self.stderr_file
    }

    /// Stops the follower. Only the first call does anything; later calls
    /// return `Ok(None)`.
    pub async fn stop(&mut self) -> Result<Option<ExitStatus>, ComposeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let io_err = |source: std::io::Error| ComposeError::Io {
            command: self.command.clone(),
            source,
        };

        if let Some(status) = child.try_wait().map_err(io_err)? {
            tracing::warn!(command = %self.command, ?status, "log capture had already exited");
            return Ok(Some(status));
        }

        child.start_kill().map_err(io_err)?;
        let status = child.wait().await.map_err(io_err)?;
        tracing::info!(log_file = %self.log_file.display(), "log capture stopped");
        Ok(Some(status))
    }
}

fn create_log_file(path: &Path) -> Result<File, ComposeError> {
    File::create(path).map_err(|source| ComposeError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}
