use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chaos_core::plan::ServiceScale;
use tokio::process::Command;

use crate::error::ComposeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Compose CLI invoker scoped by `--file` and `--project-name`.
///
/// `prefix_args` go between the binary and the project flags, which lets the
/// plugin form (`docker compose ...`) be used in place of `docker-compose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCli {
    pub binary: PathBuf,
    pub prefix_args: Vec<String>,
}

impl Default for ComposeCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(chaos_core::config::DEFAULT_COMPOSE_BIN),
            prefix_args: Vec::new(),
        }
    }
}

impl ComposeCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Builds a CLI from a whitespace-separated command such as `docker compose`.
    pub fn from_command_line(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(binary) => Self::new(binary).with_prefix_args(parts),
            None => Self::default(),
        }
    }

    pub fn project_args(&self, compose_file: &Path, project_name: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.prefix_args.iter().map(OsString::from).collect();
        args.push(OsString::from("--file"));
        args.push(compose_file.as_os_str().to_os_string());
        args.push(OsString::from("--project-name"));
        args.push(OsString::from(project_name));
        args
    }

    pub fn scale_args(
        &self,
        compose_file: &Path,
        project_name: &str,
        modifications: &[ServiceScale],
    ) -> Vec<OsString> {
        let mut args = self.project_args(compose_file, project_name);
        args.push(OsString::from("scale"));
        args.extend(
            modifications
                .iter()
                .map(|modification| OsString::from(modification.to_string())),
        );
        args
    }

    /// Human-readable scaling command. Every `service=count` token is
    /// followed by a space, so the rendering ends with one.
    pub fn render_scale_command(
        &self,
        compose_file: &Path,
        project_name: &str,
        modifications: &[ServiceScale],
    ) -> String {
        let mut rendered = render_command(&self.binary, &self.project_args(compose_file, project_name));
        rendered.push_str(" scale ");
        for modification in modifications {
            rendered.push_str(&modification.to_string());
            rendered.push(' ');
        }
        rendered
    }

    /// Scales every listed service in a single compose invocation.
    pub async fn scale(
        &self,
        compose_file: &Path,
        project_name: &str,
        modifications: &[ServiceScale],
    ) -> Result<ComposeOutput, ComposeError> {
        if modifications.is_empty() {
            return Err(ComposeError::ContractViolation {
                message: "scale requires at least one service=count pair".to_string(),
            });
        }

        let rendered = self.render_scale_command(compose_file, project_name, modifications);
        tracing::debug!(command = %rendered, "running compose scale");

        let output = self
            .command(self.scale_args(compose_file, project_name, modifications))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ComposeError::Io {
                command: rendered.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ComposeError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(ComposeOutput { stdout, stderr })
    }

    pub fn command(&self, args: Vec<OsString>) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command
    }

    pub fn render(&self, args: &[OsString]) -> String {
        render_command(&self.binary, args)
    }
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
