use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("compose command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("compose command returned non-zero exit ({command}) status={status:?}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("compose contract violation: {message}")]
    ContractViolation { message: String },
    #[error("failed to open compose log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ComposeError {
    /// Captured `(stdout, stderr)` of a compose process that ran and failed.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            ComposeError::CommandFailed { stdout, stderr, .. } => {
                Some((stdout.as_str(), stderr.as_str()))
            }
            _ => None,
        }
    }
}
