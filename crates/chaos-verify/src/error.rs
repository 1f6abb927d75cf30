use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid test command: {message}")]
    InvalidCommand { message: String },
    #[error("test program {path} could not be resolved: {source}")]
    ProgramNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("test command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
