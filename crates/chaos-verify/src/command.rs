use std::fmt;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::error::VerifyError;

/// A test program and its arguments, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl TestCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for TestCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Splits a command line on whitespace, then resolves it like
/// [`resolve_test_command`].
pub fn parse_test_command(command_line: &str, cwd: &Path) -> Result<TestCommand, VerifyError> {
    let argv = command_line
        .split_whitespace()
        .map(str::to_string)
        .collect::<Vec<_>>();
    resolve_test_command(&argv, cwd)
}

/// Builds a command from an argv: the first entry is the program, the rest
/// are passed through untouched.
///
/// A program given as a path (it contains a separator) is canonicalized
/// against `cwd` and must exist; a bare name is left for `PATH` lookup.
pub fn resolve_test_command(argv: &[String], cwd: &Path) -> Result<TestCommand, VerifyError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(VerifyError::InvalidCommand {
            message: "command line is empty".to_string(),
        });
    };
    let program = program.trim();
    if program.is_empty() {
        return Err(VerifyError::InvalidCommand {
            message: "program name is empty".to_string(),
        });
    }
    let args = args.to_vec();

    if !program.contains(MAIN_SEPARATOR) && !program.contains('/') {
        return Ok(TestCommand::new(program, args));
    }

    let candidate = cwd.join(program);
    let resolved = fs::canonicalize(&candidate).map_err(|source| VerifyError::ProgramNotFound {
        path: candidate.clone(),
        source,
    })?;
    Ok(TestCommand::new(resolved, args))
}
