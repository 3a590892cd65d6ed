// src/error.rs
//
// Error taxonomy for a regression invocation.
//
// - ConfigError: bad inputs detected before (or instead of) running anything.
// - ExecError:   a compile/sim/cov command failed, timed out or could not start.
// - TraceError:  a trace tool failed for a single run (recoverable, see compare.rs).
//
// ConfigError, ExecError and report write failures are fatal to the whole
// invocation and travel up through RegressError. TraceError never leaves the
// run comparator.

use std::path::{Path, PathBuf};

/// Configuration problems. Fatal; reported before any further work is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The compile/generation phase did not produce a binary we need.
    MissingBinary {
        test: String,
        iteration: u32,
        path: PathBuf,
    },
    /// `--lsf_cmd ""` was given. Distinct from not asking for a queue at all.
    EmptyQueuePrefix,
    /// No entry for the requested tool in the simulator setup file.
    UnknownSimulator { tool: String, path: String },
    /// Coverage merging is only implemented for some tools.
    UnsupportedCoverageTool { tool: String },
    /// An entry in `--steps` that we don't know how to run.
    UnknownStep { step: String },
    /// `--test` named something that is not in the test list.
    UnknownTest { test: String },
    /// The simulator setup asked for an environment variable that is not set.
    MissingEnvVar { name: String },
    /// A step was enabled without one of the inputs it needs.
    MissingInput { step: String, input: String },
    IoError { path: String, source: String },
    ParseError { path: String, source: String },
    ValidationError { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        ConfigError::IoError {
            path: path.display().to_string(),
            source: err.to_string(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingBinary {
                test,
                iteration,
                path,
            } => write!(
                f,
                "When computing simulation command for running iteration {} of test {}, \
                 cannot find the expected binary at '{}'.",
                iteration,
                test,
                path.display()
            ),
            ConfigError::EmptyQueuePrefix => {
                write!(f, "The LSF command passed in is an empty string.")
            }
            ConfigError::UnknownSimulator { tool, path } => {
                write!(f, "Cannot find RTL simulator '{}' in '{}'", tool, path)
            }
            ConfigError::UnsupportedCoverageTool { tool } => {
                write!(f, "{} is an unsupported simulator for coverage merging", tool)
            }
            ConfigError::UnknownStep { step } => {
                write!(
                    f,
                    "Unknown step '{}' (expected 'all' or a comma-separated list of \
                     compile, sim, compare, cov)",
                    step
                )
            }
            ConfigError::UnknownTest { test } => {
                write!(f, "Test '{}' is not in the test list", test)
            }
            ConfigError::MissingEnvVar { name } => {
                write!(f, "Environment variable '{}' is required but not set", name)
            }
            ConfigError::MissingInput { step, input } => {
                write!(f, "Step '{}' requires {}", step, input)
            }
            ConfigError::IoError { path, source } => {
                write!(f, "Failed to read '{}': {}", path, source)
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Failed to parse YAML '{}': {}", path, source)
            }
            ConfigError::ValidationError { field, message } => {
                write!(f, "Validation error in '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Execution failures. Fatal; no partial results are salvaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Creating a working directory failed.
    IoError { path: String, source: String },
    /// The shell could not be started.
    SpawnError { desc: String, source: String },
    /// Nonzero exit (`code` is None when killed by a signal).
    CommandFailed {
        desc: String,
        code: Option<i32>,
        log_tail: Vec<String>,
    },
    /// Still running when the deadline passed; the process has been killed.
    Timeout { desc: String, timeout_secs: u64 },
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::IoError { path, source } => {
                write!(f, "Failed to create working directory '{}': {}", path, source)
            }
            ExecError::SpawnError { desc, source } => {
                write!(f, "Failed to start '{}': {}", desc, source)
            }
            ExecError::CommandFailed {
                desc,
                code,
                log_tail,
            } => {
                let status = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                write!(f, "Command '{}' exited with status {}", desc, status)?;
                for line in log_tail {
                    write!(f, "\n  | {}", line)?;
                }
                Ok(())
            }
            ExecError::Timeout { desc, timeout_secs } => {
                write!(f, "Command '{}' timed out after {}s", desc, timeout_secs)
            }
        }
    }
}

impl std::error::Error for ExecError {}

/// A trace normalizer or the trace diff could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    MissingLog { path: String },
    ToolFailed { tool: String, message: String },
    MissingOutput { tool: String, path: String },
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::MissingLog { path } => write!(f, "log file not found: {}", path),
            TraceError::ToolFailed { tool, message } => write!(f, "{} failed: {}", tool, message),
            TraceError::MissingOutput { tool, path } => {
                write!(f, "{} did not produce {}", tool, path)
            }
        }
    }
}

impl std::error::Error for TraceError {}

/// Anything that aborts a regression invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegressError {
    Config(ConfigError),
    Exec(ExecError),
    /// The shared report (or its JSON summary) could not be written.
    Report { path: String, source: String },
}

impl std::fmt::Display for RegressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegressError::Config(e) => write!(f, "{}", e),
            RegressError::Exec(e) => write!(f, "{}", e),
            RegressError::Report { path, source } => {
                write!(f, "Failed to write report '{}': {}", path, source)
            }
        }
    }
}

impl std::error::Error for RegressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegressError::Config(e) => Some(e),
            RegressError::Exec(e) => Some(e),
            RegressError::Report { .. } => None,
        }
    }
}

impl From<ConfigError> for RegressError {
    fn from(e: ConfigError) -> Self {
        RegressError::Config(e)
    }
}

impl From<ExecError> for RegressError {
    fn from(e: ExecError) -> Self {
        RegressError::Exec(e)
    }
}
