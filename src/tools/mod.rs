//! External tool invocation
//!
//! Every external collaborator (git, patch, make, zip, setup scripts) is
//! driven through the `CommandRunner` trait so the pipeline can be exercised
//! without touching the host:
//! - `ProcessRunner`: spawns real processes
//! - `MockRunner`: scripted, in-process responses for tests

mod mock;

pub use mock::MockRunner;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A single external command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// When set, stdout and stderr are appended to this file instead of captured
    pub log: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            log: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(path.into());
        self
    }

    /// True when any argument equals `needle`
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of a finished external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None when terminated by a signal)
    pub status: Option<i32>,
    /// Captured stdout (empty when the invocation logged to a file)
    pub stdout: String,
    /// Captured stderr (empty when the invocation logged to a file)
    pub stderr: String,
}

impl CommandOutput {
    /// A zero exit with no output
    pub fn ok() -> Self {
        Self {
            status: Some(0),
            ..Default::default()
        }
    }

    /// A non-zero exit with `stderr`
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Exit status is the only success signal
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Short description of the exit status for log messages
    pub fn describe_status(&self) -> String {
        match self.status {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Errors launching an external command
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{program}: not found")]
    NotFound { program: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Runs external commands
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return the exit status and any captured output.
    ///
    /// A non-zero exit is not an error; only failing to launch is.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ToolError>;
}

/// Runner backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn open_log(path: &Path) -> Result<File, ToolError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ToolError::Log {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ToolError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdin(Stdio::null());
        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }

        let spawn_error = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                ToolError::NotFound {
                    program: invocation.program.clone(),
                }
            } else {
                ToolError::Spawn {
                    program: invocation.program.clone(),
                    source,
                }
            }
        };

        tracing::debug!(command = %invocation, "running");

        if let Some(ref log_path) = invocation.log {
            let stdout = Self::open_log(log_path)?;
            let stderr = stdout.try_clone().map_err(|source| ToolError::Log {
                path: log_path.clone(),
                source,
            })?;
            let status = cmd
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(stderr))
                .status()
                .map_err(spawn_error)?;
            return Ok(CommandOutput {
                status: status.code(),
                ..Default::default()
            });
        }

        let output = cmd.output().map_err(spawn_error)?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Append-only transcript of captured command output
///
/// Truncated once per run by `Transcript::create`, appended to afterwards.
#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    /// Create (or truncate) the transcript file
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        File::create(&path)?;
        Ok(Self { path })
    }

    /// Open an existing transcript for appending, creating it if needed
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a free-form note
    pub fn note(&self, message: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "# {}", message)
    }

    /// Append the command line, its status and captured output
    pub fn record(&self, invocation: &Invocation, output: &CommandOutput) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "$ {}", invocation)?;
        if !output.stdout.is_empty() {
            file.write_all(output.stdout.as_bytes())?;
            if !output.stdout.ends_with('\n') {
                writeln!(file)?;
            }
        }
        if !output.stderr.is_empty() {
            file.write_all(output.stderr.as_bytes())?;
            if !output.stderr.ends_with('\n') {
                writeln!(file)?;
            }
        }
        writeln!(file, "# {}", output.describe_status())
    }
}
