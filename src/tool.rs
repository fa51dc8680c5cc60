use anyhow::{Context, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// A single external program call, fully described before it runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Replacement `PATH` for the child only.
    #[serde(skip)]
    pub search_path: Option<OsString>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>, cwd: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            search_path: None,
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

    pub fn with_search_path(mut self, search_path: OsString) -> Self {
        self.search_path = Some(search_path);
        self
    }

    /// Shell-like rendering for dry runs and logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{}\"", part)
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ToolExit {
    Success,
    Failed { code: i32 },
    Killed,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        matches!(self, ToolExit::Success)
    }
}

impl From<ExitStatus> for ToolExit {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ToolExit::Success,
            Some(code) => ToolExit::Failed { code },
            None => ToolExit::Killed,
        }
    }
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolExit::Success => write!(f, "exit code 0"),
            ToolExit::Failed { code } => write!(f, "exit code {}", code),
            ToolExit::Killed => write!(f, "terminated by signal"),
        }
    }
}

/// Seam between orchestration and process spawning.
pub trait ToolRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolExit>;
}

/// Spawns real child processes and blocks until they exit.
pub struct ProcessRunner {
    /// Forward child stdout to our stderr so stdout stays machine-readable.
    pub stdout_to_stderr: bool,
}

impl ProcessRunner {
    pub fn new(stdout_to_stderr: bool) -> Self {
        Self { stdout_to_stderr }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&mut self, invocation: &ToolInvocation) -> Result<ToolExit> {
        log::info!("running {}", invocation.command_line());
        log::debug!("working directory: {}", invocation.cwd.display());

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(search_path) = &invocation.search_path {
            command.env("PATH", search_path);
        }

        let spawn_context = || {
            format!(
                "failed to run {} in {}",
                invocation.program.display(),
                invocation.cwd.display()
            )
        };

        let status = if self.stdout_to_stderr {
            let output = command
                .stdout(Stdio::piped())
                .output()
                .with_context(spawn_context)?;
            std::io::stderr()
                .write_all(&output.stdout)
                .context("failed to forward tool output")?;
            output.status
        } else {
            command
                .stdout(Stdio::inherit())
                .status()
                .with_context(spawn_context)?
        };

        let exit = ToolExit::from(status);
        log::debug!("{} finished with {}", invocation.program.display(), exit);
        Ok(exit)
    }
}

/// Prefer a program that lives in `dir`, falling back to a bare name lookup.
pub fn resolve_program(dir: &Path, name: &str) -> PathBuf {
    let direct = dir.join(name);
    if direct.is_file() {
        return direct;
    }
    let suffix = std::env::consts::EXE_SUFFIX;
    if !suffix.is_empty() {
        let with_suffix = dir.join(format!("{}{}", name, suffix));
        if with_suffix.is_file() {
            return with_suffix;
        }
    }
    PathBuf::from(name)
}
