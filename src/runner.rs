//! External command execution.
//!
//! Commands are argument vectors, never shell strings. The runner spawns one
//! child at a time under a [`RunContext`], inherits stdout/stderr and waits
//! for it. A non-zero exit is reported in the [`CommandResult`], not raised;
//! the caller decides what a failure means.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::workdir::RunContext;
use crate::{plog, plog_debug, plog_trace, plog_warn, Error, Result};

/// How often a child is polled while a timeout is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_escape(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_escape(arg))?;
        }
        Ok(())
    }
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Outcome {
    /// The process exited with a status code.
    Exited { code: i32 },
    /// The process was terminated by a signal.
    Signaled,
    /// The process could not be started.
    SpawnFailed { error: String },
    /// The process outlived the runner's timeout and was killed.
    TimedOut { after: Duration },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Exited { code } => write!(f, "exit code {}", code),
            Outcome::Signaled => write!(f, "terminated by signal"),
            Outcome::SpawnFailed { error } => write!(f, "failed to start: {}", error),
            Outcome::TimedOut { after } => write!(f, "timed out after {:?}", after),
        }
    }
}

/// Result of one external process invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    /// The command line as it was displayed before execution.
    pub command: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Exited { code: 0 })
    }

    pub fn code(&self) -> Option<i32> {
        match self.outcome {
            Outcome::Exited { code } => Some(code),
            _ => None,
        }
    }

    /// Description of the failure, `None` on success.
    pub fn failure(&self) -> Option<String> {
        if self.success() {
            None
        } else {
            Some(self.outcome.to_string())
        }
    }

    /// Promote a failed result into an error.
    pub fn into_result(self) -> Result<CommandResult> {
        if self.success() {
            return Ok(self);
        }
        match self.outcome {
            Outcome::TimedOut { after } => Err(Error::Timeout(after)),
            outcome => Err(Error::CommandFailure {
                status: outcome.to_string(),
                command: self.command,
            }),
        }
    }
}

/// Synchronous command runner.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Runner that waits for every child indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that kills children still running after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `command` in the context's directory with the context's environment.
    pub fn run(&self, command: &CommandLine, ctx: &RunContext) -> CommandResult {
        let display = command.to_string();
        println!("Execute: {}", display);
        plog!("Execute: {}", display);
        plog_trace!(
            "cwd={} env_vars={}",
            ctx.current_dir().display(),
            ctx.env().len()
        );

        let start = Instant::now();
        let outcome = match self.spawn(command, ctx) {
            Ok(mut child) => match wait(&mut child, self.timeout) {
                Ok(Some(status)) => outcome_of(status),
                Ok(None) => Outcome::TimedOut {
                    after: self.timeout.unwrap_or_default(),
                },
                Err(e) => Outcome::SpawnFailed {
                    error: e.to_string(),
                },
            },
            Err(error) => Outcome::SpawnFailed { error },
        };

        let result = CommandResult {
            command: display,
            outcome,
            duration: start.elapsed(),
        };
        if result.success() {
            plog_debug!("Command finished in {:?}", result.duration);
        } else {
            plog_warn!("Command {}: {}", result.outcome, result.command);
        }
        result
    }

    fn spawn(&self, command: &CommandLine, ctx: &RunContext) -> std::result::Result<Child, String> {
        let program = resolve_program(&command.program, ctx)?;
        plog_debug!("Resolved {} -> {}", command.program, program.display());
        Command::new(&program)
            .args(&command.args)
            .current_dir(ctx.current_dir())
            .env_clear()
            .envs(ctx.env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| format!("{}: {}", program.display(), e))
    }
}

/// Bare names are looked up on the context's `PATH`; anything with a path
/// separator is taken relative to the context's directory.
fn resolve_program(program: &str, ctx: &RunContext) -> std::result::Result<PathBuf, String> {
    if program.is_empty() {
        return Err("empty program name".to_string());
    }
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(ctx.resolve(path));
    }
    which::which_in(program, ctx.env_var("PATH"), ctx.current_dir())
        .map_err(|_| format!("{} not found on PATH", program))
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<Option<ExitStatus>> {
    let Some(limit) = timeout else {
        return child.wait().map(Some);
    };
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn outcome_of(status: ExitStatus) -> Outcome {
    match status.code() {
        Some(code) => Outcome::Exited { code },
        None => Outcome::Signaled,
    }
}

fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | '+' | ','))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
