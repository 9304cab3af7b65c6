//! Task driver and the top-level run sequence.
//!
//! A run enters the root directory, executes every task in order and
//! restores the directory it started from, whether or not a step failed.

use std::path::Path;

use serde::Serialize;

use crate::config::{FailurePolicy, Toolchain};
use crate::runner::{CommandLine, CommandResult, CommandRunner};
use crate::task::Task;
use crate::workdir::RunContext;
use crate::{plog, plog_debug, plog_warn, Result};

/// Results of one driver run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<CommandResult>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: CommandResult) {
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Failed results, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| !r.success())
    }
}

/// Record `result` and apply the failure policy to it.
pub(crate) fn settle(
    policy: FailurePolicy,
    report: &mut RunReport,
    result: CommandResult,
) -> Result<()> {
    report.push(result.clone());
    if result.success() {
        return Ok(());
    }
    match policy {
        FailurePolicy::Continue => {
            plog_warn!("Continuing after failure: {}", result.command);
            Ok(())
        }
        FailurePolicy::Abort => result.into_result().map(|_| ()),
    }
}

/// Executes an ordered task table with one toolchain.
pub struct Driver {
    tasks: Vec<Task>,
    toolchain: Toolchain,
    runner: CommandRunner,
    policy: FailurePolicy,
}

impl Driver {
    pub fn new(tasks: Vec<Task>, toolchain: Toolchain) -> Self {
        Self {
            tasks,
            toolchain,
            runner: CommandRunner::new(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Command line for `task` after `${NAME}` expansion.
    pub fn command_line(&self, task: &Task, ctx: &RunContext) -> Result<CommandLine> {
        Ok(task.expand(ctx.env())?.command_line(&self.toolchain))
    }

    /// Run every task in declared order.
    ///
    /// Each task's output directory is created before its tool runs. Under
    /// [`FailurePolicy::Continue`] failed tasks are recorded and the loop
    /// goes on; under [`FailurePolicy::Abort`] the first failure is returned.
    pub fn execute_all(&self, ctx: &RunContext) -> Result<RunReport> {
        plog!(
            "Executing {} tasks in {}",
            self.tasks.len(),
            ctx.current_dir().display()
        );
        let mut report = RunReport::new();
        for (index, task) in self.tasks.iter().enumerate() {
            plog_debug!("Task {}: {}", index, task);
            let task = task.expand(ctx.env())?;
            task.ensure_output_directory(ctx)?;
            let result = self.runner.run(&task.command_line(&self.toolchain), ctx);
            settle(self.policy, &mut report, result)?;
        }
        plog!(
            "Tasks finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }
}

/// Remove every task's output file, then the output directories left empty.
///
/// Every output must lie inside the current directory; the whole table is
/// checked before anything is deleted. Returns how many files were removed.
pub fn clean_outputs(tasks: &[Task], ctx: &RunContext) -> Result<usize> {
    let tasks = tasks
        .iter()
        .map(|task| task.expand(ctx.env()))
        .collect::<Result<Vec<_>>>()?;
    for task in &tasks {
        ctx.resolve_within(&task.output)?;
    }

    let mut removed = 0;
    for task in &tasks {
        if ctx.remove_file(&task.output)? {
            removed += 1;
        }
        if let Some(dir) = task.output_dir() {
            ctx.prune_empty_dirs(dir)?;
        }
    }
    Ok(removed)
}

/// Enter `root`, run `body`, then restore the starting directory.
///
/// The directory is restored on both success and failure. An error from
/// `body` takes precedence over an error while restoring.
pub fn run_in_root<T, F>(ctx: &mut RunContext, root: &Path, body: F) -> Result<T>
where
    F: FnOnce(&mut RunContext) -> Result<T>,
{
    let mut guard = ctx.scoped(root)?;
    let outcome = body(&mut *guard);
    let restored = guard.finish();
    let value = outcome?;
    restored?;
    Ok(value)
}
