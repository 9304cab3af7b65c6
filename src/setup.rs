//! Project setup steps.
//!
//! A step runs one program, optionally inside a subdirectory of the root.
//! The subdirectory is entered with a scope guard, so the root is current
//! again before the next step whatever the step's outcome.

use serde::{Deserialize, Serialize};

use crate::config::{expand_vars, FailurePolicy};
use crate::driver::{settle, RunReport};
use crate::runner::{CommandLine, CommandRunner};
use crate::workdir::RunContext;
use crate::{plog, Result};

/// One program invocation during project setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStep {
    /// Directory to run in, relative to the root. `None` runs in the root.
    #[serde(default)]
    pub dir: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl SetupStep {
    pub fn new(dir: Option<&str>, program: &str, args: &[&str]) -> Self {
        Self {
            dir: dir.map(str::to_string),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn command_line(&self, ctx: &RunContext) -> Result<CommandLine> {
        let args = self
            .args
            .iter()
            .map(|a| expand_vars(a, ctx.env()))
            .collect::<Result<Vec<_>>>()?;
        Ok(CommandLine::new(expand_vars(&self.program, ctx.env())?).args(args))
    }
}

/// Bundled dependency setup, then native build generation in the root.
pub fn default_steps() -> Vec<SetupStep> {
    vec![
        SetupStep::new(Some("imported/sdlpp"), "python", &["setup.py"]),
        SetupStep::new(None, "cmake", &["-S", ".", "-B", "build"]),
    ]
}

/// Ordered setup steps sharing one runner and failure policy.
pub struct SetupPlan {
    steps: Vec<SetupStep>,
    runner: CommandRunner,
    policy: FailurePolicy,
}

impl SetupPlan {
    pub fn new(steps: Vec<SetupStep>) -> Self {
        Self {
            steps,
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

    pub fn steps(&self) -> &[SetupStep] {
        &self.steps
    }

    /// Run every step in order from the context's current directory.
    pub fn run(&self, ctx: &mut RunContext) -> Result<RunReport> {
        let mut report = RunReport::new();
        for step in &self.steps {
            let result = match &step.dir {
                Some(dir) => {
                    let dir = expand_vars(dir, ctx.env())?;
                    let guard = ctx.scoped(&dir)?;
                    let command = step.command_line(&guard)?;
                    let result = self.runner.run(&command, &guard);
                    guard.finish()?;
                    result
                }
                None => {
                    let command = step.command_line(ctx)?;
                    self.runner.run(&command, ctx)
                }
            };
            settle(self.policy, &mut report, result)?;
        }
        plog!(
            "Setup finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }
}
