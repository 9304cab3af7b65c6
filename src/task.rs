//! Declarative build tasks.
//!
//! A task turns one source file into one output file by invoking the
//! configured tool. Tasks carry no dependencies; their position in the
//! table is their execution order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{expand_vars, Toolchain};
use crate::runner::CommandLine;
use crate::workdir::RunContext;
use crate::{plog_debug, Result};

/// Built-in task table used when the manifest declares no tasks.
const BUILTIN_TASKS: &[(&str, &str, &str)] = &[
    (
        "Gui/BlitToSwapchain.vert",
        "Compiled/Gui/BlitToSwapchain.vert.inc",
        "-x",
    ),
    (
        "Gui/BlitToSwapchain.frag",
        "Compiled/Gui/BlitToSwapchain.frag.inc",
        "-x",
    ),
];

/// One source-to-output transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Input file, relative to the run root.
    pub source: String,
    /// File the tool writes, relative to the run root.
    pub output: String,
    /// Extra tool options, whitespace separated.
    #[serde(default)]
    pub options: String,
}

impl Task {
    pub fn new(source: &str, output: &str, options: &str) -> Self {
        Self {
            source: source.to_string(),
            output: output.to_string(),
            options: options.to_string(),
        }
    }

    /// Copy of this task with `${NAME}` references replaced from `env`.
    pub fn expand(&self, env: &BTreeMap<String, String>) -> Result<Task> {
        Ok(Task {
            source: expand_vars(&self.source, env)?,
            output: expand_vars(&self.output, env)?,
            options: expand_vars(&self.options, env)?,
        })
    }

    /// Parent directory of the output, if the output is not at the root.
    pub fn output_dir(&self) -> Option<&Path> {
        Path::new(&self.output)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Create the output's parent directory and any missing ancestors.
    ///
    /// Returns the directory that is now guaranteed to exist. Calling this
    /// again for the same task is a no-op.
    pub fn ensure_output_directory(&self, ctx: &RunContext) -> Result<Option<PathBuf>> {
        let Some(dir) = self.output_dir() else {
            return Ok(None);
        };
        let dir = ctx.resolve(dir);
        if !dir.is_dir() {
            plog_debug!("Creating output directory {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    }

    /// `<tool> <source> -o <output> <default options> <task options>`
    pub fn command_line(&self, toolchain: &Toolchain) -> CommandLine {
        CommandLine::new(toolchain.tool.to_string_lossy())
            .arg(self.source.as_str())
            .arg("-o")
            .arg(self.output.as_str())
            .args(toolchain.default_options.split_whitespace())
            .args(self.options.split_whitespace())
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.output)
    }
}

/// The built-in task table.
pub fn builtin_tasks() -> Vec<Task> {
    BUILTIN_TASKS
        .iter()
        .map(|(source, output, options)| Task::new(source, output, options))
        .collect()
}
