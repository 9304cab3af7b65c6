use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::setup::{default_steps, SetupStep};
use crate::task::{builtin_tasks, Task};
use crate::workdir::RunContext;
use crate::{plog_debug, Error, Result};

/// `${NAME}` references inside manifest strings.
static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// What to do when a task or step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and run the remaining tasks.
    #[default]
    Continue,
    /// Stop at the first failure.
    Abort,
}

/// Where the compiler lives and how it is always invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Environment variable naming the toolchain root.
    pub env_var: String,
    /// Tool path relative to the toolchain root.
    pub tool: String,
    /// Options passed to every task before the task's own options.
    pub default_options: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            env_var: "VULKAN_SDK".to_string(),
            tool: "Bin/glslang".to_string(),
            default_options: "-V".to_string(),
        }
    }
}

/// A resolved toolchain, ready to build command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub tool: PathBuf,
    pub default_options: String,
}

impl ToolchainConfig {
    /// Resolve the tool path from the context environment.
    ///
    /// Fails with [`Error::Configuration`] when the root variable is unset
    /// or empty.
    pub fn resolve(&self, ctx: &RunContext) -> Result<Toolchain> {
        let root = match ctx.env_var(&self.env_var).filter(|v| !v.is_empty()) {
            Some(root) => root,
            None if ctx.is_non_unicode(&self.env_var) => {
                return Err(Error::Configuration(format!(
                    "environment variable {} is not valid UTF-8; it must point at the toolchain root",
                    self.env_var
                )))
            }
            None => {
                return Err(Error::Configuration(format!(
                    "environment variable {} is not set; it must point at the toolchain root",
                    self.env_var
                )))
            }
        };
        let tool = Path::new(root).join(&self.tool);
        plog_debug!("Toolchain resolved: {}", tool.display());
        Ok(Toolchain {
            tool,
            default_options: self.default_options.clone(),
        })
    }
}

/// Contents of a `prepkit.toml` manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub steps: Vec<SetupStep>,
}

impl Config {
    pub const FILE_NAME: &'static str = "prepkit.toml";

    pub fn load(path: &Path) -> Result<Self> {
        plog_debug!("Config::load path={}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&contents)?;
        plog_debug!(
            "Config loaded: policy={:?}, timeout={:?}, tasks={}, steps={}",
            config.failure_policy,
            config.timeout_secs,
            config.tasks.len(),
            config.steps.len()
        );
        Ok(config)
    }

    /// Load `path` if given, else `prepkit.toml` in `dir` if present,
    /// else the built-in defaults.
    pub fn discover(path: Option<&Path>, dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = path {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let candidate = dir.join(Self::FILE_NAME);
        if candidate.is_file() {
            return Ok((Self::load(&candidate)?, Some(candidate)));
        }
        plog_debug!("No manifest found, using defaults");
        Ok((Self::default(), None))
    }

    /// Tasks declared in the manifest, or the built-in table.
    pub fn effective_tasks(&self) -> Vec<Task> {
        if self.tasks.is_empty() {
            builtin_tasks()
        } else {
            self.tasks.clone()
        }
    }

    /// Steps declared in the manifest, or the default setup sequence.
    pub fn effective_steps(&self) -> Vec<SetupStep> {
        if self.steps.is_empty() {
            default_steps()
        } else {
            self.steps.clone()
        }
    }

    /// Per-command timeout; `timeout_secs = 0` means none.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Replace every `${NAME}` in `input` with its value from `env`.
pub fn expand_vars(input: &str, env: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in VAR_RE.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env.get(name.as_str()).ok_or_else(|| {
            Error::Configuration(format!("environment variable {} is not set", name.as_str()))
        })?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
