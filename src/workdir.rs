//! Working-directory management.
//!
//! A [`RunContext`] carries the current directory, a stack of previously
//! visited directories and the environment handed to spawned commands.
//! Directory changes go through the context instead of a hidden global, so
//! a detached context can be driven from tests without touching the
//! process-wide working directory.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Component, Path, PathBuf};

use crate::{plog, plog_debug, plog_error, plog_trace, plog_warn, Error, Result};

/// LIFO stack of absolute directories remembered by [`RunContext::enter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryStack {
    entries: Vec<PathBuf>,
}

impl DirectoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dir: PathBuf) {
        self.entries.push(dir);
    }

    pub fn pop(&mut self) -> Option<PathBuf> {
        self.entries.pop()
    }

    pub fn peek(&self) -> Option<&Path> {
        self.entries.last().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether directory changes are applied to the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirMode {
    /// Every change also calls `std::env::set_current_dir`.
    Process,
    /// Changes are tracked only inside the context.
    Detached,
}

/// Directory and environment state threaded through one orchestration run.
#[derive(Debug, Clone)]
pub struct RunContext {
    current: PathBuf,
    stack: DirectoryStack,
    env: BTreeMap<String, String>,
    // Process variables left out of `env` because key or value is not UTF-8.
    non_unicode: BTreeSet<String>,
    mode: DirMode,
}

impl RunContext {
    /// Context bound to the process working directory and environment.
    pub fn from_process() -> Result<Self> {
        let current = std::env::current_dir()?;
        plog_debug!("RunContext::from_process cwd={}", current.display());
        Ok(Self {
            current,
            stack: DirectoryStack::new(),
            env: BTreeMap::new(),
            non_unicode: BTreeSet::new(),
            mode: DirMode::Process,
        }
        .with_os_env(std::env::vars_os()))
    }

    /// Context rooted at `dir` that never changes the process directory.
    pub fn detached(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let current = canonical_dir(dir)?;
        plog_debug!("RunContext::detached cwd={}", current.display());
        Ok(Self {
            current,
            stack: DirectoryStack::new(),
            env: BTreeMap::new(),
            non_unicode: BTreeSet::new(),
            mode: DirMode::Detached,
        }
        .with_os_env(std::env::vars_os()))
    }

    /// Replace the environment passed to spawned commands.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self.non_unicode.clear();
        self
    }

    /// Replace the environment from raw OS strings.
    ///
    /// Variables whose name or value is not UTF-8 cannot be passed through
    /// the string environment; their names are remembered so lookups can
    /// tell "not set" apart from "not readable".
    pub fn with_os_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        self.env.clear();
        self.non_unicode.clear();
        for (key, value) in vars {
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => {
                    self.env.insert(key, value);
                }
                (key, _) => {
                    let key = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                    plog_warn!("Ignoring environment variable {}: not valid UTF-8", key);
                    self.non_unicode.insert(key);
                }
            }
        }
        self
    }

    pub fn mode(&self) -> DirMode {
        self.mode
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn remove_env(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    /// Whether `key` was present in the environment but not valid UTF-8.
    pub fn is_non_unicode(&self, key: &str) -> bool {
        self.non_unicode.contains(key)
    }

    pub fn current_dir(&self) -> &Path {
        &self.current
    }

    /// Resolve `path` against the current directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.current.join(path)
    }

    /// Resolve `path` to a location strictly inside the current directory.
    ///
    /// Absolute paths, `..` components and paths naming the current
    /// directory itself fail with [`Error::Configuration`], as do paths that
    /// reach outside through a symlink.
    pub fn resolve_within(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let outside = || {
            Error::Configuration(format!(
                "{} is outside {}",
                path.display(),
                self.current.display()
            ))
        };

        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(outside());
        }

        let target = self.current.join(relative);
        let inside = match target.canonicalize() {
            Ok(real) => real != self.current && real.starts_with(&self.current),
            Err(_) => target
                .ancestors()
                .skip(1)
                .find_map(|dir| dir.canonicalize().ok())
                .is_some_and(|real| real.starts_with(&self.current)),
        };
        if !inside {
            return Err(outside());
        }
        Ok(target)
    }

    /// Number of directories waiting to be restored.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty()
    }

    /// Change the current directory to `path`.
    ///
    /// Relative paths resolve against the current directory. Fails with
    /// [`Error::Directory`] when the target is missing, not a directory, or
    /// cannot be entered.
    pub fn set_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let target = canonical_dir(&self.resolve(path))?;
        if self.mode == DirMode::Process {
            std::env::set_current_dir(&target).map_err(|source| Error::Directory {
                path: target.clone(),
                source,
            })?;
        }
        println!("Working dir: {}", target.display());
        plog!("Working dir: {}", target.display());
        self.current = target;
        Ok(())
    }

    /// Remember the current directory, then change to `path`.
    ///
    /// The stack is left untouched when the change fails.
    pub fn enter(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let previous = self.current.clone();
        self.set_directory(path)?;
        self.stack.push(previous);
        plog_trace!("enter: depth={}", self.stack.len());
        Ok(())
    }

    /// Return to the most recently remembered directory.
    pub fn restore(&mut self) -> Result<()> {
        let previous = self.stack.pop().ok_or(Error::StackUnderflow)?;
        plog_trace!("restore: depth={}", self.stack.len());
        self.set_directory(previous)
    }

    /// Enter `path` for the lifetime of the returned guard.
    ///
    /// The guard restores the directory when dropped, including on early
    /// return and unwinding.
    pub fn scoped(&mut self, path: impl AsRef<Path>) -> Result<DirGuard<'_>> {
        self.enter(path)?;
        let depth = self.stack.len();
        Ok(DirGuard {
            ctx: self,
            depth,
            finished: false,
        })
    }

    /// Remove a directory tree below the current directory if present.
    ///
    /// Returns whether anything was removed. Targets outside the current
    /// directory are refused, see [`RunContext::resolve_within`].
    pub fn remove_dir(&self, path: impl AsRef<Path>) -> Result<bool> {
        let target = self.resolve_within(path)?;
        if !target.is_dir() {
            plog_debug!("remove_dir: {} not present", target.display());
            return Ok(false);
        }
        fs::remove_dir_all(&target)?;
        plog!("Removed {}", target.display());
        Ok(true)
    }

    /// Remove a single file below the current directory if present.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        let target = self.resolve_within(path)?;
        match fs::remove_file(&target) {
            Ok(()) => {
                plog!("Removed {}", target.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                plog_debug!("remove_file: {} not present", target.display());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `path` and its ancestors while they are empty, stopping below
    /// the current directory. Returns how many directories were removed.
    pub fn prune_empty_dirs(&self, path: impl AsRef<Path>) -> Result<usize> {
        let mut dir = self.resolve_within(path)?;
        let mut removed = 0;
        while dir != self.current && dir.starts_with(&self.current) {
            if dir.is_dir() {
                if fs::read_dir(&dir)?.next().is_some() {
                    break;
                }
                fs::remove_dir(&dir)?;
                plog_debug!("Removed empty directory {}", dir.display());
                removed += 1;
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(removed)
    }
}

/// Scope guard returned by [`RunContext::scoped`].
pub struct DirGuard<'a> {
    ctx: &'a mut RunContext,
    depth: usize,
    finished: bool,
}

impl DirGuard<'_> {
    /// Restore explicitly and report a failure instead of only logging it.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.unwind()
    }

    // Pops everything entered at or below this guard, including inner
    // enters the body never restored.
    fn unwind(&mut self) -> Result<()> {
        let mut outcome = Ok(());
        while self.ctx.depth() >= self.depth {
            if let Err(e) = self.ctx.restore() {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

impl Deref for DirGuard<'_> {
    type Target = RunContext;

    fn deref(&self) -> &RunContext {
        &*self.ctx
    }
}

impl DerefMut for DirGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunContext {
        &mut *self.ctx
    }
}

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.unwind() {
            plog_error!("Failed to restore working directory: {}", e);
        }
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let target = path.canonicalize().map_err(|source| Error::Directory {
        path: path.to_path_buf(),
        source,
    })?;
    if !target.is_dir() {
        return Err(Error::Directory {
            path: target,
            source: io::Error::new(io::ErrorKind::Other, "not a directory"),
        });
    }
    Ok(target)
}
