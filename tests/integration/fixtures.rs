//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating a temporary project tree with shader sources
//! - A fake compiler installed under a fake toolchain root
//! - Detached run contexts wired to that toolchain

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

use prepkit::{RunContext, Task};

/// Stands in for glslang: `<source> -o <output> [options...]`.
///
/// Writes `<source> <options>` into the output file, appends the source to
/// `calls.log` in the toolchain root, and exits 2 when the source is missing.
const FAKE_COMPILER: &str = r#"#!/bin/sh
src="$1"
shift
if [ "$1" != "-o" ]; then
    echo "usage: $0 <source> -o <output> [options]" >&2
    exit 64
fi
out="$2"
shift 2
echo "$src" >> "$(dirname "$0")/../calls.log"
if [ ! -f "$src" ]; then
    echo "ERROR: cannot open $src" >&2
    exit 2
fi
echo "$src $*" > "$out"
"#;

/// A temporary project with a fake toolchain next to it.
pub struct TestProject {
    /// Holds the temporary directory alive.
    pub temp_dir: TempDir,
    /// Project root (where tasks run).
    pub root: PathBuf,
    /// Toolchain root, the value for `VULKAN_SDK`.
    pub sdk: PathBuf,
}

impl TestProject {
    /// Create a project with `Gui/BlitToSwapchain.{vert,frag}` sources.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp directory");
        let root = base.join("project");
        let sdk = base.join("sdk");

        fs::create_dir_all(root.join("Gui")).expect("Failed to create project");
        fs::write(root.join("Gui/BlitToSwapchain.vert"), "#version 450\n")
            .expect("Failed to write vertex shader");
        fs::write(root.join("Gui/BlitToSwapchain.frag"), "#version 450\n")
            .expect("Failed to write fragment shader");

        fs::create_dir_all(sdk.join("Bin")).expect("Failed to create sdk");
        let tool = sdk.join("Bin/glslang");
        fs::write(&tool, FAKE_COMPILER).expect("Failed to write fake compiler");
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))
            .expect("Failed to mark fake compiler executable");

        Self {
            temp_dir,
            root,
            sdk,
        }
    }

    /// Write a file relative to the project root.
    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(path, contents).expect("Failed to write file");
    }

    /// Read a file relative to the project root.
    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.root.join(relative)).expect("Failed to read file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    /// Sources the fake compiler was invoked with, in call order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.sdk.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Minimal environment: `PATH` plus `VULKAN_SDK` pointing at the fake sdk.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string()),
        );
        env.insert("VULKAN_SDK".to_string(), self.sdk.display().to_string());
        env
    }

    /// Detached context starting at the temp directory (the project's parent).
    pub fn context(&self) -> RunContext {
        RunContext::detached(self.temp_dir.path())
            .expect("Failed to create context")
            .with_env(self.env())
    }

    /// `prepkit` binary invocation from the project root with a sandboxed home.
    pub fn prepkit(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_prepkit"));
        cmd.current_dir(&self.root)
            .env_clear()
            .envs(self.env())
            .env("HOME", self.temp_dir.path());
        cmd
    }
}

/// Two tasks writing into the same, not yet existing, directory.
pub fn shared_output_tasks() -> Vec<Task> {
    vec![
        Task::new("Gui/BlitToSwapchain.vert", "out/gui/a.vert.inc", "-x"),
        Task::new("Gui/BlitToSwapchain.frag", "out/gui/a.frag.inc", "-x"),
    ]
}
