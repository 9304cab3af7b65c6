pub mod config;
pub mod driver;
pub mod error;
pub mod log;
pub mod runner;
pub mod setup;
pub mod task;
pub mod workdir;

pub use config::{Config, FailurePolicy, Toolchain, ToolchainConfig};
pub use driver::{clean_outputs, run_in_root, Driver, RunReport};
pub use error::{Error, Result};
pub use runner::{CommandLine, CommandResult, CommandRunner, Outcome};
pub use setup::{SetupPlan, SetupStep};
pub use task::Task;
pub use workdir::{DirGuard, DirMode, DirectoryStack, RunContext};
