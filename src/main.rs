use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use prepkit::config::expand_tilde;
use prepkit::{
    clean_outputs, plog, plog_debug, plog_error, run_in_root, CommandRunner, Config, Driver,
    FailurePolicy, Result, RunContext, RunReport, SetupPlan,
};

/// Exit status for any caught failure (-1 as the platform reports it).
const FAILURE_EXIT: u8 = 255;

/// Prepkit - prepare a project for compilation: run setup steps and compile shaders
#[derive(Parser, Debug)]
#[command(name = "prepkit")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    VULKAN_SDK        Toolchain root (variable name configurable in prepkit.toml)\n    PREPKIT_DEBUG=1   Enable debug logging (alternative to --debug)\n    PREPKIT_DEBUG=trace  Also log directory stack and environment detail"
)]
pub struct Cli {
    /// Manifest file (default: prepkit.toml in the current directory, if present)
    #[arg(short, long, global = true)]
    pub manifest: Option<String>,

    /// Directory to run in (default: the manifest's directory)
    #[arg(short, long, global = true)]
    pub root: Option<String>,

    /// Stop at the first failed command
    #[arg(short, long, global = true)]
    pub strict: bool,

    /// Kill commands still running after this many seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Enable debug logging (writes to ~/.prepkit/prepkit.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Echo log records to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Compile every task in the task table (default)
    Shaders {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the project setup steps
    Setup {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the task table with each task's command line
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every task output and the output directories left empty
    Clean,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    prepkit::log::init(cli.debug, cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            plog_error!("{}", e);
            println!("{}", e);
            ExitCode::from(FAILURE_EXIT)
        }
    }
}

/// Settings resolved from the manifest and command-line overrides.
struct Session {
    config: Config,
    root: PathBuf,
    policy: FailurePolicy,
    timeout: Option<Duration>,
}

impl Session {
    fn prepare(cli: &Cli, ctx: &RunContext) -> Result<Self> {
        let manifest = cli
            .manifest
            .as_deref()
            .map(|m| ctx.resolve(expand_tilde(m)));
        let (config, manifest) = Config::discover(manifest.as_deref(), ctx.current_dir())?;

        let root = match (&cli.root, &manifest) {
            (Some(root), _) => ctx.resolve(expand_tilde(root)),
            (None, Some(path)) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| ctx.current_dir().to_path_buf()),
            (None, None) => ctx.current_dir().to_path_buf(),
        };

        let policy = if cli.strict {
            FailurePolicy::Abort
        } else {
            config.failure_policy
        };
        let timeout = cli.timeout.map(Duration::from_secs).or(config.timeout());

        plog_debug!(
            "Session: manifest={:?} root={} policy={:?} timeout={:?}",
            manifest,
            root.display(),
            policy,
            timeout
        );
        Ok(Self {
            config,
            root,
            policy,
            timeout,
        })
    }

    fn runner(&self) -> CommandRunner {
        match self.timeout {
            Some(timeout) => CommandRunner::with_timeout(timeout),
            None => CommandRunner::new(),
        }
    }

    /// Fails before any task runs when the toolchain cannot be located.
    fn driver(&self, ctx: &RunContext) -> Result<Driver> {
        let toolchain = self.config.toolchain.resolve(ctx)?;
        Ok(Driver::new(self.config.effective_tasks(), toolchain)
            .with_runner(self.runner())
            .with_policy(self.policy))
    }

    fn setup_plan(&self) -> SetupPlan {
        SetupPlan::new(self.config.effective_steps())
            .with_runner(self.runner())
            .with_policy(self.policy)
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut ctx = RunContext::from_process()?;
    let session = Session::prepare(&cli, &ctx)?;
    let command = cli.command.unwrap_or(Command::Shaders { json: false });
    plog!("prepkit {:?} in {}", command, session.root.display());

    match command {
        Command::Shaders { json } => {
            let driver = session.driver(&ctx)?;
            let report = run_in_root(&mut ctx, &session.root, |ctx| driver.execute_all(ctx))?;
            print_report("Shader tasks", &report, json)
        }
        Command::Setup { json } => {
            let plan = session.setup_plan();
            let report = run_in_root(&mut ctx, &session.root, |ctx| plan.run(ctx))?;
            print_report("Setup steps", &report, json)
        }
        Command::List { json } => {
            let driver = session.driver(&ctx)?;
            print_tasks(&driver, &ctx, json)
        }
        Command::Clean => {
            let tasks = session.config.effective_tasks();
            let removed = run_in_root(&mut ctx, &session.root, |ctx| clean_outputs(&tasks, ctx))?;
            println!("Removed {} output files", removed);
            Ok(())
        }
    }
}

fn print_report(title: &str, report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!();
    println!(
        "{}: {} succeeded, {} failed",
        title,
        report.succeeded(),
        report.failed()
    );
    for failure in report.failures() {
        println!("  \x1b[31mfailed\x1b[0m ({}): {}", failure.outcome, failure.command);
    }
    Ok(())
}

fn print_tasks(driver: &Driver, ctx: &RunContext, json: bool) -> Result<()> {
    let mut rows = Vec::with_capacity(driver.tasks().len());
    for (index, task) in driver.tasks().iter().enumerate() {
        rows.push((index, task, driver.command_line(task, ctx)?));
    }

    if json {
        let entries: Vec<_> = rows
            .iter()
            .map(|(index, task, command)| {
                serde_json::json!({
                    "index": index,
                    "source": task.source,
                    "output": task.output,
                    "options": task.options,
                    "command": command.to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (index, task, command) in rows {
        println!("{:>3}  {}", index, task);
        println!("     {}", command);
    }
    Ok(())
}
