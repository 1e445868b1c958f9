use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

mod compare;
mod config;
mod report;
mod runner;
mod selftest;
mod simulator;

use compare::ComparisonResult;
use config::{
    timeout_from_secs, HarnessConfig, DEFAULT_FIXTURES_DIR, DEFAULT_SIMULATOR, DEFAULT_TIMEOUT_SECS,
};
use report::{ReportFormat, Severity};
use runner::TestRunner;
use simulator::ProcessSimulator;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Simulator fixture harness",
    long_about = None,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    run: RunArgs,
}

/// Options for the default action: run every fixture under the root.
#[derive(Args, Debug)]
struct RunArgs {
    /// Directory holding one sub-directory per fixture
    #[arg(short, long, default_value = DEFAULT_FIXTURES_DIR)]
    root: PathBuf,
    /// Simulator executable; bare names are looked up on PATH
    #[arg(short, long, default_value = DEFAULT_SIMULATOR)]
    simulator: PathBuf,
    /// Argument passed to the simulator before the fixture paths (repeatable)
    #[arg(long = "simulator-arg", value_name = "ARG", allow_hyphen_values = true)]
    simulator_args: Vec<OsString>,
    /// Seconds before a simulator run is killed (0 waits forever)
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
    /// Console report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Auto)]
    format: ReportFormat,
    /// Only run fixtures whose name contains this filter
    #[arg(short, long)]
    filter: Option<String>,
    /// Report simulator exit status and timing per fixture
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
    /// Discard the simulator's own stdout and stderr
    #[arg(short, long, default_value_t = false)]
    quiet_sim: bool,
    /// Exit with failure when any fixture fails or errors
    #[arg(long, default_value_t = false)]
    strict: bool,
}

impl RunArgs {
    fn to_config(&self) -> HarnessConfig {
        HarnessConfig {
            fixtures_root: self.root.clone(),
            simulator: self.simulator.clone(),
            simulator_args: self.simulator_args.clone(),
            timeout: timeout_from_secs(self.timeout_secs),
            filter: self.filter.clone(),
            quiet_simulator: self.quiet_sim,
            verbose: self.verbose,
            ..HarnessConfig::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare one produced file against its reference
    Compare {
        reference: PathBuf,
        actual: PathBuf,
    },
    /// Run the built-in scenario suite against a stand-in simulator
    SelfTest {
        /// Only run scenarios whose name contains this filter
        #[arg(short, long)]
        filter: Option<String>,
        /// Print each scenario's events
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Compare { reference, actual }) => compare_files(&reference, &actual),
        Some(Commands::SelfTest { filter, verbose }) => selftest::run_self_tests(filter, verbose),
        None => run_fixtures(&cli.run),
    }
}

fn run_fixtures(args: &RunArgs) -> Result<()> {
    let config = args.to_config();
    let simulator =
        ProcessSimulator::resolve(&config.simulator, config.timeout, config.quiet_simulator)?
            .with_leading_args(config.simulator_args.clone());
    let mut reporter = report::stdout_reporter(args.format);
    if config.verbose {
        reporter.emit(
            Severity::Info,
            &format!("Using simulator {}", simulator.program().display()),
        )?;
    }

    let summary =
        TestRunner::new(&config, simulator).run(&config.fixtures_root, &mut *reporter)?;
    if args.strict && !summary.is_success() {
        bail!(
            "{} fixture(s) failed, {} errored",
            summary.failed(),
            summary.errored()
        );
    }
    Ok(())
}

fn compare_files(reference: &Path, actual: &Path) -> Result<()> {
    match compare::compare(reference, actual)? {
        ComparisonResult::Pass => {
            println!("[PASS] {} matches {}", actual.display(), reference.display());
            Ok(())
        }
        ComparisonResult::MissingFile => bail!("{} does not exist", actual.display()),
        mismatch => bail!("{} {mismatch}", reference.display()),
    }
}
