use crate::compare::{self, ComparisonResult};
use crate::config::{FixtureLayout, HarnessConfig, OutputRole};
use crate::report::{Reporter, Severity};
use crate::simulator::{SimOutcome, Simulator};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Compared(ComparisonResult),
    /// A file expected to exist could not be read; later roles are not checked.
    Unreadable(String),
}

impl CheckOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, CheckOutcome::Compared(result) if result.is_pass())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureVerdict {
    Pass,
    Fail,
}

impl FixtureVerdict {
    pub fn from_checks<'a>(checks: impl IntoIterator<Item = &'a CheckOutcome>) -> Self {
        if checks.into_iter().all(CheckOutcome::is_pass) {
            FixtureVerdict::Pass
        } else {
            FixtureVerdict::Fail
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureOutcome {
    /// Skipped: these required files were absent.
    Invalid(Vec<String>),
    /// The fixture could not be prepared or the simulator could not start.
    Errored(String),
    Completed {
        verdict: FixtureVerdict,
        simulator: SimOutcome,
        checks: Vec<(OutputRole, CheckOutcome)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureReport {
    pub name: String,
    pub outcome: FixtureOutcome,
}

impl FixtureReport {
    pub fn verdict(&self) -> Option<FixtureVerdict> {
        match &self.outcome {
            FixtureOutcome::Completed { verdict, .. } => Some(*verdict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fixtures: Vec<FixtureReport>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.count_verdict(FixtureVerdict::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count_verdict(FixtureVerdict::Fail)
    }

    pub fn invalid(&self) -> usize {
        self.fixtures
            .iter()
            .filter(|f| matches!(f.outcome, FixtureOutcome::Invalid(_)))
            .count()
    }

    pub fn errored(&self) -> usize {
        self.fixtures
            .iter()
            .filter(|f| matches!(f.outcome, FixtureOutcome::Errored(_)))
            .count()
    }

    /// True when no fixture failed or errored. Invalid fixtures only warn.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.errored() == 0
    }

    fn count_verdict(&self, verdict: FixtureVerdict) -> usize {
        self.fixtures
            .iter()
            .filter(|f| f.verdict() == Some(verdict))
            .count()
    }
}

pub struct TestRunner<S> {
    layout: FixtureLayout,
    simulator: S,
    filter: Option<String>,
    verbose: bool,
}

impl<S: Simulator> TestRunner<S> {
    pub fn new(config: &HarnessConfig, simulator: S) -> Self {
        Self {
            layout: config.layout.clone(),
            simulator,
            filter: config.filter.clone(),
            verbose: config.verbose,
        }
    }

    /// Runs every fixture directory directly under `root`, in name order.
    ///
    /// Per-fixture problems are reported and recorded in the summary; only a
    /// root that cannot be listed or a reporter that cannot write is an error.
    pub fn run(&self, root: &Path, reporter: &mut dyn Reporter) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for (name, dir) in self.discover(root, reporter)? {
            if let Some(filter) = &self.filter {
                if !name.contains(filter.as_str()) {
                    continue;
                }
            }
            let outcome = self.run_fixture(&name, &dir, reporter)?;
            summary.fixtures.push(FixtureReport { name, outcome });
        }

        let total = summary.fixtures.len();
        reporter.emit(
            Severity::Info,
            &format!(
                "{}/{total} fixtures passed ({} failed, {} invalid, {} errored){}",
                summary.passed(),
                summary.failed(),
                summary.invalid(),
                summary.errored(),
                if self.filter.is_some() { " (filtered)" } else { "" }
            ),
        )?;
        Ok(summary)
    }

    fn discover(&self, root: &Path, reporter: &mut dyn Reporter) -> Result<Vec<(String, PathBuf)>> {
        let mut fixtures = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(e).with_context(|| format!("listing fixtures in {}", root.display()))
                }
                Err(e) => {
                    reporter.emit(Severity::Warning, &format!("Skipping unreadable entry: {e}"))?;
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            fixtures.push((name, entry.into_path()));
        }
        Ok(fixtures)
    }

    fn run_fixture(
        &self,
        name: &str,
        dir: &Path,
        reporter: &mut dyn Reporter,
    ) -> Result<FixtureOutcome> {
        let missing = match self.missing_files(dir) {
            Ok(missing) => missing,
            Err(e) => {
                let message = format!("Folder '{name}' could not be listed: {e:#}");
                reporter.emit(Severity::Error, &message)?;
                return Ok(FixtureOutcome::Errored(message));
            }
        };
        if !missing.is_empty() {
            reporter.emit(
                Severity::Warning,
                &format!(
                    "Folder '{name}' is an invalid test directory (missing {})",
                    missing.join(", ")
                ),
            )?;
            return Ok(FixtureOutcome::Invalid(missing));
        }

        if let Err(e) = self.remove_stale_outputs(dir) {
            let message = format!("{name}: {e:#}");
            reporter.emit(Severity::Error, &message)?;
            return Ok(FixtureOutcome::Errored(message));
        }

        let args = self.layout.command_args(dir);
        reporter.emit(
            Severity::Info,
            &format!("Execute '{}'", self.simulator.describe(&args)),
        )?;
        let start = Instant::now();
        let simulator = match self.simulator.run(&args) {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{name}: simulator did not run: {e:#}");
                reporter.emit(Severity::Error, &message)?;
                return Ok(FixtureOutcome::Errored(message));
            }
        };
        self.report_simulator(name, simulator, start.elapsed(), reporter)?;

        let checks = self.check_outputs(name, dir, simulator, reporter)?;
        let verdict = FixtureVerdict::from_checks(checks.iter().map(|(_, check)| check));
        if verdict == FixtureVerdict::Pass {
            reporter.emit(Severity::Pass, &format!("Test file {name} pass"))?;
        }
        Ok(FixtureOutcome::Completed {
            verdict,
            simulator,
            checks,
        })
    }

    fn missing_files(&self, dir: &Path) -> Result<Vec<String>> {
        let mut present = HashSet::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
            present.insert(entry.file_name().to_os_string());
        }
        Ok(self
            .layout
            .required()
            .filter(|name| !present.contains(OsStr::new(name)))
            .map(str::to_string)
            .collect())
    }

    /// Produced files left by an earlier run would mask a simulator that
    /// writes nothing.
    fn remove_stale_outputs(&self, dir: &Path) -> Result<()> {
        for role in OutputRole::ALL {
            let produced = self.layout.produced_path(dir, role);
            if produced.exists() {
                fs::remove_file(&produced)
                    .with_context(|| format!("removing stale {}", produced.display()))?;
            }
        }
        Ok(())
    }

    fn report_simulator(
        &self,
        name: &str,
        outcome: SimOutcome,
        elapsed: Duration,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        match outcome {
            SimOutcome::Exited(status) => {
                if self.verbose {
                    reporter.emit(
                        Severity::Info,
                        &format!(
                            "{name}: simulator finished with {status} in {}ms",
                            elapsed.as_millis()
                        ),
                    )?;
                }
                if !status.success() {
                    reporter.emit(
                        Severity::Warning,
                        &format!("{name}: simulator exited with {status}"),
                    )?;
                }
            }
            SimOutcome::TimedOut => {
                reporter.emit(
                    Severity::Error,
                    &format!(
                        "{name}: simulator timed out after {}ms and was terminated",
                        elapsed.as_millis()
                    ),
                )?;
            }
        }
        Ok(())
    }

    fn check_outputs(
        &self,
        name: &str,
        dir: &Path,
        simulator: SimOutcome,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<(OutputRole, CheckOutcome)>> {
        let mut checks = Vec::with_capacity(OutputRole::ALL.len());
        for role in OutputRole::ALL {
            let reference_name = self.layout.reference_name(role);
            let produced_name = self.layout.produced_name(role);
            let produced = self.layout.produced_path(dir, role);

            let result = if simulator == SimOutcome::TimedOut || !produced.exists() {
                ComparisonResult::MissingFile
            } else {
                match compare::compare(&self.layout.reference_path(dir, role), &produced) {
                    Ok(result) => result,
                    Err(e) => {
                        let message = format!("{e:#}");
                        reporter.emit(
                            Severity::Error,
                            &format!(
                                "{name}: could not compare {role} output {reference_name}: {message}"
                            ),
                        )?;
                        checks.push((role, CheckOutcome::Unreadable(message)));
                        break;
                    }
                }
            };

            match &result {
                ComparisonResult::Pass => {}
                ComparisonResult::MissingFile => {
                    reporter.emit(
                        Severity::Warning,
                        &format!("{name}: Output file '{produced_name}' does not exist"),
                    )?;
                }
                ComparisonResult::Mismatch { .. } => {
                    reporter.emit(Severity::Error, &format!("{name}: {reference_name} {result}"))?;
                    reporter.emit(
                        Severity::Error,
                        &format!("{name}: Output file {reference_name} is wrong"),
                    )?;
                }
            }
            checks.push((role, CheckOutcome::Compared(result)));
        }
        Ok(checks)
    }
}
