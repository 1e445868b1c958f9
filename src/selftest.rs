use crate::compare::ComparisonResult;
use crate::config::{HarnessConfig, OutputRole};
use crate::report::{Event, Severity};
use crate::runner::{CheckOutcome, FixtureOutcome, FixtureVerdict, RunSummary, TestRunner};
use crate::simulator::{ProcessSimulator, SimOutcome};
use anyhow::{bail, Context, Result};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

// Stand-in simulator, run by /bin/sh. The fixture's cfg.txt holds a mode
// word that picks how it misbehaves.
const STAND_IN: &str = r#"
dir=$(dirname "$1")
mode=$(cat "$1")
touch "$dir/invoked"
if [ "$mode" = hang ]; then
    sleep 30
    exit 0
fi
cp "$dir/memout.txt" "$3"
if [ "$mode" != skip-regout ]; then
    cp "$dir/regout.txt" "$4"
fi
cp "$dir/traceinst.txt" "$5"
cp "$dir/traceunit.txt" "$6"
if [ "$mode" = corrupt-memout ]; then
    printf 'ffffffff\n' >> "$3"
fi
if [ "$mode" = lowercase ]; then
    tr 'A-Z' 'a-z' < "$dir/memout.txt" | sed 's/^/  /' > "$3"
fi
if [ "$mode" = fail ]; then
    exit 1
fi
exit 0
"#;

const MEMOUT: &str = "00C20001\n00A30002\n00000000\n";
const REGOUT: &str = "0.000000\n1.000000\n2.000000\n";
const TRACEINST: &str = "00c20001 0 ADD0 1 2 4 5\n00a30002 1 MUL0 2 3 8 9\n";
const TRACEUNIT: &str = "1 ADD0 F2 F2 F1 - - Yes Yes\n";

// --------------------- Shared harness --------------------------------------
struct Harness {
    dir: TempDir,
    script: PathBuf,
    verbose: bool,
}

type TestCase = (&'static str, Box<dyn Fn(&Harness) -> Result<()>>);

impl Harness {
    fn new(verbose: bool) -> Result<Self> {
        let dir = TempDir::new()?;
        let script = dir.path().join("sim.sh");
        fs::write(&script, STAND_IN)?;
        Ok(Self {
            dir,
            script,
            verbose,
        })
    }

    /// Fresh fixture root for one case.
    fn root(&self, case: &str) -> Result<PathBuf> {
        let root = self.dir.path().join(case.replace(' ', "_"));
        fs::create_dir_all(&root)?;
        Ok(root)
    }

    fn fixture(&self, root: &Path, name: &str, mode: &str) -> Result<PathBuf> {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        for (file, content) in [
            ("cfg.txt", mode),
            ("memin.txt", "00C20001\n00A30002\n"),
            ("memout.txt", MEMOUT),
            ("regout.txt", REGOUT),
            ("traceinst.txt", TRACEINST),
            ("traceunit.txt", TRACEUNIT),
        ] {
            fs::write(dir.join(file), content)
                .with_context(|| format!("writing {name}/{file}"))?;
        }
        Ok(dir)
    }

    fn run(&self, root: &Path, timeout: Duration) -> Result<(RunSummary, Vec<Event>)> {
        let config = HarnessConfig {
            fixtures_root: root.to_path_buf(),
            simulator: PathBuf::from("/bin/sh"),
            simulator_args: vec![self.script.clone().into_os_string()],
            timeout: Some(timeout),
            quiet_simulator: !self.verbose,
            verbose: self.verbose,
            ..HarnessConfig::default()
        };
        let simulator = ProcessSimulator::new(
            config.simulator.clone(),
            config.timeout,
            config.quiet_simulator,
        )
        .with_leading_args(config.simulator_args.clone());
        let mut events: Vec<Event> = Vec::new();
        let summary = TestRunner::new(&config, simulator).run(&config.fixtures_root, &mut events)?;
        if self.verbose {
            for event in &events {
                println!("       {:?} {}", event.severity, event.message);
            }
        }
        Ok((summary, events))
    }

    fn run_one(&self, case: &str, mode: &str) -> Result<(RunSummary, Vec<Event>)> {
        let root = self.root(case)?;
        self.fixture(&root, "t01", mode)?;
        self.run(&root, Duration::from_secs(10))
    }
}

fn messages(events: &[Event], severity: Severity) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.severity == severity)
        .map(|e| e.message.as_str())
        .collect()
}

type Completed<'a> = (FixtureVerdict, SimOutcome, &'a [(OutputRole, CheckOutcome)]);

fn completed(summary: &RunSummary, index: usize) -> Result<Completed<'_>> {
    match summary.fixtures.get(index).map(|f| &f.outcome) {
        Some(FixtureOutcome::Completed {
            verdict,
            simulator,
            checks,
        }) => Ok((*verdict, *simulator, checks)),
        other => bail!("fixture {index} did not complete: {other:?}"),
    }
}

// --------------------- Test runner ----------------------------------------
pub fn run_self_tests(filter: Option<String>, verbose: bool) -> Result<()> {
    let harness = Harness::new(verbose)?;
    let cases: Vec<TestCase> = vec![
        ("passing fixture", Box::new(test_passing_fixture)),
        ("case and whitespace tolerated", Box::new(test_lowercase_output)),
        ("missing produced file", Box::new(test_missing_produced_file)),
        ("content mismatch", Box::new(test_content_mismatch)),
        ("invalid fixture skipped", Box::new(test_invalid_fixture)),
        ("hung simulator times out", Box::new(test_timeout)),
        ("nonzero exit still compared", Box::new(test_nonzero_exit)),
        ("rerun is deterministic", Box::new(test_rerun_deterministic)),
        ("random memory image", Box::new(test_random_memory_image)),
        ("mixed tree ordering", Box::new(test_mixed_tree)),
    ];

    run_cases(&harness, cases, filter.as_deref(), verbose)
}

fn run_cases(
    harness: &Harness,
    mut cases: Vec<TestCase>,
    filter: Option<&str>,
    verbose: bool,
) -> Result<()> {
    let total = cases.len();
    let mut selected = 0usize;
    let mut passed = 0usize;
    for (name, case) in cases.drain(..) {
        if let Some(f) = filter {
            if !name.contains(f) {
                continue;
            }
        }
        selected += 1;
        if verbose {
            println!("[RUN ] {name}");
        }
        match case(harness) {
            Ok(_) => {
                passed += 1;
                println!("[PASS] {name}");
            }
            Err(e) => {
                println!("[FAIL] {name}: {e:#}");
            }
        }
    }
    println!(
        "\n{passed}/{selected} self-tests passed ({total} defined){}.",
        if filter.is_some() { " (filtered)" } else { "" }
    );
    if passed == selected {
        return Ok(());
    }
    bail!("{} of {selected} self-tests failed", selected - passed);
}

// --------------------- Individual tests -----------------------------------
fn test_passing_fixture(h: &Harness) -> Result<()> {
    let (summary, events) = h.run_one("passing", "copy")?;
    let (verdict, sim, checks) = completed(&summary, 0)?;
    if verdict != FixtureVerdict::Pass || checks.len() != 4 {
        bail!("expected a pass over four checks, got {verdict:?} / {checks:?}");
    }
    if !matches!(sim, SimOutcome::Exited(status) if status.success()) {
        bail!("simulator outcome {sim:?}");
    }
    if messages(&events, Severity::Pass) != ["Test file t01 pass"] {
        bail!("pass line missing: {events:?}");
    }
    Ok(())
}

fn test_lowercase_output(h: &Harness) -> Result<()> {
    let (summary, events) = h.run_one("lowercase", "lowercase")?;
    if summary.passed() != 1 {
        bail!("case-folded, indented output should pass: {events:?}");
    }
    Ok(())
}

fn test_missing_produced_file(h: &Harness) -> Result<()> {
    let (summary, events) = h.run_one("missing", "skip-regout")?;
    let (verdict, _, checks) = completed(&summary, 0)?;
    if verdict != FixtureVerdict::Fail {
        bail!("fixture should fail");
    }
    let missing: Vec<OutputRole> = checks
        .iter()
        .filter(|(_, c)| *c == CheckOutcome::Compared(ComparisonResult::MissingFile))
        .map(|(role, _)| *role)
        .collect();
    if missing != [OutputRole::Registers] || checks.len() != 4 {
        bail!("only registers should be missing: {checks:?}");
    }
    let warnings = messages(&events, Severity::Warning);
    if warnings != ["t01: Output file 'test_regout.txt' does not exist"] {
        bail!("unexpected warnings: {warnings:?}");
    }
    Ok(())
}

fn test_content_mismatch(h: &Harness) -> Result<()> {
    let (summary, events) = h.run_one("mismatch", "corrupt-memout")?;
    if summary.failed() != 1 {
        bail!("fixture should fail");
    }
    let errors = messages(&events, Severity::Error);
    let expected_first = format!(
        "t01: memout.txt at line {} found ffffffff instead of 00000000",
        MEMOUT.lines().count()
    );
    if errors.first().copied() != Some(expected_first.as_str()) {
        bail!("unexpected diagnostics: {errors:?}");
    }
    if errors.get(1).copied() != Some("t01: Output file memout.txt is wrong") {
        bail!("missing summary diagnostic: {errors:?}");
    }
    Ok(())
}

fn test_invalid_fixture(h: &Harness) -> Result<()> {
    let root = h.root("invalid")?;
    let dir = h.fixture(&root, "t01", "copy")?;
    fs::remove_file(dir.join("regout.txt"))?;
    let (summary, events) = h.run(&root, Duration::from_secs(10))?;
    if summary.invalid() != 1 {
        bail!("fixture should be invalid: {summary:?}");
    }
    if dir.join("invoked").exists() {
        bail!("simulator ran against an invalid fixture");
    }
    let warnings = messages(&events, Severity::Warning);
    if warnings.len() != 1 || !warnings[0].contains("'t01' is an invalid test directory") {
        bail!("unexpected warnings: {warnings:?}");
    }
    Ok(())
}

fn test_timeout(h: &Harness) -> Result<()> {
    let root = h.root("timeout")?;
    h.fixture(&root, "t01", "hang")?;
    let (summary, events) = h.run(&root, Duration::from_millis(300))?;
    let (verdict, sim, checks) = completed(&summary, 0)?;
    if sim != SimOutcome::TimedOut || verdict != FixtureVerdict::Fail {
        bail!("expected a timed out failure, got {sim:?} / {verdict:?}");
    }
    if !checks
        .iter()
        .all(|(_, c)| *c == CheckOutcome::Compared(ComparisonResult::MissingFile))
    {
        bail!("every output should be missing: {checks:?}");
    }
    if !messages(&events, Severity::Error)
        .iter()
        .any(|m| m.contains("timed out"))
    {
        bail!("timeout not reported: {events:?}");
    }
    Ok(())
}

fn test_nonzero_exit(h: &Harness) -> Result<()> {
    let (summary, events) = h.run_one("nonzero", "fail")?;
    if summary.passed() != 1 {
        bail!("outputs match, fixture should pass: {events:?}");
    }
    if !messages(&events, Severity::Warning)
        .iter()
        .any(|m| m.contains("simulator exited with"))
    {
        bail!("exit status not reported: {events:?}");
    }
    Ok(())
}

fn test_rerun_deterministic(h: &Harness) -> Result<()> {
    let root = h.root("rerun")?;
    h.fixture(&root, "a", "copy")?;
    h.fixture(&root, "b", "skip-regout")?;
    h.fixture(&root, "c", "corrupt-memout")?;
    let (first, first_events) = h.run(&root, Duration::from_secs(10))?;
    let (second, second_events) = h.run(&root, Duration::from_secs(10))?;
    let verdicts = |s: &RunSummary| s.fixtures.iter().map(|f| f.verdict()).collect::<Vec<_>>();
    if verdicts(&first) != verdicts(&second) {
        bail!("verdicts changed between runs");
    }
    let non_info = |events: &[Event]| {
        events
            .iter()
            .filter(|e| e.severity != Severity::Info)
            .cloned()
            .collect::<Vec<_>>()
    };
    if non_info(&first_events) != non_info(&second_events) {
        bail!("diagnostics changed between runs");
    }
    Ok(())
}

fn test_random_memory_image(h: &Harness) -> Result<()> {
    let root = h.root("random")?;
    let dir = h.fixture(&root, "t01", "copy")?;
    let mut rng = rand::thread_rng();
    let image: String = (0..4096)
        .map(|_| format!("{:08x}\n", rng.gen::<u32>()))
        .collect();
    fs::write(dir.join("memout.txt"), image)?;
    let (summary, events) = h.run(&root, Duration::from_secs(10))?;
    if summary.passed() != 1 {
        bail!("copied memory image should pass: {events:?}");
    }
    Ok(())
}

fn test_mixed_tree(h: &Harness) -> Result<()> {
    let root = h.root("mixed")?;
    h.fixture(&root, "t3", "copy")?;
    h.fixture(&root, "t1", "corrupt-memout")?;
    let partial = h.fixture(&root, "t2", "copy")?;
    fs::remove_file(partial.join("cfg.txt"))?;
    fs::write(root.join("notes.txt"), "not a fixture")?;
    let (summary, _) = h.run(&root, Duration::from_secs(10))?;
    let names: Vec<&str> = summary.fixtures.iter().map(|f| f.name.as_str()).collect();
    if names != ["t1", "t2", "t3"] {
        bail!("unexpected order {names:?}");
    }
    if (summary.passed(), summary.failed(), summary.invalid()) != (1, 1, 1) {
        bail!("unexpected counts {summary:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_test_suite_passes() {
        run_self_tests(None, false).unwrap();
    }

    #[test]
    fn filtered_suite_ignores_other_cases() {
        run_self_tests(Some("passing".to_string()), false).unwrap();
    }

    fn broken_case(_: &Harness) -> Result<()> {
        bail!("stand-in misbehaved")
    }

    #[test]
    fn filtered_failure_still_fails() {
        let harness = Harness::new(false).unwrap();
        let cases = || -> Vec<TestCase> {
            vec![
                ("passing fixture", Box::new(test_passing_fixture)),
                ("broken fixture", Box::new(broken_case)),
            ]
        };
        let err = run_cases(&harness, cases(), Some("broken"), false).unwrap_err();
        assert_eq!(err.to_string(), "1 of 1 self-tests failed");
        run_cases(&harness, cases(), Some("passing"), false).unwrap();
        assert!(run_cases(&harness, cases(), None, false).is_err());
    }
}
