use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const TERM_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    Exited(ExitStatus),
    TimedOut,
}

/// Runs the simulator once against a fixture's positional file arguments.
pub trait Simulator {
    fn run(&self, args: &[PathBuf]) -> Result<SimOutcome>;

    /// Command line shown in diagnostics.
    fn describe(&self, args: &[PathBuf]) -> String;
}

/// Simulator backed by an external executable.
pub struct ProcessSimulator {
    program: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Option<Duration>,
    quiet: bool,
}

impl ProcessSimulator {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>, quiet: bool) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
            quiet,
        }
    }

    /// Arguments placed before the fixture paths, e.g. a script for an interpreter.
    pub fn with_leading_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Bare names (no path separator) are looked up on `PATH`.
    pub fn resolve(program: &Path, timeout: Option<Duration>, quiet: bool) -> Result<Self> {
        let program = locate(program, Path::new("."))?;
        Ok(Self::new(program, timeout, quiet))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Simulator for ProcessSimulator {
    fn run(&self, args: &[PathBuf]) -> Result<SimOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .process_group(0);
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("spawning {:?}", self.program))?;
        match self.timeout {
            Some(timeout) => wait_with_timeout(child, timeout),
            None => Ok(SimOutcome::Exited(child.wait()?)),
        }
    }

    fn describe(&self, args: &[PathBuf]) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.leading_args.iter().map(|a| a.to_string_lossy().into_owned()))
            .chain(args.iter().map(|p| p.display().to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A bare name that exists in `cwd` becomes `./name`, since `Command` only
/// searches `PATH` for names without a separator.
fn locate(program: &Path, cwd: &Path) -> Result<PathBuf> {
    let mut parts = program.components();
    if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
        return Ok(program.to_path_buf());
    }
    if cwd.join(program).exists() {
        return Ok(Path::new(".").join(program));
    }
    which::which(program)
        .with_context(|| format!("simulator {} not found on PATH", program.display()))
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<SimOutcome> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(SimOutcome::Exited(status));
        }
        if start.elapsed() >= timeout {
            terminate(&mut child)?;
            return Ok(SimOutcome::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// SIGTERM to the simulator's process group, SIGKILL once the grace period
/// runs out. Grandchildren share the group, so they go down too.
fn terminate(child: &mut Child) -> Result<()> {
    let group = Pid::from_raw(child.id() as i32);
    signal_group(group, Signal::SIGTERM)?;
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline && child.try_wait()?.is_none() {
        thread::sleep(POLL_INTERVAL);
    }
    signal_group(group, Signal::SIGKILL)?;
    child.wait()?;
    Ok(())
}

// ESRCH means every member already exited.
fn signal_group(group: Pid, signal: Signal) -> Result<()> {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("sending {signal} to process group {group}")),
    }
}
