use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FIXTURES_DIR: &str = "Test_Files";
pub const DEFAULT_SIMULATOR: &str = "./sim";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// One of the four outputs the simulator writes per fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRole {
    Memory,
    Registers,
    InstructionTrace,
    UnitTrace,
}

impl OutputRole {
    /// Roles in the order the simulator receives them on its command line.
    pub const ALL: [OutputRole; 4] = [
        OutputRole::Memory,
        OutputRole::Registers,
        OutputRole::InstructionTrace,
        OutputRole::UnitTrace,
    ];

    fn index(self) -> usize {
        match self {
            OutputRole::Memory => 0,
            OutputRole::Registers => 1,
            OutputRole::InstructionTrace => 2,
            OutputRole::UnitTrace => 3,
        }
    }
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputRole::Memory => "memory",
            OutputRole::Registers => "registers",
            OutputRole::InstructionTrace => "instruction trace",
            OutputRole::UnitTrace => "unit trace",
        };
        f.write_str(name)
    }
}

/// Filenames a fixture directory must contain, and how produced outputs are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLayout {
    pub config: String,
    pub memory_input: String,
    pub outputs: [String; 4],
    pub produced_prefix: String,
}

impl Default for FixtureLayout {
    fn default() -> Self {
        Self {
            config: "cfg.txt".to_string(),
            memory_input: "memin.txt".to_string(),
            outputs: [
                "memout.txt".to_string(),
                "regout.txt".to_string(),
                "traceinst.txt".to_string(),
                "traceunit.txt".to_string(),
            ],
            produced_prefix: "test_".to_string(),
        }
    }
}

impl FixtureLayout {
    /// All six files a valid fixture holds, inputs first.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        [self.config.as_str(), self.memory_input.as_str()]
            .into_iter()
            .chain(self.outputs.iter().map(String::as_str))
    }

    pub fn reference_name(&self, role: OutputRole) -> &str {
        &self.outputs[role.index()]
    }

    pub fn produced_name(&self, role: OutputRole) -> String {
        format!("{}{}", self.produced_prefix, self.reference_name(role))
    }

    pub fn reference_path(&self, fixture: &Path, role: OutputRole) -> PathBuf {
        fixture.join(self.reference_name(role))
    }

    pub fn produced_path(&self, fixture: &Path, role: OutputRole) -> PathBuf {
        fixture.join(self.produced_name(role))
    }

    /// Positional simulator arguments: config, memory input, then the four
    /// produced outputs.
    pub fn command_args(&self, fixture: &Path) -> Vec<PathBuf> {
        let mut args = vec![fixture.join(&self.config), fixture.join(&self.memory_input)];
        args.extend(OutputRole::ALL.iter().map(|&role| self.produced_path(fixture, role)));
        args
    }
}

/// Options for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixtures_root: PathBuf,
    pub simulator: PathBuf,
    /// Passed to the simulator ahead of the six fixture paths.
    pub simulator_args: Vec<OsString>,
    pub timeout: Option<Duration>,
    pub filter: Option<String>,
    pub layout: FixtureLayout,
    pub quiet_simulator: bool,
    pub verbose: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fixtures_root: PathBuf::from(DEFAULT_FIXTURES_DIR),
            simulator: PathBuf::from(DEFAULT_SIMULATOR),
            simulator_args: Vec::new(),
            timeout: timeout_from_secs(DEFAULT_TIMEOUT_SECS),
            filter: None,
            layout: FixtureLayout::default(),
            quiet_simulator: false,
            verbose: false,
        }
    }
}

/// `0` disables the timeout.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
