use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Pass,
    Warning,
    Error,
}

impl Severity {
    fn tag(self) -> &'static str {
        match self {
            Severity::Info => "[INFO]",
            Severity::Pass => "[PASS]",
            Severity::Warning => "[WARN]",
            Severity::Error => "[FAIL]",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Severity::Info => "\x1b[94m",
            Severity::Pass => "\x1b[92m",
            Severity::Warning => "\x1b[93m",
            Severity::Error => "\x1b[91m",
        }
    }
}

const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub severity: Severity,
    pub message: String,
}

/// Sink for harness diagnostics, one event per line.
pub trait Reporter {
    fn emit(&mut self, severity: Severity, message: &str) -> io::Result<()>;
}

/// Collects events in memory.
impl Reporter for Vec<Event> {
    fn emit(&mut self, severity: Severity, message: &str) -> io::Result<()> {
        self.push(Event {
            severity,
            message: message.to_string(),
        });
        Ok(())
    }
}

pub struct PlainReporter<W> {
    out: W,
}

impl<W: Write> PlainReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Reporter for PlainReporter<W> {
    fn emit(&mut self, severity: Severity, message: &str) -> io::Result<()> {
        writeln!(self.out, "{} {message}", severity.tag())
    }
}

pub struct ColorReporter<W> {
    out: W,
}

impl<W: Write> ColorReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Reporter for ColorReporter<W> {
    fn emit(&mut self, severity: Severity, message: &str) -> io::Result<()> {
        writeln!(
            self.out,
            "{}{} {message}{RESET}",
            severity.color(),
            severity.tag()
        )
    }
}

/// One JSON object per line: `{"severity":"error","message":"..."}`.
pub struct JsonReporter<W> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn emit(&mut self, severity: Severity, message: &str) -> io::Result<()> {
        let event = Event {
            severity,
            message: message.to_string(),
        };
        serde_json::to_writer(&mut self.out, &event)?;
        writeln!(self.out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Color when stdout is a terminal, plain otherwise
    Auto,
    Plain,
    Color,
    Json,
}

pub fn stdout_reporter(format: ReportFormat) -> Box<dyn Reporter> {
    let stdout = io::stdout();
    match format {
        ReportFormat::Auto if stdout.is_terminal() => Box::new(ColorReporter::new(stdout)),
        ReportFormat::Auto | ReportFormat::Plain => Box::new(PlainReporter::new(stdout)),
        ReportFormat::Color => Box::new(ColorReporter::new(stdout)),
        ReportFormat::Json => Box::new(JsonReporter::new(stdout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_tagged() {
        let mut out = Vec::new();
        {
            let mut r = PlainReporter::new(&mut out);
            r.emit(Severity::Pass, "Test file t01 pass").unwrap();
            r.emit(Severity::Warning, "Folder 'bad' is an invalid test directory")
                .unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "[PASS] Test file t01 pass\n[WARN] Folder 'bad' is an invalid test directory\n"
        );
    }

    #[test]
    fn color_lines_reset_after_message() {
        let mut out = Vec::new();
        ColorReporter::new(&mut out)
            .emit(Severity::Error, "memout.txt is wrong")
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\x1b[91m[FAIL] memout.txt is wrong"));
        assert!(text.ends_with("\x1b[0m\n"));
    }

    #[test]
    fn json_lines_parse_back() {
        let mut out = Vec::new();
        {
            let mut r = JsonReporter::new(&mut out);
            r.emit(Severity::Info, "Execute \"sim\"").unwrap();
            r.emit(Severity::Error, "at line 3").unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let values: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["severity"], "info");
        assert_eq!(values[0]["message"], "Execute \"sim\"");
        assert_eq!(values[1]["severity"], "error");
    }
}
