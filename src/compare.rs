use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

/// Padding line used to equalize lengths: one all-zero simulator word.
///
/// A legitimate all-zero data line is indistinguishable from padding, so an
/// over-long produced file ending in zero words compares equal to a
/// truncated one.
pub const PAD_LINE: &str = "00000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonResult {
    Pass,
    Mismatch {
        line: usize,
        expected: String,
        actual: String,
    },
    MissingFile,
}

impl ComparisonResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, ComparisonResult::Pass)
    }
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonResult::Pass => write!(f, "pass"),
            ComparisonResult::Mismatch {
                line,
                expected,
                actual,
            } => write!(f, "at line {line} found {actual} instead of {expected}"),
            ComparisonResult::MissingFile => write!(f, "file does not exist"),
        }
    }
}

/// Compares a produced file against its reference.
///
/// Lines are trimmed and lower-cased, the shorter side is padded with
/// [`PAD_LINE`], and the first differing line wins. A missing `actual` file
/// is [`ComparisonResult::MissingFile`]; any other read failure is an error.
pub fn compare(reference: &Path, actual: &Path) -> Result<ComparisonResult> {
    if !actual.exists() {
        return Ok(ComparisonResult::MissingFile);
    }
    let reference_text = read_text(reference)?;
    let actual_text = read_text(actual)?;
    Ok(compare_lines(&reference_text, &actual_text))
}

pub fn compare_lines(reference: &str, actual: &str) -> ComparisonResult {
    let mut expected = normalize(reference);
    let mut produced = normalize(actual);
    let len = expected.len().max(produced.len());
    expected.resize_with(len, || PAD_LINE.to_string());
    produced.resize_with(len, || PAD_LINE.to_string());

    match expected
        .into_iter()
        .zip(produced)
        .enumerate()
        .find(|(_, (e, a))| e != a)
    {
        Some((line, (expected, actual))) => ComparisonResult::Mismatch {
            line,
            expected,
            actual,
        },
        None => ComparisonResult::Pass,
    }
}

fn normalize(text: &str) -> Vec<String> {
    text.lines().map(|line| line.trim().to_lowercase()).collect()
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_pair(dir: &TempDir, reference: &str, actual: &str) -> (PathBuf, PathBuf) {
        let r = dir.path().join("memout.txt");
        let a = dir.path().join("test_memout.txt");
        fs::write(&r, reference).unwrap();
        fs::write(&a, actual).unwrap();
        (r, a)
    }

    fn random_words(count: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| format!("{:08X}\n", rng.gen::<u32>()))
            .collect()
    }

    #[test]
    fn identical_files_pass() {
        let dir = TempDir::new().unwrap();
        let words = random_words(256);
        let (r, a) = write_pair(&dir, &words, &words);
        assert_eq!(compare(&r, &a).unwrap(), ComparisonResult::Pass);
    }

    #[test]
    fn case_and_whitespace_are_ignored() {
        let dir = TempDir::new().unwrap();
        let words = random_words(64);
        let mangled: String = words
            .lines()
            .enumerate()
            .map(|(i, w)| {
                if i % 2 == 0 {
                    format!("  {}\t\r\n", w.to_lowercase())
                } else {
                    format!("{w}   \n")
                }
            })
            .collect();
        let (r, a) = write_pair(&dir, &words, &mangled);
        assert_eq!(compare(&r, &a).unwrap(), ComparisonResult::Pass);
    }

    #[test]
    fn scenario_case_and_padding_whitespace() {
        assert_eq!(compare_lines("AAA\nBBB\n", "aaa\n bbb \n"), ComparisonResult::Pass);
    }

    #[test]
    fn short_actual_is_padded_with_zero_words() {
        assert_eq!(
            compare_lines("AAA\nBBB\n", "AAA\n"),
            ComparisonResult::Mismatch {
                line: 1,
                expected: "bbb".to_string(),
                actual: PAD_LINE.to_string(),
            }
        );
    }

    #[test]
    fn truncated_zero_tail_passes() {
        let reference = "0000000A\n00000000\n00000000\n";
        assert_eq!(compare_lines(reference, "0000000a\n"), ComparisonResult::Pass);
    }

    // Extra all-zero words in the produced file are indistinguishable from padding.
    #[test]
    fn overlong_zero_tail_passes() {
        let actual = "0000000a\n00000000\n00000000\n";
        assert_eq!(compare_lines("0000000A\n", actual), ComparisonResult::Pass);
    }

    #[test]
    fn overlong_nonzero_tail_fails() {
        assert_eq!(
            compare_lines("0000000A\n", "0000000a\n00000001\n"),
            ComparisonResult::Mismatch {
                line: 1,
                expected: PAD_LINE.to_string(),
                actual: "00000001".to_string(),
            }
        );
    }

    #[test]
    fn first_divergence_wins() {
        let result = compare_lines("a\nb\nc\nd\n", "a\nx\nc\ny\n");
        assert_eq!(
            result,
            ComparisonResult::Mismatch {
                line: 1,
                expected: "b".to_string(),
                actual: "x".to_string(),
            }
        );
        assert_eq!(result.to_string(), "at line 1 found x instead of b");
    }

    #[test]
    fn swapping_sides_keeps_the_index() {
        let words = random_words(32);
        let mut lines: Vec<&str> = words.lines().collect();
        let flipped = "DEADBEEF";
        let at = rand::thread_rng().gen_range(0..lines.len());
        let original = lines[at];
        if original.eq_ignore_ascii_case(flipped) {
            return;
        }
        lines[at] = flipped;
        let edited = lines.join("\n");

        let forward = compare_lines(&words, &edited);
        let backward = compare_lines(&edited, &words);
        match (forward, backward) {
            (
                ComparisonResult::Mismatch {
                    line: l1,
                    expected: e1,
                    actual: a1,
                },
                ComparisonResult::Mismatch {
                    line: l2,
                    expected: e2,
                    actual: a2,
                },
            ) => {
                assert_eq!(l1, at);
                assert_eq!(l1, l2);
                assert_eq!(e1, a2);
                assert_eq!(a1, e2);
            }
            other => panic!("expected two mismatches, got {other:?}"),
        }
    }

    #[test]
    fn empty_files_pass() {
        assert_eq!(compare_lines("", ""), ComparisonResult::Pass);
        assert_eq!(compare_lines("", "00000000\n"), ComparisonResult::Pass);
    }

    #[test]
    fn missing_actual_is_reported() {
        let dir = TempDir::new().unwrap();
        let r = dir.path().join("regout.txt");
        fs::write(&r, "0.000000\n").unwrap();
        let missing = dir.path().join("test_regout.txt");
        assert_eq!(compare(&r, &missing).unwrap(), ComparisonResult::MissingFile);
    }

    #[test]
    fn unreadable_reference_is_an_error() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("test_regout.txt");
        fs::write(&a, "0.000000\n").unwrap();
        let err = compare(&dir.path().join("regout.txt"), &a).unwrap_err();
        assert!(format!("{err:#}").contains("regout.txt"));
    }

    #[test]
    fn invalid_utf8_is_compared_lossily() {
        let dir = TempDir::new().unwrap();
        let r = dir.path().join("traceunit.txt");
        let a = dir.path().join("test_traceunit.txt");
        fs::write(&r, b"ok\n\xff\n").unwrap();
        fs::write(&a, b"OK\n\xff\n").unwrap();
        assert_eq!(compare(&r, &a).unwrap(), ComparisonResult::Pass);
    }
}
