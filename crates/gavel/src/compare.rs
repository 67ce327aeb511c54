//! Output comparison
//!
//! A verdict between `Correct` and `WrongAnswer` hinges on comparing the
//! program's output against the expected answer. The comparator is
//! pluggable so an external grader can swap in partial-credit or
//! float-tolerant logic; the built-in modes cover exact matching and the
//! usual whitespace-insensitive contest styles.

use serde::{Deserialize, Serialize};

/// Decides whether an actual output matches the expected answer
pub trait OutputComparator: Send + Sync {
    fn compare(&self, actual: &[u8], expected: &[u8]) -> bool;
}

/// Byte-for-byte equality
#[derive(Debug, Clone, Copy)]
pub struct ExactComparator;

impl OutputComparator for ExactComparator {
    fn compare(&self, actual: &[u8], expected: &[u8]) -> bool {
        actual == expected
    }
}

/// Whitespace-token equality: any run of whitespace separates tokens, and
/// only the token sequences must match. The usual mode for numeric output.
#[derive(Debug, Clone, Copy)]
pub struct TokenComparator;

impl OutputComparator for TokenComparator {
    fn compare(&self, actual: &[u8], expected: &[u8]) -> bool {
        let actual = String::from_utf8_lossy(actual);
        let expected = String::from_utf8_lossy(expected);

        actual
            .split_ascii_whitespace()
            .eq(expected.split_ascii_whitespace())
    }
}

/// Line-wise equality ignoring trailing whitespace on each line and
/// trailing blank lines. Preserves line structure, unlike token mode.
#[derive(Debug, Clone, Copy)]
pub struct LineComparator;

impl OutputComparator for LineComparator {
    fn compare(&self, actual: &[u8], expected: &[u8]) -> bool {
        let actual = String::from_utf8_lossy(actual);
        let expected = String::from_utf8_lossy(expected);

        let mut actual: Vec<&str> = actual.lines().map(str::trim_end).collect();
        let mut expected: Vec<&str> = expected.lines().map(str::trim_end).collect();

        while actual.last() == Some(&"") {
            actual.pop();
        }
        while expected.last() == Some(&"") {
            expected.pop();
        }

        actual == expected
    }
}

/// Built-in comparison modes, selectable per test case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparatorKind {
    /// Byte-for-byte equality
    Exact,

    /// Whitespace-token equality
    Token,

    /// Line-wise equality, trailing-whitespace insensitive
    #[default]
    Line,
}

impl ComparatorKind {
    /// Instantiate the comparator for this mode
    pub fn instance(self) -> Box<dyn OutputComparator> {
        match self {
            ComparatorKind::Exact => Box::new(ExactComparator),
            ComparatorKind::Token => Box::new(TokenComparator),
            ComparatorKind::Line => Box::new(LineComparator),
        }
    }
}
