//! Test result parsing
//!
//! Reads the aggregate counters out of JUnit XML (`<testsuite>` /
//! `<testsuites>` attributes) and flat JSON summaries. Individual test cases
//! are not inspected.

use super::ReportError;
use crate::pipeline::{ReportFormat, ReportSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

static SUITE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<testsuite(\s[^>]*)?>").unwrap());
static SUITES_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<testsuites(\s[^>]*)?>").unwrap());
static ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_][\w.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Aggregate counters of a test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSummary {
    /// Passed tests
    #[serde(default)]
    pub passed: u32,
    /// Failed assertions
    #[serde(default)]
    pub failed: u32,
    /// Tests that errored
    #[serde(default)]
    pub errors: u32,
    /// Skipped tests
    #[serde(default)]
    pub skipped: u32,
}

impl TestSummary {
    /// Total number of tests
    #[must_use]
    pub fn total(&self) -> u32 {
        self.passed
            .saturating_add(self.failed)
            .saturating_add(self.errors)
            .saturating_add(self.skipped)
    }

    /// Returns true if any test failed or errored
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }

    /// Adds two summaries, or `None` if any counter overflows
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Some(Self {
            passed: self.passed.checked_add(rhs.passed)?,
            failed: self.failed.checked_add(rhs.failed)?,
            errors: self.errors.checked_add(rhs.errors)?,
            skipped: self.skipped.checked_add(rhs.skipped)?,
        })
    }
}

/// A parsed report file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Declared path
    pub path: PathBuf,
    /// Format it was parsed as
    pub format: ReportFormat,
    /// Counters
    pub summary: TestSummary,
}

/// Parses a declared report relative to the workspace
///
/// # Errors
///
/// Returns [`ReportError::NotFound`] if the file does not exist and
/// [`ReportError::Malformed`] if it cannot be interpreted.
pub fn parse(workspace: &Path, spec: &ReportSpec) -> Result<TestReport, ReportError> {
    let full = workspace.join(&spec.path);
    let display = spec.path.display().to_string();

    let content = match std::fs::read_to_string(&full) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReportError::NotFound { path: display });
        }
        Err(e) => {
            return Err(ReportError::Malformed {
                path: display,
                reason: e.to_string(),
            });
        }
    };

    let format = spec.format();
    let summary = match format {
        ReportFormat::Junit => parse_junit(&content),
        ReportFormat::Json => parse_json(&content),
    }
    .map_err(|reason| ReportError::Malformed {
        path: display,
        reason,
    })?;

    Ok(TestReport {
        path: spec.path.clone(),
        format,
        summary,
    })
}

/// Sums the counters of every `<testsuite>` element
///
/// A document with only a `<testsuites>` root is read from the root's
/// attributes instead.
///
/// # Errors
///
/// Returns a reason string when no suite element is present or a counter is
/// not a number.
pub fn parse_junit(xml: &str) -> Result<TestSummary, String> {
    let suites: Vec<&str> = SUITE_TAG
        .captures_iter(xml)
        .map(|c| c.get(1).map_or("", |m| m.as_str()))
        .collect();

    let tags = if suites.is_empty() {
        SUITES_TAG
            .captures_iter(xml)
            .take(1)
            .map(|c| c.get(1).map_or("", |m| m.as_str()))
            .collect()
    } else {
        suites
    };

    if tags.is_empty() {
        return Err("no <testsuite> or <testsuites> element".to_string());
    }

    let mut total = TestSummary::default();
    for attrs in tags {
        total = total
            .checked_add(suite_summary(attrs)?)
            .ok_or_else(|| "counter overflow".to_string())?;
    }
    Ok(total)
}

fn suite_summary(attrs: &str) -> Result<TestSummary, String> {
    let mut tests: u32 = 0;
    let mut failed: u32 = 0;
    let mut errors: u32 = 0;
    let mut skipped: u32 = 0;

    for cap in ATTRIBUTE.captures_iter(attrs) {
        let name = cap.get(1).map_or("", |m| m.as_str());
        let value = cap
            .get(2)
            .or_else(|| cap.get(3))
            .map_or("", |m| m.as_str());
        let slot = match name {
            "tests" => &mut tests,
            "failures" => &mut failed,
            "errors" => &mut errors,
            "skipped" | "disabled" => &mut skipped,
            _ => continue,
        };
        let count = value
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("attribute {name}=\"{value}\" is not a count"))?;
        *slot = slot
            .checked_add(count)
            .ok_or_else(|| format!("counter overflow in attribute {name}"))?;
    }

    let not_passed = failed
        .checked_add(errors)
        .and_then(|n| n.checked_add(skipped))
        .ok_or_else(|| "counter overflow".to_string())?;

    Ok(TestSummary {
        passed: tests.saturating_sub(not_passed),
        failed,
        errors,
        skipped,
    })
}

/// Reads a JSON object with `passed`, `failed`, `errors` and `skipped`
///
/// # Errors
///
/// Returns the JSON error text for anything that is not such an object.
pub fn parse_json(content: &str) -> Result<TestSummary, String> {
    serde_json::from_str(content).map_err(|e| e.to_string())
}
