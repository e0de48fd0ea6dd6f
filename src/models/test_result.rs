//! Test result models
//!
//! Defines the outcome type and the record for one test execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::StepResult;

/// Outcome of a test, step or fixture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Blocked,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Passed => "✓",
            Outcome::Failed => "✗",
            Outcome::Skipped => "○",
            Outcome::Blocked => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    /// Parse a framework-reported outcome, accepting common aliases
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "passed" | "pass" | "success" => Some(Outcome::Passed),
            "failed" | "fail" | "failure" | "error" => Some(Outcome::Failed),
            "skipped" | "skip" => Some(Outcome::Skipped),
            "blocked" => Some(Outcome::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "Passed"),
            Outcome::Failed => write!(f, "Failed"),
            Outcome::Skipped => write!(f, "Skipped"),
            Outcome::Blocked => write!(f, "Blocked"),
        }
    }
}

/// Kind of an external link attached to a test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Related,
    BlockedBy,
    Defect,
    Issue,
    Requirement,
    Repository,
}

/// External link attached to an autotest or to one result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link_type: Option<LinkType>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            link_type: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_type(mut self, link_type: LinkType) -> Self {
        self.link_type = Some(link_type);
        self
    }
}

/// Label attached to an autotest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One concrete execution of a test.
///
/// Created when the test begins, mutated by every step and fixture close
/// event that targets it, and handed to the delivery pipeline when the test
/// ends.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestResult {
    pub external_id: String,
    pub autotest_name: String,
    pub namespace: Option<String>,
    pub classname: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
    pub links: Vec<Link>,
    pub labels: Vec<Label>,
    pub work_item_ids: Vec<String>,
    pub step_results: Vec<StepResult>,
    pub setup_results: Vec<StepResult>,
    pub teardown_results: Vec<StepResult>,
    pub result_links: Vec<Link>,
    pub duration_ms: u64,
    pub outcome: Option<Outcome>,
    pub traces: Option<String>,
    pub message: Option<String>,
    pub attachments: Vec<String>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
}

impl TestResult {
    pub fn new(external_id: impl Into<String>, autotest_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            autotest_name: autotest_name.into(),
            started_on: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Stable identity for a test that declares no explicit external id
    pub fn derive_external_id(namespace: &str, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update(name.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Accumulate a duration reported by the framework for one closed node
    pub fn add_duration(&mut self, duration_ms: u64) {
        self.duration_ms += duration_ms;
    }

    /// Record the outcome of a finish event; the last one wins
    pub fn finish(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
        self.completed_on = Some(Utc::now());
    }

    /// Total number of step nodes across body, setup and teardown trees
    pub fn node_count(&self) -> usize {
        self.step_results
            .iter()
            .chain(&self.setup_results)
            .chain(&self.teardown_results)
            .map(StepResult::node_count)
            .sum()
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = self.outcome.map(|o| o.symbol()).unwrap_or("?");
        write!(
            f,
            "{} {} [{}ms]",
            symbol, self.autotest_name, self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_str() {
        assert_eq!(Outcome::from_str("passed"), Some(Outcome::Passed));
        assert_eq!(Outcome::from_str("ERROR"), Some(Outcome::Failed));
        assert_eq!(Outcome::from_str("Blocked"), Some(Outcome::Blocked));
        assert_eq!(Outcome::from_str("unknown"), None);
    }

    #[test]
    fn test_outcome_serializes_capitalized() {
        let json = serde_json::to_string(&Outcome::Skipped).unwrap();
        assert_eq!(json, "\"Skipped\"");
    }

    #[test]
    fn test_derive_external_id_is_stable() {
        let a = TestResult::derive_external_id("tests.api", "test_login");
        let b = TestResult::derive_external_id("tests.api", "test_login");
        let c = TestResult::derive_external_id("tests.api", "test_logout");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_duration_is_sum_of_reported_durations() {
        let mut result = TestResult::new("ext", "test");
        result.add_duration(120);
        result.add_duration(30);
        assert_eq!(result.duration_ms, 150);
    }

    #[test]
    fn test_last_finish_wins() {
        let mut result = TestResult::new("ext", "test");
        result.finish(Outcome::Passed);
        result.finish(Outcome::Failed);
        assert_eq!(result.outcome, Some(Outcome::Failed));
        assert!(result.completed_on.is_some());
    }
}
