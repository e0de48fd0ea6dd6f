//! Step and fixture models
//!
//! Nested step results plus the fixture records grouped into containers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Outcome;

/// Result of one step; children keep declaration order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub title: String,
    pub description: Option<String>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub outcome: Option<Outcome>,
    pub step_results: Vec<StepResult>,
    pub attachments: Vec<String>,
    pub parameters: BTreeMap<String, String>,
}

impl StepResult {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self
            .step_results
            .iter()
            .map(StepResult::node_count)
            .sum::<usize>()
    }

    /// Static shape of the step, without run data
    pub fn definition(&self) -> StepDefinition {
        StepDefinition {
            title: self.title.clone(),
            description: self.description.clone(),
            steps: self.step_results.iter().map(StepResult::definition).collect(),
        }
    }
}

/// Title/description tree stored on the autotest itself
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub title: String,
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
}

/// Whether a fixture runs before or after the test body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureKind {
    Before,
    After,
}

/// Result of one setup or teardown fixture
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureResult {
    pub title: String,
    pub description: Option<String>,
    pub outcome: Option<Outcome>,
    pub message: Option<String>,
    pub stacktrace: Option<String>,
    pub steps: Vec<StepResult>,
    pub attachments: Vec<String>,
    pub parameters: BTreeMap<String, String>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl FixtureResult {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            started_on: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Fixture rendered as a setup/teardown step of the owning test
    pub fn into_step_result(self) -> StepResult {
        StepResult {
            title: self.title,
            description: self.description,
            started_on: self.started_on,
            completed_on: self.completed_on,
            duration_ms: self.duration_ms,
            outcome: self.outcome,
            step_results: self.steps,
            attachments: self.attachments,
            parameters: self.parameters,
        }
    }
}

/// Field updates merged into a stored fixture when it stops
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FixtureUpdate {
    pub outcome: Option<Outcome>,
    pub duration_ms: Option<u64>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub stacktrace: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl FixtureUpdate {
    pub fn outcome(outcome: Outcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Default::default()
        }
    }

    /// Merge set fields into `fixture`, leaving unset fields untouched
    pub fn merge_into(self, fixture: &mut FixtureResult) {
        if let Some(outcome) = self.outcome {
            fixture.outcome = Some(outcome);
        }
        if let Some(duration) = self.duration_ms {
            fixture.duration_ms = duration;
        }
        if let Some(started) = self.started_on {
            fixture.started_on = Some(started);
        }
        fixture.completed_on = self.completed_on.or_else(|| Some(Utc::now()));
        if self.message.is_some() {
            fixture.message = self.message;
        }
        if self.stacktrace.is_some() {
            fixture.stacktrace = self.stacktrace;
        }
        fixture.attachments.extend(self.attachments);
    }
}

/// Group of before/after fixtures attached to a test or enclosing scope
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureContainer {
    pub id: String,
    pub name: Option<String>,
    pub befores: Vec<FixtureResult>,
    pub afters: Vec<FixtureResult>,
    pub children: Vec<String>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
}

impl FixtureContainer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_on: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn fixtures_mut(&mut self, kind: FixtureKind) -> &mut Vec<FixtureResult> {
        match kind {
            FixtureKind::Before => &mut self.befores,
            FixtureKind::After => &mut self.afters,
        }
    }
}

/// Field updates merged into a container
#[derive(Clone, Debug, Default)]
pub struct ContainerUpdate {
    pub name: Option<String>,
    pub children: Vec<String>,
    pub completed_on: Option<DateTime<Utc>>,
}

impl ContainerUpdate {
    pub fn merge_into(self, container: &mut FixtureContainer) {
        if self.name.is_some() {
            container.name = self.name;
        }
        for child in self.children {
            if !container.children.contains(&child) {
                container.children.push(child);
            }
        }
        if self.completed_on.is_some() {
            container.completed_on = self.completed_on;
        }
    }
}
