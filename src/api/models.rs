//! Wire payloads of the test management REST API
//!
//! Request and response bodies are camelCase JSON. Converters build request
//! payloads from the result model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Label, Link, LinkType, Outcome, StepDefinition, StepResult, TestResult};

/// Link in request and response bodies
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPost {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub link_type: Option<LinkType>,
    #[serde(default)]
    pub has_info: bool,
}

impl From<&Link> for LinkPost {
    fn from(link: &Link) -> Self {
        Self {
            url: link.url.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            link_type: link.link_type,
            has_info: link.title.is_some() || link.description.is_some(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelPost {
    pub name: String,
}

impl From<&Label> for LabelPost {
    fn from(label: &Label) -> Self {
        Self {
            name: label.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPut {
    pub id: String,
}

/// Step shape stored on the autotest
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutotestStep {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<AutotestStep>,
}

impl From<&StepDefinition> for AutotestStep {
    fn from(definition: &StepDefinition) -> Self {
        Self {
            title: definition.title.clone(),
            description: definition.description.clone(),
            steps: definition.steps.iter().map(AutotestStep::from).collect(),
        }
    }
}

fn step_shapes(results: &[StepResult]) -> Vec<AutotestStep> {
    results
        .iter()
        .map(|step| AutotestStep::from(&step.definition()))
        .collect()
}

/// Autotest as returned by the service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutotestModel {
    pub id: String,
    pub external_id: String,
    pub project_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub classname: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub steps: Vec<AutotestStep>,
    pub setup: Vec<AutotestStep>,
    pub teardown: Vec<AutotestStep>,
    pub links: Vec<LinkPost>,
    pub labels: Vec<LabelPost>,
    pub is_flaky: Option<bool>,
}

/// Create payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutotestPost {
    pub external_id: String,
    pub project_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub classname: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub steps: Vec<AutotestStep>,
    pub setup: Vec<AutotestStep>,
    pub teardown: Vec<AutotestStep>,
    pub links: Vec<LinkPost>,
    pub labels: Vec<LabelPost>,
    pub should_create_work_item: bool,
    /// Work items linked in the same call, used by bulk creation
    pub work_item_ids_for_link_with_auto_test: Vec<String>,
}

impl AutotestPost {
    pub fn from_result(result: &TestResult, project_id: &str) -> Self {
        Self {
            external_id: result.external_id.clone(),
            project_id: project_id.to_string(),
            name: result.autotest_name.clone(),
            namespace: result.namespace.clone(),
            classname: result.classname.clone(),
            title: result.title.clone(),
            description: result.description.clone(),
            steps: step_shapes(&result.step_results),
            setup: step_shapes(&result.setup_results),
            teardown: step_shapes(&result.teardown_results),
            links: result.links.iter().map(LinkPost::from).collect(),
            labels: result.labels.iter().map(LabelPost::from).collect(),
            should_create_work_item: false,
            work_item_ids_for_link_with_auto_test: Vec::new(),
        }
    }

    /// Link work items in the create call itself
    pub fn with_work_items(mut self, work_item_ids: &[String]) -> Self {
        self.work_item_ids_for_link_with_auto_test = work_item_ids.to_vec();
        self
    }
}

/// Update payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutotestPut {
    pub id: Option<String>,
    pub external_id: String,
    pub project_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub classname: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub steps: Vec<AutotestStep>,
    pub setup: Vec<AutotestStep>,
    pub teardown: Vec<AutotestStep>,
    pub links: Vec<LinkPost>,
    pub labels: Vec<LabelPost>,
    pub is_flaky: Option<bool>,
}

impl AutotestPut {
    /// Freshly computed metadata, sent when the run passed
    pub fn from_result(result: &TestResult, project_id: &str) -> Self {
        Self {
            id: None,
            external_id: result.external_id.clone(),
            project_id: project_id.to_string(),
            name: result.autotest_name.clone(),
            namespace: result.namespace.clone(),
            classname: result.classname.clone(),
            title: result.title.clone(),
            description: result.description.clone(),
            steps: step_shapes(&result.step_results),
            setup: step_shapes(&result.setup_results),
            teardown: step_shapes(&result.teardown_results),
            links: result.links.iter().map(LinkPost::from).collect(),
            labels: result.labels.iter().map(LabelPost::from).collect(),
            is_flaky: None,
        }
    }

    /// The remote record's own fields, sent when the run did not pass
    pub fn from_existing(existing: &AutotestModel) -> Self {
        Self {
            id: Some(existing.id.clone()),
            external_id: existing.external_id.clone(),
            project_id: existing.project_id.clone(),
            name: existing.name.clone(),
            namespace: existing.namespace.clone(),
            classname: existing.classname.clone(),
            title: existing.title.clone(),
            description: existing.description.clone(),
            steps: existing.steps.clone(),
            setup: existing.setup.clone(),
            teardown: existing.teardown.clone(),
            links: existing.links.clone(),
            labels: existing.labels.clone(),
            is_flaky: existing.is_flaky,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Payload for a finished result against an existing record
    pub fn for_outcome(result: &TestResult, existing: &AutotestModel, project_id: &str) -> Self {
        if result.outcome == Some(Outcome::Passed) {
            Self::from_result(result, project_id).with_id(existing.id.clone())
        } else {
            Self::from_existing(existing)
        }
    }
}

/// Step result inside a submitted test result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultPost {
    pub title: String,
    pub description: Option<String>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub duration: u64,
    pub outcome: Option<Outcome>,
    pub step_results: Vec<StepResultPost>,
    pub attachments: Vec<AttachmentPut>,
    pub parameters: BTreeMap<String, String>,
}

impl From<&StepResult> for StepResultPost {
    fn from(step: &StepResult) -> Self {
        Self {
            title: step.title.clone(),
            description: step.description.clone(),
            started_on: step.started_on,
            completed_on: step.completed_on,
            duration: step.duration_ms,
            outcome: step.outcome,
            step_results: step.step_results.iter().map(StepResultPost::from).collect(),
            attachments: attachments(&step.attachments),
            parameters: step.parameters.clone(),
        }
    }
}

fn attachments(ids: &[String]) -> Vec<AttachmentPut> {
    ids.iter()
        .map(|id| AttachmentPut { id: id.clone() })
        .collect()
}

/// Result of one test execution, submitted against a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultPost {
    pub configuration_id: String,
    pub auto_test_external_id: String,
    pub outcome: Outcome,
    pub step_results: Vec<StepResultPost>,
    pub setup_results: Vec<StepResultPost>,
    pub teardown_results: Vec<StepResultPost>,
    pub links: Vec<LinkPost>,
    pub traces: Option<String>,
    pub message: Option<String>,
    pub attachments: Vec<AttachmentPut>,
    pub parameters: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub duration: u64,
}

impl TestResultPost {
    pub fn from_result(result: &TestResult, configuration_id: &str) -> Self {
        let convert = |steps: &[StepResult]| steps.iter().map(StepResultPost::from).collect();
        Self {
            configuration_id: configuration_id.to_string(),
            auto_test_external_id: result.external_id.clone(),
            outcome: result.outcome.unwrap_or(Outcome::Blocked),
            step_results: convert(&result.step_results),
            setup_results: convert(&result.setup_results),
            teardown_results: convert(&result.teardown_results),
            links: result.result_links.iter().map(LinkPost::from).collect(),
            traces: result.traces.clone(),
            message: result.message.clone(),
            attachments: attachments(&result.attachments),
            parameters: result.parameters.clone(),
            properties: result.properties.clone(),
            started_on: result.started_on,
            completed_on: result.completed_on,
            duration: result.duration_ms,
        }
    }
}

/// Test run creation request
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TestRunPost {
    pub project_id: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdModel {
    pub id: String,
}

/// Test run as returned by the service, reduced to what the adapter reads
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct TestRunModel {
    pub id: String,
    pub test_results: Vec<TestRunResultModel>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct TestRunResultModel {
    pub configuration_id: String,
    pub auto_test: Option<AutotestModel>,
}
