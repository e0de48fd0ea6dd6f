//! Test framework events
//!
//! One JSON object per line, tagged by `event`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{FixtureKind, Outcome};
use crate::params::{Parameters, TestMetadata};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TestStarted {
        test_id: String,
        metadata: TestMetadata,
        #[serde(default)]
        parameters: Parameters,
    },
    TestFinished {
        test_id: String,
        outcome: Outcome,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        traces: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        attachments: Vec<String>,
    },
    FixtureStarted {
        fixture_id: String,
        test_id: String,
        kind: FixtureKind,
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    FixtureFinished {
        fixture_id: String,
        kind: FixtureKind,
        outcome: Outcome,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        stacktrace: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    StepStarted {
        #[serde(default)]
        step_id: Option<String>,
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    StepFinished {
        #[serde(default)]
        step_id: Option<String>,
        #[serde(default)]
        outcome: Option<Outcome>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        attachments: Vec<String>,
    },
    RunFinished,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::TestStarted { .. } => "test_started",
            Event::TestFinished { .. } => "test_finished",
            Event::FixtureStarted { .. } => "fixture_started",
            Event::FixtureFinished { .. } => "fixture_finished",
            Event::StepStarted { .. } => "step_started",
            Event::StepFinished { .. } => "step_finished",
            Event::RunFinished => "run_finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_events() {
        let event: Event = serde_json::from_str(
            r#"{"event":"test_started","test_id":"t1","metadata":{"name":"test_login","external_id":"login_{user}"},"parameters":{"user":"alice"}}"#,
        )
        .unwrap();
        match event {
            Event::TestStarted {
                test_id,
                metadata,
                parameters,
            } => {
                assert_eq!(test_id, "t1");
                assert_eq!(metadata.external_id.as_deref(), Some("login_{user}"));
                assert_eq!(parameters["user"], "alice");
            }
            other => panic!("unexpected event {}", other.name()),
        }

        let event: Event =
            serde_json::from_str(r#"{"event":"fixture_started","fixture_id":"f1","test_id":"t1","kind":"before","title":"db"}"#)
                .unwrap();
        assert_eq!(event.name(), "fixture_started");

        let event: Event = serde_json::from_str(r#"{"event":"step_finished"}"#).unwrap();
        assert!(matches!(event, Event::StepFinished { step_id: None, .. }));

        let event: Event = serde_json::from_str(r#"{"event":"run_finished"}"#).unwrap();
        assert_eq!(event.name(), "run_finished");
    }
}
