//! Event listener
//!
//! Turns framework events into finished test results and hands them to the
//! delivery pipeline. One listener serves one run and owns its context.

mod events;

pub use events::Event;

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::BufRead;
use tracing::{debug, error, info, warn};

use crate::builder::{RunContext, StepFinish, StepHandle, StepStart};
use crate::delivery::AdapterManager;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{
    ContainerUpdate, FixtureContainer, FixtureKind, FixtureResult, FixtureUpdate, Outcome,
    TestResult,
};
use crate::params::{self, Parameters};

/// Counts of one replayed run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub tests: usize,
    pub reported: usize,
    pub skipped: usize,
    pub failed_delivery: usize,
    pub passed: usize,
    pub failed: usize,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tests ({} passed, {} failed): {} reported, {} skipped, {} not delivered",
            self.tests, self.passed, self.failed, self.reported, self.skipped, self.failed_delivery
        )
    }
}

struct ActiveTest {
    test_id: String,
    result: TestResult,
    reported: bool,
}

/// Per-run event listener
pub struct Listener {
    context: RunContext,
    manager: AdapterManager,
    filter: Option<HashSet<String>>,
    current: Option<ActiveTest>,
    summary: ReplaySummary,
    finished: bool,
}

impl Listener {
    pub fn new(manager: AdapterManager, max_depth: usize) -> Self {
        Self {
            context: RunContext::new(max_depth),
            manager,
            filter: None,
            current: None,
            summary: ReplaySummary::default(),
            finished: false,
        }
    }

    /// Report only tests whose external id is in `filter`
    pub fn with_filter(mut self, filter: Option<HashSet<String>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn summary(&self) -> &ReplaySummary {
        &self.summary
    }

    /// Process one event
    pub async fn handle(&mut self, event: Event) -> AdapterResult<()> {
        debug!(event = event.name(), "Handling event");
        match event {
            Event::TestStarted {
                test_id,
                metadata,
                parameters,
            } => {
                let result = metadata.resolve(&parameters)?;
                self.start_test(test_id, result);
            }
            Event::TestFinished {
                test_id,
                outcome,
                message,
                traces,
                duration_ms,
                attachments,
            } => {
                let Some(mut active) = self.current.take() else {
                    warn!(test = %test_id, "Finish for a test that was not started, ignoring");
                    return Ok(());
                };
                if active.test_id != test_id {
                    warn!(expected = %active.test_id, actual = %test_id, "Finish for a different test, ignoring");
                    self.current = Some(active);
                    return Ok(());
                }
                active.result.message = message;
                active.result.traces = traces;
                active.result.attachments.extend(attachments);
                self.finish_test(active, outcome, duration_ms).await;
            }
            Event::FixtureStarted {
                fixture_id,
                test_id,
                kind,
                title,
                description,
                parameters,
            } => {
                let mut fixture = FixtureResult::new(title).with_parameters(parameters);
                fixture.description = description;
                match kind {
                    FixtureKind::Before => {
                        self.context
                            .fixtures
                            .start_before_fixture(&test_id, &fixture_id, fixture);
                    }
                    FixtureKind::After => {
                        self.context
                            .fixtures
                            .start_after_fixture(&test_id, &fixture_id, fixture);
                    }
                }
            }
            Event::FixtureFinished {
                fixture_id,
                kind,
                outcome,
                message,
                stacktrace,
                duration_ms,
            } => {
                let update = FixtureUpdate {
                    outcome: Some(outcome),
                    duration_ms,
                    message,
                    stacktrace,
                    ..Default::default()
                };
                match kind {
                    FixtureKind::Before => {
                        self.context.fixtures.stop_before_fixture(&fixture_id, update);
                    }
                    FixtureKind::After => {
                        self.context.fixtures.stop_after_fixture(&fixture_id, update);
                    }
                }
            }
            Event::StepStarted {
                step_id,
                title,
                description,
                parameters,
            } => {
                let start = step_start(title, description, parameters)?;
                self.context.steps.start_step(step_id, start);
            }
            Event::StepFinished {
                step_id,
                outcome,
                duration_ms,
                attachments,
            } => {
                let finish = StepFinish {
                    outcome,
                    duration_ms,
                    attachments,
                    ..Default::default()
                };
                match step_id {
                    Some(key) => self.context.steps.finish_step(&StepHandle::new(key), finish),
                    None => self.context.steps.finish_last_step(finish),
                };
            }
            Event::RunFinished => self.finish().await,
        }
        Ok(())
    }

    fn start_test(&mut self, test_id: String, result: TestResult) {
        if let Some(previous) = self.current.take() {
            warn!(test = %previous.test_id, "Test started before the previous one finished, dropping it");
            self.context.fixtures.stop_container(&previous.test_id);
            self.context.steps.drain_and_reset();
        }

        let reported = self
            .filter
            .as_ref()
            .map_or(true, |ids| ids.contains(&result.external_id));
        if !reported {
            debug!(test = %test_id, external_id = %result.external_id, "Test is not part of the run, skipping");
        }

        let mut container = FixtureContainer::new(test_id.clone());
        container.name = Some(result.autotest_name.clone());
        self.context.fixtures.start_container(container);
        self.context.fixtures.update_container(
            Some(&test_id),
            ContainerUpdate {
                children: vec![result.external_id.clone()],
                ..Default::default()
            },
        );

        self.current = Some(ActiveTest {
            test_id,
            result,
            reported,
        });
    }

    async fn finish_test(&mut self, active: ActiveTest, outcome: Outcome, duration_ms: Option<u64>) {
        let ActiveTest {
            test_id,
            mut result,
            reported,
        } = active;

        let container = self.context.fixtures.stop_container(&test_id);
        let drained = self.context.steps.drain_and_reset();
        let (befores, afters) = container
            .map(|c| (c.befores, c.afters))
            .unwrap_or_default();

        let body_duration = duration_ms.unwrap_or_else(|| {
            result
                .started_on
                .map(|started| (Utc::now() - started).num_milliseconds().max(0) as u64)
                .unwrap_or(0)
        });
        result.add_duration(body_duration);
        for fixture in befores.iter().chain(afters.iter()) {
            result.add_duration(fixture.duration_ms);
        }

        result.setup_results = befores
            .into_iter()
            .map(FixtureResult::into_step_result)
            .chain(drained.setup)
            .collect();
        result.step_results = drained.body;
        result.teardown_results = afters
            .into_iter()
            .map(FixtureResult::into_step_result)
            .chain(drained.teardown)
            .collect();
        result.finish(outcome);

        self.summary.tests += 1;
        if outcome.is_success() {
            self.summary.passed += 1;
        } else if outcome == Outcome::Failed {
            self.summary.failed += 1;
        }

        if !reported {
            self.summary.skipped += 1;
            return;
        }

        info!("{} {}", outcome.symbol(), result);
        match self.manager.write_test(&result).await {
            Ok(()) => self.summary.reported += 1,
            Err(e) => {
                error!(test = %result.external_id, error = %e, "Failed to deliver test result");
                self.summary.failed_delivery += 1;
            }
        }
    }

    /// Flush pending deliveries. Runs once; later calls do nothing.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(active) = self.current.take() {
            warn!(test = %active.test_id, "Run finished while a test was still running, dropping it");
        }
        if let Err(e) = self.manager.teardown().await {
            error!(error = %e, "Failed to flush pending results");
        }
    }

    /// Feed a JSON-lines event stream through the listener
    pub async fn replay(&mut self, reader: impl BufRead) -> AdapterResult<ReplaySummary> {
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).map_err(|source| {
                AdapterError::Event {
                    line: index + 1,
                    source,
                }
            })?;
            self.handle(event).await?;
        }
        self.finish().await;
        Ok(self.summary.clone())
    }
}

fn step_start(
    title: String,
    description: Option<String>,
    parameters: BTreeMap<String, String>,
) -> AdapterResult<StepStart> {
    let values: Parameters = parameters
        .iter()
        .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
        .collect();
    let title = params::resolve(&title, &values)?;
    let description = params::resolve_opt(description.as_deref(), &values)?;

    let mut start = StepStart::new(title).with_parameters(parameters);
    start.description = description;
    Ok(start)
}
