//! Result model for test execution reporting
//!
//! In-memory records for one test execution and for the steps and fixtures
//! nested inside it.

mod step;
mod test_result;

pub use step::{
    ContainerUpdate, FixtureContainer, FixtureKind, FixtureResult, FixtureUpdate, StepDefinition,
    StepResult,
};
pub use test_result::{Label, Link, LinkType, Outcome, TestResult};
