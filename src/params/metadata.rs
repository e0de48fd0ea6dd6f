//! Test metadata templates
//!
//! Metadata declared on a test function may reference its parameters. Each
//! field is resolved independently against the parameters of one invocation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::template::{resolve, resolve_opt, stringify, Parameters, SubstitutionError};
use crate::models::{Label, Link, TestResult};

/// Metadata of a test function, before parameter substitution
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestMetadata {
    /// Function or node name reported by the framework
    pub name: String,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub namespace: Option<String>,
    pub classname: Option<String>,
    pub links: Vec<Link>,
    pub labels: Vec<String>,
    pub work_item_ids: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

impl TestMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build the initial result record for one invocation
    pub fn resolve(&self, params: &Parameters) -> Result<TestResult, SubstitutionError> {
        let namespace = resolve_opt(self.namespace.as_deref(), params)?;
        let classname = resolve_opt(self.classname.as_deref(), params)?;

        let external_id = match &self.external_id {
            Some(template) => resolve(template, params)?,
            None => TestResult::derive_external_id(
                namespace.as_deref().unwrap_or_default(),
                &self.name,
            ),
        };
        let autotest_name = match &self.display_name {
            Some(template) => resolve(template, params)?,
            None => self.name.clone(),
        };

        let mut result = TestResult::new(external_id, autotest_name);
        result.namespace = namespace;
        result.classname = classname;
        result.title = resolve_opt(self.title.as_deref(), params)?;
        result.description = resolve_opt(self.description.as_deref(), params)?;
        result.links = self
            .links
            .iter()
            .map(|link| resolve_link(link, params))
            .collect::<Result<_, _>>()?;
        result.labels = self
            .labels
            .iter()
            .map(|label| resolve(label, params).map(Label::new))
            .collect::<Result<_, _>>()?;
        result.work_item_ids = self
            .work_item_ids
            .iter()
            .map(|id| resolve(id, params))
            .collect::<Result<_, _>>()?;
        result.properties = self.properties.clone();
        result.parameters = stringify(params);
        Ok(result)
    }
}

fn resolve_link(link: &Link, params: &Parameters) -> Result<Link, SubstitutionError> {
    Ok(Link {
        url: resolve(&link.url, params)?,
        title: resolve_opt(link.title.as_deref(), params)?,
        description: resolve_opt(link.description.as_deref(), params)?,
        link_type: link.link_type,
    })
}
