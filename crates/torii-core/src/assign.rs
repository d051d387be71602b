//! Bundle traversal and profile assignment.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::issue::{Issue, IssueFactory};
use crate::mapping::{MappingTable, ProfileRule};
use crate::path::{self, AccessError, Step};

/// Terminology system whose codes drive the per-code profile lookup.
pub const LOINC_SYSTEM: &str = "http://loinc.org";

/// Walks bundle entries and annotates recognized resources with their
/// validation profile.
pub struct ProfileAssigner<'a> {
    mapping: &'a MappingTable,
    issues: &'a IssueFactory,
}

impl<'a> ProfileAssigner<'a> {
    pub fn new(mapping: &'a MappingTable, issues: &'a IssueFactory) -> Self {
        Self { mapping, issues }
    }

    /// Processes every entry in order. A failure in one entry becomes an
    /// issue and never stops the remaining entries; issue locations always
    /// cite the entry's position in the original sequence.
    pub fn annotate_bundle(&self, bundle: &mut Value) -> Vec<Issue> {
        let Some(entries) = bundle.get_mut("entry").and_then(Value::as_array_mut) else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        for (index, entry) in entries.iter_mut().enumerate() {
            match self.annotate_entry(entry, index) {
                Ok(Some(issue)) => issues.push(issue),
                Ok(None) => {}
                Err(error) => {
                    let location =
                        format!("Bundle.entry[{index}].{}", path::render(&error.path));
                    issues.push(self.issues.access_failure(&error, location));
                }
            }
        }
        issues
    }

    fn annotate_entry(
        &self,
        entry: &mut Value,
        index: usize,
    ) -> Result<Option<Issue>, AccessError> {
        let resource = path::get_mut(entry, &[Step::key("resource")])?;
        self.annotate_resource(resource, index)
            .map_err(|error| error.prefixed(Step::key("resource")))
    }

    fn annotate_resource(
        &self,
        resource: &mut Value,
        index: usize,
    ) -> Result<Option<Issue>, AccessError> {
        let resource_type = match path::get(resource, &[Step::key("resourceType")])? {
            Value::String(name) => name.clone(),
            other => {
                tracing::debug!(
                    found = path::kind_of(other),
                    "resourceType is not a string, leaving entry untouched"
                );
                return Ok(None);
            }
        };

        match self.mapping.rule(&resource_type) {
            None => {
                tracing::debug!(resource_type = %resource_type, "no mapping rule");
                Ok(None)
            }
            Some(ProfileRule::Profile(profile)) => {
                write_profile(resource, profile)?;
                tracing::debug!(resource_type = %resource_type, profile = %profile, "profile assigned");
                Ok(None)
            }
            Some(ProfileRule::PerCode(codes)) => {
                self.annotate_coded(resource, &resource_type, codes, index)
            }
        }
    }

    fn annotate_coded(
        &self,
        resource: &mut Value,
        resource_type: &str,
        codes: &BTreeMap<String, String>,
        index: usize,
    ) -> Result<Option<Issue>, AccessError> {
        let codings = path::get_array(resource, &[Step::key("code"), Step::key("coding")])?;

        // The first coding on the reference terminology decides, even when
        // it carries no code.
        let mut code: Option<String> = None;
        for coding in codings {
            if coding.get("system").and_then(Value::as_str) == Some(LOINC_SYSTEM) {
                code = coding.get("code").and_then(Value::as_str).map(str::to_owned);
                break;
            }
        }

        match code.as_deref().and_then(|code| codes.get(code)) {
            Some(profile) => {
                write_profile(resource, profile)?;
                tracing::debug!(resource_type = %resource_type, profile = %profile, "profile assigned");
                Ok(None)
            }
            None => {
                // A miss leaves the resource untouched; the prior profile is
                // read defensively because it is purely informational.
                let existing = path::get(
                    resource,
                    &[Step::key("meta"), Step::key("profile"), Step::index(0)],
                )
                .ok()
                .and_then(|value| value.as_str().map(str::to_owned));
                tracing::debug!(resource_type = %resource_type, code = ?code, "no matching profile");
                Ok(Some(self.issues.mapping_miss(
                    index,
                    resource_type,
                    code.as_deref(),
                    LOINC_SYSTEM,
                    existing.as_deref(),
                )))
            }
        }
    }
}

/// Sets `meta.profile` to exactly the assigned profile, creating `meta`
/// when the resource has none. Paths in errors are relative to the
/// resource.
fn write_profile(resource: &mut Value, profile: &str) -> Result<(), AccessError> {
    let Some(fields) = resource.as_object_mut() else {
        return Err(AccessError::unexpected_type(
            Vec::new(),
            "object",
            path::kind_of(resource),
        ));
    };
    let meta = fields
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    match meta.as_object_mut() {
        Some(meta) => {
            meta.insert("profile".to_string(), json!([profile]));
            Ok(())
        }
        None => Err(AccessError::unexpected_type(
            vec![Step::key("meta")],
            "object",
            path::kind_of(meta),
        )),
    }
}
