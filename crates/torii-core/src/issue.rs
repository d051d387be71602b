//! OperationOutcome issue construction.
//!
//! The three preprocessing categories (mapping miss, parse failure, empty
//! bundle) take their severity from configuration; failures talking to the
//! validation engine are always plain errors.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::path::AccessError;

/// Tag prefixed to every diagnostic produced here, so gateway issues stay
/// distinguishable from issues returned by the validation engine.
pub const DIAGNOSTIC_SOURCE: &str = "VALIDATION_PROFILE_MAPPING";

/// FHIR issue severities, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
    Fatal,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Information => "information",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
            IssueSeverity::Fatal => "fatal",
        }
    }

    /// Maps a configured level index onto a severity.
    pub fn from_level(level: u8) -> Result<Self, InvalidSeverityLevel> {
        match level {
            0 => Ok(IssueSeverity::Information),
            1 => Ok(IssueSeverity::Warning),
            2 => Ok(IssueSeverity::Error),
            3 => Ok(IssueSeverity::Fatal),
            other => Err(InvalidSeverityLevel(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("severity level {0} out of range (expected 0-3)")]
pub struct InvalidSeverityLevel(pub u8);

/// Severities for the configurable issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityConfig {
    pub mapping_issue: IssueSeverity,
    pub parsing_issue: IssueSeverity,
    pub empty_bundle_issue: IssueSeverity,
}

impl SeverityConfig {
    /// Builds the table from level indices, rejecting anything outside 0-3
    /// so a bad deployment fails at startup rather than mid-request.
    pub fn from_levels(
        mapping: u8,
        parsing: u8,
        empty_bundle: u8,
    ) -> Result<Self, InvalidSeverityLevel> {
        Ok(Self {
            mapping_issue: IssueSeverity::from_level(mapping)?,
            parsing_issue: IssueSeverity::from_level(parsing)?,
            empty_bundle_issue: IssueSeverity::from_level(empty_bundle)?,
        })
    }
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            mapping_issue: IssueSeverity::Warning,
            parsing_issue: IssueSeverity::Error,
            empty_bundle_issue: IssueSeverity::Warning,
        }
    }
}

/// One diagnostic entry of an OperationOutcome report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub code: &'static str,
    pub diagnostics: String,
    /// FHIRPath-like location, rendered as a one-element array in FHIR JSON.
    pub location: Option<String>,
}

impl Issue {
    pub fn to_json(&self) -> Value {
        let mut issue = json!({
            "severity": self.severity.as_str(),
            "code": self.code,
            "diagnostics": self.diagnostics,
        });
        if let Some(location) = &self.location {
            issue["location"] = json!([location]);
        }
        issue
    }
}

/// Wraps issue values into an OperationOutcome document.
pub fn operation_outcome(issues: Vec<Value>) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": issues,
    })
}

/// Builds issues for the event categories the pipeline can hit.
#[derive(Debug, Clone, Copy)]
pub struct IssueFactory {
    severities: SeverityConfig,
}

impl IssueFactory {
    pub fn new(severities: SeverityConfig) -> Self {
        Self { severities }
    }

    /// No profile resolvable for a coded resource. Reports the code that
    /// was looked up and whatever profile the resource already carried.
    pub fn mapping_miss(
        &self,
        entry_index: usize,
        resource_type: &str,
        code: Option<&str>,
        system: &str,
        existing_profile: Option<&str>,
    ) -> Issue {
        Issue {
            severity: self.severities.mapping_issue,
            code: "not-supported",
            diagnostics: format!(
                "{DIAGNOSTIC_SOURCE}: {resource_type}.code.coding:loinc: \
                 no matching profile for code {} with system {system} and profile {}",
                code.unwrap_or("none"),
                existing_profile.unwrap_or("none"),
            ),
            location: Some(format!(
                "Bundle.entry[{entry_index}].resource.ofType({resource_type}).code.coding[0]"
            )),
        }
    }

    /// Input could not be parsed in the declared wire format.
    pub fn parse_failure(&self, detail: &str) -> Issue {
        Issue {
            severity: self.severities.parsing_issue,
            code: "processing",
            diagnostics: format!("{DIAGNOSTIC_SOURCE}: Data could not be parsed: {detail}"),
            location: None,
        }
    }

    /// A tracked lookup failed while walking an entry.
    pub fn access_failure(&self, error: &AccessError, location: String) -> Issue {
        Issue {
            severity: self.severities.parsing_issue,
            code: "processing",
            diagnostics: format!("{DIAGNOSTIC_SOURCE}: Data could not be parsed: {error}"),
            location: Some(location),
        }
    }

    /// Nothing to process in the bundle.
    pub fn empty_bundle(&self) -> Issue {
        Issue {
            severity: self.severities.empty_bundle_issue,
            code: "processing",
            diagnostics: format!(
                "{DIAGNOSTIC_SOURCE}: No entries in bundle. Thus no instances were validated."
            ),
            location: Some("Bundle.entry".to_string()),
        }
    }

    /// The validation engine could not be reached.
    pub fn transport_failure(&self, detail: &str) -> Issue {
        Issue {
            severity: IssueSeverity::Error,
            code: "timeout",
            diagnostics: format!("{DIAGNOSTIC_SOURCE}: {detail}"),
            location: None,
        }
    }

    /// The validation engine answered outside the protocol.
    pub fn protocol_failure(&self, detail: &str) -> Issue {
        Issue {
            severity: IssueSeverity::Error,
            code: "processing",
            diagnostics: format!("{DIAGNOSTIC_SOURCE}: {detail}"),
            location: None,
        }
    }
}
