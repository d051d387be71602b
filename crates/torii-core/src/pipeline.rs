//! Per-request orchestration: parse, annotate, reserialize.

use std::fmt;

use serde_json::Value;

use crate::assign::ProfileAssigner;
use crate::issue::{Issue, IssueFactory};
use crate::mapping::MappingTable;
use crate::xml;

/// Wire formats accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Xml,
}

impl WireFormat {
    /// Resolves a Content-Type header value, tolerating FHIR media types
    /// and parameters such as `charset`.
    pub fn from_content_type(header: &str) -> Option<Self> {
        let essence = header
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" | "application/fhir+json" => Some(WireFormat::Json),
            "application/xml" | "application/fhir+xml" => Some(WireFormat::Xml),
            _ => None,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => write!(f, "json"),
            WireFormat::Xml => write!(f, "xml"),
        }
    }
}

/// Outcome of preprocessing one request body.
#[derive(Debug)]
pub struct Preprocessed {
    /// The document serialized back to its wire format, or the original
    /// bytes when parsing failed.
    pub body: Vec<u8>,
    pub issues: Vec<Issue>,
    /// Whether downstream validation is worth attempting at all.
    pub should_validate: bool,
}

/// Format-agnostic preprocessing front of the gateway.
///
/// Holds the immutable mapping table and severity configuration; shared
/// across requests without locking.
#[derive(Debug)]
pub struct Pipeline {
    mapping: MappingTable,
    issues: IssueFactory,
}

impl Pipeline {
    pub fn new(mapping: MappingTable, issues: IssueFactory) -> Self {
        Self { mapping, issues }
    }

    /// Runs the full preprocessing sequence on one request body. Never
    /// fails: every malformation degrades to issues in the result.
    pub fn preprocess(&self, body: &[u8], format: WireFormat) -> Preprocessed {
        let mut doc = match parse(body, format) {
            Ok(doc) => doc,
            Err(detail) => {
                tracing::debug!(format = %format, error = %detail, "request body did not parse");
                return Preprocessed {
                    body: body.to_vec(),
                    issues: vec![self.issues.parse_failure(&detail)],
                    should_validate: false,
                };
            }
        };

        let has_entries = doc
            .get("entry")
            .and_then(Value::as_array)
            .is_some_and(|entries| !entries.is_empty());
        if !has_entries {
            tracing::debug!(format = %format, "bundle has no entries");
            return Preprocessed {
                body: serialize(&doc, format).unwrap_or_else(|_| body.to_vec()),
                issues: vec![self.issues.empty_bundle()],
                should_validate: false,
            };
        }

        let issues = ProfileAssigner::new(&self.mapping, &self.issues).annotate_bundle(&mut doc);

        match serialize(&doc, format) {
            Ok(bytes) => Preprocessed {
                body: bytes,
                issues,
                should_validate: true,
            },
            Err(detail) => {
                // Reachable only for documents the XML writer cannot express.
                tracing::debug!(format = %format, error = %detail, "annotated document did not serialize");
                let mut issues = issues;
                issues.push(self.issues.parse_failure(&detail));
                Preprocessed {
                    body: body.to_vec(),
                    issues,
                    should_validate: false,
                }
            }
        }
    }
}

fn parse(body: &[u8], format: WireFormat) -> Result<Value, String> {
    match format {
        WireFormat::Json => serde_json::from_slice(body).map_err(|e| e.to_string()),
        WireFormat::Xml => xml::from_xml(body).map_err(|e| e.to_string()),
    }
}

fn serialize(doc: &Value, format: WireFormat) -> Result<Vec<u8>, String> {
    match format {
        WireFormat::Json => serde_json::to_vec(doc).map_err(|e| e.to_string()),
        WireFormat::Xml => xml::to_xml(doc).map_err(|e| e.to_string()),
    }
}
