pub mod assign;
pub mod issue;
pub mod mapping;
pub mod path;
pub mod pipeline;
pub mod xml;

pub use assign::{LOINC_SYSTEM, ProfileAssigner};
pub use issue::{
    DIAGNOSTIC_SOURCE, InvalidSeverityLevel, Issue, IssueFactory, IssueSeverity, SeverityConfig,
    operation_outcome,
};
pub use mapping::{MappingError, MappingTable, ProfileRule};
pub use path::{AccessCause, AccessError, Step};
pub use pipeline::{Pipeline, Preprocessed, WireFormat};
pub use xml::XmlError;
