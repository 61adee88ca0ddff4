// deposit-annex/src/error.rs

use thiserror::Error;

/// Failures while fetching, patching or compiling the deposit schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema request to {url} failed: {source}")]
    Fetch { url: String, #[source] source: reqwest::Error },

    #[error("schema endpoint {url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("read schema file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("schema body is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// One of the legacy enum-bearing properties is absent or has no nested `type.enum`.
    #[error("schema property `{0}` lacks the legacy `type.enum` shape")]
    MissingLegacyEnum(&'static str),

    #[error("schema does not compile as draft-04: {0}")]
    Compile(String),
}

/// Failures of a single registry lookup. HTTP error statuses are not errors,
/// they mean "does not exist".
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{kind} lookup for `{id}` could not reach the registry: {source}")]
    Transport { kind: &'static str, id: String, #[source] source: reqwest::Error },
}

/// Failures of a whole validation pass.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("schema is not loaded yet")]
    NotReady,

    #[error(transparent)]
    Lookup(#[from] LookupError),
}
