// deposit-annex/src/session.rs

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{error, info, warn};

use crate::{
    document::{sample, Document, FieldError},
    error::{SchemaError, ValidationError},
    layered_config::{CommitPolicy, EditorConfig},
    schema::{Schema, SchemaLoader},
    validator::ChangeValidator,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status { Loading, Ready }

/// Errors found by one pass: structural ones from the schema first, then registry misses.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub seq: u64,
    pub errors: Vec<FieldError>,
}

impl Report {
    pub fn is_clean(&self) -> bool { self.errors.is_empty() }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PassOutcome {
    Report(Report),
    /// A newer pass started before this one finished; its result is dropped.
    Superseded { seq: u64, latest: u64 },
}

#[derive(Default)]
struct State {
    schema: Option<Arc<Schema>>,
    metadata: Option<Document>,
    /// Sequence number of the pass that last wrote `metadata`.
    committed: u64,
}

/// Holds the schema and the current record, and runs validation passes over edits.
pub struct EditorSession {
    state: RwLock<State>,
    validator: ChangeValidator,
    policy: EditorConfig,
    issued: AtomicU64,
}

impl EditorSession {
    /// Starts with the built-in sample record and no schema.
    pub fn new(validator: ChangeValidator, policy: EditorConfig) -> Self {
        Self::with_metadata(validator, policy, Document::Json(sample()))
    }

    pub fn with_metadata(validator: ChangeValidator, policy: EditorConfig, metadata: Document) -> Self {
        Self {
            state: RwLock::new(State { schema: None, metadata: Some(metadata), committed: 0 }),
            validator,
            policy,
            issued: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> Status {
        let st = self.state.read();
        if st.schema.is_some() && st.metadata.is_some() { Status::Ready } else { Status::Loading }
    }

    pub fn schema(&self) -> Option<Arc<Schema>> { self.state.read().schema.clone() }
    pub fn metadata(&self) -> Option<Document> { self.state.read().metadata.clone() }

    /// Publish a fully patched schema. The first one wins; later calls are ignored.
    pub fn set_schema(&self, schema: Arc<Schema>) -> bool {
        let mut st = self.state.write();
        if st.schema.is_some() {
            return false;
        }
        st.schema = Some(schema);
        true
    }

    /// Fetch and publish the schema. On failure the session stays `Loading`.
    pub async fn load_schema(&self, loader: &SchemaLoader, source: &str) -> Result<(), SchemaError> {
        if self.schema().is_some() {
            return Ok(());
        }
        match loader.load(source).await {
            Ok(schema) => {
                self.set_schema(Arc::new(schema));
                info!(%source, "schema ready");
                Ok(())
            }
            Err(e) => {
                error!(%source, error = %e, "schema load failed; editor stays in loading state");
                Err(e)
            }
        }
    }

    /// One validation pass of `candidate` against the schema and against the held record.
    pub async fn validate(&self, candidate: &Document) -> Result<PassOutcome, ValidationError> {
        let (schema, prev) = {
            let st = self.state.read();
            let schema = st.schema.clone().ok_or(ValidationError::NotReady)?;
            let prev = st.metadata.as_ref().and_then(Document::as_json).cloned().unwrap_or(Value::Null);
            (schema, prev)
        };
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

        let errors = match candidate {
            Document::Text(_) => vec![FieldError::new(vec![], "Record is not valid JSON.")],
            Document::Json(next) => {
                let mut errors = schema.validate(next);
                errors.extend(self.validator.validate(&prev, next).await?);
                errors
            }
        };

        let latest = self.issued.load(Ordering::SeqCst);
        if self.policy.supersede_stale && latest != seq {
            warn!(seq, latest, "dropping result of superseded validation pass");
            return Ok(PassOutcome::Superseded { seq, latest });
        }
        Ok(PassOutcome::Report(Report { seq, errors }))
    }

    /// Apply the commit policy to an edited record. Returns whether the held record changed.
    pub fn on_change(&self, candidate: Document) -> bool {
        match self.policy.commit {
            CommitPolicy::Discard => false,
            CommitPolicy::Persist => {
                self.state.write().metadata = Some(candidate);
                true
            }
        }
    }

    /// Like `on_change`, for the record validated by pass `seq`. A pass older than the
    /// last committed one never writes, so a slow stale pass cannot roll the baseline back.
    pub fn commit(&self, seq: u64, candidate: Document) -> bool {
        if self.policy.commit == CommitPolicy::Discard {
            return false;
        }
        let mut st = self.state.write();
        if seq <= st.committed {
            return false;
        }
        st.committed = seq;
        st.metadata = Some(candidate);
        true
    }
}
