pub mod layered_config;
pub mod error;
pub mod document;
pub mod diff;
pub mod schema;
pub mod registry;
pub mod validator;
pub mod session;
pub mod watch;

pub use layered_config::{ConfigManager, Config, Settings, Scope, CommitPolicy, UnreachablePolicy};
pub use error::{SchemaError, LookupError, ValidationError};
pub use document::{Document, FieldError, PathSegment};
pub use diff::Delta;
pub use schema::{Schema, SchemaLoader, patch_schema};
pub use registry::{Registry, HttpRegistry, LookupKind, grant_identifier};
pub use validator::{ChangeValidator, Check};
pub use session::{EditorSession, PassOutcome, Report, Status};
pub use watch::{FileEdits, EditEvent};
