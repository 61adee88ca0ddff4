// deposit-annex/src/schema.rs

use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::{
    document::{FieldError, PathSegment},
    error::SchemaError,
};

/// Properties published with their enum nested under `type` instead of at the top level.
pub const LEGACY_ENUM_PROPERTIES: [&str; 3] = ["upload_type", "publication_type", "image_type"];

/// Move `properties.<p>.type.enum` up to `properties.<p>.enum` and make `<p>` a plain string.
/// Works on a copy: either every property is patched or the input is returned untouched as an error.
pub fn patch_schema(schema: &Value) -> Result<Value, SchemaError> {
    let mut patched = schema.clone();
    for name in LEGACY_ENUM_PROPERTIES {
        let prop = patched
            .get_mut("properties")
            .and_then(|p| p.get_mut(name))
            .and_then(Value::as_object_mut)
            .ok_or(SchemaError::MissingLegacyEnum(name))?;
        let values = prop
            .get("type")
            .and_then(|t| t.get("enum"))
            .cloned()
            .ok_or(SchemaError::MissingLegacyEnum(name))?;
        prop.insert("enum".into(), values);
        prop.insert("type".into(), Value::String("string".into()));
    }
    Ok(patched)
}

/// A patched, compiled deposit schema. Built once and shared read-only.
pub struct Schema {
    value: Value,
    validator: Validator,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("value", &self.value).finish_non_exhaustive()
    }
}

impl Schema {
    /// Patch and compile a raw schema document as draft-04.
    pub fn compile(raw: &Value) -> Result<Self, SchemaError> {
        let value = patch_schema(raw)?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft4)
            .build(&value)
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self { value, validator })
    }

    pub fn value(&self) -> &Value { &self.value }

    /// Structural errors for a record, in validator order.
    pub fn validate(&self, doc: &Value) -> Vec<FieldError> {
        self.validator
            .iter_errors(doc)
            .map(|e| FieldError::new(pointer_to_path(doc, &e.instance_path().to_string()), e.to_string()))
            .collect()
    }

    pub fn is_valid(&self, doc: &Value) -> bool { self.validator.is_valid(doc) }
}

/// Turn a JSON pointer into path segments; a segment is an index only where the
/// record actually holds an array at that point.
pub fn pointer_to_path(doc: &Value, pointer: &str) -> Vec<PathSegment> {
    let mut out = Vec::new();
    let mut cursor = Some(doc);
    for raw in pointer.split('/').skip(1) {
        let token = raw.replace("~1", "/").replace("~0", "~");
        let seg = match (cursor, token.parse::<usize>()) {
            (Some(Value::Array(items)), Ok(i)) => {
                cursor = items.get(i);
                PathSegment::Index(i)
            }
            _ => {
                cursor = cursor.and_then(|c| c.get(&token));
                PathSegment::Key(token)
            }
        };
        out.push(seg);
    }
    out
}

/// Loads the deposit schema exactly once per call; no retry.
#[derive(Clone)]
pub struct SchemaLoader {
    client: reqwest::Client,
}

impl SchemaLoader {
    pub fn new(client: reqwest::Client) -> Self { Self { client } }

    /// `source` is an `http(s)://` URL or a local file path.
    pub async fn load(&self, source: &str) -> Result<Schema, SchemaError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch(source).await
        } else {
            Self::load_file(Path::new(source)).await
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<Schema, SchemaError> {
        let fetch_err = |source| SchemaError::Fetch { url: url.to_string(), source };
        let res = self.client.get(url).send().await.map_err(fetch_err)?;
        if !res.status().is_success() {
            return Err(SchemaError::Status { url: url.to_string(), status: res.status().as_u16() });
        }
        let body = res.bytes().await.map_err(fetch_err)?;
        let raw: Value = serde_json::from_slice(&body)?;
        info!(%url, bytes = body.len(), "fetched deposit schema");
        compile_off_thread(raw).await
    }

    pub async fn load_file(path: &Path) -> Result<Schema, SchemaError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: Value = serde_json::from_str(&text)?;
        info!(path = %path.display(), "loaded deposit schema");
        compile_off_thread(raw).await
    }
}

// Remote `$ref`s are resolved with blocking I/O during compilation.
async fn compile_off_thread(raw: Value) -> Result<Schema, SchemaError> {
    tokio::task::spawn_blocking(move || Schema::compile(&raw))
        .await
        .map_err(|e| SchemaError::Compile(e.to_string()))?
}
