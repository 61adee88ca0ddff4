// deposit-annex/src/document.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// The record held by the editor: parsed JSON, or the raw text when it did not parse.
/// Arrays and scalars parse, so they stay `Json`: the schema reports them as the wrong
/// type and the key diff treats them as touching no field.
#[derive(Clone, Debug, PartialEq)]
pub enum Document {
    Json(Value),
    Text(String),
}

impl Document {
    /// Parse editor text. Anything that is not valid JSON is kept verbatim.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Self::Json(v),
            Err(_) => Self::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Json(Value::Object(_)))
    }
}

/// Starting record shown before anything has been edited.
pub fn sample() -> Value {
    json!({
        "title": "Software title v1",
        "creators": [{ "name": "Alex" }],
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self { Self::Key(s.to_string()) }
}
impl From<usize> for PathSegment {
    fn from(i: usize) -> Self { Self::Index(i) }
}

/// One inline error: where in the record, and what is wrong.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: Vec<PathSegment>,
    pub message: String,
}

impl FieldError {
    pub fn new(path: Vec<PathSegment>, message: impl Into<String>) -> Self {
        Self { path, message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.path.iter().map(|s| match s {
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(k) => k.clone(),
        }).collect();
        if path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", path.join("."), self.message)
        }
    }
}
