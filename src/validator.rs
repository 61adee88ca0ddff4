// deposit-annex/src/validator.rs

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    diff::Delta,
    document::{FieldError, PathSegment},
    error::{LookupError, ValidationError},
    layered_config::UnreachablePolicy,
    registry::{LookupKind, Registry},
};

/// One existence check scheduled by a pass, with the error it produces on a miss.
#[derive(Clone, Debug, PartialEq)]
pub struct Check {
    pub kind: LookupKind,
    pub id: String,
    pub path: Vec<PathSegment>,
}

impl Check {
    fn failure(&self) -> FieldError {
        let message = match self.kind {
            LookupKind::License => format!("Invalid license {}.", self.id),
            LookupKind::Grant => format!("Invalid grant ID {}.", self.id),
            LookupKind::Community => format!("Invalid community ID {}.", self.id),
        };
        FieldError::new(self.path.clone(), message)
    }
}

/// Non-empty identifier text; numbers are checked by their decimal form.
fn identifier(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn entries<'a>(doc: &'a Value, key: &str) -> impl Iterator<Item = (usize, &'a Value)> {
    doc.get(key).and_then(Value::as_array).into_iter().flatten().enumerate()
}

/// The checks a candidate needs given what changed since `prev`, in reporting order:
/// license, then grants by index, then communities by index.
pub fn plan(prev: &Value, next: &Value) -> Vec<Check> {
    let delta = Delta::between(prev, next);
    let mut checks = Vec::new();

    if delta.touches("license") {
        if let Some(id) = identifier(next.get("license")) {
            checks.push(Check { kind: LookupKind::License, id, path: vec!["license".into()] });
        }
    }
    if delta.touches("grants") {
        for (i, g) in entries(next, "grants") {
            if let Some(id) = identifier(g.get("id")) {
                checks.push(Check { kind: LookupKind::Grant, id, path: vec!["grants".into(), i.into(), "id".into()] });
            }
        }
    }
    if delta.touches("communities") {
        for (i, c) in entries(next, "communities") {
            if let Some(id) = identifier(c.get("identifier")) {
                checks.push(Check {
                    kind: LookupKind::Community,
                    id,
                    path: vec!["communities".into(), i.into(), "identifier".into()],
                });
            }
        }
    }
    checks
}

/// Diff-gated registry validation of one edit.
#[derive(Clone)]
pub struct ChangeValidator {
    registry: Arc<dyn Registry>,
    unreachable: UnreachablePolicy,
}

impl ChangeValidator {
    pub fn new(registry: Arc<dyn Registry>, unreachable: UnreachablePolicy) -> Self {
        Self { registry, unreachable }
    }

    /// Runs every scheduled check concurrently and waits for all of them to settle.
    pub async fn validate(&self, prev: &Value, next: &Value) -> Result<Vec<FieldError>, ValidationError> {
        let checks = plan(prev, next);
        if checks.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = checks.len(), "running registry checks");

        let outcomes = join_all(checks.iter().map(|c| self.registry.exists(c.kind, &c.id))).await;

        let mut errors = Vec::new();
        let mut first_transport: Option<LookupError> = None;
        for (check, outcome) in checks.iter().zip(outcomes) {
            match outcome {
                Ok(true) => {}
                Ok(false) => errors.push(check.failure()),
                Err(e) => {
                    warn!(kind = check.kind.label(), id = %check.id, error = %e, "registry unreachable");
                    if first_transport.is_none() { first_transport = Some(e); }
                }
            }
        }
        match (self.unreachable, first_transport) {
            (UnreachablePolicy::Abort, Some(e)) => Err(e.into()),
            _ => Ok(errors),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Registry fake: knows a fixed set of ids, can be made unreachable for some ids,
    /// records every call. Later-scheduled lookups answer first.
    #[derive(Default)]
    pub(crate) struct FakeRegistry {
        pub known: HashSet<(LookupKind, String)>,
        pub unreachable: HashSet<String>,
        pub calls: Mutex<Vec<(LookupKind, String)>>,
        pub delay_ms: u64,
    }

    impl FakeRegistry {
        pub(crate) fn knowing(ids: &[(LookupKind, &str)]) -> Self {
            Self { known: ids.iter().map(|(k, i)| (*k, i.to_string())).collect(), ..Default::default() }
        }
        pub(crate) fn calls(&self) -> Vec<(LookupKind, String)> { self.calls.lock().clone() }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn exists(&self, kind: LookupKind, id: &str) -> Result<bool, LookupError> {
            let order = {
                let mut calls = self.calls.lock();
                calls.push((kind, id.to_string()));
                calls.len() as u64
            };
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms.saturating_sub(order))).await;
            }
            if self.unreachable.contains(id) {
                return Err(transport_error(kind, id).await);
            }
            Ok(self.known.contains(&(kind, id.to_string())))
        }
    }

    /// A genuine transport failure: a request to a port nobody listens on.
    pub(crate) async fn transport_error(kind: LookupKind, id: &str) -> LookupError {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let source = reqwest::get(format!("http://{addr}/")).await.unwrap_err();
        LookupError::Transport { kind: kind.label(), id: id.to_string(), source }
    }

    fn validator(reg: Arc<FakeRegistry>) -> ChangeValidator {
        ChangeValidator::new(reg, UnreachablePolicy::Inconclusive)
    }

    #[tokio::test]
    async fn unrelated_edits_make_no_calls() {
        let reg = Arc::new(FakeRegistry::default());
        let prev = json!({ "title": "A", "license": "bogus", "grants": [{ "id": "x" }] });
        let next = json!({ "title": "B", "license": "bogus", "grants": [{ "id": "x" }] });
        assert_eq!(validator(reg.clone()).validate(&prev, &next).await.unwrap(), vec![]);
        assert!(reg.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_license_is_reported_once() {
        let reg = Arc::new(FakeRegistry::default());
        let errors = validator(reg.clone())
            .validate(&json!({ "title": "A" }), &json!({ "title": "A", "license": "cc-by" }))
            .await
            .unwrap();
        assert_eq!(errors, vec![FieldError::new(vec!["license".into()], "Invalid license cc-by.")]);
        assert_eq!(reg.calls(), vec![(LookupKind::License, "cc-by".to_string())]);
    }

    #[tokio::test]
    async fn known_community_passes() {
        let reg = Arc::new(FakeRegistry::knowing(&[(LookupKind::Community, "zenodo")]));
        let errors = validator(reg)
            .validate(&json!({}), &json!({ "communities": [{ "identifier": "zenodo" }] }))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn grant_entries_without_id_are_skipped() {
        let reg = Arc::new(FakeRegistry::knowing(&[(LookupKind::Grant, "10.1")]));
        let errors = validator(reg.clone())
            .validate(&json!({ "grants": [] }), &json!({ "grants": [{ "id": "10.1" }, {}] }))
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(reg.calls(), vec![(LookupKind::Grant, "10.1".to_string())]);
    }

    #[tokio::test]
    async fn one_error_per_failing_grant_index() {
        let reg = Arc::new(FakeRegistry::knowing(&[(LookupKind::Grant, "ok")]));
        let next = json!({ "grants": [{ "id": "bad1" }, { "id": "ok" }, { "id": "" }, { "id": "bad2" }] });
        let errors = validator(reg).validate(&json!({}), &next).await.unwrap();
        assert_eq!(errors, vec![
            FieldError::new(vec!["grants".into(), PathSegment::Index(0), "id".into()], "Invalid grant ID bad1."),
            FieldError::new(vec!["grants".into(), PathSegment::Index(3), "id".into()], "Invalid grant ID bad2."),
        ]);
    }

    #[tokio::test]
    async fn results_follow_scheduling_order_not_arrival_order() {
        let reg = Arc::new(FakeRegistry { delay_ms: 50, ..Default::default() });
        let next = json!({
            "communities": [{ "identifier": "c0" }, { "identifier": "c1" }],
            "grants": [{ "id": "g0" }, { "id": 42 }],
            "license": "l",
        });
        let v = validator(reg.clone());
        let first = v.validate(&json!({}), &next).await.unwrap();
        assert_eq!(first, vec![
            FieldError::new(vec!["license".into()], "Invalid license l."),
            FieldError::new(vec!["grants".into(), PathSegment::Index(0), "id".into()], "Invalid grant ID g0."),
            FieldError::new(vec!["grants".into(), PathSegment::Index(1), "id".into()], "Invalid grant ID 42."),
            FieldError::new(vec!["communities".into(), PathSegment::Index(0), "identifier".into()], "Invalid community ID c0."),
            FieldError::new(vec!["communities".into(), PathSegment::Index(1), "identifier".into()], "Invalid community ID c1."),
        ]);
        let second = v.validate(&json!({}), &next).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unreachable_registry_is_inconclusive_by_default() {
        let mut reg = FakeRegistry::default();
        reg.unreachable.insert("cc-by".into());
        let reg = Arc::new(reg);
        let next = json!({ "license": "cc-by", "communities": [{ "identifier": "ghost" }] });

        let errors = validator(reg.clone()).validate(&json!({}), &next).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Invalid community ID ghost.");

        let strict = ChangeValidator::new(reg.clone(), UnreachablePolicy::Abort);
        let err = strict.validate(&json!({}), &next).await.unwrap_err();
        assert!(matches!(err, ValidationError::Lookup(LookupError::Transport { kind: "license", .. })));
        // every check still ran
        assert_eq!(reg.calls().len(), 4);
    }

    #[test]
    fn plan_skips_absent_license_and_non_array_lists() {
        assert!(plan(&json!({ "license": "cc-by" }), &json!({})).is_empty());
        assert!(plan(&json!({}), &json!({ "license": null })).is_empty());
        assert!(plan(&json!({}), &json!({ "grants": { "id": "x" }, "communities": "zenodo" })).is_empty());
    }
}
