// deposit-annex/src/watch.rs

use anyhow::{Context, Result};
use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::{
    document::Document,
    error::ValidationError,
    session::{EditorSession, PassOutcome},
};

/// Saves of one record file, as a stream of its new contents.
pub struct FileEdits {
    path: PathBuf,
    rx: mpsc::UnboundedReceiver<()>,
    last: Option<String>,
    _watcher: RecommendedWatcher,
}

impl FileEdits {
    /// Watches the parent directory so editors that save by rename are still seen.
    pub fn watch(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new(".")).to_path_buf();
        let name: OsString = path.file_name().context("record path has no file name")?.to_os_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(ev) = res else { return; };
            if !(ev.kind.is_modify() || ev.kind.is_create()) { return; }
            if ev.paths.iter().any(|p| p.file_name() == Some(name.as_os_str())) {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", dir.display()))?;
        Ok(Self { path, rx, last: None, _watcher: watcher })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Contents after the next save that actually changed the file.
    pub async fn next_text(&mut self) -> Option<String> {
        while self.rx.recv().await.is_some() {
            let Ok(text) = tokio::fs::read_to_string(&self.path).await else { continue; };
            if self.accept(&text) {
                return Some(text);
            }
        }
        None
    }

    /// Editors emit several events per save; only distinct contents count as an edit.
    fn accept(&mut self, text: &str) -> bool {
        if self.last.as_deref() == Some(text) {
            return false;
        }
        self.last = Some(text.to_string());
        true
    }

    /// Treat the current contents as already seen.
    pub fn prime(&mut self, text: &str) { self.last = Some(text.to_string()); }
}

/// What the edit loop reports for each save.
#[derive(Debug)]
pub enum EditEvent {
    Pass(PassOutcome),
    Failed(ValidationError),
}

/// Validate one edit and apply the commit policy; the pass runs as its own task so
/// later saves are not held up by slow lookups. Only reported passes commit.
pub fn spawn_pass(session: Arc<EditorSession>, text: String, out: mpsc::UnboundedSender<EditEvent>) {
    tokio::spawn(async move {
        let doc = Document::from_text(text);
        let event = match session.validate(&doc).await {
            Ok(outcome) => {
                if let PassOutcome::Report(r) = &outcome {
                    session.commit(r.seq, doc);
                }
                EditEvent::Pass(outcome)
            }
            Err(e) => {
                error!(error = %e, "validation pass failed");
                EditEvent::Failed(e)
            }
        };
        let _ = out.send(event);
    });
}

/// Runs until the watcher stops; one pass per distinct save.
pub async fn run(session: Arc<EditorSession>, mut edits: FileEdits, out: mpsc::UnboundedSender<EditEvent>) {
    while let Some(text) = edits.next_text().await {
        debug!(path = %edits.path().display(), bytes = text.len(), "record saved");
        spawn_pass(session.clone(), text, out.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layered_config::{CommitPolicy, EditorConfig, UnreachablePolicy},
        registry::LookupKind,
        schema::{tests::legacy_schema, Schema},
        validator::{tests::FakeRegistry, ChangeValidator},
    };

    #[test]
    fn repeated_saves_of_same_text_are_one_edit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("record.json");
        std::fs::write(&path, "{}").unwrap();
        let mut edits = FileEdits::watch(&path).unwrap();
        edits.prime("{}");
        assert!(!edits.accept("{}"));
        assert!(edits.accept("{\"title\": \"A\"}"));
        assert!(!edits.accept("{\"title\": \"A\"}"));
        assert!(edits.accept("{}"));
    }

    #[tokio::test]
    async fn spawned_pass_reports_and_commits() {
        let reg = Arc::new(FakeRegistry::knowing(&[(LookupKind::Community, "zenodo")]));
        let policy = EditorConfig { commit: CommitPolicy::Persist, supersede_stale: true, unreachable: UnreachablePolicy::Inconclusive };
        let session = Arc::new(EditorSession::new(ChangeValidator::new(reg.clone(), policy.unreachable), policy));
        session.set_schema(Arc::new(Schema::compile(&legacy_schema()).unwrap()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let text = r#"{"title": "A", "communities": [{"identifier": "zenodo"}]}"#.to_string();
        spawn_pass(session.clone(), text.clone(), tx);
        match rx.recv().await.unwrap() {
            EditEvent::Pass(PassOutcome::Report(r)) => assert!(r.is_clean()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.metadata(), Some(Document::from_text(text)));
        assert_eq!(reg.calls(), vec![(LookupKind::Community, "zenodo".to_string())]);
    }

    #[tokio::test]
    async fn slow_older_save_does_not_replace_newer_commit() {
        let reg = Arc::new(FakeRegistry { delay_ms: 200, ..Default::default() });
        let policy = EditorConfig { commit: CommitPolicy::Persist, supersede_stale: true, unreachable: UnreachablePolicy::Inconclusive };
        let session = Arc::new(EditorSession::new(ChangeValidator::new(reg, policy.unreachable), policy));
        session.set_schema(Arc::new(Schema::compile(&legacy_schema()).unwrap()));

        let older = r#"{"title": "Software title v1", "creators": [{"name": "Alex"}], "license": "cc-by"}"#;
        let newer = r#"{"title": "Newer", "creators": [{"name": "Alex"}]}"#;
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_pass(session.clone(), older.to_string(), tx.clone());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        spawn_pass(session.clone(), newer.to_string(), tx);

        match rx.recv().await.unwrap() {
            EditEvent::Pass(PassOutcome::Report(r)) => assert_eq!(r.seq, 2),
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv().await.unwrap() {
            EditEvent::Pass(PassOutcome::Superseded { seq, latest }) => assert_eq!((seq, latest), (1, 2)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.metadata(), Some(Document::from_text(newer)));
    }
}
