// ABOUTME: File-system change source feeding the analysis context
// ABOUTME: Maps notify events under registered scope roots to ChangeEvents

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use reanalyze_core::{ChangeEvent, ChangeKind, ScopeId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("scope {0} is not being watched")]
    UnknownScope(ScopeId),
}

type ScopeRoots = Arc<RwLock<Vec<(PathBuf, ScopeId)>>>;

/// Recursive watcher over scope roots. Events arrive in batches, one batch
/// per notify event, on the receiver returned by [`FsChangeSource::new`].
pub struct FsChangeSource {
    watcher: RecommendedWatcher,
    roots: ScopeRoots,
}

impl FsChangeSource {
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<Vec<ChangeEvent>>), WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let roots: ScopeRoots = Arc::new(RwLock::new(Vec::new()));

        let callback_roots = roots.clone();
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let changes = map_event(&event, &callback_roots.read());
                if !changes.is_empty() && tx.send(changes).is_err() {
                    debug!("Change receiver dropped, discarding file system event");
                }
            }
            Err(e) => error!("File watcher error: {:?}", e),
        })?;

        Ok((Self { watcher, roots }, rx))
    }

    pub fn watch_scope(&mut self, scope: ScopeId, root: impl Into<PathBuf>) -> Result<(), WatchError> {
        let root = root.into();
        self.watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {:?} for scope {}", root, scope);

        let mut roots = self.roots.write();
        roots.retain(|(_, s)| s != &scope);
        roots.push((root, scope));
        Ok(())
    }

    pub fn unwatch_scope(&mut self, scope: &ScopeId) -> Result<(), WatchError> {
        let root = {
            let mut roots = self.roots.write();
            let index = roots
                .iter()
                .position(|(_, s)| s == scope)
                .ok_or_else(|| WatchError::UnknownScope(scope.clone()))?;
            roots.remove(index).0
        };
        self.watcher.unwatch(&root)?;
        info!("Stopped watching {:?} for scope {}", root, scope);
        Ok(())
    }

    pub fn watched_scopes(&self) -> Vec<ScopeId> {
        self.roots.read().iter().map(|(_, s)| s.clone()).collect()
    }
}

/// Translate one notify event. Paths outside every root are dropped.
pub fn map_event(event: &Event, roots: &[(PathBuf, ScopeId)]) -> Vec<ChangeEvent> {
    let kinds: Vec<(&Path, ChangeKind)> = match &event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            (event.paths[0].as_path(), ChangeKind::Removed),
            (event.paths[1].as_path(), ChangeKind::Added),
        ],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => with_kind(event, ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => with_kind(event, ChangeKind::Added),
        EventKind::Create(_) => with_kind(event, ChangeKind::Added),
        EventKind::Modify(_) => with_kind(event, ChangeKind::Modified),
        EventKind::Remove(_) => with_kind(event, ChangeKind::Removed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    };

    kinds
        .into_iter()
        .filter_map(|(path, kind)| {
            resolve_scope(path, roots).map(|scope| ChangeEvent::new(scope, path, kind))
        })
        .collect()
}

fn with_kind(event: &Event, kind: ChangeKind) -> Vec<(&Path, ChangeKind)> {
    event.paths.iter().map(|p| (p.as_path(), kind)).collect()
}

/// Scope owning `path`, by longest matching root.
fn resolve_scope(path: &Path, roots: &[(PathBuf, ScopeId)]) -> Option<ScopeId> {
    roots
        .iter()
        .filter(|(root, _)| path.starts_with(root))
        .max_by_key(|(root, _)| root.components().count())
        .map(|(_, scope)| scope.clone())
}
