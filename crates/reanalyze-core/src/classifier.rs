use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{ChangeEvent, ChangeKind, ClassificationError, ClassifierConfig, ConfigError, ScopeId};

/// Attributes the classifier needs about a changed resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub exists: bool,
    pub derived: bool,
    pub hidden: bool,
}

/// Existence/attribute lookup backing classification decisions.
pub trait ResourceInspector: Send + Sync {
    fn inspect(&self, event: &ChangeEvent) -> Result<ResourceAttributes, ClassificationError>;

    /// Roots that a scope's paths are judged relative to. Inspectors that
    /// do not look at path components may ignore this.
    fn set_scope_roots(&self, _scope: &ScopeId, _roots: &[PathBuf]) {}

    fn remove_scope(&self, _scope: &ScopeId) {}
}

/// File-system backed inspector. Derived resources are matched by glob and
/// hidden ones by a dot-named directory, both on the path below the
/// deepest registered root of the scope. Paths of a scope without roots are
/// judged as a whole.
pub struct FsResourceInspector {
    derived: GlobSet,
    scope_roots: RwLock<HashMap<ScopeId, Vec<PathBuf>>>,
}

impl FsResourceInspector {
    pub fn new<I, S>(derived_patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in derived_patterns {
            let glob = Glob::new(pattern.as_ref()).map_err(|e| {
                ConfigError::ValidationError(format!("derived pattern {:?}: {}", pattern.as_ref(), e))
            })?;
            builder.add(glob);
        }
        let derived = builder
            .build()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(Self {
            derived,
            scope_roots: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        Self::new(&config.derived_patterns)
    }

    pub fn set_scope_root(&self, scope: ScopeId, root: impl Into<PathBuf>) {
        self.scope_roots.write().insert(scope, vec![root.into()]);
    }

    pub fn remove_scope_root(&self, scope: &ScopeId) {
        self.scope_roots.write().remove(scope);
    }

    /// `path` below the deepest root of `scope` containing it.
    fn relative<'p>(&self, scope: &ScopeId, path: &'p Path) -> &'p Path {
        let roots = self.scope_roots.read();
        let relative = roots
            .get(scope)
            .into_iter()
            .flatten()
            .filter_map(|root| path.strip_prefix(root).ok())
            .min_by_key(|rest| rest.components().count())
            .unwrap_or(path);
        relative
    }
}

fn has_hidden_dir(relative: &Path) -> bool {
    let mut dirs = relative.components().collect::<Vec<_>>();
    dirs.pop();
    dirs.iter().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

impl ResourceInspector for FsResourceInspector {
    fn inspect(&self, event: &ChangeEvent) -> Result<ResourceAttributes, ClassificationError> {
        let exists = match std::fs::symlink_metadata(&event.path) {
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(ClassificationError::AttributeCheck {
                    path: event.path.clone(),
                    source,
                })
            }
        };
        let relative = self.relative(&event.scope, &event.path);
        Ok(ResourceAttributes {
            exists,
            derived: self.derived.is_match(relative),
            hidden: has_hidden_dir(relative),
        })
    }

    fn set_scope_roots(&self, scope: &ScopeId, roots: &[PathBuf]) {
        let mut known = self.scope_roots.write();
        if known.get(scope).map(Vec::as_slice) != Some(roots) {
            debug!("Scope {} judged relative to {:?}", scope, roots);
            known.insert(scope.clone(), roots.to_vec());
        }
    }

    fn remove_scope(&self, scope: &ScopeId) {
        self.remove_scope_root(scope);
    }
}

/// Which cache providers an event makes stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheImpact {
    pub file_listing: bool,
    pub structural: bool,
}

impl CacheImpact {
    pub fn is_none(&self) -> bool {
        !self.file_listing && !self.structural
    }
}

/// Filters raw change notifications down to files worth re-analyzing.
pub struct ChangeClassifier {
    inspector: Arc<dyn ResourceInspector>,
    structural_names: HashSet<String>,
}

impl ChangeClassifier {
    pub fn new(inspector: Arc<dyn ResourceInspector>, config: &ClassifierConfig) -> Self {
        Self {
            inspector,
            structural_names: config.structural_file_names.iter().cloned().collect(),
        }
    }

    /// `Some(path)` when the change should be re-analyzed.
    pub fn classify(&self, event: &ChangeEvent) -> Option<PathBuf> {
        if event.kind == ChangeKind::Removed {
            return None;
        }
        if file_name(&event.path).map_or(true, |n| n.starts_with('.')) {
            debug!("Rejecting dot-file change {:?}", event.path);
            return None;
        }

        let attrs = match self.inspector.inspect(event) {
            Ok(attrs) => attrs,
            Err(e) => {
                warn!("Rejecting change in scope {}: {}", event.scope, e);
                return None;
            }
        };

        if !attrs.exists {
            debug!("Rejecting change to missing resource {:?}", event.path);
            return None;
        }
        if attrs.derived || attrs.hidden {
            debug!(
                "Rejecting change to {:?} (derived: {}, hidden: {})",
                event.path, attrs.derived, attrs.hidden
            );
            return None;
        }
        Some(event.path.clone())
    }

    /// Accepted paths grouped per scope, for batched upstream delivery.
    pub fn classify_batch<'a, I>(&self, events: I) -> BTreeMap<ScopeId, BTreeSet<PathBuf>>
    where
        I: IntoIterator<Item = &'a ChangeEvent>,
    {
        let mut grouped: BTreeMap<ScopeId, BTreeSet<PathBuf>> = BTreeMap::new();
        for event in events {
            if let Some(path) = self.classify(event) {
                grouped.entry(event.scope.clone()).or_default().insert(path);
            }
        }
        grouped
    }

    /// Cache consequences of an event, independent of whether it is
    /// accepted for analysis.
    pub fn cache_impact(&self, event: &ChangeEvent) -> CacheImpact {
        CacheImpact {
            file_listing: matches!(event.kind, ChangeKind::Added | ChangeKind::Removed),
            structural: self.is_structural(&event.path),
        }
    }

    pub fn is_structural(&self, path: &Path) -> bool {
        file_name(path).is_some_and(|n| self.structural_names.contains(n))
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
