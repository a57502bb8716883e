use reanalyze_core::ScopeId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Build/structure metadata for one scope, merged from every configurator
/// able to describe it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeMetadata {
    pub source_roots: Vec<PathBuf>,
    pub build_files: Vec<PathBuf>,
    pub properties: BTreeMap<String, String>,
    /// Names of the configurators that contributed.
    pub contributors: Vec<String>,
}

impl ScopeMetadata {
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_roots.push(root.into());
        self
    }

    pub fn with_build_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.build_files.push(file.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Earlier contributions win on property conflicts.
    pub fn merge(&mut self, contributor: &str, other: ScopeMetadata) {
        for root in other.source_roots {
            if !self.source_roots.contains(&root) {
                self.source_roots.push(root);
            }
        }
        for file in other.build_files {
            if !self.build_files.contains(&file) {
                self.build_files.push(file);
            }
        }
        for (k, v) in other.properties {
            self.properties.entry(k).or_insert(v);
        }
        self.contributors.push(contributor.to_string());
    }

    /// Whether `path` belongs to the scope's sources. A scope that declares
    /// no roots accepts every path.
    pub fn covers(&self, path: &Path) -> bool {
        self.source_roots.is_empty() || self.source_roots.iter().any(|r| path.starts_with(r))
    }
}

/// Per-language/build-system plug-in describing a scope.
pub trait ProjectConfigurator: Send + Sync {
    fn name(&self) -> &str;

    fn can_configure(&self, scope: &ScopeId) -> bool;

    fn provide(&self, scope: &ScopeId) -> anyhow::Result<ScopeMetadata>;
}

/// Ordered list of configurators resolved once at startup.
#[derive(Default, Clone)]
pub struct ConfiguratorRegistry {
    configurators: Vec<Arc<dyn ProjectConfigurator>>,
}

impl ConfiguratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, configurator: Arc<dyn ProjectConfigurator>) {
        self.configurators.push(configurator);
    }

    pub fn with(mut self, configurator: Arc<dyn ProjectConfigurator>) -> Self {
        self.register(configurator);
        self
    }

    /// Configurators applicable to `scope`, in registration order.
    pub fn for_scope<'a>(
        &'a self,
        scope: &'a ScopeId,
    ) -> impl Iterator<Item = &'a Arc<dyn ProjectConfigurator>> + 'a {
        self.configurators
            .iter()
            .filter(move |c| c.can_configure(scope))
    }

    pub fn len(&self) -> usize {
        self.configurators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurators.is_empty()
    }
}

/// Configurator backed by a fixed table, for hosts that already know their
/// scope layout.
#[derive(Debug, Default)]
pub struct StaticConfigurator {
    name: String,
    scopes: BTreeMap<ScopeId, ScopeMetadata>,
}

impl StaticConfigurator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scopes: BTreeMap::new(),
        }
    }

    pub fn with_scope(mut self, scope: ScopeId, metadata: ScopeMetadata) -> Self {
        self.scopes.insert(scope, metadata);
        self
    }
}

impl ProjectConfigurator for StaticConfigurator {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_configure(&self, scope: &ScopeId) -> bool {
        self.scopes.contains_key(scope)
    }

    fn provide(&self, scope: &ScopeId) -> anyhow::Result<ScopeMetadata> {
        self.scopes
            .get(scope)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("scope {} not configured by {}", scope, self.name))
    }
}
