use ignore::WalkBuilder;
use parking_lot::RwLock;
use reanalyze_core::{CacheConfig, ScopeId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{ConfigScopeCache, ConfiguratorRegistry, ProviderId, ScopeMetadata};

/// Scope metadata and file listings, served through the scope cache.
pub struct ScopeCatalog {
    cache: Arc<ConfigScopeCache>,
    registry: ConfiguratorRegistry,
    ttls: RwLock<CacheConfig>,
}

impl ScopeCatalog {
    pub fn new(cache: Arc<ConfigScopeCache>, registry: ConfiguratorRegistry, ttls: CacheConfig) -> Self {
        Self {
            cache,
            registry,
            ttls: RwLock::new(ttls),
        }
    }

    pub fn cache(&self) -> &Arc<ConfigScopeCache> {
        &self.cache
    }

    pub fn set_ttls(&self, ttls: CacheConfig) {
        *self.ttls.write() = ttls;
    }

    /// Structural metadata merged from every applicable configurator.
    pub fn metadata(&self, scope: &ScopeId) -> Arc<ScopeMetadata> {
        let ttl = self.ttls.read().structural_ttl();
        self.cache
            .get_or_compute(scope, &ProviderId::STRUCTURAL, ttl, || {
                Arc::new(self.resolve_metadata(scope))
            })
    }

    /// Every source file of the scope, walked from its source roots.
    pub fn files(&self, scope: &ScopeId) -> Arc<Vec<PathBuf>> {
        let ttl = self.ttls.read().file_listing_ttl();
        let metadata = self.metadata(scope);
        self.cache
            .get_or_compute(scope, &ProviderId::FILE_LISTING, ttl, || {
                Arc::new(list_files(&metadata))
            })
    }

    /// A build file changed: structure and listing are both stale.
    pub fn invalidate_structure(&self, scope: &ScopeId) {
        self.cache.invalidate_provider(scope, &ProviderId::STRUCTURAL);
        self.cache.invalidate_provider(scope, &ProviderId::FILE_LISTING);
    }

    pub fn invalidate_file_listing(&self, scope: &ScopeId) {
        self.cache.invalidate_provider(scope, &ProviderId::FILE_LISTING);
    }

    pub fn invalidate(&self, scope: &ScopeId) {
        self.cache.invalidate(scope);
    }

    fn resolve_metadata(&self, scope: &ScopeId) -> ScopeMetadata {
        let mut merged = ScopeMetadata::default();
        for configurator in self.registry.for_scope(scope) {
            match configurator.provide(scope) {
                Ok(contribution) => merged.merge(configurator.name(), contribution),
                Err(e) => warn!(
                    "Configurator {} failed for scope {}, omitting its contribution: {:#}",
                    configurator.name(),
                    scope,
                    e
                ),
            }
        }
        debug!(
            "Resolved scope {} metadata: {} roots from {:?}",
            scope,
            merged.source_roots.len(),
            merged.contributors
        );
        merged
    }
}

fn list_files(metadata: &ScopeMetadata) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in &metadata.source_roots {
        for entry in WalkBuilder::new(root).hidden(true).git_ignore(true).build() {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_some_and(|t| t.is_file()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => warn!("Skipping unreadable entry under {:?}: {}", root, e),
            }
        }
    }
    files.sort();
    files.dedup();
    files
}
