use reanalyze_cache::{ConfigScopeCache, ConfiguratorRegistry, ProviderId, ScopeCatalog, ScopeMetadata, StaticConfigurator};
use reanalyze_core::{CacheConfig, ChangeClassifier, ChangeEvent, ClassifierConfig, FsResourceInspector, ScopeId};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

fn catalog_for(scope: &ScopeId, root: &std::path::Path, ttls: CacheConfig) -> ScopeCatalog {
    let registry = ConfiguratorRegistry::new().with(Arc::new(
        StaticConfigurator::new("static").with_scope(
            scope.clone(),
            ScopeMetadata::default()
                .with_source_root(root)
                .with_build_file(root.join("pom.xml")),
        ),
    ));
    ScopeCatalog::new(Arc::new(ConfigScopeCache::new()), registry, ttls)
}

#[test]
fn test_build_file_change_refreshes_listing() {
    let dir = tempfile::Builder::new().prefix("catalog").tempdir().unwrap();
    let scope = ScopeId::from("app");
    fs::write(dir.path().join("A.java"), "class A {}").unwrap();
    let catalog = catalog_for(&scope, dir.path(), CacheConfig::default());
    assert_eq!(catalog.files(&scope).len(), 1);

    fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
    fs::write(dir.path().join("B.java"), "class B {}").unwrap();
    assert_eq!(catalog.files(&scope).len(), 1, "listing is served from cache");

    let config = ClassifierConfig::default();
    let classifier = ChangeClassifier::new(Arc::new(FsResourceInspector::from_config(&config).unwrap()), &config);
    let impact = classifier.cache_impact(&ChangeEvent::modified(scope.clone(), dir.path().join("pom.xml")));
    assert!(impact.structural);
    catalog.invalidate_structure(&scope);

    assert_eq!(catalog.files(&scope).len(), 3);
    assert!(catalog.cache().stats().invalidations >= 2);
}

#[test]
fn test_listing_expires_after_ttl() {
    let dir = tempfile::Builder::new().prefix("catalog").tempdir().unwrap();
    let scope = ScopeId::from("app");
    fs::write(dir.path().join("A.java"), "class A {}").unwrap();

    let mut ttls = CacheConfig::default();
    ttls.file_listing_ttl_secs = 1;
    let catalog = catalog_for(&scope, dir.path(), ttls);
    assert_eq!(catalog.files(&scope).len(), 1);

    fs::write(dir.path().join("B.java"), "class B {}").unwrap();
    assert_eq!(catalog.files(&scope).len(), 1);
    std::thread::sleep(Duration::from_millis(1_100));
    assert_eq!(catalog.files(&scope).len(), 2);
}

#[test]
fn test_closing_scope_leaves_others_cached() {
    let cache = ConfigScopeCache::new();
    let a = ScopeId::from("a");
    let b = ScopeId::from("b");
    let ttl = Duration::from_secs(60);

    cache.get_or_compute(&a, &ProviderId::FILE_LISTING, ttl, || 1u32);
    cache.get_or_compute(&a, &ProviderId::STRUCTURAL, ttl, || 2u32);
    cache.get_or_compute(&b, &ProviderId::FILE_LISTING, ttl, || 3u32);

    assert_eq!(cache.invalidate(&a), 2);
    assert!(cache.contains(&b, &ProviderId::FILE_LISTING));
    assert_eq!(cache.get_or_compute(&b, &ProviderId::FILE_LISTING, ttl, || 99u32), 3);
}
