//! Provider-backed, time-bounded cache of expensive per-scope values, and
//! the scope catalog that serves configurator metadata and file listings
//! through it.

pub mod cache;
pub mod catalog;
pub mod configurator;

pub use cache::{CacheEntry, CacheStats, ConfigScopeCache, ProviderId};
pub use catalog::ScopeCatalog;
pub use configurator::{ConfiguratorRegistry, ProjectConfigurator, ScopeMetadata, StaticConfigurator};
