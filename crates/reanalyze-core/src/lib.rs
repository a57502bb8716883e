//! Core data model, error taxonomy, configuration and change
//! classification shared by the reanalyze crates.

pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use classifier::*;
pub use config::*;
pub use error::*;
pub use logging::init_tracing;
pub use traits::*;
pub use types::*;
