//! Issue reconciliation: turns a fresh list of raw issues into the minimal
//! create/update/delete marker operations against what a file currently
//! shows, keeping marker identity stable across line drift.

pub mod anchor;
pub mod diff;
pub mod ledger;
pub mod memory_store;
pub mod reconciler;

pub use anchor::{anchor_issues, identity_of};
pub use diff::{LineMapping, PositionDiff};
pub use ledger::{CommitOutcome, MarkerLedger};
pub use memory_store::InMemoryMarkerStore;
pub use reconciler::{reconcile, Reconciliation};
