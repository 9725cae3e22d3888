//! vsync syncer: the resource syncer contract, the per-kind reconcile state
//! machine and the retry policy around it.

#![forbid(unsafe_code)]

pub mod controller;
pub mod manager;
pub mod registry;
pub mod syncer;

pub use controller::{SyncController, SyncState};
pub use manager::{Disposition, Health, HealthSnapshot, SyncManager};
pub use registry::{KindReconciler, SyncRegistry};
pub use syncer::{OrphanPolicy, ResourceSyncer, SyncContext};
