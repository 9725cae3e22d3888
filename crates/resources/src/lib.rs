//! vsync resources: concrete syncers built on the generic engine.

#![forbid(unsafe_code)]

pub mod pvc;
pub mod quantity;

pub use pvc::PvcSyncer;
