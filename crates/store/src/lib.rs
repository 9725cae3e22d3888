//! vsync store: in-RAM object store and an in-memory event sink.

#![forbid(unsafe_code)]

pub mod events;
pub mod mem;

pub use events::{MemoryEventSink, RecordedEvent};
pub use mem::{MemStore, Op};
