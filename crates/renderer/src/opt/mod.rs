//! Micro-optimization primitives used inside the render thread.
//!
//! Everything here exists to keep the steady-state frame loop free of
//! allocation and redundant GPU traffic: bind groups are cached, staging
//! buffers are pooled, uniform uploads are skipped when nothing changed, and
//! capture work is deferred until explicitly requested.

mod cache;
mod pool;
mod program;
mod snapshot;
mod tracker;

pub(crate) use cache::ResourceCache;
pub(crate) use pool::BufferPool;
pub(crate) use program::LinkedProgram;
pub(crate) use snapshot::{CaptureLatch, SnapshotSlot};
pub(crate) use tracker::UniformTracker;

pub use pool::PoolError;
