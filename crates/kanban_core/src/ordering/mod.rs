//! Ordered-position engine.
//!
//! # Responsibility
//! - `allocator`: pure shift planning for moves and removals.
//! - `retry`: bounded retry with linear backoff around transactional
//!   attempts.
//!
//! # Invariants
//! - Storage-facing code lives in `repo`; nothing here performs I/O except
//!   backoff sleeps.

pub mod allocator;
pub mod retry;
