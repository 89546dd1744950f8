//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define owner-scoped data access contracts for board notes.
//! - Isolate SQLite query and transaction details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `InvalidOrder`) and
//!   separate transient `Conflict` from other storage failures.

pub mod note_repo;
