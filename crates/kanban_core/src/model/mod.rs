//! Board domain model.
//!
//! # Responsibility
//! - Define note, column, and write-input shapes shared by repository and
//!   service layers.
//!
//! # Invariants
//! - Every note is identified by a stable `NoteId` and owned by exactly one
//!   `OwnerId`.

pub mod note;
