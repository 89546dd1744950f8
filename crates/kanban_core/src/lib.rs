//! Core ordering engine for kanban boards.
//! Notes stay contiguously ordered per owner and column under concurrent moves.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod ordering;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status};
pub use model::note::{
    BoardColumn, NewNote, Note, NoteId, NotePatch, NoteValidationError, OwnerId,
};
pub use ordering::allocator::{plan_move, plan_removal, MovePlan, OrderRange, OrderShift, Placement};
pub use ordering::retry::{RetryError, RetryPolicy};
pub use repo::note_repo::{
    MoveApplied, NoteRepository, RepoError, RepoResult, SqliteNoteRepository,
};
pub use service::board_service::{BoardService, BoardServiceError, MoveOutcome};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
