//! Board use-case service.
//!
//! # Responsibility
//! - Expose note create/read/update/move/archive/restore/delete to callers.
//! - Wrap every repository call, reads included, in the bounded
//!   conflict-retry loop.
//! - Translate repository failures into the board error taxonomy.
//!
//! # Invariants
//! - Transient conflicts never surface unless the retry budget runs out.
//! - A move to the note's current placement performs no transaction.
//! - Each retry attempt re-reads state inside a fresh transaction.

use crate::model::note::{BoardColumn, NewNote, Note, NoteId, NotePatch, NoteValidationError, OwnerId};
use crate::ordering::allocator::Placement;
use crate::ordering::retry::{run_with_retry, Retried, RetryError, RetryPolicy};
use crate::repo::note_repo::{MoveApplied, NoteRepository, RepoError, RepoResult};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Errors from board service operations.
#[derive(Debug)]
pub enum BoardServiceError {
    /// Note does not exist, is not owned by the caller, or is archived where
    /// an active note is required.
    NotFound(NoteId),
    /// Note id already used by this owner.
    AlreadyExists(NoteId),
    /// Target order outside `0..=max` for the target column.
    InvalidOrder { requested: i64, max: i64 },
    /// Conflicts persisted through every attempt. Callers should ask the
    /// user to try again.
    RetryExhausted { attempts: u32 },
    /// Field validation failed.
    Validation(NoteValidationError),
    /// Non-transient storage failure.
    StorageUnavailable(RepoError),
}

impl Display for BoardServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "note already exists: {id}"),
            Self::InvalidOrder { requested, max } => {
                write!(f, "target order {requested} is outside 0..={max}")
            }
            Self::RetryExhausted { attempts } => write!(
                f,
                "board is busy; gave up after {attempts} conflicting attempts"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::StorageUnavailable(err) => write!(f, "storage unavailable: {err}"),
        }
    }
}

impl Error for BoardServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::StorageUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for BoardServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::AlreadyExists(id) => Self::AlreadyExists(id),
            RepoError::InvalidOrder { requested, max } => Self::InvalidOrder { requested, max },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::StorageUnavailable(other),
        }
    }
}

impl From<RetryError<RepoError>> for BoardServiceError {
    fn from(value: RetryError<RepoError>) -> Self {
        match value {
            RetryError::Exhausted { attempts, .. } => Self::RetryExhausted { attempts },
            RetryError::Aborted(err) => err.into(),
        }
    }
}

impl From<NoteValidationError> for BoardServiceError {
    fn from(value: NoteValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Result of a move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Note as persisted after the move.
    pub note: Note,
    /// Transaction attempts used. `0` when the move was a no-op caught
    /// before any transaction began.
    pub attempts: u32,
    /// Whether any row was written.
    pub changed: bool,
}

/// Board service facade over repository implementations.
pub struct BoardService<R: NoteRepository> {
    repo: R,
    policy: RetryPolicy,
}

impl<R: NoteRepository> BoardService<R> {
    /// Creates service with the default retry policy.
    pub fn new(repo: R) -> Self {
        Self::with_policy(repo, RetryPolicy::default())
    }

    pub fn with_policy(repo: R, policy: RetryPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Creates one note at the tail of its column.
    pub fn create_note(&self, owner_id: OwnerId, note: NewNote) -> Result<Note, BoardServiceError> {
        self.create_note_with_id(owner_id, Uuid::new_v4(), note)
    }

    /// Creates one note with a caller-provided id, for import paths.
    pub fn create_note_with_id(
        &self,
        owner_id: OwnerId,
        note_id: NoteId,
        note: NewNote,
    ) -> Result<Note, BoardServiceError> {
        let note = note.normalized()?;
        let created = self.mutate("note_create", || {
            self.repo.create_note(owner_id, note_id, &note)
        })?;
        info!(
            "event=note_create module=board status=ok column={} order={}",
            created.value.column.as_db_str(),
            created.value.order
        );
        Ok(created.value)
    }

    /// Loads one note owned by `owner_id`, archived or not.
    pub fn get_note(&self, owner_id: OwnerId, note_id: NoteId) -> Result<Note, BoardServiceError> {
        self.read("note_get", || self.repo.get_note(owner_id, note_id))?
            .ok_or(BoardServiceError::NotFound(note_id))
    }

    /// Lists active notes sorted by column then order.
    pub fn list_board(&self, owner_id: OwnerId) -> Result<Vec<Note>, BoardServiceError> {
        self.read("board_list", || self.repo.list_active(owner_id))
    }

    /// Lists archived notes, most recently updated first.
    pub fn list_archived(&self, owner_id: OwnerId) -> Result<Vec<Note>, BoardServiceError> {
        self.read("archive_list", || self.repo.list_archived(owner_id))
    }

    /// Updates note fields. Placement is untouched.
    pub fn update_note(
        &self,
        owner_id: OwnerId,
        note_id: NoteId,
        patch: NotePatch,
    ) -> Result<Note, BoardServiceError> {
        let updated = self.mutate("note_update", || {
            self.repo.update_note(owner_id, note_id, &patch)
        })?;
        Ok(updated.value)
    }

    /// Moves one note to `(column, order)` within the owner's board.
    ///
    /// `order` must lie in `0..=count` where `count` is the number of active
    /// notes in `column` excluding the moving note.
    ///
    /// # Errors
    /// - `NotFound` when the note is missing, foreign, or archived.
    /// - `InvalidOrder` when `order` is outside the valid range.
    /// - `RetryExhausted` when conflicts outlast the retry budget.
    /// - `StorageUnavailable` on any other storage failure.
    pub fn move_note(
        &self,
        owner_id: OwnerId,
        note_id: NoteId,
        column: BoardColumn,
        order: i64,
    ) -> Result<MoveOutcome, BoardServiceError> {
        let started_at = Instant::now();
        let current = self
            .read("note_move_check", || self.repo.get_note(owner_id, note_id))?
            .filter(Note::is_active)
            .ok_or(BoardServiceError::NotFound(note_id))?;

        if current.column == column && current.order == order {
            debug!(
                "event=note_move module=board status=noop column={} order={}",
                column.as_db_str(),
                order
            );
            return Ok(MoveOutcome {
                note: current,
                attempts: 0,
                changed: false,
            });
        }

        let target = Placement::new(column, order);
        let Retried { value, attempts } = self
            .mutate("note_move", || self.repo.move_note(owner_id, note_id, target))
            .map_err(|err| {
                warn!(
                    "event=note_move module=board status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                err
            })?;

        let changed = matches!(value, MoveApplied::Moved(_));
        info!(
            "event=note_move module=board status=ok from={}:{} to={}:{} attempts={} changed={} duration_ms={}",
            current.column.as_db_str(),
            current.order,
            column.as_db_str(),
            order,
            attempts,
            changed,
            started_at.elapsed().as_millis()
        );
        Ok(MoveOutcome {
            note: value.into_note(),
            attempts,
            changed,
        })
    }

    /// Archives one note and compacts its column.
    pub fn archive_note(&self, owner_id: OwnerId, note_id: NoteId) -> Result<Note, BoardServiceError> {
        let archived = self.mutate("note_archive", || {
            self.repo.archive_note(owner_id, note_id)
        })?;
        info!(
            "event=note_archive module=board status=ok attempts={}",
            archived.attempts
        );
        Ok(archived.value)
    }

    /// Restores one archived note to the tail of its column.
    pub fn restore_note(&self, owner_id: OwnerId, note_id: NoteId) -> Result<Note, BoardServiceError> {
        let restored = self.mutate("note_restore", || {
            self.repo.restore_note(owner_id, note_id)
        })?;
        info!(
            "event=note_restore module=board status=ok column={} order={}",
            restored.value.column.as_db_str(),
            restored.value.order
        );
        Ok(restored.value)
    }

    /// Deletes one note and compacts its column.
    pub fn delete_note(&self, owner_id: OwnerId, note_id: NoteId) -> Result<(), BoardServiceError> {
        let deleted = self.mutate("note_delete", || self.repo.delete_note(owner_id, note_id))?;
        info!(
            "event=note_delete module=board status=ok attempts={}",
            deleted.attempts
        );
        Ok(())
    }

    fn read<T, F>(&self, operation: &'static str, op: F) -> Result<T, BoardServiceError>
    where
        F: FnMut() -> RepoResult<T>,
    {
        self.mutate(operation, op).map(|retried| retried.value)
    }

    fn mutate<T, F>(&self, operation: &'static str, mut op: F) -> Result<Retried<T>, BoardServiceError>
    where
        F: FnMut() -> RepoResult<T>,
    {
        run_with_retry(&self.policy, operation, RepoError::is_transient, |_| op())
            .map_err(Into::into)
    }
}
