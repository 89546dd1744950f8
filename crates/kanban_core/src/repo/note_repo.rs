//! Board note repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist notes and their tags per owner.
//! - Run each ordering mutation (create, move, archive, restore, delete) as
//!   one `BEGIN IMMEDIATE` transaction that re-reads state, plans shifts
//!   with the allocator, and applies them as bulk range updates.
//! - Classify lock contention as `RepoError::Conflict` so callers can retry.
//!
//! # Invariants
//! - Every statement is scoped by `owner_uuid`; no write crosses owners.
//! - Active notes of one `(owner, column)` are contiguous `0..count` after
//!   every committed transaction.
//! - One call is one attempt: no retries happen at this layer.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::note::{BoardColumn, NewNote, Note, NoteId, NotePatch, NoteValidationError, OwnerId};
use crate::ordering::allocator::{plan_move, plan_removal, AllocationError, OrderShift, Placement};
use rusqlite::{ffi, params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NOTE_SELECT_SQL: &str = "SELECT
    owner_uuid,
    note_uuid,
    title,
    content,
    board_column,
    sort_order,
    due_at,
    priority,
    assigned_to,
    is_archived,
    created_at,
    updated_at
FROM notes";

/// Result type used by note repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from note repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Non-transient SQLite/bootstrap failure.
    Db(DbError),
    /// Lock contention with a concurrent transaction; a fresh attempt may
    /// succeed.
    Conflict(DbError),
    /// Note does not exist for this owner, or is archived where an active
    /// note is required.
    NotFound(NoteId),
    /// Note id already used by this owner.
    AlreadyExists(NoteId),
    /// Target order outside `0..=max` for the target column.
    InvalidOrder { requested: i64, max: i64 },
    /// Field validation failed.
    Validation(NoteValidationError),
    /// Persisted data cannot be converted to valid read model.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
}

impl RepoError {
    /// Returns whether retrying the whole attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Conflict(err) => write!(f, "transaction conflict: {err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "note already exists: {id}"),
            Self::InvalidOrder { requested, max } => {
                write!(f, "target order {requested} is outside 0..={max}")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "note repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "note repository requires table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) | Self::Conflict(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        if value.is_lock_conflict() {
            Self::Conflict(value)
        } else {
            Self::Db(value)
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        DbError::Sqlite(value).into()
    }
}

impl From<NoteValidationError> for RepoError {
    fn from(value: NoteValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<AllocationError> for RepoError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::OrderOutOfRange { requested, max } => {
                Self::InvalidOrder { requested, max }
            }
        }
    }
}

/// Outcome of one move attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveApplied {
    /// Note already sat at the target; nothing was written.
    Unchanged(Note),
    /// Shifts and the new placement were committed.
    Moved(Note),
}

impl MoveApplied {
    pub fn into_note(self) -> Note {
        match self {
            Self::Unchanged(note) | Self::Moved(note) => note,
        }
    }
}

/// Repository interface for board note operations.
///
/// Mutating methods are single attempts and may fail with
/// `RepoError::Conflict`.
pub trait NoteRepository {
    /// Inserts one note at the tail of its column.
    fn create_note(&self, owner_id: OwnerId, note_id: NoteId, note: &NewNote) -> RepoResult<Note>;
    /// Loads one note, archived or not.
    fn get_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Option<Note>>;
    /// Lists active notes sorted by column then order.
    fn list_active(&self, owner_id: OwnerId) -> RepoResult<Vec<Note>>;
    /// Lists archived notes, most recently updated first.
    fn list_archived(&self, owner_id: OwnerId) -> RepoResult<Vec<Note>>;
    /// Applies a field patch. Never changes placement.
    fn update_note(&self, owner_id: OwnerId, note_id: NoteId, patch: &NotePatch) -> RepoResult<Note>;
    /// Moves one active note to `target`, shifting siblings.
    fn move_note(
        &self,
        owner_id: OwnerId,
        note_id: NoteId,
        target: Placement,
    ) -> RepoResult<MoveApplied>;
    /// Archives one note and compacts its former partition.
    fn archive_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note>;
    /// Un-archives one note at the tail of its column.
    fn restore_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note>;
    /// Deletes one note and compacts its partition when it was active.
    fn delete_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<()>;
}

/// SQLite-backed note repository.
pub struct SqliteNoteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNoteRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_note_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn begin(&self) -> RepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl NoteRepository for SqliteNoteRepository<'_> {
    fn create_note(&self, owner_id: OwnerId, note_id: NoteId, note: &NewNote) -> RepoResult<Note> {
        let note = note.normalized()?;
        let tx = self.begin()?;
        let order = count_active(&tx, owner_id, note.column, None)?;

        let inserted = tx.execute(
            "INSERT INTO notes (
                owner_uuid,
                note_uuid,
                title,
                content,
                board_column,
                sort_order,
                due_at,
                priority,
                assigned_to,
                is_archived
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0);",
            params![
                owner_id.to_string(),
                note_id.to_string(),
                note.title.as_str(),
                note.content.as_str(),
                note.column.as_db_str(),
                order,
                note.due_at,
                note.priority,
                note.assigned_to.map(|value| value.to_string()),
            ],
        );
        if let Err(err) = inserted {
            if is_primary_key_violation(&err) {
                return Err(RepoError::AlreadyExists(note_id));
            }
            return Err(err.into());
        }

        replace_tags(&tx, owner_id, note_id, &note.tags)?;
        let created = load_required_note(&tx, owner_id, note_id)?;
        tx.commit()?;
        Ok(created)
    }

    fn get_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Option<Note>> {
        load_note(self.conn, owner_id, note_id)
    }

    fn list_active(&self, owner_id: OwnerId) -> RepoResult<Vec<Note>> {
        query_notes(
            self.conn,
            &format!(
                "{NOTE_SELECT_SQL}
                 WHERE owner_uuid = ?1
                   AND is_archived = 0
                 ORDER BY
                   CASE board_column
                     WHEN 'todo' THEN 0
                     WHEN 'in_progress' THEN 1
                     ELSE 2
                   END ASC,
                   sort_order ASC,
                   note_uuid ASC;"
            ),
            owner_id,
        )
    }

    fn list_archived(&self, owner_id: OwnerId) -> RepoResult<Vec<Note>> {
        query_notes(
            self.conn,
            &format!(
                "{NOTE_SELECT_SQL}
                 WHERE owner_uuid = ?1
                   AND is_archived = 1
                 ORDER BY updated_at DESC, note_uuid ASC;"
            ),
            owner_id,
        )
    }

    fn update_note(&self, owner_id: OwnerId, note_id: NoteId, patch: &NotePatch) -> RepoResult<Note> {
        let tx = self.begin()?;
        let mut note = load_required_note(&tx, owner_id, note_id)?;
        if patch.is_empty() {
            return Ok(note);
        }
        patch.apply_to(&mut note)?;

        tx.execute(
            "UPDATE notes
             SET title = ?3,
                 content = ?4,
                 due_at = ?5,
                 priority = ?6,
                 assigned_to = ?7,
                 updated_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)
             WHERE owner_uuid = ?1
               AND note_uuid = ?2;",
            params![
                owner_id.to_string(),
                note_id.to_string(),
                note.title.as_str(),
                note.content.as_str(),
                note.due_at,
                note.priority,
                note.assigned_to.map(|value| value.to_string()),
            ],
        )?;
        if patch.tags.is_some() {
            replace_tags(&tx, owner_id, note_id, &note.tags)?;
        }

        let updated = load_required_note(&tx, owner_id, note_id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn move_note(
        &self,
        owner_id: OwnerId,
        note_id: NoteId,
        target: Placement,
    ) -> RepoResult<MoveApplied> {
        let tx = self.begin()?;
        let note = load_required_note(&tx, owner_id, note_id)?;
        if note.is_archived {
            return Err(RepoError::NotFound(note_id));
        }

        let current = Placement::new(note.column, note.order);
        let target_count = count_active(&tx, owner_id, target.column, Some(note_id))?;
        let Some(plan) = plan_move(current, target, target_count)? else {
            return Ok(MoveApplied::Unchanged(note));
        };

        for shift in &plan.shifts {
            apply_shift(&tx, owner_id, note_id, shift)?;
        }
        tx.execute(
            "UPDATE notes
             SET board_column = ?3,
                 sort_order = ?4,
                 updated_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)
             WHERE owner_uuid = ?1
               AND note_uuid = ?2
               AND is_archived = 0;",
            params![
                owner_id.to_string(),
                note_id.to_string(),
                plan.target.column.as_db_str(),
                plan.target.order,
            ],
        )?;

        let moved = load_required_note(&tx, owner_id, note_id)?;
        tx.commit()?;
        Ok(MoveApplied::Moved(moved))
    }

    fn archive_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note> {
        let tx = self.begin()?;
        let note = load_required_note(&tx, owner_id, note_id)?;
        if note.is_archived {
            return Ok(note);
        }

        let shift = plan_removal(Placement::new(note.column, note.order));
        apply_shift(&tx, owner_id, note_id, &shift)?;
        tx.execute(
            "UPDATE notes
             SET is_archived = 1,
                 updated_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)
             WHERE owner_uuid = ?1
               AND note_uuid = ?2;",
            params![owner_id.to_string(), note_id.to_string()],
        )?;

        let archived = load_required_note(&tx, owner_id, note_id)?;
        tx.commit()?;
        Ok(archived)
    }

    fn restore_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note> {
        let tx = self.begin()?;
        let note = load_required_note(&tx, owner_id, note_id)?;
        if !note.is_archived {
            return Ok(note);
        }

        let order = count_active(&tx, owner_id, note.column, None)?;
        tx.execute(
            "UPDATE notes
             SET is_archived = 0,
                 sort_order = ?3,
                 updated_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)
             WHERE owner_uuid = ?1
               AND note_uuid = ?2;",
            params![owner_id.to_string(), note_id.to_string(), order],
        )?;

        let restored = load_required_note(&tx, owner_id, note_id)?;
        tx.commit()?;
        Ok(restored)
    }

    fn delete_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<()> {
        let tx = self.begin()?;
        let note = load_required_note(&tx, owner_id, note_id)?;

        tx.execute(
            "DELETE FROM notes
             WHERE owner_uuid = ?1
               AND note_uuid = ?2;",
            params![owner_id.to_string(), note_id.to_string()],
        )?;
        if note.is_active() {
            let shift = plan_removal(Placement::new(note.column, note.order));
            apply_shift(&tx, owner_id, note_id, &shift)?;
        }

        tx.commit()?;
        Ok(())
    }
}

/// Applies one compensation rule as a single bulk update over the active
/// partition, never touching `moving`.
fn apply_shift(
    conn: &Connection,
    owner_id: OwnerId,
    moving: NoteId,
    shift: &OrderShift,
) -> RepoResult<usize> {
    let changed = conn.execute(
        "UPDATE notes
         SET sort_order = sort_order + ?1
         WHERE owner_uuid = ?2
           AND board_column = ?3
           AND is_archived = 0
           AND note_uuid <> ?4
           AND sort_order >= ?5
           AND (?6 IS NULL OR sort_order <= ?6);",
        params![
            shift.delta,
            owner_id.to_string(),
            shift.column.as_db_str(),
            moving.to_string(),
            shift.range.start,
            shift.range.end,
        ],
    )?;
    Ok(changed)
}

fn count_active(
    conn: &Connection,
    owner_id: OwnerId,
    column: BoardColumn,
    excluding: Option<NoteId>,
) -> RepoResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*)
         FROM notes
         WHERE owner_uuid = ?1
           AND board_column = ?2
           AND is_archived = 0
           AND (?3 IS NULL OR note_uuid <> ?3);",
        params![
            owner_id.to_string(),
            column.as_db_str(),
            excluding.map(|value| value.to_string()),
        ],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn load_note(conn: &Connection, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Option<Note>> {
    let mut stmt = conn.prepare(&format!(
        "{NOTE_SELECT_SQL}
         WHERE owner_uuid = ?1
           AND note_uuid = ?2;"
    ))?;
    let mut rows = stmt.query(params![owner_id.to_string(), note_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_note_row(conn, row)?));
    }
    Ok(None)
}

fn load_required_note(conn: &Connection, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note> {
    load_note(conn, owner_id, note_id)?.ok_or(RepoError::NotFound(note_id))
}

fn query_notes(conn: &Connection, sql: &str, owner_id: OwnerId) -> RepoResult<Vec<Note>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([owner_id.to_string()])?;
    let mut notes = Vec::new();
    while let Some(row) = rows.next()? {
        notes.push(parse_note_row(conn, row)?);
    }
    Ok(notes)
}

fn replace_tags(
    conn: &Connection,
    owner_id: OwnerId,
    note_id: NoteId,
    tags: &[String],
) -> RepoResult<()> {
    let owner = owner_id.to_string();
    let note = note_id.to_string();
    conn.execute(
        "DELETE FROM note_tags
         WHERE owner_uuid = ?1
           AND note_uuid = ?2;",
        params![owner, note],
    )?;
    for tag in tags {
        conn.execute(
            "INSERT OR IGNORE INTO note_tags (owner_uuid, note_uuid, tag) VALUES (?1, ?2, ?3);",
            params![owner, note, tag.as_str()],
        )?;
    }
    Ok(())
}

fn load_tags(conn: &Connection, owner_uuid: &str, note_uuid: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT tag
         FROM note_tags
         WHERE owner_uuid = ?1
           AND note_uuid = ?2
         ORDER BY tag ASC;",
    )?;
    let mut rows = stmt.query([owner_uuid, note_uuid])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        tags.push(row.get(0)?);
    }
    Ok(tags)
}

fn parse_note_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Note> {
    let owner_text: String = row.get("owner_uuid")?;
    let note_text: String = row.get("note_uuid")?;

    let column_text: String = row.get("board_column")?;
    let column = BoardColumn::parse(&column_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid board column `{column_text}` in notes.board_column"
        ))
    })?;

    let is_archived = match row.get::<_, i64>("is_archived")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_archived value `{other}` in notes.is_archived"
            )));
        }
    };

    let priority = row
        .get::<_, Option<i64>>("priority")?
        .map(|value| {
            u8::try_from(value).map_err(|_| {
                RepoError::InvalidData(format!("invalid priority `{value}` in notes.priority"))
            })
        })
        .transpose()?;

    let assigned_to = row
        .get::<_, Option<String>>("assigned_to")?
        .map(|value| parse_uuid(&value, "notes.assigned_to"))
        .transpose()?;

    Ok(Note {
        id: parse_uuid(&note_text, "notes.note_uuid")?,
        owner_id: parse_uuid(&owner_text, "notes.owner_uuid")?,
        title: row.get("title")?,
        content: row.get("content")?,
        column,
        order: row.get("sort_order")?,
        tags: load_tags(conn, &owner_text, &note_text)?,
        due_at: row.get("due_at")?,
        priority,
        assigned_to,
        is_archived,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn ensure_note_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["notes", "note_tags"] {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1
                 FROM sqlite_master
                 WHERE type = 'table' AND name = ?1;",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}
