//! Board note domain model.
//!
//! # Responsibility
//! - Define the canonical note record rendered on the kanban board.
//! - Define the closed set of board columns and their storage encoding.
//! - Validate caller-supplied note fields before persistence.
//!
//! # Invariants
//! - `id` and `owner_id` never change after creation.
//! - Among non-archived notes of one `(owner_id, column)` partition, `order`
//!   values form the contiguous sequence `0..count`.
//! - Archived notes do not occupy an order slot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable note identifier.
pub type NoteId = Uuid;

/// Opaque identifier of the principal owning a note.
pub type OwnerId = Uuid;

/// Lowest accepted priority value.
pub const PRIORITY_MIN: u8 = 1;
/// Highest accepted priority value.
pub const PRIORITY_MAX: u8 = 5;

/// Kanban stage a note belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BoardColumn {
    /// Not started.
    #[default]
    ToDo,
    /// Work is in progress.
    InProgress,
    /// Completed.
    Done,
}

impl BoardColumn {
    /// All columns in board display order.
    pub const ALL: [BoardColumn; 3] = [Self::ToDo, Self::InProgress, Self::Done];

    /// Storage encoding used in `notes.board_column`.
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::ToDo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// User-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }

    /// Parses either the storage encoding or the user-facing label.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "todo" | "To Do" => Some(Self::ToDo),
            "in_progress" | "In Progress" => Some(Self::InProgress),
            "done" | "Done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl Display for BoardColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical note read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: OwnerId,
    pub title: String,
    pub content: String,
    pub column: BoardColumn,
    /// Zero-based rank inside the `(owner_id, column)` partition.
    pub order: i64,
    /// Lowercase, deduplicated, sorted.
    pub tags: Vec<String>,
    /// Unix epoch milliseconds.
    pub due_at: Option<i64>,
    /// `1..=5` when set.
    pub priority: Option<u8>,
    pub assigned_to: Option<OwnerId>,
    pub is_archived: bool,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

impl Note {
    /// Returns whether this note takes part in board ordering.
    pub fn is_active(&self) -> bool {
        !self.is_archived
    }
}

/// Input for creating one note. Position is always assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub column: BoardColumn,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_at: Option<i64>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub assigned_to: Option<OwnerId>,
}

impl NewNote {
    /// Creates input with title/content in the given column.
    pub fn new(title: impl Into<String>, content: impl Into<String>, column: BoardColumn) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            column,
            ..Self::default()
        }
    }

    /// Validates fields and returns a normalized copy.
    ///
    /// Title is trimmed and tags are normalized.
    pub fn normalized(&self) -> Result<Self, NoteValidationError> {
        Ok(Self {
            title: normalize_title(&self.title)?,
            content: self.content.clone(),
            column: self.column,
            tags: normalize_tags(&self.tags)?,
            due_at: self.due_at,
            priority: validate_priority(self.priority)?,
            assigned_to: self.assigned_to,
        })
    }
}

/// Partial field update. `None` leaves the field unchanged.
///
/// Column and order are absent: placement changes only through
/// the move path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the due date.
    pub due_at: Option<Option<i64>>,
    /// `Some(None)` clears the priority.
    pub priority: Option<Option<u8>>,
    /// `Some(None)` clears the assignee.
    pub assigned_to: Option<Option<OwnerId>>,
}

impl NotePatch {
    /// Returns whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.due_at.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
    }

    /// Applies the patch to `note` after validating every provided field.
    pub fn apply_to(&self, note: &mut Note) -> Result<(), NoteValidationError> {
        if let Some(title) = self.title.as_deref() {
            note.title = normalize_title(title)?;
        }
        if let Some(content) = self.content.as_ref() {
            note.content = content.clone();
        }
        if let Some(tags) = self.tags.as_deref() {
            note.tags = normalize_tags(tags)?;
        }
        if let Some(due_at) = self.due_at {
            note.due_at = due_at;
        }
        if let Some(priority) = self.priority {
            note.priority = validate_priority(priority)?;
        }
        if let Some(assigned_to) = self.assigned_to {
            note.assigned_to = assigned_to;
        }
        Ok(())
    }
}

/// Field-level validation failures for note writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteValidationError {
    /// Title is blank after trim.
    BlankTitle,
    /// Priority outside `1..=5`.
    PriorityOutOfRange(u8),
    /// Tag is blank after trim.
    InvalidTag(String),
}

impl Display for NoteValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "note title must not be blank"),
            Self::PriorityOutOfRange(value) => write!(
                f,
                "note priority {value} is outside {PRIORITY_MIN}..={PRIORITY_MAX}"
            ),
            Self::InvalidTag(value) => write!(f, "invalid tag: `{value}`"),
        }
    }
}

impl Error for NoteValidationError {}

fn normalize_title(value: &str) -> Result<String, NoteValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NoteValidationError::BlankTitle);
    }
    Ok(trimmed.to_string())
}

fn validate_priority(value: Option<u8>) -> Result<Option<u8>, NoteValidationError> {
    match value {
        Some(p) if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&p) => {
            Err(NoteValidationError::PriorityOutOfRange(p))
        }
        other => Ok(other),
    }
}

/// Trims, lowercases, and deduplicates tags. Blank tags are rejected.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, NoteValidationError> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            return Err(NoteValidationError::InvalidTag(tag.clone()));
        }
        unique.insert(trimmed.to_lowercase());
    }
    Ok(unique.into_iter().collect())
}
