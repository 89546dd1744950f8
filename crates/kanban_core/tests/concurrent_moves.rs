use kanban_core::db::{open_db_with, DbError};
use kanban_core::{
    BoardColumn, BoardService, BoardServiceError, EngineConfig, MoveApplied, NewNote, Note,
    NoteId, NotePatch, NoteRepository, OwnerId, Placement, RepoError, RepoResult, RetryPolicy,
    SqliteNoteRepository,
};
use rusqlite::{ffi, Connection};
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

fn no_wait_config() -> EngineConfig {
    EngineConfig {
        busy_timeout_ms: 0,
        ..EngineConfig::default()
    }
}

fn open(path: &Path) -> Connection {
    open_db_with(path, &no_wait_config()).unwrap()
}

fn seed(conn: &Connection, owner: OwnerId, column: BoardColumn, titles: &[&str]) -> Vec<Note> {
    let service = BoardService::new(SqliteNoteRepository::try_new(conn).unwrap());
    titles
        .iter()
        .map(|title| {
            service
                .create_note(owner, NewNote::new(*title, "", column))
                .unwrap()
        })
        .collect()
}

fn placements(conn: &Connection, owner: OwnerId) -> Vec<(String, BoardColumn, i64)> {
    let service = BoardService::new(SqliteNoteRepository::try_new(conn).unwrap());
    service
        .list_board(owner)
        .unwrap()
        .into_iter()
        .map(|note| (note.title, note.column, note.order))
        .collect()
}

fn assert_contiguous(conn: &Connection, owner: OwnerId) {
    let board = placements(conn, owner);
    for column in BoardColumn::ALL {
        let orders: Vec<i64> = board
            .iter()
            .filter(|(_, col, _)| *col == column)
            .map(|(_, _, order)| *order)
            .collect();
        let wanted: Vec<i64> = (0..orders.len() as i64).collect();
        assert_eq!(orders, wanted, "column {column} is not contiguous");
    }
}

fn busy_error() -> RepoError {
    RepoError::Conflict(DbError::Sqlite(rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_BUSY),
        None,
    )))
}

/// Fails the first `conflicts` move attempts with a busy error before
/// delegating, and counts every move attempt. Reads fail the first
/// `read_conflicts` times.
struct ConflictingRepo<R> {
    inner: R,
    conflicts: Cell<u32>,
    read_conflicts: Cell<u32>,
    move_calls: Rc<Cell<u32>>,
}

impl<R> ConflictingRepo<R> {
    fn new(inner: R, conflicts: u32) -> (Self, Rc<Cell<u32>>) {
        let move_calls = Rc::new(Cell::new(0));
        let repo = Self {
            inner,
            conflicts: Cell::new(conflicts),
            read_conflicts: Cell::new(0),
            move_calls: Rc::clone(&move_calls),
        };
        (repo, move_calls)
    }

    fn with_read_conflicts(self, read_conflicts: u32) -> Self {
        self.read_conflicts.set(read_conflicts);
        self
    }

    fn read_gate(&self) -> RepoResult<()> {
        if self.read_conflicts.get() > 0 {
            self.read_conflicts.set(self.read_conflicts.get() - 1);
            return Err(busy_error());
        }
        Ok(())
    }
}

impl<R: NoteRepository> NoteRepository for ConflictingRepo<R> {
    fn create_note(&self, owner_id: OwnerId, note_id: NoteId, note: &NewNote) -> RepoResult<Note> {
        self.inner.create_note(owner_id, note_id, note)
    }

    fn get_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Option<Note>> {
        self.read_gate()?;
        self.inner.get_note(owner_id, note_id)
    }

    fn list_active(&self, owner_id: OwnerId) -> RepoResult<Vec<Note>> {
        self.read_gate()?;
        self.inner.list_active(owner_id)
    }

    fn list_archived(&self, owner_id: OwnerId) -> RepoResult<Vec<Note>> {
        self.inner.list_archived(owner_id)
    }

    fn update_note(&self, owner_id: OwnerId, note_id: NoteId, patch: &NotePatch) -> RepoResult<Note> {
        self.inner.update_note(owner_id, note_id, patch)
    }

    fn move_note(
        &self,
        owner_id: OwnerId,
        note_id: NoteId,
        target: Placement,
    ) -> RepoResult<MoveApplied> {
        self.move_calls.set(self.move_calls.get() + 1);
        if self.conflicts.get() > 0 {
            self.conflicts.set(self.conflicts.get() - 1);
            return Err(busy_error());
        }
        self.inner.move_note(owner_id, note_id, target)
    }

    fn archive_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note> {
        self.inner.archive_note(owner_id, note_id)
    }

    fn restore_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<Note> {
        self.inner.restore_note(owner_id, note_id)
    }

    fn delete_note(&self, owner_id: OwnerId, note_id: NoteId) -> RepoResult<()> {
        self.inner.delete_note(owner_id, note_id)
    }
}

#[test]
fn busy_error_is_classified_as_transient() {
    assert!(busy_error().is_transient());
    assert!(!RepoError::NotFound(Uuid::new_v4()).is_transient());
}

#[test]
fn injected_conflict_is_retried_once_then_commits() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&dir.path().join("board.db"));
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b", "c", "d"]);

    let (repo, move_calls) = ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), 1);
    let service = BoardService::with_policy(repo, RetryPolicy::new(3, Duration::ZERO));
    let outcome = service
        .move_note(owner, notes[0].id, BoardColumn::ToDo, 2)
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(move_calls.get(), 2);
    assert!(outcome.changed);
    assert_eq!(
        placements(&conn, owner),
        vec![
            ("b".to_string(), BoardColumn::ToDo, 0),
            ("c".to_string(), BoardColumn::ToDo, 1),
            ("a".to_string(), BoardColumn::ToDo, 2),
            ("d".to_string(), BoardColumn::ToDo, 3),
        ]
    );
}

#[test]
fn busy_read_before_move_is_retried_not_reported_as_storage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&dir.path().join("board.db"));
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b", "c"]);

    let (repo, move_calls) = ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), 0);
    let repo = repo.with_read_conflicts(1);
    let service = BoardService::with_policy(repo, RetryPolicy::new(5, Duration::ZERO));
    let outcome = service
        .move_note(owner, notes[0].id, BoardColumn::ToDo, 1)
        .unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(move_calls.get(), 1);
    assert_eq!(
        placements(&conn, owner),
        vec![
            ("b".to_string(), BoardColumn::ToDo, 0),
            ("a".to_string(), BoardColumn::ToDo, 1),
            ("c".to_string(), BoardColumn::ToDo, 2),
        ]
    );
}

#[test]
fn busy_reads_are_retried_for_get_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&dir.path().join("board.db"));
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::InProgress, &["a", "b"]);

    let (repo, _) = ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), 0);
    let service =
        BoardService::with_policy(repo.with_read_conflicts(2), RetryPolicy::new(3, Duration::ZERO));
    assert_eq!(service.get_note(owner, notes[1].id).unwrap(), notes[1]);

    let (repo, _) = ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), 0);
    let service =
        BoardService::with_policy(repo.with_read_conflicts(2), RetryPolicy::new(3, Duration::ZERO));
    assert_eq!(service.list_board(owner).unwrap(), notes);
}

#[test]
fn busy_reads_past_budget_report_retry_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&dir.path().join("board.db"));
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b"]);

    let (repo, move_calls) = ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), 0);
    let service = BoardService::with_policy(
        repo.with_read_conflicts(u32::MAX),
        RetryPolicy::new(2, Duration::ZERO),
    );
    let err = service
        .move_note(owner, notes[0].id, BoardColumn::Done, 0)
        .unwrap_err();

    assert!(matches!(err, BoardServiceError::RetryExhausted { attempts: 2 }));
    assert_eq!(move_calls.get(), 0);
}

#[test]
fn no_op_move_never_reaches_a_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&dir.path().join("board.db"));
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::Done, &["a", "b"]);

    let (repo, move_calls) = ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), 0);
    let service = BoardService::new(repo);
    let outcome = service
        .move_note(owner, notes[0].id, BoardColumn::Done, 0)
        .unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.attempts, 0);
    assert_eq!(move_calls.get(), 0);
    assert_eq!(outcome.note.updated_at, notes[0].updated_at);
}

#[test]
fn conflicts_on_every_attempt_exhaust_budget_without_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&dir.path().join("board.db"));
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b", "c"]);
    let before = placements(&conn, owner);

    let (repo, move_calls) =
        ConflictingRepo::new(SqliteNoteRepository::try_new(&conn).unwrap(), u32::MAX);
    let service = BoardService::with_policy(repo, RetryPolicy::new(4, Duration::ZERO));
    let err = service
        .move_note(owner, notes[2].id, BoardColumn::Done, 0)
        .unwrap_err();

    assert!(matches!(err, BoardServiceError::RetryExhausted { attempts: 4 }));
    assert_eq!(move_calls.get(), 4);
    assert_eq!(placements(&conn, owner), before);
}

#[test]
fn held_write_lock_exhausts_budget_and_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.db");
    let conn = open(&path);
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b", "c"]);
    let before = placements(&conn, owner);

    let blocker = open(&path);
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let service = BoardService::with_policy(
        SqliteNoteRepository::try_new(&conn).unwrap(),
        RetryPolicy::new(3, Duration::from_millis(1)),
    );
    let err = service
        .move_note(owner, notes[0].id, BoardColumn::InProgress, 0)
        .unwrap_err();
    assert!(matches!(err, BoardServiceError::RetryExhausted { attempts: 3 }));

    blocker.execute_batch("ROLLBACK;").unwrap();
    let fresh = open(&path);
    assert_eq!(placements(&fresh, owner), before);
}

#[test]
fn move_waiting_on_concurrent_writer_retries_and_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.db");
    let conn = open(&path);
    let owner = Uuid::new_v4();
    let todo = seed(&conn, owner, BoardColumn::ToDo, &["n0", "n1", "n2"]);
    seed(&conn, owner, BoardColumn::InProgress, &["m0"]);

    let blocker = open(&path);
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        blocker.execute_batch("COMMIT;").unwrap();
    });

    let service = BoardService::with_policy(
        SqliteNoteRepository::try_new(&conn).unwrap(),
        RetryPolicy::new(12, Duration::from_millis(25)),
    );
    let outcome = service
        .move_note(owner, todo[1].id, BoardColumn::InProgress, 0)
        .unwrap();
    releaser.join().unwrap();

    assert!(outcome.attempts > 1, "first attempt should hit the held lock");
    assert_eq!(
        placements(&conn, owner),
        vec![
            ("n0".to_string(), BoardColumn::ToDo, 0),
            ("n2".to_string(), BoardColumn::ToDo, 1),
            ("n1".to_string(), BoardColumn::InProgress, 0),
            ("m0".to_string(), BoardColumn::InProgress, 1),
        ]
    );
}

#[test]
fn parallel_moves_on_separate_connections_keep_columns_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.db");
    let conn = open(&path);
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b", "c", "d", "e"]);

    let workers: Vec<_> = [
        (notes[0].id, BoardColumn::InProgress),
        (notes[1].id, BoardColumn::Done),
        (notes[2].id, BoardColumn::InProgress),
    ]
    .into_iter()
    .map(|(note_id, away)| {
        let path = path.clone();
        thread::spawn(move || {
            let conn = open(&path);
            let service = BoardService::with_policy(
                SqliteNoteRepository::try_new(&conn).unwrap(),
                RetryPolicy::new(200, Duration::from_millis(1)),
            );
            for _ in 0..10 {
                service.move_note(owner, note_id, away, 0).unwrap();
                service
                    .move_note(owner, note_id, BoardColumn::ToDo, 0)
                    .unwrap();
            }
        })
    })
    .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_contiguous(&conn, owner);
    let board = placements(&conn, owner);
    assert_eq!(board.len(), 5);
    assert!(board
        .iter()
        .all(|(_, column, _)| *column == BoardColumn::ToDo));
}

#[test]
fn parallel_moves_for_different_owners_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.db");
    let conn = open(&path);
    let owners = [Uuid::new_v4(), Uuid::new_v4()];
    let seeded: Vec<Vec<Note>> = owners
        .iter()
        .map(|owner| seed(&conn, *owner, BoardColumn::ToDo, &["a", "b", "c"]))
        .collect();

    let workers: Vec<_> = owners
        .iter()
        .zip(seeded.iter())
        .map(|(owner, notes)| {
            let path = path.clone();
            let owner = *owner;
            let last = notes[2].id;
            thread::spawn(move || {
                let conn = open(&path);
                let service = BoardService::with_policy(
                    SqliteNoteRepository::try_new(&conn).unwrap(),
                    RetryPolicy::new(200, Duration::from_millis(1)),
                );
                service
                    .move_note(owner, last, BoardColumn::ToDo, 0)
                    .unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    for owner in owners {
        let titles: Vec<_> = placements(&conn, owner)
            .into_iter()
            .map(|(title, _, order)| (title, order))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("c".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 2),
            ]
        );
    }
}

#[test]
fn overlapping_moves_in_one_column_commit_once_and_retry_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.db");
    let conn = open(&path);
    let owner = Uuid::new_v4();
    let notes = seed(&conn, owner, BoardColumn::ToDo, &["a", "b", "c", "d", "e"]);
    let second_conn = open(&path);

    // The first mover stalls inside its commit while holding the write lock.
    let (in_commit_tx, in_commit_rx) = mpsc::channel::<()>();
    let first_path = path.clone();
    let first_note = notes[0].id;
    let first = thread::spawn(move || {
        let conn = open(&first_path);
        let mut signal = Some(in_commit_tx);
        conn.commit_hook(Some(move || {
            if let Some(tx) = signal.take() {
                let _ = tx.send(());
                thread::sleep(Duration::from_millis(200));
            }
            false
        }));
        let service = BoardService::with_policy(
            SqliteNoteRepository::try_new(&conn).unwrap(),
            RetryPolicy::new(20, Duration::from_millis(25)),
        );
        service
            .move_note(owner, first_note, BoardColumn::ToDo, 3)
            .unwrap()
    });

    in_commit_rx.recv().unwrap();
    let second = BoardService::with_policy(
        SqliteNoteRepository::try_new(&second_conn).unwrap(),
        RetryPolicy::new(20, Duration::from_millis(25)),
    )
    .move_note(owner, notes[4].id, BoardColumn::ToDo, 1)
    .unwrap();
    let first = first.join().unwrap();

    let attempts = [first.attempts, second.attempts];
    assert_eq!(attempts.iter().min(), Some(&1));
    assert!(attempts.iter().max().copied().unwrap_or(0) > 1);
    assert_eq!(first.attempts, 1);

    assert_contiguous(&conn, owner);
    assert_eq!(
        placements(&conn, owner),
        vec![
            ("b".to_string(), BoardColumn::ToDo, 0),
            ("e".to_string(), BoardColumn::ToDo, 1),
            ("c".to_string(), BoardColumn::ToDo, 2),
            ("d".to_string(), BoardColumn::ToDo, 3),
            ("a".to_string(), BoardColumn::ToDo, 4),
        ]
    );
}
