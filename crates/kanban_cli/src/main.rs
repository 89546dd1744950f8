//! CLI entry point for inspecting and reordering a board database.
//!
//! # Responsibility
//! - Without arguments, print a deterministic linkage probe.
//! - With `<db-path> <owner-uuid>`, print the owner's board grouped by column.
//! - With `<db-path> <owner-uuid> move <note-uuid> <column> <order>`, move one
//!   note and print the resulting board.
//! - `--config <file>` loads an `EngineConfig` JSON document; `--log-dir <dir>`
//!   enables file logging at the configured level.

use kanban_core::db::open_db_with;
use kanban_core::{
    init_logging_with, BoardColumn, BoardService, EngineConfig, OwnerId, SqliteNoteRepository,
};
use std::process::ExitCode;
use uuid::Uuid;

const USAGE: &str = "usage: kanban_cli [--config <file>] [--log-dir <dir>] \
[<db-path> <owner-uuid> [move <note-uuid> <column> <order>]]";

#[derive(Debug, Default, PartialEq, Eq)]
struct CliOptions {
    config_path: Option<String>,
    log_dir: Option<String>,
    positional: Vec<String>,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        println!("kanban_core ping={}", kanban_core::ping());
        println!("kanban_core version={}", kanban_core::core_version());
        return ExitCode::SUCCESS;
    }

    match parse_options(&args).and_then(|options| run(&options)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().ok_or("--config needs a file path")?;
                options.config_path = Some(value.clone());
            }
            "--log-dir" => {
                let value = iter.next().ok_or("--log-dir needs a directory")?;
                options.log_dir = Some(value.clone());
            }
            _ => options.positional.push(arg.clone()),
        }
    }
    Ok(options)
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let source = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read config `{path}`: {err}"))?;
    EngineConfig::from_json_str(&source).map_err(|err| err.to_string())
}

fn run(options: &CliOptions) -> Result<(), String> {
    let config = load_config(options.config_path.as_deref())?;
    if let Some(log_dir) = options.log_dir.as_deref() {
        init_logging_with(&config, log_dir)?;
    }

    let (db_path, owner, rest) = match options.positional.as_slice() {
        [db_path, owner, rest @ ..] => (db_path, parse_uuid(owner, "owner")?, rest),
        _ => return Err(USAGE.to_string()),
    };

    let conn = open_db_with(db_path, &config)
        .map_err(|err| format!("failed to open `{db_path}`: {err}"))?;
    let repo = SqliteNoteRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let service = BoardService::with_policy(repo, config.retry_policy());

    match rest {
        [] => {}
        [command, note, column, order] if command == "move" => {
            let note_id = parse_uuid(note, "note")?;
            let column = BoardColumn::parse(column)
                .ok_or_else(|| format!("unknown column `{column}`"))?;
            let order: i64 = order
                .parse()
                .map_err(|_| format!("order must be an integer, got `{order}`"))?;
            let outcome = service
                .move_note(owner, note_id, column, order)
                .map_err(|err| err.to_string())?;
            println!(
                "moved changed={} attempts={}",
                outcome.changed, outcome.attempts
            );
        }
        _ => return Err(USAGE.to_string()),
    }

    print_board(&service, owner)
}

fn print_board(
    service: &BoardService<SqliteNoteRepository<'_>>,
    owner: OwnerId,
) -> Result<(), String> {
    let notes = service.list_board(owner).map_err(|err| err.to_string())?;
    for column in BoardColumn::ALL {
        println!("{}:", column.label());
        for note in notes.iter().filter(|note| note.column == column) {
            println!("  {:>3}  {}  {}", note.order, note.id, note.title);
        }
    }
    Ok(())
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, String> {
    Uuid::parse_str(raw).map_err(|err| format!("invalid {what} uuid `{raw}`: {err}"))
}
