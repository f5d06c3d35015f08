#![allow(clippy::missing_errors_doc)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use scoreboard_core::{
    format_rfc3339, monotonic_recorded_at, now_utc, parse_rfc3339_utc, PlayerId, ScoreError,
    ScoreEvent, ScoreEventInput, ScoreLedger,
};

const SCORE_MIGRATION_VERSION: i64 = 1;

const SCHEMA_SCORES_V1: &str = r"
CREATE TABLE IF NOT EXISTS score_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  player_id INTEGER NOT NULL CHECK (player_id <> 0),
  display_name TEXT NOT NULL,
  score INTEGER NOT NULL CHECK (score >= 0),
  recorded_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_score_events_no_update
BEFORE UPDATE ON score_events
BEGIN
  SELECT RAISE(FAIL, 'score_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_score_events_no_delete
BEFORE DELETE ON score_events
BEGIN
  SELECT RAISE(FAIL, 'score_events is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_score_events_player_id
  ON score_events(player_id, id);
CREATE INDEX IF NOT EXISTS idx_score_events_score
  ON score_events(score DESC, id);
";

/// `SQLite`-backed score ledger. Owns its connection; writes are serialized
/// through the connection lock and an immediate transaction.
#[derive(Debug)]
pub struct SqliteScoreLedger {
    conn: Mutex<Connection>,
}

impl SqliteScoreLedger {
    pub fn open(path: &Path) -> Result<Self, ScoreError> {
        let conn = Connection::open(path).map_err(|err| {
            ScoreError::storage(
                format!("failed to open sqlite database at {}", path.display()),
                err,
            )
        })?;

        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;",
        )
        .map_err(|err| ScoreError::storage("failed to configure sqlite pragmas", err))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), ScoreError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .map_err(|err| ScoreError::storage("failed to ensure schema_migrations exists", err))?;

        conn.execute_batch(SCHEMA_SCORES_V1)
            .map_err(|err| ScoreError::storage("failed to apply score schema", err))?;

        let now = format_rfc3339(now_utc())?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![SCORE_MIGRATION_VERSION, now],
        )
        .map_err(|err| ScoreError::storage("failed to register score schema migration", err))?;

        Ok(())
    }

    pub fn event_count(&self) -> Result<u64, ScoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM score_events", [], |row| row.get(0))
            .map_err(|err| ScoreError::storage("failed to count score events", err))?;
        u64::try_from(count).map_err(|err| ScoreError::storage("invalid score event count", err))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ScoreError> {
        self.conn.lock().map_err(|_| {
            ScoreError::storage(
                "score ledger connection unavailable",
                "connection lock poisoned by a panicked writer",
            )
        })
    }

    #[cfg(test)]
    fn connection(&self) -> MutexGuard<'_, Connection> {
        match self.lock() {
            Ok(conn) => conn,
            Err(err) => panic!("test connection unavailable: {err}"),
        }
    }
}

impl ScoreLedger for SqliteScoreLedger {
    fn append(&self, input: &ScoreEventInput) -> Result<ScoreEvent, ScoreError> {
        let valid = input.validate()?;
        let score = i64::try_from(valid.score)
            .map_err(|_| ScoreError::Validation(format!("score {} is out of range", valid.score)))?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| ScoreError::storage("failed to start append transaction", err))?;

        let previous = tx
            .query_row(
                "SELECT recorded_at FROM score_events ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| ScoreError::storage("failed to read latest recorded_at", err))?
            .map(|raw| parse_rfc3339_utc(&raw))
            .transpose()
            .map_err(|err| ScoreError::storage("stored recorded_at is not valid RFC3339", err))?;
        let recorded_at = monotonic_recorded_at(previous, now_utc());

        tx.execute(
            "INSERT INTO score_events(player_id, display_name, score, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                valid.player_id.0,
                valid.display_name,
                score,
                format_rfc3339(recorded_at)?,
            ],
        )
        .map_err(|err| ScoreError::storage("failed to append score event", err))?;

        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|err| ScoreError::storage("failed to commit score event", err))?;

        Ok(ScoreEvent {
            id,
            player_id: valid.player_id,
            display_name: valid.display_name,
            score: valid.score,
            recorded_at,
        })
    }

    fn all(&self) -> Result<Vec<ScoreEvent>, ScoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, player_id, display_name, score, recorded_at
                 FROM score_events
                 ORDER BY id ASC",
            )
            .map_err(|err| ScoreError::storage("failed to prepare score event scan", err))?;

        let rows = stmt
            .query_map([], parse_event_row)
            .map_err(|err| ScoreError::storage("failed to scan score events", err))?;

        collect_rows(rows)
    }
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreEvent> {
    let score_i64: i64 = row.get(3)?;
    let score = u64::try_from(score_i64).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid score: {score_i64}"),
            )),
        )
    })?;

    let recorded_at = parse_rfc3339_utc(&row.get::<_, String>(4)?).map_err(to_sql_error)?;

    Ok(ScoreEvent {
        id: row.get(0)?,
        player_id: PlayerId(row.get(1)?),
        display_name: row.get(2)?,
        score,
        recorded_at,
    })
}

fn to_sql_error(err: ScoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>, ScoreError> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row.map_err(|err| ScoreError::storage("failed to decode score event", err))?);
    }
    Ok(values)
}
