pub mod migrations;
pub mod models;
pub mod users;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ChatError;

/// Type alias for the shared database connection.
/// rusqlite is synchronous; we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("marketchat.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database with the full schema. Used by unit tests.
pub fn init_memory_db() -> Result<DbPool, Box<dyn std::error::Error>> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Extra wait past the deadline for a result already on its way back.
const RESULT_GRACE: Duration = Duration::from_millis(100);

/// Point in time after which a database call must not take effect.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self(Instant::now().checked_add(limit))
    }

    /// Never expires. For callers that are not bounded by a request.
    pub fn unbounded() -> Self {
        Self(None)
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// `ChatError::Timeout` once expired. Writes call this right before committing.
    pub fn check(&self) -> Result<(), ChatError> {
        if self.is_expired() {
            Err(ChatError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Run a blocking database closure off the async runtime, bounded by `limit`.
///
/// On timeout the caller gets `ChatError::Timeout`. The blocking task cannot be
/// cancelled, so the deadline travels with it: a closure that only gets the
/// lock after the deadline never runs.
pub async fn run<T, F>(db: &DbPool, limit: Duration, f: F) -> Result<T, ChatError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, ChatError> + Send + 'static,
{
    run_until(db, limit, move |conn, _| f(conn)).await
}

/// Like `run`, but hands the deadline to the closure so a transaction can
/// re-check it before `commit` and roll back instead of landing a write the
/// caller was already told had failed.
pub async fn run_until<T, F>(db: &DbPool, limit: Duration, f: F) -> Result<T, ChatError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection, Deadline) -> Result<T, ChatError> + Send + 'static,
{
    let db = db.clone();
    let deadline = Deadline::after(limit);
    let task = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|e| ChatError::Persistence(format!("DB lock error: {}", e)))?;
        deadline.check()?;
        f(&mut conn, deadline)
    });

    // The closure enforces the deadline itself; the grace covers handing back a
    // result that committed just before it.
    match tokio::time::timeout(limit + RESULT_GRACE, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ChatError::Persistence(format!("task join: {}", join_err))),
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Database call timed out");
            Err(ChatError::Timeout)
        }
    }
}
