use rusqlite::Connection;

use crate::error::Result;

/// Initialise the queue schema in `conn`.
///
/// Creates the `queue_jobs` table (idempotent) and an index covering the
/// polling query so ticks stay cheap with thousands of delayed jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue_jobs (
            queue            TEXT    NOT NULL,
            id               TEXT    NOT NULL,
            kind             TEXT    NOT NULL,
            payload          TEXT    NOT NULL,   -- opaque JSON forwarded to the handler
            status           TEXT    NOT NULL DEFAULT 'pending',
            run_at           TEXT    NOT NULL,   -- ISO-8601
            attempt          INTEGER NOT NULL DEFAULT 0,
            max_attempts     INTEGER NOT NULL DEFAULT 3,
            backoff_base_ms  INTEGER NOT NULL DEFAULT 1000,
            last_error       TEXT,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            PRIMARY KEY (queue, id)
        ) STRICT;

        -- Efficient polling: WHERE queue=? AND status='pending' AND run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_queue_jobs_due
            ON queue_jobs (queue, status, run_at);
        ",
    )?;
    Ok(())
}
