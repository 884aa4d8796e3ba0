use rusqlite::Connection;

use crate::error::Result;

/// Initialise the full schema. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            chat_id                 INTEGER NOT NULL PRIMARY KEY,
            kind                    TEXT    NOT NULL,
            title                   TEXT,
            accountant_user_id      INTEGER,
            accountant_usernames    TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            sla_threshold_minutes   INTEGER NOT NULL DEFAULT 60,
            monitoring_enabled      INTEGER NOT NULL DEFAULT 0,
            is_24x7                 INTEGER NOT NULL DEFAULT 0,
            manager_ids             TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            deleted_at              TEXT,
            created_at              TEXT    NOT NULL,
            updated_at              TEXT    NOT NULL
        ) STRICT;

        -- chat_id NULL rows are the global default schedule.
        CREATE TABLE IF NOT EXISTS working_schedules (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER,
            weekday     INTEGER NOT NULL,          -- ISO: 1 = Monday … 7 = Sunday
            start_time  TEXT    NOT NULL,          -- 'HH:MM'
            end_time    TEXT    NOT NULL,          -- 'HH:MM'
            timezone    TEXT    NOT NULL,
            UNIQUE(chat_id, weekday)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS holidays (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            scope    TEXT    NOT NULL,             -- 'chat' | 'global'
            chat_id  INTEGER,                      -- NULL for global scope
            date     TEXT    NOT NULL,             -- 'YYYY-MM-DD'
            name     TEXT,
            UNIQUE(scope, chat_id, date)
        ) STRICT;

        -- Append-only: edits insert a new row at edit_version + 1.
        CREATE TABLE IF NOT EXISTS chat_messages (
            chat_id             INTEGER NOT NULL,
            message_id          INTEGER NOT NULL,
            edit_version        INTEGER NOT NULL DEFAULT 0,
            sender_id           INTEGER NOT NULL,
            sender_username     TEXT,
            text                TEXT    NOT NULL,
            is_accountant       INTEGER NOT NULL DEFAULT 0,
            reply_to_message_id INTEGER,
            message_type        TEXT    NOT NULL DEFAULT 'text',
            sent_at             TEXT    NOT NULL,
            recorded_at         TEXT    NOT NULL,
            PRIMARY KEY (chat_id, message_id, edit_version)
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_messages_chat_time
            ON chat_messages(chat_id, sent_at);

        CREATE TABLE IF NOT EXISTS client_requests (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id                INTEGER NOT NULL,
            message_id             INTEGER NOT NULL,
            status                 TEXT    NOT NULL DEFAULT 'pending',
            received_at            TEXT    NOT NULL,
            category               TEXT,
            confidence             REAL,
            classifier_model       TEXT,
            sla_timer_started_at   TEXT,
            sla_timer_paused_at    TEXT,
            sla_breached           INTEGER NOT NULL DEFAULT 0,
            response_at            TEXT,
            response_time_minutes  INTEGER,
            response_message_id    INTEGER,
            responded_by           INTEGER,
            sla_working_minutes    INTEGER,
            created_at             TEXT    NOT NULL,
            updated_at             TEXT    NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_requests_chat_status
            ON client_requests(chat_id, status);
        CREATE INDEX IF NOT EXISTS idx_requests_status
            ON client_requests(status);

        -- UNIQUE(request, type, level, recipient) enforces at most one
        -- alert per escalation level per recipient within a type.
        CREATE TABLE IF NOT EXISTS sla_alerts (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id           INTEGER NOT NULL,
            alert_type           TEXT    NOT NULL,
            escalation_level     INTEGER NOT NULL DEFAULT 0,
            minutes_elapsed      INTEGER NOT NULL,
            manager_telegram_id  INTEGER NOT NULL,
            alert_sent_at        TEXT,
            delivery_status      TEXT    NOT NULL DEFAULT 'pending',
            telegram_message_id  INTEGER,
            resolved_action      TEXT,
            acknowledged_by      INTEGER,
            acknowledged_at      TEXT,
            resolution_notes     TEXT,
            created_at           TEXT    NOT NULL,
            UNIQUE(request_id, alert_type, escalation_level, manager_telegram_id)
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_alerts_request
            ON sla_alerts(request_id);

        CREATE TABLE IF NOT EXISTS global_settings (
            id                            INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            schedule_days                 TEXT    NOT NULL DEFAULT '[1,2,3,4,5]',
            schedule_start                TEXT    NOT NULL DEFAULT '09:00',
            schedule_end                  TEXT    NOT NULL DEFAULT '18:00',
            timezone                      TEXT    NOT NULL DEFAULT 'Europe/Moscow',
            sla_threshold_minutes         INTEGER NOT NULL DEFAULT 60,
            max_escalations               INTEGER NOT NULL DEFAULT 3,
            escalation_interval_minutes   INTEGER NOT NULL DEFAULT 30,
            warning_percent               INTEGER NOT NULL DEFAULT 80,
            ai_confidence_threshold       REAL    NOT NULL DEFAULT 0.7,
            keyword_confidence_threshold  REAL    NOT NULL DEFAULT 0.5,
            cache_ttl_minutes             INTEGER NOT NULL DEFAULT 1440,
            preview_length                INTEGER NOT NULL DEFAULT 200,
            global_manager_ids            TEXT    NOT NULL DEFAULT '[]',
            retention_days                INTEGER NOT NULL DEFAULT 365,
            updated_at                    TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
