//! SQL schema for the Canon SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The event log. Both families share one id sequence so a tenant's history
-- can be replayed in a single causal order.
CREATE TABLE IF NOT EXISTS events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id       TEXT NOT NULL,
    family          TEXT NOT NULL CHECK (family IN ('dict', 'value')),
    dict_code       TEXT NOT NULL,
    code            TEXT,            -- NULL for dictionary events
    event_type      TEXT NOT NULL
                    CHECK (event_type IN ('CREATED', 'LABEL_CORRECTED', 'DISABLED')),
    effective_day   TEXT NOT NULL,   -- YYYY-MM-DD
    request_code    TEXT NOT NULL,
    initiator_uuid  TEXT NOT NULL,
    tx_time         TEXT NOT NULL,   -- RFC 3339 UTC; server-assigned
    payload         TEXT NOT NULL,
    before_snapshot TEXT NOT NULL,
    after_snapshot  TEXT NOT NULL,
    UNIQUE (tenant_id, family, request_code),
    CHECK  ((family = 'dict') = (code IS NULL))
);

CREATE TRIGGER IF NOT EXISTS events_no_update
BEFORE UPDATE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS events_no_delete
BEFORE DELETE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

-- Derived validity windows. Rebuildable from `events` at any time.
CREATE TABLE IF NOT EXISTS dict_segments (
    tenant_id     TEXT NOT NULL,
    dict_code     TEXT NOT NULL,
    name          TEXT NOT NULL,
    enabled_on    TEXT NOT NULL,
    disabled_on   TEXT,
    last_event_id INTEGER NOT NULL REFERENCES events(id),
    PRIMARY KEY (tenant_id, dict_code, enabled_on),
    CHECK (disabled_on IS NULL OR disabled_on > enabled_on)
);

CREATE UNIQUE INDEX IF NOT EXISTS dict_segments_open_idx
    ON dict_segments(tenant_id, dict_code) WHERE disabled_on IS NULL;

CREATE TABLE IF NOT EXISTS value_segments (
    tenant_id     TEXT NOT NULL,
    dict_code     TEXT NOT NULL,
    code          TEXT NOT NULL,
    label         TEXT NOT NULL,
    enabled_on    TEXT NOT NULL,
    disabled_on   TEXT,
    last_event_id INTEGER NOT NULL REFERENCES events(id),
    PRIMARY KEY (tenant_id, dict_code, code, enabled_on),
    CHECK (disabled_on IS NULL OR disabled_on > enabled_on)
);

CREATE UNIQUE INDEX IF NOT EXISTS value_segments_open_idx
    ON value_segments(tenant_id, dict_code, code) WHERE disabled_on IS NULL;

CREATE TABLE IF NOT EXISTS releases (
    target_tenant_id     TEXT NOT NULL,
    release_id           TEXT NOT NULL,
    source_tenant_id     TEXT NOT NULL,
    as_of                TEXT NOT NULL,
    request_code         TEXT NOT NULL,
    operator             TEXT NOT NULL,
    status               TEXT NOT NULL
                         CHECK (status IN ('running', 'succeeded', 'failed')),
    dict_events_total    INTEGER NOT NULL DEFAULT 0,
    dict_events_applied  INTEGER NOT NULL DEFAULT 0,
    dict_events_retried  INTEGER NOT NULL DEFAULT 0,
    value_events_total   INTEGER NOT NULL DEFAULT 0,
    value_events_applied INTEGER NOT NULL DEFAULT 0,
    value_events_retried INTEGER NOT NULL DEFAULT 0,
    started_at           TEXT NOT NULL,
    finished_at          TEXT,
    error                TEXT,
    PRIMARY KEY (target_tenant_id, release_id)
);

CREATE INDEX IF NOT EXISTS events_tenant_day_idx ON events(tenant_id, effective_day);
CREATE INDEX IF NOT EXISTS events_key_idx        ON events(tenant_id, family, dict_code, code);

PRAGMA user_version = 1;
";
