//! Database schema and migrations for Stowage.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded. The
//! scripts are per-backend: same tables and versions, each in its own
//! SQL dialect.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
#[cfg(feature = "sqlite")]
pub const MIGRATIONS: &[&str] = &[
    // v1: Storage quotas - the per-subject accounting ledger
    r#"
-- One row per (tenant, subject-type, subject-id). Tenant-level rows
-- have subject_id NULL; user- and department-level rows carry the id.
CREATE TABLE storage_quotas (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id        TEXT NOT NULL,
    subject_type     TEXT NOT NULL DEFAULT 'tenant',  -- 'tenant', 'user', 'department'
    subject_id       TEXT,
    limit_bytes      INTEGER NOT NULL DEFAULT 0,
    used_bytes       INTEGER NOT NULL DEFAULT 0,
    reserved_bytes   INTEGER NOT NULL DEFAULT 0,
    file_count_limit INTEGER,                         -- NULL = unlimited
    file_count_used  INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX idx_storage_quotas_subject
    ON storage_quotas(tenant_id, subject_type, COALESCE(subject_id, ''));
"#,
    // v2: Files - durable records created at upload commit time
    r#"
CREATE TABLE files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id   TEXT NOT NULL,
    filename    TEXT NOT NULL,
    storage_key TEXT NOT NULL UNIQUE,
    size_bytes  INTEGER NOT NULL,
    checksum    TEXT NOT NULL,                        -- SHA-256 hex
    created_by  TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at  TEXT
);

CREATE INDEX idx_files_checksum ON files(tenant_id, checksum);
CREATE INDEX idx_files_tenant ON files(tenant_id);
"#,
    // v3: Multipart upload sessions
    r#"
CREATE TABLE multipart_upload_sessions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id      TEXT NOT NULL,
    session_id     TEXT NOT NULL UNIQUE,              -- backend multipart handle
    filename       TEXT NOT NULL,
    storage_key    TEXT NOT NULL,
    total_size     INTEGER NOT NULL,
    part_size      INTEGER NOT NULL,
    total_parts    INTEGER NOT NULL,
    uploaded_parts TEXT NOT NULL DEFAULT '[]',        -- JSON array of part numbers
    status         TEXT NOT NULL DEFAULT 'in_progress',  -- 'in_progress', 'completed', 'aborted'
    created_by     TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    created_at     TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at     TEXT NOT NULL DEFAULT (datetime('now')),
    completed_at   TEXT
);

CREATE INDEX idx_upload_sessions_status ON multipart_upload_sessions(status, expires_at);
CREATE INDEX idx_upload_sessions_tenant ON multipart_upload_sessions(tenant_id);
"#,
    // v4: Quota alert marks for rate-limited usage warnings
    r#"
CREATE TABLE quota_alerts (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    quota_id         INTEGER NOT NULL UNIQUE REFERENCES storage_quotas(id) ON DELETE CASCADE,
    last_notified_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
];

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
#[cfg(feature = "postgres")]
pub const MIGRATIONS: &[&str] = &[
    // v1: Storage quotas - the per-subject accounting ledger
    r#"
-- One row per (tenant, subject-type, subject-id). Tenant-level rows
-- have subject_id NULL; user- and department-level rows carry the id.
CREATE TABLE storage_quotas (
    id               BIGSERIAL PRIMARY KEY,
    tenant_id        TEXT NOT NULL,
    subject_type     TEXT NOT NULL DEFAULT 'tenant',  -- 'tenant', 'user', 'department'
    subject_id       TEXT,
    limit_bytes      BIGINT NOT NULL DEFAULT 0,
    used_bytes       BIGINT NOT NULL DEFAULT 0,
    reserved_bytes   BIGINT NOT NULL DEFAULT 0,
    file_count_limit BIGINT,                          -- NULL = unlimited
    file_count_used  BIGINT NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL DEFAULT (TO_CHAR(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')),
    updated_at       TEXT NOT NULL DEFAULT (TO_CHAR(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'))
);

CREATE UNIQUE INDEX idx_storage_quotas_subject
    ON storage_quotas(tenant_id, subject_type, COALESCE(subject_id, ''));
"#,
    // v2: Files - durable records created at upload commit time
    r#"
CREATE TABLE files (
    id          BIGSERIAL PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    filename    TEXT NOT NULL,
    storage_key TEXT NOT NULL UNIQUE,
    size_bytes  BIGINT NOT NULL,
    checksum    TEXT NOT NULL,                        -- SHA-256 hex
    created_by  TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (TO_CHAR(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')),
    deleted_at  TEXT
);

CREATE INDEX idx_files_checksum ON files(tenant_id, checksum);
CREATE INDEX idx_files_tenant ON files(tenant_id);
"#,
    // v3: Multipart upload sessions
    r#"
CREATE TABLE multipart_upload_sessions (
    id             BIGSERIAL PRIMARY KEY,
    tenant_id      TEXT NOT NULL,
    session_id     TEXT NOT NULL UNIQUE,              -- backend multipart handle
    filename       TEXT NOT NULL,
    storage_key    TEXT NOT NULL,
    total_size     BIGINT NOT NULL,
    part_size      BIGINT NOT NULL,
    total_parts    INTEGER NOT NULL,
    uploaded_parts TEXT NOT NULL DEFAULT '[]',        -- JSON array of part numbers
    status         TEXT NOT NULL DEFAULT 'in_progress',  -- 'in_progress', 'completed', 'aborted'
    created_by     TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    created_at     TEXT NOT NULL DEFAULT (TO_CHAR(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')),
    updated_at     TEXT NOT NULL DEFAULT (TO_CHAR(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')),
    completed_at   TEXT
);

CREATE INDEX idx_upload_sessions_status ON multipart_upload_sessions(status, expires_at);
CREATE INDEX idx_upload_sessions_tenant ON multipart_upload_sessions(tenant_id);
"#,
    // v4: Quota alert marks for rate-limited usage warnings
    r#"
CREATE TABLE quota_alerts (
    id               BIGSERIAL PRIMARY KEY,
    quota_id         BIGINT NOT NULL UNIQUE REFERENCES storage_quotas(id) ON DELETE CASCADE,
    last_notified_at TEXT NOT NULL DEFAULT (TO_CHAR(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'))
);
"#,
];
