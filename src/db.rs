// ==========================================
// 多租户导入引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表（作业 / 运行记录 / 审计 / 实体库 / 配置）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER NOT NULL,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== 导入作业 =====
CREATE TABLE IF NOT EXISTS import_job (
    job_id                  TEXT PRIMARY KEY,
    tenant_id               TEXT NOT NULL,
    created_by              TEXT NOT NULL,
    entity_type             TEXT NOT NULL,
    status                  TEXT NOT NULL,
    file_name               TEXT,
    columns_json            TEXT NOT NULL DEFAULT '[]',
    raw_rows_json           TEXT NOT NULL DEFAULT '[]',
    sample_rows_json        TEXT NOT NULL DEFAULT '[]',
    mapping_json            TEXT NOT NULL DEFAULT '[]',
    validation_summary_json TEXT,
    execution_summary_json  TEXT,
    progress_processed      INTEGER NOT NULL DEFAULT 0,
    progress_total          INTEGER NOT NULL DEFAULT 0,
    auto_create_missing     INTEGER NOT NULL DEFAULT 0,
    version                 INTEGER NOT NULL DEFAULT 1,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_import_job_tenant ON import_job(tenant_id, created_at);

CREATE TABLE IF NOT EXISTS import_job_error_row (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      TEXT NOT NULL REFERENCES import_job(job_id) ON DELETE CASCADE,
    row_no      INTEGER NOT NULL,
    primary_key TEXT NOT NULL,
    error_code  TEXT NOT NULL,
    message     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_import_job_error_row_job ON import_job_error_row(job_id, id);

-- ===== 连接器运行记录 =====
CREATE TABLE IF NOT EXISTS connector_import_run (
    run_id                  TEXT PRIMARY KEY,
    tenant_id               TEXT NOT NULL,
    actor_user_id           TEXT NOT NULL,
    source_workspace_id     TEXT NOT NULL,
    source_project_ids_json TEXT NOT NULL,
    target_workspace_id     TEXT NOT NULL,
    options_json            TEXT NOT NULL,
    status                  TEXT NOT NULL,
    phase                   TEXT NOT NULL,
    execution_summary_json  TEXT,
    error_log_json          TEXT NOT NULL DEFAULT '[]',
    started_at              TEXT NOT NULL,
    completed_at            TEXT
);
CREATE INDEX IF NOT EXISTS idx_connector_run_tenant ON connector_import_run(tenant_id, started_at);

-- ===== 审计日志 =====
CREATE TABLE IF NOT EXISTS audit_log (
    event_id     TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL,
    actor        TEXT NOT NULL,
    action       TEXT NOT NULL,
    event_ts     TEXT NOT NULL,
    subject_id   TEXT NOT NULL,
    entity_type  TEXT,
    summary_json TEXT,
    detail       TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_log_tenant ON audit_log(tenant_id, event_ts);

-- ===== 实体库 =====
CREATE TABLE IF NOT EXISTS client (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL,
    name          TEXT NOT NULL,
    name_key      TEXT NOT NULL,
    industry      TEXT,
    contact_name  TEXT,
    contact_email TEXT,
    phone         TEXT,
    website       TEXT,
    notes         TEXT,
    created_at    TEXT NOT NULL,
    UNIQUE (tenant_id, name_key)
);

CREATE TABLE IF NOT EXISTS app_user (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    email       TEXT NOT NULL,
    email_key   TEXT NOT NULL,
    first_name  TEXT,
    last_name   TEXT,
    role        TEXT,
    job_title   TEXT,
    hourly_rate REAL,
    active      INTEGER NOT NULL DEFAULT 1,
    is_admin    INTEGER NOT NULL DEFAULT 0,
    external_id TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (tenant_id, email_key),
    UNIQUE (tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS project (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    name        TEXT NOT NULL,
    client_id   TEXT REFERENCES client(id),
    status      TEXT,
    start_date  TEXT,
    end_date    TEXT,
    budget      REAL,
    description TEXT,
    external_id TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS task (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL,
    project_id     TEXT NOT NULL REFERENCES project(id),
    title          TEXT NOT NULL,
    assignee_id    TEXT REFERENCES app_user(id),
    status         TEXT,
    priority       TEXT,
    due_date       TEXT,
    estimate_hours REAL,
    description    TEXT,
    completed      INTEGER NOT NULL DEFAULT 0,
    external_id    TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE (tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS time_entry (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL REFERENCES app_user(id),
    project_id  TEXT REFERENCES project(id),
    task_id     TEXT REFERENCES task(id),
    entry_date  TEXT NOT NULL,
    hours       REAL NOT NULL,
    description TEXT,
    billable    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_time_entry_tenant ON time_entry(tenant_id, user_id, entry_date);
"#;

/// 幂等建表并登记 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let current = read_schema_version(conn)?.unwrap_or(0);
    if current < CURRENT_SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
        tracing::info!(
            from = current,
            to = CURRENT_SCHEMA_VERSION,
            "schema_version 已更新"
        );
    }
    Ok(())
}
