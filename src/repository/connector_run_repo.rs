// ==========================================
// 多租户导入引擎 - 连接器运行记录仓储
// ==========================================
// 职责: 运行记录持久化（跨进程重启可查）
// 红线: 终态记录不可再修改；读取校验 tenant_id
// ==========================================

use crate::domain::connector::{ConnectorImportRun, RunStatus};
use crate::domain::job::{ErrorRow, ExecutionSummary};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

const ENTITY: &str = "ConnectorImportRun";

// ==========================================
// ConnectorRunStore Trait
// ==========================================
#[async_trait]
pub trait ConnectorRunStore: Send + Sync {
    async fn create_run(&self, run: &ConnectorImportRun) -> RepositoryResult<()>;

    /// 记录当前阶段与截至目前的错误日志（仅 running 状态可更新）
    async fn update_phase(
        &self,
        tenant_id: &str,
        run_id: &str,
        phase: &str,
        error_log: &[ErrorRow],
    ) -> RepositoryResult<()>;

    /// 写入终态
    async fn finish_run(
        &self,
        tenant_id: &str,
        run_id: &str,
        status: RunStatus,
        summary: Option<&ExecutionSummary>,
        error_log: &[ErrorRow],
    ) -> RepositoryResult<ConnectorImportRun>;

    async fn get_run(
        &self,
        tenant_id: &str,
        run_id: &str,
    ) -> RepositoryResult<Option<ConnectorImportRun>>;

    async fn list_runs(&self, tenant_id: &str) -> RepositoryResult<Vec<ConnectorImportRun>>;
}

// ==========================================
// ConnectorRunRepository - SQLite 实现
// ==========================================
pub struct ConnectorRunRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_RUN_SQL: &str = r#"
    SELECT run_id, tenant_id, actor_user_id, source_workspace_id, source_project_ids_json,
           target_workspace_id, options_json, status, phase, execution_summary_json,
           error_log_json, started_at, completed_at
    FROM connector_import_run
"#;

struct RunRow {
    run_id: String,
    tenant_id: String,
    actor_user_id: String,
    source_workspace_id: String,
    source_project_ids_json: String,
    target_workspace_id: String,
    options_json: String,
    status: String,
    phase: String,
    execution_summary_json: Option<String>,
    error_log_json: String,
    started_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            tenant_id: row.get(1)?,
            actor_user_id: row.get(2)?,
            source_workspace_id: row.get(3)?,
            source_project_ids_json: row.get(4)?,
            target_workspace_id: row.get(5)?,
            options_json: row.get(6)?,
            status: row.get(7)?,
            phase: row.get(8)?,
            execution_summary_json: row.get(9)?,
            error_log_json: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }

    fn into_run(self) -> RepositoryResult<ConnectorImportRun> {
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(|message| RepositoryError::FieldValueError {
                field: "status".to_string(),
                message,
            })?;

        Ok(ConnectorImportRun {
            run_id: self.run_id,
            tenant_id: self.tenant_id,
            actor_user_id: self.actor_user_id,
            source_workspace_id: self.source_workspace_id,
            source_project_ids: serde_json::from_str(&self.source_project_ids_json)?,
            target_workspace_id: self.target_workspace_id,
            options: serde_json::from_str(&self.options_json)?,
            status,
            phase: self.phase,
            execution_summary: self
                .execution_summary_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            error_log: serde_json::from_str(&self.error_log_json)?,
            started_at: parse_ts("started_at", &self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|raw| parse_ts("completed_at", raw))
                .transpose()?,
        })
    }
}

fn parse_ts(field: &str, raw: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: e.to_string(),
        })
}

impl ConnectorRunRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn load(conn: &Connection, run_id: &str) -> RepositoryResult<Option<ConnectorImportRun>> {
        let sql = format!("{} WHERE run_id = ?1", SELECT_RUN_SQL);
        conn.query_row(&sql, params![run_id], RunRow::from_row)
            .optional()?
            .map(RunRow::into_run)
            .transpose()
    }

    /// 载入并校验租户与可变性
    fn load_running(
        conn: &Connection,
        tenant_id: &str,
        run_id: &str,
        target: &str,
    ) -> RepositoryResult<ConnectorImportRun> {
        let run = Self::load(conn, run_id)?.ok_or_else(|| RepositoryError::not_found(ENTITY, run_id))?;
        if run.tenant_id != tenant_id {
            return Err(RepositoryError::forbidden(ENTITY, run_id));
        }
        if run.status.is_terminal() {
            return Err(RepositoryError::InvalidStateTransition {
                from: run.status.as_str().to_string(),
                to: target.to_string(),
            });
        }
        Ok(run)
    }
}

#[async_trait]
impl ConnectorRunStore for ConnectorRunRepository {
    async fn create_run(&self, run: &ConnectorImportRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO connector_import_run (
                run_id, tenant_id, actor_user_id, source_workspace_id, source_project_ids_json,
                target_workspace_id, options_json, status, phase, execution_summary_json,
                error_log_json, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                run.run_id,
                run.tenant_id,
                run.actor_user_id,
                run.source_workspace_id,
                serde_json::to_string(&run.source_project_ids)?,
                run.target_workspace_id,
                serde_json::to_string(&run.options)?,
                run.status.as_str(),
                run.phase,
                run.execution_summary
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&run.error_log)?,
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn update_phase(
        &self,
        tenant_id: &str,
        run_id: &str,
        phase: &str,
        error_log: &[ErrorRow],
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::load_running(&conn, tenant_id, run_id, phase)?;
        conn.execute(
            r#"
            UPDATE connector_import_run
            SET phase = ?1, error_log_json = ?2
            WHERE run_id = ?3 AND status = 'running'
            "#,
            params![phase, serde_json::to_string(error_log)?, run_id],
        )?;
        Ok(())
    }

    async fn finish_run(
        &self,
        tenant_id: &str,
        run_id: &str,
        status: RunStatus,
        summary: Option<&ExecutionSummary>,
        error_log: &[ErrorRow],
    ) -> RepositoryResult<ConnectorImportRun> {
        let conn = self.get_conn()?;
        let mut run = Self::load_running(&conn, tenant_id, run_id, status.as_str())?;

        let completed_at = Utc::now();
        conn.execute(
            r#"
            UPDATE connector_import_run
            SET status = ?1, execution_summary_json = ?2, error_log_json = ?3, completed_at = ?4
            WHERE run_id = ?5 AND status = 'running'
            "#,
            params![
                status.as_str(),
                summary.map(serde_json::to_string).transpose()?,
                serde_json::to_string(error_log)?,
                completed_at.to_rfc3339(),
                run_id,
            ],
        )?;

        run.status = status;
        run.execution_summary = summary.cloned();
        run.error_log = error_log.to_vec();
        run.completed_at = Some(completed_at);
        Ok(run)
    }

    async fn get_run(
        &self,
        tenant_id: &str,
        run_id: &str,
    ) -> RepositoryResult<Option<ConnectorImportRun>> {
        let conn = self.get_conn()?;
        match Self::load(&conn, run_id)? {
            Some(run) if run.tenant_id != tenant_id => {
                tracing::warn!(run_id, caller_tenant = tenant_id, "拒绝跨租户访问运行记录");
                Err(RepositoryError::forbidden(ENTITY, run_id))
            }
            other => Ok(other),
        }
    }

    async fn list_runs(&self, tenant_id: &str) -> RepositoryResult<Vec<ConnectorImportRun>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE tenant_id = ?1 ORDER BY started_at DESC",
            SELECT_RUN_SQL
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tenant_id], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RunRow::into_run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::connector::{ClientMappingStrategy, ConnectorOptions};
    use crate::domain::types::ErrorCode;

    fn repo() -> ConnectorRunRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        ConnectorRunRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn sample_run(tenant_id: &str) -> ConnectorImportRun {
        ConnectorImportRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            actor_user_id: "u1".to_string(),
            source_workspace_id: "ws-1".to_string(),
            source_project_ids: vec!["p1".to_string()],
            target_workspace_id: "local".to_string(),
            options: ConnectorOptions::new(ClientMappingStrategy::Single {
                client_name: "Acme".to_string(),
            }),
            status: RunStatus::Running,
            phase: "starting".to_string(),
            execution_summary: None,
            error_log: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle_and_terminal_immutability() {
        let repo = repo();
        let run = sample_run("t1");
        repo.create_run(&run).await.unwrap();
        let partial = vec![ErrorRow::new(1, "p1", ErrorCode::UnmappedClient, "未映射")];
        repo.update_phase("t1", &run.run_id, "importing_projects", &partial)
            .await
            .unwrap();

        // 运行中轮询即可看到已累积的错误
        let polled = repo.get_run("t1", &run.run_id).await.unwrap().unwrap();
        assert_eq!(polled.phase, "importing_projects");
        assert_eq!(polled.options, run.options);
        assert_eq!(polled.error_log, partial);

        let errors = vec![
            ErrorRow::new(1, "p1", ErrorCode::UnmappedClient, "未映射"),
            ErrorRow::new(2, "t1", ErrorCode::UnmappedClient, "所属项目未映射"),
        ];
        let finished = repo
            .finish_run("t1", &run.run_id, RunStatus::CompletedWithErrors, None, &errors)
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::CompletedWithErrors);

        let err = repo
            .update_phase("t1", &run.run_id, "importing_tasks", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));

        let stored = repo.get_run("t1", &run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.error_log, errors);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_run_tenant_isolation() {
        let repo = repo();
        let run = sample_run("t1");
        repo.create_run(&run).await.unwrap();

        let err = repo.get_run("t2", &run.run_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));
        assert!(repo.list_runs("t2").await.unwrap().is_empty());
        assert_eq!(repo.list_runs("t1").await.unwrap().len(), 1);
    }
}
