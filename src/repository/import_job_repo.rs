// ==========================================
// 多租户导入引擎 - 导入作业仓储
// ==========================================
// 职责: 作业状态的创建/读取/结构化更新/按租户列出
// 红线: 每次读写先校验 tenant_id；跨租户一律 Forbidden
// 并发: 补丁按字段合并，error_rows 只追加（显式清空除外）
// 实现: InMemoryJobStore（进程内）/ SqliteJobStore（行版本号，乐观并发）
// ==========================================

use crate::domain::job::{ErrorRow, ImportJob, JobPatch, JobProgress};
use crate::domain::types::{EntityType, ErrorCode, JobStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;

const ENTITY: &str = "ImportJob";

// ==========================================
// JobStore Trait
// ==========================================
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 创建草稿作业
    async fn create_job(
        &self,
        tenant_id: &str,
        actor_id: &str,
        entity_type: EntityType,
    ) -> RepositoryResult<ImportJob>;

    /// 读取作业
    ///
    /// # 返回
    /// - Ok(None): 不存在
    /// - Err(Forbidden): 作业属于其他租户
    async fn get_job(&self, tenant_id: &str, job_id: &str) -> RepositoryResult<Option<ImportJob>>;

    /// 结构化更新，返回更新后的作业
    async fn update_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        patch: JobPatch,
    ) -> RepositoryResult<ImportJob>;

    /// 按创建时间倒序列出租户作业
    async fn get_jobs_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<ImportJob>>;
}

fn check_tenant(job: &ImportJob, tenant_id: &str) -> RepositoryResult<()> {
    if job.tenant_id != tenant_id {
        tracing::warn!(
            job_id = %job.job_id,
            caller_tenant = tenant_id,
            "拒绝跨租户访问导入作业"
        );
        return Err(RepositoryError::forbidden(ENTITY, &job.job_id));
    }
    Ok(())
}

// ==========================================
// InMemoryJobStore
// ==========================================
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ImportJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(
        &self,
        tenant_id: &str,
        actor_id: &str,
        entity_type: EntityType,
    ) -> RepositoryResult<ImportJob> {
        let job = ImportJob::new(
            uuid::Uuid::new_v4().to_string(),
            tenant_id,
            actor_id,
            entity_type,
        );
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> RepositoryResult<Option<ImportJob>> {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(job) => {
                check_tenant(job, tenant_id)?;
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        patch: JobPatch,
    ) -> RepositoryResult<ImportJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, job_id))?;
        check_tenant(job, tenant_id)?;

        patch.apply_to(job);
        job.version += 1;
        Ok(job.clone())
    }

    async fn get_jobs_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<ImportJob>> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<ImportJob> = jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

// ==========================================
// SqliteJobStore
// ==========================================
// 乐观并发: UPDATE ... WHERE version = ?；冲突时重读重放补丁
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

/// 版本冲突最大重试次数
const MAX_UPDATE_RETRIES: usize = 3;

const SELECT_JOB_SQL: &str = r#"
    SELECT job_id, tenant_id, created_by, entity_type, status, file_name,
           columns_json, raw_rows_json, sample_rows_json, mapping_json,
           validation_summary_json, execution_summary_json,
           progress_processed, progress_total, auto_create_missing,
           version, created_at, updated_at
    FROM import_job
"#;

/// 数据库行的原始形态（JSON 列尚未反序列化）
struct JobRow {
    job_id: String,
    tenant_id: String,
    created_by: String,
    entity_type: String,
    status: String,
    file_name: Option<String>,
    columns_json: String,
    raw_rows_json: String,
    sample_rows_json: String,
    mapping_json: String,
    validation_summary_json: Option<String>,
    execution_summary_json: Option<String>,
    progress_processed: i64,
    progress_total: i64,
    auto_create_missing: bool,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            tenant_id: row.get(1)?,
            created_by: row.get(2)?,
            entity_type: row.get(3)?,
            status: row.get(4)?,
            file_name: row.get(5)?,
            columns_json: row.get(6)?,
            raw_rows_json: row.get(7)?,
            sample_rows_json: row.get(8)?,
            mapping_json: row.get(9)?,
            validation_summary_json: row.get(10)?,
            execution_summary_json: row.get(11)?,
            progress_processed: row.get(12)?,
            progress_total: row.get(13)?,
            auto_create_missing: row.get(14)?,
            version: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn into_job(self, error_rows: Vec<ErrorRow>) -> RepositoryResult<ImportJob> {
        let entity_type = self
            .entity_type
            .parse::<EntityType>()
            .map_err(|message| RepositoryError::FieldValueError {
                field: "entity_type".to_string(),
                message,
            })?;
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|message| RepositoryError::FieldValueError {
                field: "status".to_string(),
                message,
            })?;

        Ok(ImportJob {
            job_id: self.job_id,
            tenant_id: self.tenant_id,
            created_by: self.created_by,
            entity_type,
            status,
            file_name: self.file_name,
            columns: serde_json::from_str(&self.columns_json)?,
            raw_rows: serde_json::from_str(&self.raw_rows_json)?,
            sample_rows: serde_json::from_str(&self.sample_rows_json)?,
            mapping: serde_json::from_str(&self.mapping_json)?,
            validation_summary: self
                .validation_summary_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            execution_summary: self
                .execution_summary_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            progress: JobProgress {
                processed: self.progress_processed.max(0) as usize,
                total: self.progress_total.max(0) as usize,
            },
            error_rows,
            auto_create_missing: self.auto_create_missing,
            version: self.version,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
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

impl SqliteJobStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn load_error_rows(conn: &Connection, job_id: &str) -> RepositoryResult<Vec<ErrorRow>> {
        let mut stmt = conn.prepare(
            "SELECT row_no, primary_key, error_code, message FROM import_job_error_row WHERE job_id = ?1 ORDER BY id",
        )?;
        let raw = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(row_no, primary_key, code, message)| -> RepositoryResult<ErrorRow> {
                let error_code = code.parse::<ErrorCode>().map_err(|message| {
                    RepositoryError::FieldValueError {
                        field: "error_code".to_string(),
                        message,
                    }
                })?;
                Ok(ErrorRow {
                    row: row_no.max(0) as usize,
                    primary_key,
                    error_code,
                    message,
                })
            })
            .collect()
    }

    fn load_job(conn: &Connection, job_id: &str) -> RepositoryResult<Option<ImportJob>> {
        let sql = format!("{} WHERE job_id = ?1", SELECT_JOB_SQL);
        let row = conn
            .query_row(&sql, params![job_id], JobRow::from_row)
            .optional()?;
        match row {
            Some(row) => {
                let error_rows = Self::load_error_rows(conn, job_id)?;
                Ok(Some(row.into_job(error_rows)?))
            }
            None => Ok(None),
        }
    }

    fn insert_error_rows(
        tx: &rusqlite::Transaction<'_>,
        job_id: &str,
        rows: &[ErrorRow],
    ) -> RepositoryResult<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO import_job_error_row (job_id, row_no, primary_key, error_code, message) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for row in rows {
            stmt.execute(params![
                job_id,
                row.row as i64,
                row.primary_key,
                row.error_code.as_str(),
                row.message,
            ])?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(
        &self,
        tenant_id: &str,
        actor_id: &str,
        entity_type: EntityType,
    ) -> RepositoryResult<ImportJob> {
        let job = ImportJob::new(
            uuid::Uuid::new_v4().to_string(),
            tenant_id,
            actor_id,
            entity_type,
        );
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_job (
                job_id, tenant_id, created_by, entity_type, status,
                auto_create_missing, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                job.job_id,
                job.tenant_id,
                job.created_by,
                job.entity_type.as_str(),
                job.status.as_str(),
                job.auto_create_missing,
                job.version,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(job_id = %job.job_id, tenant_id, entity_type = %entity_type, "导入作业已创建");
        Ok(job)
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> RepositoryResult<Option<ImportJob>> {
        let conn = self.get_conn()?;
        match Self::load_job(&conn, job_id)? {
            Some(job) => {
                check_tenant(&job, tenant_id)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn update_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        patch: JobPatch,
    ) -> RepositoryResult<ImportJob> {
        let mut conn = self.get_conn()?;

        for attempt in 1..=MAX_UPDATE_RETRIES {
            let mut job = Self::load_job(&conn, job_id)?
                .ok_or_else(|| RepositoryError::not_found(ENTITY, job_id))?;
            check_tenant(&job, tenant_id)?;

            let expected_version = job.version;
            let clear_error_rows = patch.clear_error_rows;
            let appended = patch.append_error_rows.clone();
            patch.clone().apply_to(&mut job);
            job.version = expected_version + 1;

            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            let affected = tx.execute(
                r#"
                UPDATE import_job SET
                    status = ?1, file_name = ?2, columns_json = ?3, raw_rows_json = ?4,
                    sample_rows_json = ?5, mapping_json = ?6, validation_summary_json = ?7,
                    execution_summary_json = ?8, progress_processed = ?9, progress_total = ?10,
                    auto_create_missing = ?11, version = ?12, updated_at = ?13
                WHERE job_id = ?14 AND tenant_id = ?15 AND version = ?16
                "#,
                params![
                    job.status.as_str(),
                    job.file_name,
                    serde_json::to_string(&job.columns)?,
                    serde_json::to_string(&job.raw_rows)?,
                    serde_json::to_string(&job.sample_rows)?,
                    serde_json::to_string(&job.mapping)?,
                    job.validation_summary
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    job.execution_summary
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    job.progress.processed as i64,
                    job.progress.total as i64,
                    job.auto_create_missing,
                    job.version,
                    job.updated_at.to_rfc3339(),
                    job_id,
                    tenant_id,
                    expected_version,
                ],
            )?;

            if affected == 0 {
                // 其他写入者已推进版本：放弃本次事务，重读后重放补丁
                drop(tx);
                tracing::debug!(job_id, attempt, expected_version, "作业版本冲突，重试");
                continue;
            }

            if clear_error_rows {
                tx.execute(
                    "DELETE FROM import_job_error_row WHERE job_id = ?1",
                    params![job_id],
                )?;
            }
            Self::insert_error_rows(&tx, job_id, &appended)?;
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

            return Ok(job);
        }

        Err(RepositoryError::VersionConflict {
            entity: ENTITY.to_string(),
            id: job_id.to_string(),
            expected: -1,
        })
    }

    async fn get_jobs_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<ImportJob>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE tenant_id = ?1 ORDER BY created_at DESC",
            SELECT_JOB_SQL
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tenant_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let error_rows = Self::load_error_rows(&conn, &row.job_id)?;
            jobs.push(row.into_job(error_rows)?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::domain::job::ValidationSummary;

    fn sqlite_store() -> SqliteJobStore {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteJobStore::new(Arc::new(Mutex::new(conn)))
    }

    async fn assert_tenant_isolation(store: &dyn JobStore) {
        let job = store
            .create_job("tenant-a", "u1", EntityType::Clients)
            .await
            .unwrap();

        let err = store.get_job("tenant-b", &job.job_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));

        let err = store
            .update_job("tenant-b", &job.job_id, JobPatch::status(JobStatus::Mapped))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden { .. }));

        assert!(store.get_jobs_for_tenant("tenant-b").await.unwrap().is_empty());
        assert_eq!(store.get_jobs_for_tenant("tenant-a").await.unwrap().len(), 1);
    }

    async fn assert_patch_merge(store: &dyn JobStore) {
        let job = store
            .create_job("t1", "u1", EntityType::Users)
            .await
            .unwrap();

        let upload = JobPatch {
            columns: Some(vec!["email".to_string()]),
            raw_rows: Some(vec![vec!["a@b.io".to_string()]]),
            append_error_rows: vec![ErrorRow::new(1, "a@b.io", ErrorCode::Duplicate, "重复")],
            ..Default::default()
        };
        store.update_job("t1", &job.job_id, upload).await.unwrap();

        let progress = JobPatch {
            append_error_rows: vec![ErrorRow::new(2, "c@d.io", ErrorCode::PersistenceError, "写入失败")],
            ..JobPatch::progress(1, 2)
        };
        let updated = store.update_job("t1", &job.job_id, progress).await.unwrap();

        assert_eq!(updated.columns, vec!["email".to_string()]);
        assert_eq!(updated.error_rows.len(), 2);
        assert_eq!(updated.progress.processed, 1);
        assert_eq!(updated.version, job.version + 2);

        let reloaded = store.get_job("t1", &job.job_id).await.unwrap().unwrap();
        assert_eq!(reloaded.error_rows, updated.error_rows);
        assert_eq!(reloaded.raw_rows.len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_tenant_isolation() {
        assert_tenant_isolation(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_tenant_isolation() {
        assert_tenant_isolation(&sqlite_store()).await;
    }

    #[tokio::test]
    async fn test_in_memory_patch_merge() {
        assert_patch_merge(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_patch_merge() {
        assert_patch_merge(&sqlite_store()).await;
    }

    #[tokio::test]
    async fn test_sqlite_clear_and_summary_roundtrip() {
        let store = sqlite_store();
        let job = store
            .create_job("t1", "u1", EntityType::Clients)
            .await
            .unwrap();

        let first = JobPatch {
            append_error_rows: vec![ErrorRow::new(1, "x", ErrorCode::Duplicate, "旧")],
            ..Default::default()
        };
        store.update_job("t1", &job.job_id, first).await.unwrap();

        let summary = ValidationSummary {
            would_create: 2,
            total_rows: 2,
            ..Default::default()
        };
        let second = JobPatch {
            status: Some(JobStatus::Validated),
            validation_summary: Some(Some(summary.clone())),
            clear_error_rows: true,
            ..Default::default()
        };
        store.update_job("t1", &job.job_id, second).await.unwrap();

        let reloaded = store.get_job("t1", &job.job_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Validated);
        assert_eq!(reloaded.validation_summary, Some(summary));
        assert!(reloaded.error_rows.is_empty());
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = sqlite_store();
        assert!(store.get_job("t1", "nope").await.unwrap().is_none());
        let err = store
            .update_job("t1", "nope", JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
