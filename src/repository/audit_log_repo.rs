// ==========================================
// 多租户导入引擎 - 审计日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// 写入: 每次执行一条聚合事件
// ==========================================

use crate::domain::audit::AuditEvent;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ==========================================
// AuditSink Trait
// ==========================================
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> RepositoryResult<()>;
}

// ==========================================
// AuditLogRepository
// ==========================================
pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按时间倒序查询租户的审计事件
    pub fn list_by_tenant(&self, tenant_id: &str, limit: usize) -> RepositoryResult<Vec<AuditEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, tenant_id, actor, action, event_ts, subject_id,
                   entity_type, summary_json, detail
            FROM audit_log
            WHERE tenant_id = ?1
            ORDER BY event_ts DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![tenant_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(event_id, tenant_id, actor, action, ts, subject_id, entity_type, summary, detail)|
                 -> RepositoryResult<AuditEvent> {
                    let event_ts = NaiveDateTime::parse_from_str(&ts, TS_FORMAT).map_err(|e| {
                        RepositoryError::FieldValueError {
                            field: "event_ts".to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    Ok(AuditEvent {
                        event_id,
                        tenant_id,
                        actor,
                        action,
                        event_ts,
                        subject_id,
                        entity_type,
                        summary_json: summary.as_deref().map(serde_json::from_str).transpose()?,
                        detail,
                    })
                },
            )
            .collect()
    }
}

#[async_trait]
impl AuditSink for AuditLogRepository {
    async fn record(&self, event: &AuditEvent) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO audit_log (
                event_id, tenant_id, actor, action, event_ts, subject_id,
                entity_type, summary_json, detail
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                event.event_id,
                event.tenant_id,
                event.actor,
                event.action,
                event.event_ts.format(TS_FORMAT).to_string(),
                event.subject_id,
                event.entity_type,
                event.summary_json.as_ref().map(|v| v.to_string()),
                event.detail,
            ],
        )?;
        tracing::debug!(
            event_id = %event.event_id,
            action = %event.action,
            subject_id = %event.subject_id,
            "审计事件已写入"
        );
        Ok(())
    }
}
