// ==========================================
// 多租户导入引擎 - 数据仓储层
// ==========================================
// 职责: 数据访问,不含业务逻辑
// 红线: 所有读写按 tenant_id 隔离
// ==========================================

pub mod audit_log_repo;
pub mod connector_run_repo;
pub mod entity_store;
pub mod error;
pub mod import_job_repo;

// 重导出核心类型
pub use audit_log_repo::{AuditLogRepository, AuditSink};
pub use connector_run_repo::{ConnectorRunRepository, ConnectorRunStore};
pub use entity_store::{EntityStore, SqliteEntityStore};
pub use error::{RepositoryError, RepositoryResult};
pub use import_job_repo::{InMemoryJobStore, JobStore, SqliteJobStore};
