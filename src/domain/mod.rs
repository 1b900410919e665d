// ==========================================
// 多租户导入引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、导入行与运行记录
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit;
pub mod connector;
pub mod entity;
pub mod job;
pub mod record;
pub mod types;

// 重导出核心类型
pub use audit::{AuditAction, AuditEvent};
pub use connector::{
    ClientMappingStrategy, ConnectorImportRun, ConnectorOptions, ConnectorRequest, DryRunResult,
    EntityEstimate, ImportPhase, RemoteProject, RemoteSection, RemoteTask, RemoteTeam, RemoteUser,
    RemoteWorkspace, RunStatus,
};
pub use entity::{
    ClientRecord, NewClient, NewProject, NewTask, NewTimeEntry, NewUser, ProjectRecord,
    TaskRecord, TenantSnapshot, TimeEntryRecord, UpsertOutcome, UserRecord,
};
pub use job::{
    ColumnMapping, ErrorRow, ExecutionSummary, FieldTransform, ImportJob, JobPatch, JobProgress,
    RequestContext, Row, ValidationSummary,
};
pub use record::{
    ClientRow, FieldValue, ImportRow, ProjectRow, TaskRow, TimeEntryRow, TypedRecord, UserRow,
};
pub use types::{EntityType, ErrorCode, JobStatus, ValueType};
