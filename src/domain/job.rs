// ==========================================
// 多租户导入引擎 - 导入作业领域模型
// ==========================================
// 职责: ImportJob / ColumnMapping / 汇总 / 错误行 / 结构化补丁
// 生命周期: 上传意图时创建 → upload/mapping/validate/run 逐步变更
// ==========================================

use crate::domain::types::{EntityType, ErrorCode, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一行原始数据（与 columns 按下标对齐）
pub type Row = Vec<String>;

// ==========================================
// RequestContext - 调用方上下文
// ==========================================
// 租户解析与鉴权由外部完成，这里只携带结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub tenant_id: String,
    pub actor_id: String,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
        }
    }
}

// ==========================================
// FieldTransform - 映射级取值变换
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    Trim,
    Lowercase,
    Uppercase,
    TitleCase,
    DigitsOnly,
    /// chrono 格式串，如 "%d/%m/%Y"
    DateFormat(String),
}

// ==========================================
// ColumnMapping - 源列 → 标准字段
// ==========================================
// 约束: 每个 target_field 至多接收一个源列（禁止多对一）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub source_column: String,
    /// None = 未映射（建议阶段不猜测）
    pub target_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<FieldTransform>,
}

impl ColumnMapping {
    pub fn new(source_column: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: Some(target_field.into()),
            transform: None,
        }
    }

    pub fn unmapped(source_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: None,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

// ==========================================
// ErrorRow - 行级错误/警告
// ==========================================
// 每个作业只追加不修改；导出 CSV 时原样输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRow {
    /// 数据行号（从 1 开始，不含表头）；0 表示系统级
    pub row: usize,
    pub primary_key: String,
    pub error_code: ErrorCode,
    pub message: String,
}

impl ErrorRow {
    pub fn new(
        row: usize,
        primary_key: impl Into<String>,
        error_code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row,
            primary_key: primary_key.into(),
            error_code,
            message: message.into(),
        }
    }

    /// 系统级错误（流水线致命错误）
    pub fn system(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(0, "system", error_code, message)
    }
}

// ==========================================
// ValidationSummary - 试运行汇总
// ==========================================
// 不变量: would_create + would_skip + would_fail == total_rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub would_create: usize,
    pub would_skip: usize,
    pub would_fail: usize,
    pub total_rows: usize,
    /// 错误预览（截断）
    pub errors: Vec<ErrorRow>,
    /// 警告预览（截断）
    pub warnings: Vec<ErrorRow>,
    pub error_count: usize,
    pub warning_count: usize,
    /// 未映射的必填字段
    #[serde(default)]
    pub unmapped_required: Vec<String>,
}

impl ValidationSummary {
    pub fn is_consistent(&self) -> bool {
        self.would_create + self.would_skip + self.would_fail == self.total_rows
    }
}

// ==========================================
// ExecutionSummary - 执行汇总
// ==========================================
// 不变量: created + updated + skipped + errors == total_rows
// （表格导入 updated 恒为 0）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_rows: usize,
    pub elapsed_ms: u64,
}

impl ExecutionSummary {
    pub fn is_consistent(&self) -> bool {
        self.created + self.updated + self.skipped + self.errors == self.total_rows
    }
}

// ==========================================
// JobProgress - 执行进度
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed: usize,
    pub total: usize,
}

// ==========================================
// ImportJob - 导入作业
// ==========================================
// 身份: (tenant_id, job_id)；仅创建租户可见
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub job_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub entity_type: EntityType,
    pub status: JobStatus,
    pub file_name: Option<String>,
    pub columns: Vec<String>,
    pub raw_rows: Vec<Row>,
    pub sample_rows: Vec<Row>,
    pub mapping: Vec<ColumnMapping>,
    pub validation_summary: Option<ValidationSummary>,
    pub execution_summary: Option<ExecutionSummary>,
    pub progress: JobProgress,
    pub error_rows: Vec<ErrorRow>,
    pub auto_create_missing: bool,
    /// 行版本号（每次更新 +1）
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(
        job_id: impl Into<String>,
        tenant_id: impl Into<String>,
        created_by: impl Into<String>,
        entity_type: EntityType,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            tenant_id: tenant_id.into(),
            created_by: created_by.into(),
            entity_type,
            status: JobStatus::Draft,
            file_name: None,
            columns: Vec::new(),
            raw_rows: Vec::new(),
            sample_rows: Vec::new(),
            mapping: Vec::new(),
            validation_summary: None,
            execution_summary: None,
            progress: JobProgress::default(),
            error_rows: Vec::new(),
            auto_create_missing: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.raw_rows.len()
    }
}

// ==========================================
// JobPatch - 结构化补丁
// ==========================================
// 并发约束: 只覆盖显式给出的标量字段；error_rows 只追加，
// 清空必须显式声明，避免进度回调与轮询互相覆盖
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub file_name: Option<String>,
    pub columns: Option<Vec<String>>,
    pub raw_rows: Option<Vec<Row>>,
    pub sample_rows: Option<Vec<Row>>,
    pub mapping: Option<Vec<ColumnMapping>>,
    pub validation_summary: Option<Option<ValidationSummary>>,
    pub execution_summary: Option<Option<ExecutionSummary>>,
    pub progress: Option<JobProgress>,
    pub auto_create_missing: Option<bool>,
    pub clear_error_rows: bool,
    pub append_error_rows: Vec<ErrorRow>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(processed: usize, total: usize) -> Self {
        Self {
            progress: Some(JobProgress { processed, total }),
            ..Default::default()
        }
    }

    /// 合并到作业上（不修改版本号，由存储层负责）
    pub fn apply_to(self, job: &mut ImportJob) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(file_name) = self.file_name {
            job.file_name = Some(file_name);
        }
        if let Some(columns) = self.columns {
            job.columns = columns;
        }
        if let Some(raw_rows) = self.raw_rows {
            job.raw_rows = raw_rows;
        }
        if let Some(sample_rows) = self.sample_rows {
            job.sample_rows = sample_rows;
        }
        if let Some(mapping) = self.mapping {
            job.mapping = mapping;
        }
        if let Some(summary) = self.validation_summary {
            job.validation_summary = summary;
        }
        if let Some(summary) = self.execution_summary {
            job.execution_summary = summary;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(flag) = self.auto_create_missing {
            job.auto_create_missing = flag;
        }
        if self.clear_error_rows {
            job.error_rows.clear();
        }
        job.error_rows.extend(self.append_error_rows);
        job.updated_at = Utc::now();
    }
}
