// ==========================================
// 多租户导入引擎 - 表格导入 API
// ==========================================
// 职责: 封装作业生命周期为请求/响应形状，统一错误转换
// 说明: run 同步等待完成（阶段经 PhaseListener 回调）；租户与操作人来自 RequestContext
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::job::{
    ColumnMapping, ErrorRow, ExecutionSummary, ImportJob, JobProgress, RequestContext, Row,
    ValidationSummary,
};
use crate::domain::types::{EntityType, JobStatus};
use crate::importer::{
    fields_for, generate_csv, BatchImport, FieldSpec, Importer, NoopPhaseListener, PhaseListener,
    TabularJobImport,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// 错误报告 CSV 表头
const ERROR_REPORT_HEADERS: [&str; 4] = ["row", "primaryKey", "errorCode", "message"];

/// 上传响应（字段目录为静态数据，只序列化）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: String,
    pub columns: Vec<String>,
    pub sample_rows: Vec<Row>,
    pub row_count: usize,
    pub suggested_mapping: Vec<ColumnMapping>,
    pub fields: Vec<FieldSpec>,
}

/// 试运行响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub summary: ValidationSummary,
    pub errors_preview: Vec<ErrorRow>,
    pub warnings_preview: Vec<ErrorRow>,
}

/// 执行响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub summary: ExecutionSummary,
    pub job: JobView,
}

/// 作业视图（不含原始行与完整错误行）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub entity_type: EntityType,
    pub status: JobStatus,
    pub file_name: Option<String>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub sample_rows: Vec<Row>,
    pub mapping: Vec<ColumnMapping>,
    pub auto_create_missing: bool,
    pub validation_summary: Option<ValidationSummary>,
    pub execution_summary: Option<ExecutionSummary>,
    pub error_count: usize,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ImportJob> for JobView {
    fn from(job: ImportJob) -> Self {
        Self {
            row_count: job.raw_rows.len(),
            error_count: job.error_rows.len(),
            job_id: job.job_id,
            entity_type: job.entity_type,
            status: job.status,
            file_name: job.file_name,
            columns: job.columns,
            sample_rows: job.sample_rows,
            mapping: job.mapping,
            auto_create_missing: job.auto_create_missing,
            validation_summary: job.validation_summary,
            execution_summary: job.execution_summary,
            created_by: job.created_by,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// 作业状态响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job: JobView,
    pub progress: JobProgress,
}

fn parse_entity_type(raw: &str) -> ApiResult<EntityType> {
    raw.parse::<EntityType>().map_err(ApiError::InvalidInput)
}

fn upload_response(job: ImportJob) -> UploadResponse {
    UploadResponse {
        fields: fields_for(job.entity_type).to_vec(),
        row_count: job.raw_rows.len(),
        job_id: job.job_id,
        columns: job.columns,
        sample_rows: job.sample_rows,
        suggested_mapping: job.mapping,
    }
}

/// 表格导入API
pub struct ImportApi {
    importer: Arc<dyn Importer>,
    listener: Arc<dyn PhaseListener>,
}

impl ImportApi {
    pub fn new(importer: Arc<dyn Importer>) -> Self {
        Self {
            importer,
            listener: Arc::new(NoopPhaseListener),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn PhaseListener>) -> Self {
        self.listener = listener;
        self
    }

    /// 创建导入作业
    ///
    /// # 参数
    /// - entity_type: clients / projects / tasks / users / admins / time-entries
    pub async fn create_job(&self, ctx: &RequestContext, entity_type: &str) -> ApiResult<JobView> {
        let entity_type = parse_entity_type(entity_type)?;
        let job = self.importer.create_job(ctx, entity_type).await?;
        info!(tenant_id = %ctx.tenant_id, job_id = %job.job_id, entity_type = %entity_type, "导入作业已创建");
        Ok(job.into())
    }

    /// 上传 CSV 文本
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        file_name: Option<String>,
        csv_text: &str,
    ) -> ApiResult<UploadResponse> {
        let job = self.importer.upload(ctx, job_id, file_name, csv_text).await?;
        Ok(upload_response(job))
    }

    /// 上传 XLSX 工作簿
    pub async fn upload_workbook(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        file_name: Option<String>,
        bytes: &[u8],
    ) -> ApiResult<UploadResponse> {
        let job = self
            .importer
            .upload_workbook(ctx, job_id, file_name, bytes)
            .await?;
        Ok(upload_response(job))
    }

    pub async fn set_mapping(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        mapping: Vec<ColumnMapping>,
        auto_create_missing: Option<bool>,
    ) -> ApiResult<JobView> {
        let job = self
            .importer
            .set_mapping(ctx, job_id, mapping, auto_create_missing)
            .await?;
        Ok(job.into())
    }

    pub async fn validate(&self, ctx: &RequestContext, job_id: &str) -> ApiResult<ValidateResponse> {
        let summary = TabularJobImport::new(self.importer.clone(), job_id)
            .validate(ctx)
            .await?;
        Ok(ValidateResponse {
            errors_preview: summary.errors.clone(),
            warnings_preview: summary.warnings.clone(),
            summary,
        })
    }

    pub async fn run(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        auto_create_missing: Option<bool>,
    ) -> ApiResult<RunResponse> {
        let summary = TabularJobImport::new(self.importer.clone(), job_id)
            .with_auto_create(auto_create_missing)
            .execute(ctx, self.listener.clone())
            .await?;
        let job = self.importer.get_job(ctx, job_id).await?;
        Ok(RunResponse {
            summary,
            job: job.into(),
        })
    }

    pub async fn get_job(&self, ctx: &RequestContext, job_id: &str) -> ApiResult<JobStatusResponse> {
        let job = self.importer.get_job(ctx, job_id).await?;
        Ok(JobStatusResponse {
            progress: job.progress,
            job: job.into(),
        })
    }

    pub async fn list_jobs(&self, ctx: &RequestContext) -> ApiResult<Vec<JobView>> {
        let jobs = self.importer.list_jobs(ctx).await?;
        Ok(jobs.into_iter().map(JobView::from).collect())
    }

    /// 错误报告 CSV: row,primaryKey,errorCode,message
    pub async fn errors_csv(&self, ctx: &RequestContext, job_id: &str) -> ApiResult<String> {
        let job = self.importer.get_job(ctx, job_id).await?;
        let headers: Vec<String> = ERROR_REPORT_HEADERS.iter().map(|h| h.to_string()).collect();
        let rows: Vec<Row> = job
            .error_rows
            .iter()
            .map(|e| {
                vec![
                    e.row.to_string(),
                    e.primary_key.clone(),
                    e.error_code.as_str().to_string(),
                    e.message.clone(),
                ]
            })
            .collect();
        Ok(generate_csv(&headers, &rows))
    }

    pub async fn errors_json(&self, ctx: &RequestContext, job_id: &str) -> ApiResult<Vec<ErrorRow>> {
        let job = self.importer.get_job(ctx, job_id).await?;
        Ok(job.error_rows)
    }

    /// 字段目录
    pub fn fields(&self, entity_type: &str) -> ApiResult<Vec<FieldSpec>> {
        let entity_type = parse_entity_type(entity_type)?;
        Ok(fields_for(entity_type).to_vec())
    }
}
