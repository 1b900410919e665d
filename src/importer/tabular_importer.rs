// ==========================================
// 多租户导入引擎 - 表格导入器实现
// ==========================================
// 职责: 整合作业生命周期（上传 → 映射 → 试运行 → 执行）
// 流程: 解析 → 建议映射 → 校验映射 → 分类 → 加锁落库
// ==========================================

use crate::config::{ImportConfigReader, ImportLimits};
use crate::domain::connector::ImportPhase;
use crate::domain::job::{
    ColumnMapping, ExecutionSummary, ImportJob, JobPatch, JobProgress, RequestContext,
    ValidationSummary,
};
use crate::domain::types::{EntityType, JobStatus};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::execution_engine::ExecutionEngine;
use crate::importer::execution_lock::{lock_set, ExecutionLocks};
use crate::importer::field_catalog::fields_for;
use crate::importer::field_mapper::{suggest_mappings, PreparedMapping};
use crate::importer::file_parser::{self, ParsedTable};
use crate::importer::importer_trait::{BatchImport, Importer, PhaseListener};
use crate::importer::validation_engine::ValidationEngine;
use crate::repository::{AuditSink, EntityStore, JobStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

// ==========================================
// TabularImporter - 表格导入器
// ==========================================
pub struct TabularImporter {
    // 数据访问层
    job_store: Arc<dyn JobStore>,

    // 配置读取器
    config: Arc<dyn ImportConfigReader>,

    // 引擎
    validation: ValidationEngine,
    execution: ExecutionEngine,
    locks: Arc<ExecutionLocks>,
}

impl TabularImporter {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        entity_store: Arc<dyn EntityStore>,
        audit: Arc<dyn AuditSink>,
        config: Arc<dyn ImportConfigReader>,
        locks: Arc<ExecutionLocks>,
    ) -> Self {
        Self {
            validation: ValidationEngine::new(entity_store.clone()),
            execution: ExecutionEngine::new(job_store.clone(), entity_store, audit),
            job_store,
            config,
            locks,
        }
    }

    async fn limits(&self) -> ImportResult<ImportLimits> {
        self.config
            .load_limits()
            .await
            .map_err(|e| ImportError::ConfigReadError(e.to_string()))
    }

    async fn load_job(&self, ctx: &RequestContext, job_id: &str) -> ImportResult<ImportJob> {
        self.job_store
            .get_job(&ctx.tenant_id, job_id)
            .await?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))
    }

    fn ensure_not_running(job: &ImportJob) -> ImportResult<()> {
        if job.status == JobStatus::Running {
            return Err(ImportError::JobRunning(job.job_id.clone()));
        }
        Ok(())
    }

    fn ensure_has_data(job: &ImportJob, action: &str) -> ImportResult<()> {
        if job.status == JobStatus::Draft {
            return Err(ImportError::InvalidJobState {
                status: job.status.to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_runnable(job: &ImportJob) -> ImportResult<()> {
        Self::ensure_not_running(job)?;
        if !job.status.can_run() {
            return Err(ImportError::config(format!(
                "作业需要先通过校验 (当前状态 {})",
                job.status
            )));
        }
        Ok(())
    }

    /// 上传公共部分: 表头整理 → 建议映射 → 写入作业
    async fn store_table(
        &self,
        ctx: &RequestContext,
        job: &ImportJob,
        file_name: Option<String>,
        table: ParsedTable,
        limits: &ImportLimits,
    ) -> ImportResult<ImportJob> {
        let table = file_parser::sanitize_upload(table)?;
        let suggested = suggest_mappings(&table.headers, fields_for(job.entity_type));
        let sample_rows = table
            .rows
            .iter()
            .take(limits.sample_row_count)
            .cloned()
            .collect();
        let row_count = table.rows.len();

        let patch = JobPatch {
            status: Some(JobStatus::Mapped),
            file_name,
            columns: Some(table.headers),
            raw_rows: Some(table.rows),
            sample_rows: Some(sample_rows),
            mapping: Some(suggested),
            validation_summary: Some(None),
            execution_summary: Some(None),
            progress: Some(JobProgress {
                processed: 0,
                total: row_count,
            }),
            clear_error_rows: true,
            ..Default::default()
        };
        let updated = self
            .job_store
            .update_job(&ctx.tenant_id, &job.job_id, patch)
            .await?;

        info!(
            job_id = %updated.job_id,
            row_count,
            columns = updated.columns.len(),
            mapped = updated.mapping.iter().filter(|m| m.target_field.is_some()).count(),
            "上传完成"
        );
        Ok(updated)
    }
}

#[async_trait]
impl Importer for TabularImporter {
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn create_job(&self, ctx: &RequestContext, entity_type: EntityType) -> ImportResult<ImportJob> {
        let job = self
            .job_store
            .create_job(&ctx.tenant_id, &ctx.actor_id, entity_type)
            .await?;
        info!(job_id = %job.job_id, entity_type = %entity_type, "导入作业已创建");
        Ok(job)
    }

    #[instrument(skip(self, ctx, csv_text), fields(tenant_id = %ctx.tenant_id, bytes = csv_text.len()))]
    async fn upload(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        file_name: Option<String>,
        csv_text: &str,
    ) -> ImportResult<ImportJob> {
        let limits = self.limits().await?;
        if csv_text.len() > limits.max_upload_bytes {
            return Err(ImportError::PayloadTooLarge {
                size: csv_text.len(),
                max: limits.max_upload_bytes,
            });
        }

        let job = self.load_job(ctx, job_id).await?;
        Self::ensure_not_running(&job)?;

        let table = file_parser::parse(csv_text, limits.max_rows)?;
        self.store_table(ctx, &job, file_name, table, &limits).await
    }

    #[instrument(skip(self, ctx, bytes), fields(tenant_id = %ctx.tenant_id, bytes = bytes.len()))]
    async fn upload_workbook(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        file_name: Option<String>,
        bytes: &[u8],
    ) -> ImportResult<ImportJob> {
        let limits = self.limits().await?;
        if bytes.len() > limits.max_upload_bytes {
            return Err(ImportError::PayloadTooLarge {
                size: bytes.len(),
                max: limits.max_upload_bytes,
            });
        }

        let job = self.load_job(ctx, job_id).await?;
        Self::ensure_not_running(&job)?;

        let table = file_parser::parse_workbook(bytes, limits.max_rows)?;
        self.store_table(ctx, &job, file_name, table, &limits).await
    }

    #[instrument(skip(self, ctx, mapping), fields(tenant_id = %ctx.tenant_id))]
    async fn set_mapping(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        mapping: Vec<ColumnMapping>,
        auto_create_missing: Option<bool>,
    ) -> ImportResult<ImportJob> {
        let job = self.load_job(ctx, job_id).await?;
        Self::ensure_not_running(&job)?;
        Self::ensure_has_data(&job, "set_mapping")?;
        PreparedMapping::prepare(job.entity_type, &job.columns, &mapping)?;

        let patch = JobPatch {
            status: Some(JobStatus::Mapped),
            mapping: Some(mapping),
            validation_summary: Some(None),
            auto_create_missing,
            ..Default::default()
        };
        let updated = self
            .job_store
            .update_job(&ctx.tenant_id, job_id, patch)
            .await?;
        info!(job_id = %job_id, previous_status = %job.status, "映射已更新");
        Ok(updated)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn validate(&self, ctx: &RequestContext, job_id: &str) -> ImportResult<ValidationSummary> {
        let limits = self.limits().await?;
        let job = self.load_job(ctx, job_id).await?;
        Self::ensure_not_running(&job)?;
        Self::ensure_has_data(&job, "validate")?;

        let output = self.validation.validate_job(&job, &limits).await?;
        let status = if output.summary.unmapped_required.is_empty() {
            JobStatus::Validated
        } else {
            JobStatus::Mapped
        };

        let patch = JobPatch {
            status: Some(status),
            validation_summary: Some(Some(output.summary.clone())),
            clear_error_rows: true,
            append_error_rows: output.error_rows,
            ..Default::default()
        };
        self.job_store
            .update_job(&ctx.tenant_id, job_id, patch)
            .await?;
        Ok(output.summary)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    async fn run(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        auto_create_missing: Option<bool>,
    ) -> ImportResult<ExecutionSummary> {
        let limits = self.limits().await?;
        let job = self.load_job(ctx, job_id).await?;
        Self::ensure_runnable(&job)?;

        // 自动创建会写入被引用实体，同样需要持锁
        let auto_create = auto_create_missing.unwrap_or(job.auto_create_missing);
        let _guard = self
            .locks
            .acquire_many(&ctx.tenant_id, &lock_set(job.entity_type, auto_create))
            .await?;

        // 加锁后重新读取，等待期间状态可能已变化
        let mut job = self.load_job(ctx, job_id).await?;
        Self::ensure_runnable(&job)?;
        if let Some(flag) = auto_create_missing {
            if flag != job.auto_create_missing {
                job = self
                    .job_store
                    .update_job(
                        &ctx.tenant_id,
                        job_id,
                        JobPatch {
                            auto_create_missing: Some(flag),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        let mapping = PreparedMapping::prepare(job.entity_type, &job.columns, &job.mapping)?;
        self.execution
            .execute_job(&ctx.actor_id, &job, &mapping, &limits)
            .await
    }

    async fn get_job(&self, ctx: &RequestContext, job_id: &str) -> ImportResult<ImportJob> {
        self.load_job(ctx, job_id).await
    }

    async fn list_jobs(&self, ctx: &RequestContext) -> ImportResult<Vec<ImportJob>> {
        Ok(self.job_store.get_jobs_for_tenant(&ctx.tenant_id).await?)
    }
}

// ==========================================
// TabularJobImport - 单个作业的 试运行/执行
// ==========================================
pub struct TabularJobImport {
    importer: Arc<dyn Importer>,
    job_id: String,
    auto_create_missing: Option<bool>,
}

impl TabularJobImport {
    pub fn new(importer: Arc<dyn Importer>, job_id: impl Into<String>) -> Self {
        Self {
            importer,
            job_id: job_id.into(),
            auto_create_missing: None,
        }
    }

    pub fn with_auto_create(mut self, auto_create_missing: Option<bool>) -> Self {
        self.auto_create_missing = auto_create_missing;
        self
    }
}

#[async_trait]
impl BatchImport for TabularJobImport {
    type Estimate = ValidationSummary;
    type Error = ImportError;

    fn subject_id(&self) -> &str {
        &self.job_id
    }

    async fn validate(&self, ctx: &RequestContext) -> ImportResult<ValidationSummary> {
        self.importer.validate(ctx, &self.job_id).await
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        listener: Arc<dyn PhaseListener>,
    ) -> ImportResult<ExecutionSummary> {
        listener.on_phase(&self.job_id, ImportPhase::CommittingRows);
        let summary = self
            .importer
            .run(ctx, &self.job_id, self.auto_create_missing)
            .await?;
        listener.on_phase(&self.job_id, ImportPhase::Finished);
        Ok(summary)
    }
}
