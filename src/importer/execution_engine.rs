// ==========================================
// 多租户导入引擎 - 执行引擎
// ==========================================
// 职责: 逐行落库（重新分类，不信任旧的试运行结果）
// 流程: running → 加载查找表 → 分类 → 自动创建引用 → 插入 → 进度回写 → 终态 → 审计
// 错误: 行级失败记 PERSISTENCE_ERROR 后继续；存储不可用则作业 failed
// 前置: 调用方已持有 (租户, 实体类型) 执行锁
// ==========================================

use crate::config::ImportLimits;
use crate::domain::audit::{AuditAction, AuditEvent};
use crate::domain::entity::{NewClient, NewProject, NewTask, NewTimeEntry, NewUser};
use crate::domain::job::{ErrorRow, ExecutionSummary, ImportJob, JobPatch, JobProgress};
use crate::domain::record::ImportRow;
use crate::domain::types::{ErrorCode, JobStatus};
use crate::importer::error::ImportResult;
use crate::importer::field_mapper::PreparedMapping;
use crate::importer::reference_resolver::{MaterializedRefs, PendingReferent, RefTarget};
use crate::importer::row_classifier::{CreatePlan, RowClassifier, RowOutcome};
use crate::repository::{AuditSink, EntityStore, JobStore, RepositoryError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub struct ExecutionEngine {
    job_store: Arc<dyn JobStore>,
    entity_store: Arc<dyn EntityStore>,
    audit: Arc<dyn AuditSink>,
}

/// 单行落库失败
enum PersistFailure {
    /// 行级: 记为 PERSISTENCE_ERROR 后继续
    Row(String),
    /// 存储不可用: 中止整个作业
    Fatal(RepositoryError),
}

impl From<RepositoryError> for PersistFailure {
    fn from(err: RepositoryError) -> Self {
        if err.is_store_unavailable() {
            PersistFailure::Fatal(err)
        } else {
            PersistFailure::Row(err.to_string())
        }
    }
}

impl ExecutionEngine {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        entity_store: Arc<dyn EntityStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            job_store,
            entity_store,
            audit,
        }
    }

    /// 执行作业；致命错误时先把作业标记为 failed 再返回错误
    #[instrument(skip(self, job, mapping, limits), fields(job_id = %job.job_id, entity_type = %job.entity_type))]
    pub async fn execute_job(
        &self,
        actor_id: &str,
        job: &ImportJob,
        mapping: &PreparedMapping,
        limits: &ImportLimits,
    ) -> ImportResult<ExecutionSummary> {
        let started = Instant::now();
        let total = job.total_rows();

        self.job_store
            .update_job(
                &job.tenant_id,
                &job.job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    progress: Some(JobProgress { processed: 0, total }),
                    execution_summary: Some(None),
                    clear_error_rows: true,
                    ..Default::default()
                },
            )
            .await?;
        info!(total_rows = total, "开始执行导入");

        match self.run_rows(job, mapping, limits, started).await {
            Ok(summary) => {
                self.write_audit(actor_id, job, &summary).await;
                Ok(summary)
            }
            Err(err) => {
                error!(error = %err, "导入执行中止");
                let patch = JobPatch {
                    status: Some(JobStatus::Failed),
                    append_error_rows: vec![ErrorRow::system(
                        ErrorCode::PersistenceError,
                        err.to_string(),
                    )],
                    ..Default::default()
                };
                if let Err(mark_err) = self
                    .job_store
                    .update_job(&job.tenant_id, &job.job_id, patch)
                    .await
                {
                    error!(error = %mark_err, "无法将作业标记为 failed");
                }
                Err(err)
            }
        }
    }

    async fn run_rows(
        &self,
        job: &ImportJob,
        mapping: &PreparedMapping,
        limits: &ImportLimits,
        started: Instant,
    ) -> ImportResult<ExecutionSummary> {
        let tenant_id = job.tenant_id.as_str();
        let total = job.total_rows();
        let flush_every = limits.progress_flush_every.max(1);

        let snapshot = self.entity_store.load_snapshot(tenant_id).await?;
        let mut classifier = RowClassifier::new(mapping, &snapshot, job.auto_create_missing);
        let mut summary = ExecutionSummary {
            total_rows: total,
            ..Default::default()
        };
        let mut pending_rows: Vec<ErrorRow> = Vec::new();

        for (idx, row) in job.raw_rows.iter().enumerate() {
            let row_no = idx + 1;
            let classified = classifier.classify(row_no, row);

            match classified.outcome {
                RowOutcome::Create(plan) => {
                    match self.persist(tenant_id, &mut classifier, &plan).await {
                        Ok(refs) => {
                            classifier.accept_created(row_no, &plan, &refs);
                            summary.created += 1;
                            pending_rows.extend(classified.warnings);
                        }
                        Err(PersistFailure::Row(message)) => {
                            warn!(row = row_no, error = %message, "行落库失败");
                            summary.errors += 1;
                            pending_rows.push(ErrorRow::new(
                                row_no,
                                classified.primary_key,
                                ErrorCode::PersistenceError,
                                message,
                            ));
                        }
                        Err(PersistFailure::Fatal(err)) => return Err(err.into()),
                    }
                }
                RowOutcome::Skip(error) => {
                    summary.skipped += 1;
                    pending_rows.push(error);
                }
                RowOutcome::Fail(error) => {
                    summary.errors += 1;
                    pending_rows.push(error);
                }
            }

            if row_no % flush_every == 0 && row_no < total {
                let patch = JobPatch {
                    progress: Some(JobProgress {
                        processed: row_no,
                        total,
                    }),
                    append_error_rows: std::mem::take(&mut pending_rows),
                    ..Default::default()
                };
                self.job_store
                    .update_job(tenant_id, &job.job_id, patch)
                    .await?;
                debug!(processed = row_no, total, "进度已回写");
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        let status = if summary.errors > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        };

        self.job_store
            .update_job(
                tenant_id,
                &job.job_id,
                JobPatch {
                    status: Some(status),
                    progress: Some(JobProgress {
                        processed: total,
                        total,
                    }),
                    execution_summary: Some(Some(summary.clone())),
                    append_error_rows: pending_rows,
                    ..Default::default()
                },
            )
            .await?;

        info!(
            created = summary.created,
            skipped = summary.skipped,
            errors = summary.errors,
            elapsed_ms = summary.elapsed_ms,
            status = %status,
            "导入执行完成"
        );
        Ok(summary)
    }

    /// 自动创建引用后插入本行
    async fn persist(
        &self,
        tenant_id: &str,
        classifier: &mut RowClassifier<'_>,
        plan: &CreatePlan,
    ) -> Result<MaterializedRefs, PersistFailure> {
        for referent in plan.refs.pending() {
            let target = RefTarget::Pending(referent.clone());
            if classifier.lookup().materialize(&target).is_some() {
                continue;
            }
            let id = self.create_referent(tenant_id, classifier, &referent).await?;
            info!(
                entity = referent.entity_label(),
                name = %referent.display_name(),
                id = %id,
                "已自动创建引用实体"
            );
            classifier.referent_created(&referent, &id);
        }

        let refs = classifier
            .lookup()
            .materialize_refs(&plan.refs)
            .ok_or_else(|| PersistFailure::Row("引用实体未能创建".to_string()))?;

        match &plan.row {
            ImportRow::Client(r) => {
                let client = NewClient {
                    name: r.company_name.clone(),
                    industry: r.industry.clone(),
                    contact_name: r.contact_name.clone(),
                    contact_email: r.contact_email.clone(),
                    phone: r.phone.clone(),
                    website: r.website.clone(),
                    notes: r.notes.clone(),
                };
                self.entity_store.insert_client(tenant_id, &client).await?;
            }
            ImportRow::Project(r) => {
                let project = NewProject {
                    name: r.name.clone(),
                    client_id: refs.client_id.clone(),
                    status: r.status.clone(),
                    start_date: r.start_date,
                    end_date: r.end_date,
                    budget: r.budget,
                    description: r.description.clone(),
                    external_id: None,
                };
                self.entity_store.insert_project(tenant_id, &project).await?;
            }
            ImportRow::Task(r) => {
                let project_id = refs
                    .project_id
                    .clone()
                    .ok_or_else(|| PersistFailure::Row("任务缺少项目".to_string()))?;
                let completed = r
                    .status
                    .as_deref()
                    .map(|s| matches!(s.trim().to_lowercase().as_str(), "done" | "completed" | "closed"))
                    .unwrap_or(false);
                let task = NewTask {
                    project_id,
                    title: r.title.clone(),
                    assignee_id: refs.user_id.clone(),
                    status: r.status.clone(),
                    priority: r.priority.clone(),
                    due_date: r.due_date,
                    estimate_hours: r.estimate_hours,
                    description: r.description.clone(),
                    completed,
                    external_id: None,
                };
                self.entity_store.insert_task(tenant_id, &task).await?;
            }
            ImportRow::User(r) => {
                let user = NewUser {
                    email: r.email.clone(),
                    first_name: r.first_name.clone(),
                    last_name: r.last_name.clone(),
                    role: r.role.clone(),
                    job_title: r.job_title.clone(),
                    hourly_rate: r.hourly_rate,
                    active: r.active.unwrap_or(true),
                    is_admin: r.is_admin,
                    external_id: None,
                };
                self.entity_store.insert_user(tenant_id, &user).await?;
            }
            ImportRow::TimeEntry(r) => {
                let user_id = refs
                    .user_id
                    .clone()
                    .ok_or_else(|| PersistFailure::Row("工时缺少用户".to_string()))?;
                let entry = NewTimeEntry {
                    user_id,
                    project_id: refs.project_id.clone(),
                    task_id: refs.task_id.clone(),
                    date: r.date,
                    hours: r.hours,
                    description: r.description.clone(),
                    billable: r.billable.unwrap_or(true),
                };
                self.entity_store.insert_time_entry(tenant_id, &entry).await?;
            }
        }
        Ok(refs)
    }

    async fn create_referent(
        &self,
        tenant_id: &str,
        classifier: &RowClassifier<'_>,
        referent: &PendingReferent,
    ) -> Result<String, PersistFailure> {
        let id = match referent {
            PendingReferent::Client { name } => {
                self.entity_store
                    .insert_client(tenant_id, &NewClient::named(name.clone()))
                    .await?
            }
            PendingReferent::Project { name } => {
                let project = NewProject {
                    name: name.clone(),
                    ..Default::default()
                };
                self.entity_store.insert_project(tenant_id, &project).await?
            }
            PendingReferent::User { email } => {
                self.entity_store
                    .insert_user(tenant_id, &NewUser::with_email(email.clone()))
                    .await?
            }
            PendingReferent::Task {
                project_name,
                title,
            } => {
                let project_id = classifier
                    .lookup()
                    .project(project_name)
                    .and_then(RefTarget::existing_id)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        PersistFailure::Row(format!("项目 '{}' 不存在，无法创建任务", project_name))
                    })?;
                let task = NewTask {
                    project_id,
                    title: title.clone(),
                    ..Default::default()
                };
                self.entity_store.insert_task(tenant_id, &task).await?
            }
        };
        Ok(id)
    }

    /// 审计写入失败只记日志，不影响作业结果
    async fn write_audit(&self, actor_id: &str, job: &ImportJob, summary: &ExecutionSummary) {
        let event = AuditEvent::new(
            job.tenant_id.as_str(),
            actor_id,
            AuditAction::TabularImport,
            job.job_id.as_str(),
        )
        .with_entity_type(job.entity_type.as_str())
        .with_summary(summary);
        if let Err(err) = self.audit.record(&event).await {
            warn!(error = %err, "审计事件写入失败");
        }
    }
}
