// ==========================================
// 多租户导入引擎 - 连接器导入流水线
// ==========================================
// 职责: 从外部项目管理系统拉取 项目/任务/负责人 并落到本地实体库
// 阶段: resolving_clients → importing_projects → importing_tasks → importing_users
// 模式: validate（试运行，只读）/ execute（持锁落库，写运行记录）
// 错误: auth 类外部错误与存储不可用中止运行；其余记为单元级错误
// ==========================================

use crate::connector::client::RemoteClient;
use crate::connector::client_resolver::ClientResolver;
use crate::connector::error::{ConnectorError, ConnectorResult, ExternalApiError};
use crate::connector::tally::{Bucket, RunTally};
use crate::connector::writer::{DryRunWriter, EntityWriter, StoreWriter};
use crate::domain::audit::{AuditAction, AuditEvent};
use crate::domain::connector::{
    ClientMappingStrategy, ConnectorImportRun, ConnectorRequest, DryRunResult, ImportPhase,
    RemoteProject, RemoteUser, RunStatus,
};
use crate::domain::entity::{NewProject, NewTask, NewUser, TenantSnapshot, UpsertOutcome};
use crate::domain::job::{ErrorRow, ExecutionSummary, RequestContext};
use crate::domain::types::{EntityType, ErrorCode};
use crate::importer::{BatchImport, ExecutionLocks, PhaseListener};
use crate::repository::{AuditSink, ConnectorRunStore, EntityStore, RepositoryError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// execute 期间持有的锁（acquire_many 内部排序；admins 与 users 同锁）
const LOCKED_ENTITIES: [EntityType; 4] = [
    EntityType::Clients,
    EntityType::Projects,
    EntityType::Tasks,
    EntityType::Users,
];

// ==========================================
// LocalIndex - 本地实体索引
// ==========================================
#[derive(Default)]
struct LocalIndex {
    /// 小写客户名 → id
    clients: HashMap<String, String>,
    users_by_external: HashMap<String, String>,
    users_by_email: HashMap<String, String>,
    /// 本次运行已写入的远程用户 ID
    synced_users: HashSet<String>,
}

impl LocalIndex {
    fn from_snapshot(snapshot: &TenantSnapshot) -> Self {
        let mut index = LocalIndex::default();
        for client in &snapshot.clients {
            index
                .clients
                .entry(client.name.trim().to_lowercase())
                .or_insert_with(|| client.id.clone());
        }
        for user in &snapshot.users {
            if let Some(ext) = &user.external_id {
                index.users_by_external.insert(ext.clone(), user.id.clone());
            }
            index
                .users_by_email
                .insert(user.email.trim().to_lowercase(), user.id.clone());
        }
        index
    }

    fn user(&self, remote: &RemoteUser) -> Option<&String> {
        self.users_by_external.get(&remote.id).or_else(|| {
            remote
                .email
                .as_deref()
                .and_then(|email| self.users_by_email.get(&email.trim().to_lowercase()))
        })
    }

    fn record_user(&mut self, remote: &RemoteUser, id: &str) {
        self.users_by_external.insert(remote.id.clone(), id.to_string());
        if let Some(email) = remote.email.as_deref() {
            self.users_by_email
                .insert(email.trim().to_lowercase(), id.to_string());
        }
        self.synced_users.insert(remote.id.clone());
    }
}

/// 负责人解析结果
enum Assignee {
    Local(String),
    Unassigned(String),
    Unresolved(String),
}

fn remote_email(user: &RemoteUser) -> Option<&str> {
    user.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
}

fn new_user(remote: &RemoteUser, email: &str) -> NewUser {
    let name = remote.name.trim();
    let (first, last) = match name.split_once(' ') {
        Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
        None if !name.is_empty() => (Some(name.to_string()), None),
        None => (None, None),
    };
    NewUser {
        email: email.to_string(),
        first_name: first,
        last_name: last,
        external_id: Some(remote.id.clone()),
        active: true,
        ..Default::default()
    }
}

/// 存储不可用则中止，否则返回行级错误信息
fn row_or_fatal(err: RepositoryError) -> ConnectorResult<String> {
    if err.is_store_unavailable() {
        Err(err.into())
    } else {
        Ok(err.to_string())
    }
}

fn external_or_fatal(err: ExternalApiError) -> ConnectorResult<ExternalApiError> {
    if err.is_fatal() {
        Err(err.into())
    } else {
        Ok(err)
    }
}

fn check_request(request: &ConnectorRequest) -> ConnectorResult<()> {
    if request.remote_workspace_id.trim().is_empty() {
        return Err(ConnectorError::InvalidOptions("remoteWorkspaceId 不能为空".to_string()));
    }
    match &request.options.client_mapping_strategy {
        ClientMappingStrategy::Single { client_name } if client_name.trim().is_empty() => Err(
            ConnectorError::InvalidOptions("single 策略必须提供 clientName".to_string()),
        ),
        ClientMappingStrategy::CustomField { field_name } if field_name.trim().is_empty() => Err(
            ConnectorError::InvalidOptions("custom_field 策略必须提供 fieldName".to_string()),
        ),
        _ => Ok(()),
    }
}

fn request_of(run: &ConnectorImportRun) -> ConnectorRequest {
    ConnectorRequest {
        remote_workspace_id: run.source_workspace_id.clone(),
        remote_project_ids: run.source_project_ids.clone(),
        target_workspace_id: run.target_workspace_id.clone(),
        options: run.options.clone(),
    }
}

// ==========================================
// ConnectorPipeline
// ==========================================
pub struct ConnectorPipeline {
    remote: Arc<dyn RemoteClient>,
    entity_store: Arc<dyn EntityStore>,
    run_store: Arc<dyn ConnectorRunStore>,
    audit: Arc<dyn AuditSink>,
    locks: Arc<ExecutionLocks>,
}

impl ConnectorPipeline {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        entity_store: Arc<dyn EntityStore>,
        run_store: Arc<dyn ConnectorRunStore>,
        audit: Arc<dyn AuditSink>,
        locks: Arc<ExecutionLocks>,
    ) -> Self {
        Self {
            remote,
            entity_store,
            run_store,
            audit,
            locks,
        }
    }

    /// 试运行: 不写实体库、不建运行记录
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id, workspace = %request.remote_workspace_id))]
    pub async fn validate(
        &self,
        ctx: &RequestContext,
        request: &ConnectorRequest,
    ) -> ConnectorResult<DryRunResult> {
        check_request(request)?;
        let snapshot = self.entity_store.load_snapshot(&ctx.tenant_id).await?;
        let writer = DryRunWriter::from_snapshot(&snapshot);
        let mut tally = RunTally::new();
        self.walk(request, &snapshot, &writer, &mut tally).await?;

        let result = tally.into_dry_run();
        info!(
            projects_create = result.projects.would_create,
            projects_update = result.projects.would_update,
            tasks_create = result.tasks.would_create,
            errors = result.errors.len(),
            "连接器试运行完成"
        );
        Ok(result)
    }

    /// 创建 running 状态的运行记录（供调用方先拿到 run_id）
    pub async fn start_run(
        &self,
        ctx: &RequestContext,
        request: &ConnectorRequest,
    ) -> ConnectorResult<ConnectorImportRun> {
        check_request(request)?;
        let run = ConnectorImportRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id.clone(),
            actor_user_id: ctx.actor_id.clone(),
            source_workspace_id: request.remote_workspace_id.clone(),
            source_project_ids: request.remote_project_ids.clone(),
            target_workspace_id: request.target_workspace_id.clone(),
            options: request.options.clone(),
            status: RunStatus::Running,
            phase: ImportPhase::Starting.as_str().to_string(),
            execution_summary: None,
            error_log: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        };
        self.run_store.create_run(&run).await?;
        info!(
            run_id = %run.run_id,
            strategy = run.options.client_mapping_strategy.label(),
            projects = run.source_project_ids.len(),
            "连接器运行已创建"
        );
        Ok(run)
    }

    /// 执行运行直至终态
    ///
    /// # 返回
    /// - Ok(run): 终态运行记录（含 failed）
    /// - Err: 终态本身无法写入
    #[instrument(skip(self, run, listener), fields(run_id = %run.run_id, tenant_id = %run.tenant_id))]
    pub async fn execute_run(
        &self,
        run: ConnectorImportRun,
        listener: Arc<dyn PhaseListener>,
    ) -> ConnectorResult<ConnectorImportRun> {
        let started = Instant::now();
        let request = request_of(&run);
        let writer = StoreWriter::new(
            run.tenant_id.as_str(),
            run.run_id.as_str(),
            self.entity_store.clone(),
            self.run_store.clone(),
            listener,
        );
        let mut tally = RunTally::new();

        let outcome = self.drive(&run, &request, &writer, &mut tally).await;
        let summary = tally.summary(started.elapsed().as_millis() as u64);

        let finished = match outcome {
            Ok(()) => {
                let status = if tally.has_failures() {
                    RunStatus::CompletedWithErrors
                } else {
                    RunStatus::Completed
                };
                self.run_store
                    .finish_run(&run.tenant_id, &run.run_id, status, Some(&summary), &tally.error_log())
                    .await?
            }
            Err(err) => {
                error!(error = %err, "连接器运行中止");
                let code = match &err {
                    ConnectorError::External(_) => ErrorCode::ExternalApiError,
                    _ => ErrorCode::PersistenceError,
                };
                let mut log = tally.error_log();
                log.push(ErrorRow::system(code, err.to_string()));
                self.run_store
                    .finish_run(&run.tenant_id, &run.run_id, RunStatus::Failed, Some(&summary), &log)
                    .await?
            }
        };

        info!(
            status = %finished.status,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            elapsed_ms = summary.elapsed_ms,
            "连接器运行结束"
        );
        self.write_audit(&finished).await;
        Ok(finished)
    }

    /// start_run + execute_run
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        request: &ConnectorRequest,
        listener: Arc<dyn PhaseListener>,
    ) -> ConnectorResult<ConnectorImportRun> {
        let run = self.start_run(ctx, request).await?;
        self.execute_run(run, listener).await
    }

    async fn drive(
        &self,
        run: &ConnectorImportRun,
        request: &ConnectorRequest,
        writer: &StoreWriter,
        tally: &mut RunTally,
    ) -> ConnectorResult<()> {
        let _guard = self
            .locks
            .acquire_many(&run.tenant_id, &LOCKED_ENTITIES)
            .await?;
        let snapshot = self.entity_store.load_snapshot(&run.tenant_id).await?;
        self.walk(request, &snapshot, writer, tally).await?;
        writer.enter_phase(ImportPhase::Finished, &tally.error_log()).await
    }

    /// 试运行与执行共用的遍历
    async fn walk(
        &self,
        request: &ConnectorRequest,
        snapshot: &TenantSnapshot,
        writer: &dyn EntityWriter,
        tally: &mut RunTally,
    ) -> ConnectorResult<()> {
        let options = &request.options;
        let mut index = LocalIndex::from_snapshot(snapshot);

        // ===== 阶段 1: 客户 =====
        writer.enter_phase(ImportPhase::ResolvingClients, &tally.error_log()).await?;
        let workspace = self.remote.get_workspace(&request.remote_workspace_id).await?;
        let projects = self.select_projects(request, tally).await?;
        let teams = if ClientResolver::needs_teams(&options.client_mapping_strategy) {
            self.remote.list_teams(&workspace.id).await?
        } else {
            Vec::new()
        };
        let resolver = ClientResolver::new(&options.client_mapping_strategy, &teams);

        let mut clients: HashMap<String, Result<String, String>> = HashMap::new();
        let mut planned: Vec<(RemoteProject, Result<String, String>)> = Vec::new();
        for project in projects {
            if project.archived && !options.include_archived_projects {
                tally.next_item();
                tally.skip(Bucket::Projects);
                debug!(project = %project.id, "跳过已归档项目");
                continue;
            }
            let client = match resolver.resolve(&project) {
                Ok(name) => {
                    self.ensure_client(&name, request, writer, &mut index, &mut clients, tally)
                        .await?
                }
                Err(reason) => Err(reason),
            };
            planned.push((project, client));
        }

        // ===== 阶段 2: 项目 =====
        writer.enter_phase(ImportPhase::ImportingProjects, &tally.error_log()).await?;
        let mut imported: Vec<(RemoteProject, String)> = Vec::new();
        let mut unmapped: Vec<RemoteProject> = Vec::new();
        for (project, client) in planned {
            let row = tally.next_item();
            let client_id = match client {
                Ok(id) => id,
                Err(reason) => {
                    warn!(project = %project.id, reason = %reason, "项目未关联客户，连同任务跳过");
                    tally.fail(Bucket::Projects, row, &project.id, ErrorCode::UnmappedClient, reason);
                    unmapped.push(project);
                    continue;
                }
            };
            let new_project = NewProject {
                name: project.name.clone(),
                client_id: Some(client_id),
                end_date: project.due_on,
                description: project.notes.clone(),
                external_id: Some(project.id.clone()),
                ..Default::default()
            };
            match writer.upsert_project(&new_project).await {
                Ok((id, outcome)) => {
                    tally.record(Bucket::Projects, outcome);
                    imported.push((project, id));
                }
                Err(err) => {
                    let message = row_or_fatal(err)?;
                    tally.fail(Bucket::Projects, row, &project.id, ErrorCode::PersistenceError, message);
                }
            }
        }

        // ===== 阶段 3: 任务 =====
        writer.enter_phase(ImportPhase::ImportingTasks, &tally.error_log()).await?;
        for (project, project_id) in &imported {
            self.import_tasks(project, project_id, request, writer, &mut index, tally)
                .await?;
        }
        for project in &unmapped {
            self.skip_unmapped_tasks(project, tally).await?;
        }

        // ===== 阶段 4: 用户 =====
        writer.enter_phase(ImportPhase::ImportingUsers, &tally.error_log()).await?;
        let users = match self.remote.list_users(&workspace.id).await {
            Ok(users) => users,
            Err(err) => {
                let err = external_or_fatal(err)?;
                let row = tally.next_item();
                tally.fail(Bucket::Users, row, &workspace.id, ErrorCode::ExternalApiError, err.to_string());
                Vec::new()
            }
        };
        for user in users {
            if index.synced_users.contains(&user.id) {
                continue;
            }
            let row = tally.next_item();
            let Some(email) = remote_email(&user) else {
                tally.skip(Bucket::Users);
                continue;
            };
            if index.user(&user).is_none() && !options.auto_create_users {
                tally.skip(Bucket::Users);
                continue;
            }
            match writer.upsert_user(&new_user(&user, email)).await {
                Ok((id, outcome)) => {
                    tally.record(Bucket::Users, outcome);
                    index.record_user(&user, &id);
                }
                Err(err) => {
                    let message = row_or_fatal(err)?;
                    tally.fail(Bucket::Users, row, &user.id, ErrorCode::PersistenceError, message);
                }
            }
        }
        Ok(())
    }

    /// 拉取远程项目并按请求过滤；请求中不存在的项目 ID 记为错误
    async fn select_projects(
        &self,
        request: &ConnectorRequest,
        tally: &mut RunTally,
    ) -> ConnectorResult<Vec<RemoteProject>> {
        let all = self.remote.list_projects(&request.remote_workspace_id).await?;
        if request.remote_project_ids.is_empty() {
            return Ok(all);
        }

        let mut by_id: HashMap<String, RemoteProject> =
            all.into_iter().map(|p| (p.id.clone(), p)).collect();
        let mut selected = Vec::new();
        for project_id in &request.remote_project_ids {
            match by_id.remove(project_id) {
                Some(project) => selected.push(project),
                None => {
                    let row = tally.next_item();
                    tally.fail(
                        Bucket::Projects,
                        row,
                        project_id,
                        ErrorCode::ExternalApiError,
                        format!("远程项目 {} 不存在", project_id),
                    );
                }
            }
        }
        Ok(selected)
    }

    /// 按名称找本地客户，必要时创建；同名客户只处理一次
    async fn ensure_client(
        &self,
        name: &str,
        request: &ConnectorRequest,
        writer: &dyn EntityWriter,
        index: &mut LocalIndex,
        clients: &mut HashMap<String, Result<String, String>>,
        tally: &mut RunTally,
    ) -> ConnectorResult<Result<String, String>> {
        let key = name.to_lowercase();
        if let Some(resolved) = clients.get(&key) {
            return Ok(resolved.clone());
        }

        let resolved = if let Some(id) = index.clients.get(&key) {
            tally.next_item();
            tally.skip(Bucket::Clients);
            Ok(id.clone())
        } else if request.options.auto_create_clients {
            let row = tally.next_item();
            match writer.create_client(name).await {
                Ok(id) => {
                    tally.record(Bucket::Clients, UpsertOutcome::Created);
                    index.clients.insert(key.clone(), id.clone());
                    info!(client = %name, "已自动创建客户");
                    Ok(id)
                }
                Err(err) => {
                    let message = row_or_fatal(err)?;
                    tally.fail(Bucket::Clients, row, name, ErrorCode::PersistenceError, message);
                    Err(format!("客户 '{}' 创建失败", name))
                }
            }
        } else {
            Err(format!("本地客户 '{}' 不存在且未开启自动创建", name))
        };

        clients.insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn import_tasks(
        &self,
        project: &RemoteProject,
        project_id: &str,
        request: &ConnectorRequest,
        writer: &dyn EntityWriter,
        index: &mut LocalIndex,
        tally: &mut RunTally,
    ) -> ConnectorResult<()> {
        let options = &request.options;
        let (sections, tasks) = futures::join!(
            self.remote.list_sections(&project.id),
            self.remote.list_tasks(&project.id)
        );
        // 分区名作为本地任务状态
        let sections: HashMap<String, String> = match sections {
            Ok(sections) => sections.into_iter().map(|s| (s.id, s.name)).collect(),
            Err(err) => {
                let err = external_or_fatal(err)?;
                warn!(project = %project.id, error = %err, "分区拉取失败，任务状态留空");
                HashMap::new()
            }
        };
        let tasks = match tasks {
            Ok(tasks) => tasks,
            Err(err) => {
                let err = external_or_fatal(err)?;
                let row = tally.next_item();
                tally.fail(Bucket::Tasks, row, &project.id, ErrorCode::ExternalApiError, err.to_string());
                return Ok(());
            }
        };

        for task in tasks {
            let row = tally.next_item();
            if task.completed && !options.include_completed_tasks {
                tally.skip(Bucket::Tasks);
                continue;
            }

            let assignee_id = match &task.assignee {
                None => None,
                Some(user) => match self.resolve_assignee(user, request, writer, index, tally).await? {
                    Assignee::Local(id) => Some(id),
                    Assignee::Unassigned(message) => {
                        tally.warn(row, &task.id, ErrorCode::AssigneeUnassigned, message);
                        None
                    }
                    Assignee::Unresolved(message) => {
                        tally.skip_with(Bucket::Tasks, row, &task.id, ErrorCode::UnresolvedReference, message);
                        continue;
                    }
                },
            };

            let new_task = NewTask {
                project_id: project_id.to_string(),
                title: task.name.clone(),
                assignee_id,
                status: task
                    .section_id
                    .as_ref()
                    .and_then(|s| sections.get(s))
                    .cloned(),
                due_date: task.due_on,
                description: task.notes.clone(),
                completed: task.completed,
                external_id: Some(task.id.clone()),
                ..Default::default()
            };
            match writer.upsert_task(&new_task).await {
                Ok((_, outcome)) => tally.record(Bucket::Tasks, outcome),
                Err(err) => {
                    let message = row_or_fatal(err)?;
                    tally.fail(Bucket::Tasks, row, &task.id, ErrorCode::PersistenceError, message);
                }
            }
        }
        Ok(())
    }

    /// 未关联客户的项目: 任务逐条记为跳过（UNMAPPED_CLIENT）
    async fn skip_unmapped_tasks(
        &self,
        project: &RemoteProject,
        tally: &mut RunTally,
    ) -> ConnectorResult<()> {
        let tasks = match self.remote.list_tasks(&project.id).await {
            Ok(tasks) => tasks,
            Err(err) => {
                let err = external_or_fatal(err)?;
                let row = tally.next_item();
                tally.fail(Bucket::Tasks, row, &project.id, ErrorCode::ExternalApiError, err.to_string());
                return Ok(());
            }
        };
        for task in tasks {
            let row = tally.next_item();
            tally.skip_with(
                Bucket::Tasks,
                row,
                &task.id,
                ErrorCode::UnmappedClient,
                format!("所属项目 {} 未关联客户", project.id),
            );
        }
        Ok(())
    }

    /// 负责人: 本地邮箱匹配 → 自动创建 → 不分配（警告）→ 跳过任务
    async fn resolve_assignee(
        &self,
        user: &RemoteUser,
        request: &ConnectorRequest,
        writer: &dyn EntityWriter,
        index: &mut LocalIndex,
        tally: &mut RunTally,
    ) -> ConnectorResult<Assignee> {
        if let Some(id) = index.user(user) {
            return Ok(Assignee::Local(id.clone()));
        }
        let options = &request.options;
        let email = remote_email(user);

        if let (Some(email), true) = (email, options.auto_create_users) {
            let row = tally.next_item();
            match writer.upsert_user(&new_user(user, email)).await {
                Ok((id, outcome)) => {
                    tally.record(Bucket::Users, outcome);
                    index.record_user(user, &id);
                    return Ok(Assignee::Local(id));
                }
                Err(err) => {
                    let message = row_or_fatal(err)?;
                    tally.fail(Bucket::Users, row, &user.id, ErrorCode::PersistenceError, message);
                }
            }
        }

        let label = email.unwrap_or(user.name.as_str());
        if options.fallback_unassigned {
            Ok(Assignee::Unassigned(format!(
                "负责人 '{}' 在本地不存在，任务不分配",
                label
            )))
        } else {
            Ok(Assignee::Unresolved(format!("负责人 '{}' 在本地不存在", label)))
        }
    }

    /// 审计写入失败只记日志
    async fn write_audit(&self, run: &ConnectorImportRun) {
        let mut event = AuditEvent::new(
            run.tenant_id.as_str(),
            run.actor_user_id.as_str(),
            AuditAction::ConnectorImport,
            run.run_id.as_str(),
        )
        .with_detail(format!(
            "strategy={} status={}",
            run.options.client_mapping_strategy.label(),
            run.status
        ));
        if let Some(summary) = &run.execution_summary {
            event = event.with_summary(summary);
        }
        if let Err(err) = self.audit.record(&event).await {
            warn!(error = %err, "审计事件写入失败");
        }
    }
}

// ==========================================
// ConnectorImport - 单次连接器请求的 试运行/执行
// ==========================================
pub struct ConnectorImport {
    pipeline: Arc<ConnectorPipeline>,
    request: ConnectorRequest,
    run: Option<ConnectorImportRun>,
}

impl ConnectorImport {
    pub fn new(pipeline: Arc<ConnectorPipeline>, request: ConnectorRequest) -> Self {
        Self {
            pipeline,
            request,
            run: None,
        }
    }

    /// 先建运行记录，调用方可在执行前拿到 run_id
    pub async fn start(
        pipeline: Arc<ConnectorPipeline>,
        ctx: &RequestContext,
        request: ConnectorRequest,
    ) -> ConnectorResult<Self> {
        let run = pipeline.start_run(ctx, &request).await?;
        Ok(Self {
            pipeline,
            request,
            run: Some(run),
        })
    }

    pub fn run(&self) -> Option<&ConnectorImportRun> {
        self.run.as_ref()
    }
}

/// failed 终态转为错误，其余取汇总
fn summary_of(run: ConnectorImportRun) -> ConnectorResult<ExecutionSummary> {
    if run.status == RunStatus::Failed {
        let reason = run
            .error_log
            .iter()
            .rev()
            .find(|e| e.row == 0)
            .map(|e| e.message.clone())
            .unwrap_or_default();
        return Err(ConnectorError::RunFailed {
            run_id: run.run_id,
            reason,
        });
    }
    Ok(run.execution_summary.unwrap_or_default())
}

#[async_trait]
impl BatchImport for ConnectorImport {
    type Estimate = DryRunResult;
    type Error = ConnectorError;

    fn subject_id(&self) -> &str {
        self.run.as_ref().map(|r| r.run_id.as_str()).unwrap_or("")
    }

    async fn validate(&self, ctx: &RequestContext) -> ConnectorResult<DryRunResult> {
        self.pipeline.validate(ctx, &self.request).await
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        listener: Arc<dyn PhaseListener>,
    ) -> ConnectorResult<ExecutionSummary> {
        let finished = match &self.run {
            Some(run) => self.pipeline.execute_run(run.clone(), listener).await?,
            None => self.pipeline.execute(ctx, &self.request, listener).await?,
        };
        summary_of(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connector::ConnectorOptions;

    fn remote_user(name: &str, email: Option<&str>) -> RemoteUser {
        RemoteUser {
            id: "ru1".to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn test_new_user_splits_name() {
        let user = new_user(&remote_user("Jane Van Doe", Some("jane@x.io")), "jane@x.io");
        assert_eq!(user.first_name.as_deref(), Some("Jane"));
        assert_eq!(user.last_name.as_deref(), Some("Van Doe"));
        assert_eq!(user.external_id.as_deref(), Some("ru1"));
        assert!(user.active);

        let user = new_user(&remote_user("Cher", None), "cher@x.io");
        assert_eq!(user.first_name.as_deref(), Some("Cher"));
        assert!(user.last_name.is_none());
    }

    #[test]
    fn test_summary_of_failed_run_is_error() {
        let mut run = ConnectorImportRun {
            run_id: "r1".to_string(),
            tenant_id: "t1".to_string(),
            actor_user_id: "u1".to_string(),
            source_workspace_id: "ws".to_string(),
            source_project_ids: Vec::new(),
            target_workspace_id: "local".to_string(),
            options: ConnectorOptions::new(ClientMappingStrategy::Single {
                client_name: "Acme".to_string(),
            }),
            status: RunStatus::Failed,
            phase: ImportPhase::ImportingProjects.as_str().to_string(),
            execution_summary: Some(ExecutionSummary::default()),
            error_log: vec![
                ErrorRow::new(1, "p1", ErrorCode::UnmappedClient, "未映射"),
                ErrorRow::system(ErrorCode::ExternalApiError, "token expired"),
            ],
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };
        match summary_of(run.clone()) {
            Err(ConnectorError::RunFailed { run_id, reason }) => {
                assert_eq!(run_id, "r1");
                assert_eq!(reason, "token expired");
            }
            other => panic!("Expected RunFailed, got {:?}", other),
        }

        run.status = RunStatus::CompletedWithErrors;
        run.execution_summary = Some(ExecutionSummary {
            errors: 1,
            total_rows: 1,
            ..Default::default()
        });
        assert_eq!(summary_of(run).unwrap().errors, 1);
    }

    #[test]
    fn test_remote_email_ignores_blank() {
        assert_eq!(remote_email(&remote_user("A", Some("  "))), None);
        assert_eq!(remote_email(&remote_user("A", Some(" a@b.io "))), Some("a@b.io"));
    }

    #[test]
    fn test_check_request_rejects_blank_strategy_values() {
        let mut request = ConnectorRequest {
            remote_workspace_id: "ws".to_string(),
            remote_project_ids: Vec::new(),
            target_workspace_id: "local".to_string(),
            options: ConnectorOptions::new(ClientMappingStrategy::Single {
                client_name: " ".to_string(),
            }),
        };
        assert!(matches!(check_request(&request), Err(ConnectorError::InvalidOptions(_))));

        request.options.client_mapping_strategy = ClientMappingStrategy::Single {
            client_name: "Acme".to_string(),
        };
        assert!(check_request(&request).is_ok());

        request.remote_workspace_id = String::new();
        assert!(check_request(&request).is_err());
    }
}
