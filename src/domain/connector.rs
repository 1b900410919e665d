// ==========================================
// 多租户导入引擎 - 连接器导入领域模型
// ==========================================
// 职责: 外部系统层级数据 / 客户关联策略 / 运行记录
// 层级: workspace → projects → sections/tasks → assignees
// ==========================================

use crate::domain::job::{ErrorRow, ExecutionSummary};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ==========================================
// 外部系统数据
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWorkspace {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTeam {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProject {
    pub id: String,
    pub name: String,
    pub team_id: Option<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
    #[serde(default)]
    pub archived: bool,
    pub notes: Option<String>,
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSection {
    pub id: String,
    pub project_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTask {
    pub id: String,
    pub project_id: String,
    pub section_id: Option<String>,
    pub name: String,
    pub notes: Option<String>,
    pub assignee: Option<RemoteUser>,
    #[serde(default)]
    pub completed: bool,
    pub due_on: Option<NaiveDate>,
}

// ==========================================
// ClientMappingStrategy - 客户关联策略
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMappingStrategy {
    /// 所有远程项目归属同一本地客户
    Single { client_name: String },
    /// 按远程团队归属；未在映射表中的团队使用团队名
    Team {
        #[serde(default)]
        team_clients: HashMap<String, String>,
    },
    /// 显式 项目ID → 客户名 映射；缺失即 UNMAPPED_CLIENT
    PerProject {
        #[serde(default)]
        project_clients: HashMap<String, String>,
    },
    /// 取远程自定义字段值作为客户名
    CustomField { field_name: String },
}

impl ClientMappingStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ClientMappingStrategy::Single { .. } => "single",
            ClientMappingStrategy::Team { .. } => "team",
            ClientMappingStrategy::PerProject { .. } => "per_project",
            ClientMappingStrategy::CustomField { .. } => "custom_field",
        }
    }
}

fn default_true() -> bool {
    true
}

// ==========================================
// ConnectorOptions - 连接器导入选项
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorOptions {
    pub client_mapping_strategy: ClientMappingStrategy,
    /// 本地不存在的客户是否自动创建
    #[serde(default = "default_true")]
    pub auto_create_clients: bool,
    #[serde(default)]
    pub auto_create_users: bool,
    #[serde(default)]
    pub fallback_unassigned: bool,
    #[serde(default)]
    pub include_completed_tasks: bool,
    #[serde(default)]
    pub include_archived_projects: bool,
}

impl ConnectorOptions {
    pub fn new(strategy: ClientMappingStrategy) -> Self {
        Self {
            client_mapping_strategy: strategy,
            auto_create_clients: true,
            auto_create_users: false,
            fallback_unassigned: false,
            include_completed_tasks: false,
            include_archived_projects: false,
        }
    }
}

// ==========================================
// ConnectorRequest - validate/execute 请求体
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorRequest {
    pub remote_workspace_id: String,
    pub remote_project_ids: Vec<String>,
    pub target_workspace_id: String,
    pub options: ConnectorOptions,
}

// ==========================================
// ImportPhase - 执行阶段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Starting,
    ResolvingClients,
    ImportingProjects,
    ImportingTasks,
    ImportingUsers,
    /// 表格导入的逐行提交阶段
    CommittingRows,
    Finished,
}

impl ImportPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Starting => "starting",
            ImportPhase::ResolvingClients => "resolving_clients",
            ImportPhase::ImportingProjects => "importing_projects",
            ImportPhase::ImportingTasks => "importing_tasks",
            ImportPhase::ImportingUsers => "importing_users",
            ImportPhase::CommittingRows => "committing_rows",
            ImportPhase::Finished => "finished",
        }
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// RunStatus - 运行状态
// ==========================================
// running → completed / completed_with_errors / failed（终态不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "completed_with_errors" => Ok(RunStatus::CompletedWithErrors),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("未知的运行状态: {}", other)),
        }
    }
}

// ==========================================
// ConnectorImportRun - 持久化运行记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorImportRun {
    pub run_id: String,
    pub tenant_id: String,
    pub actor_user_id: String,
    pub source_workspace_id: String,
    pub source_project_ids: Vec<String>,
    pub target_workspace_id: String,
    pub options: ConnectorOptions,
    pub status: RunStatus,
    pub phase: String,
    pub execution_summary: Option<ExecutionSummary>,
    pub error_log: Vec<ErrorRow>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ==========================================
// 试运行结果
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEstimate {
    pub would_create: usize,
    pub would_update: usize,
    pub would_skip: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub clients: EntityEstimate,
    pub projects: EntityEstimate,
    pub tasks: EntityEstimate,
    pub users: EntityEstimate,
    pub errors: Vec<ErrorRow>,
    pub warnings: Vec<ErrorRow>,
}
