// ==========================================
// 多租户导入引擎 - 目标实体模型
// ==========================================
// 职责: 实体库的读模型（查找表）与写模型（新建实体）
// 说明: 实体库本身是外部协作者，这里只定义导入需要的最小字段
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// 读模型 - 用于引用解析与去重
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub client_id: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub external_id: Option<String>,
}

impl UserRecord {
    /// "名 姓"，两者皆空时返回 None
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryRecord {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub date: NaiveDate,
    pub hours: f64,
    pub description: Option<String>,
}

/// 租户实体快照（校验/执行前一次性加载的查找表）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub clients: Vec<ClientRecord>,
    pub projects: Vec<ProjectRecord>,
    pub tasks: Vec<TaskRecord>,
    pub users: Vec<UserRecord>,
    pub time_entries: Vec<TimeEntryRecord>,
}

// ==========================================
// 写模型 - 新建实体
// ==========================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub industry: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
}

impl NewClient {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub client_id: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub description: Option<String>,
    /// 外部系统 ID（连接器导入时用于 upsert）
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub project_id: String,
    pub title: String,
    pub assignee_id: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub estimate_hours: Option<f64>,
    pub description: Option<String>,
    pub completed: bool,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub job_title: Option<String>,
    pub hourly_rate: Option<f64>,
    pub active: bool,
    pub is_admin: bool,
    pub external_id: Option<String>,
}

impl NewUser {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            active: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTimeEntry {
    pub user_id: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub date: NaiveDate,
    pub hours: f64,
    pub description: Option<String>,
    pub billable: bool,
}

/// upsert 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}
