// ==========================================
// 多租户导入引擎 - 导入行强类型模型
// ==========================================
// 用途: 映射/类型转换之后的中间产物
// 原始行 (Vec<String>) → TypedRecord (字段名 → 类型化取值) → ImportRow
// 生命周期: 仅在校验/执行流程内
// ==========================================

use crate::domain::types::EntityType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// FieldValue - 类型化字段值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
}

// ==========================================
// TypedRecord - 已完成类型转换的候选记录
// ==========================================
// 只包含非空值；空值视为缺失
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedRecord {
    values: BTreeMap<String, FieldValue>,
}

impl TypedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn text(&self, field: &str) -> Option<String> {
        match self.values.get(field) {
            Some(FieldValue::Text(v)) => Some(v.clone()),
            Some(FieldValue::Number(n)) => Some(n.to_string()),
            Some(FieldValue::Date(d)) => Some(d.format("%Y-%m-%d").to_string()),
            Some(FieldValue::Bool(b)) => Some(b.to_string()),
            None => None,
        }
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.values.get(field) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        match self.values.get(field) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        match self.values.get(field) {
            Some(FieldValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

// ==========================================
// 各实体的导入行
// ==========================================
// 引用字段保留原始名称/邮箱，由引用解析阶段转换为本地 ID

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRow {
    pub company_name: String,
    pub industry: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub name: String,
    pub client_name: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub title: String,
    pub project_name: String,
    pub assignee_email: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub estimate_hours: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub job_title: Option<String>,
    pub hourly_rate: Option<f64>,
    pub active: Option<bool>,
    /// admins 导入时为 true
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryRow {
    /// 邮箱或姓名
    pub user: String,
    pub date: NaiveDate,
    pub hours: f64,
    pub project_name: Option<String>,
    pub task_title: Option<String>,
    pub description: Option<String>,
    pub billable: Option<bool>,
}

// ==========================================
// ImportRow - 按实体类型区分的导入行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportRow {
    Client(ClientRow),
    Project(ProjectRow),
    Task(TaskRow),
    User(UserRow),
    TimeEntry(TimeEntryRow),
}

impl ImportRow {
    /// 从类型化记录构造；必填字段缺失时返回 None
    pub fn from_typed(entity_type: EntityType, record: &TypedRecord) -> Option<Self> {
        let row = match entity_type {
            EntityType::Clients => ImportRow::Client(ClientRow {
                company_name: record.text("companyName")?,
                industry: record.text("industry"),
                contact_name: record.text("contactName"),
                contact_email: record.text("contactEmail"),
                phone: record.text("phone"),
                website: record.text("website"),
                notes: record.text("notes"),
            }),
            EntityType::Projects => ImportRow::Project(ProjectRow {
                name: record.text("name")?,
                client_name: record.text("clientName"),
                status: record.text("status"),
                start_date: record.date("startDate"),
                end_date: record.date("endDate"),
                budget: record.number("budget"),
                description: record.text("description"),
            }),
            EntityType::Tasks => ImportRow::Task(TaskRow {
                title: record.text("title")?,
                project_name: record.text("projectName")?,
                assignee_email: record.text("assigneeEmail"),
                status: record.text("status"),
                priority: record.text("priority"),
                due_date: record.date("dueDate"),
                estimate_hours: record.number("estimateHours"),
                description: record.text("description"),
            }),
            EntityType::Users | EntityType::Admins => ImportRow::User(UserRow {
                email: record.text("email")?,
                first_name: record.text("firstName"),
                last_name: record.text("lastName"),
                role: record.text("role"),
                job_title: record.text("jobTitle"),
                hourly_rate: record.number("hourlyRate"),
                active: record.bool("active"),
                is_admin: entity_type == EntityType::Admins,
            }),
            EntityType::TimeEntries => ImportRow::TimeEntry(TimeEntryRow {
                user: record.text("userEmail")?,
                date: record.date("date")?,
                hours: record.number("hours")?,
                project_name: record.text("projectName"),
                task_title: record.text("taskTitle"),
                description: record.text("description"),
                billable: record.bool("billable"),
            }),
        };
        Some(row)
    }

    /// 错误报告中的 primaryKey 列
    pub fn primary_key(&self) -> String {
        match self {
            ImportRow::Client(r) => r.company_name.clone(),
            ImportRow::Project(r) => r.name.clone(),
            ImportRow::Task(r) => r.title.clone(),
            ImportRow::User(r) => r.email.clone(),
            ImportRow::TimeEntry(r) => format!("{}@{}", r.user, r.date.format("%Y-%m-%d")),
        }
    }
}
