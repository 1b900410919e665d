// ==========================================
// 多租户导入引擎 - 领域类型定义
// ==========================================
// 职责: 实体类型 / 作业状态 / 错误码 / 字段值类型
// 序列化格式与前端契约保持一致
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 实体类型 (Entity Type)
// ==========================================
// 封闭枚举: 导入只支持这些目标实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Clients,
    Projects,
    Tasks,
    Users,
    Admins,
    TimeEntries,
}

impl EntityType {
    /// 全部实体类型（顺序即加锁顺序）
    pub const ALL: [EntityType; 6] = [
        EntityType::Clients,
        EntityType::Projects,
        EntityType::Tasks,
        EntityType::Users,
        EntityType::Admins,
        EntityType::TimeEntries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Clients => "clients",
            EntityType::Projects => "projects",
            EntityType::Tasks => "tasks",
            EntityType::Users => "users",
            EntityType::Admins => "admins",
            EntityType::TimeEntries => "time-entries",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clients" => Ok(EntityType::Clients),
            "projects" => Ok(EntityType::Projects),
            "tasks" => Ok(EntityType::Tasks),
            "users" => Ok(EntityType::Users),
            "admins" => Ok(EntityType::Admins),
            "time-entries" | "time_entries" | "timeentries" => Ok(EntityType::TimeEntries),
            other => Err(format!("未知的实体类型: {}", other)),
        }
    }
}

// ==========================================
// 导入作业状态 (Job Status)
// ==========================================
// draft → mapped → validated → running → completed / completed_with_errors / failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Mapped,
    Validated,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Mapped => "mapped",
            JobStatus::Validated => "validated",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    /// 是否允许执行 run
    ///
    /// 已完成的作业允许再次执行（第二次执行因去重全部跳过）
    pub fn can_run(&self) -> bool {
        matches!(
            self,
            JobStatus::Validated | JobStatus::Completed | JobStatus::CompletedWithErrors
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(JobStatus::Draft),
            "mapped" => Ok(JobStatus::Mapped),
            "validated" => Ok(JobStatus::Validated),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("未知的作业状态: {}", other)),
        }
    }
}

// ==========================================
// 错误码 (Error Code)
// ==========================================
// 行级错误与警告共用，CSV 报告原样导出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    ConfigError,
    TypeCoercion,
    MissingRequired,
    UnresolvedReference,
    Duplicate,
    PersistenceError,
    UnmappedClient,
    ExternalApiError,
    // ===== 警告 =====
    ValueOutOfRange,
    AutoCreateReference,
    AssigneeUnassigned,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::TypeCoercion => "TYPE_COERCION",
            ErrorCode::MissingRequired => "MISSING_REQUIRED",
            ErrorCode::UnresolvedReference => "UNRESOLVED_REFERENCE",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::PersistenceError => "PERSISTENCE_ERROR",
            ErrorCode::UnmappedClient => "UNMAPPED_CLIENT",
            ErrorCode::ExternalApiError => "EXTERNAL_API_ERROR",
            ErrorCode::ValueOutOfRange => "VALUE_OUT_OF_RANGE",
            ErrorCode::AutoCreateReference => "AUTO_CREATE_REFERENCE",
            ErrorCode::AssigneeUnassigned => "ASSIGNEE_UNASSIGNED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s.trim().trim_matches('"') {
            "PARSE_ERROR" => ErrorCode::ParseError,
            "CONFIG_ERROR" => ErrorCode::ConfigError,
            "TYPE_COERCION" => ErrorCode::TypeCoercion,
            "MISSING_REQUIRED" => ErrorCode::MissingRequired,
            "UNRESOLVED_REFERENCE" => ErrorCode::UnresolvedReference,
            "DUPLICATE" => ErrorCode::Duplicate,
            "PERSISTENCE_ERROR" => ErrorCode::PersistenceError,
            "UNMAPPED_CLIENT" => ErrorCode::UnmappedClient,
            "EXTERNAL_API_ERROR" => ErrorCode::ExternalApiError,
            "VALUE_OUT_OF_RANGE" => ErrorCode::ValueOutOfRange,
            "AUTO_CREATE_REFERENCE" => ErrorCode::AutoCreateReference,
            "ASSIGNEE_UNASSIGNED" => ErrorCode::AssigneeUnassigned,
            other => return Err(format!("未知的错误码: {}", other)),
        };
        Ok(code)
    }
}

// ==========================================
// 字段值类型 (Value Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Date,
    Bool,
    Email, // 字符串 + 语法校验
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Number => write!(f, "number"),
            ValueType::Date => write!(f, "date"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Email => write!(f, "email"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse_accepts_both_spellings() {
        assert_eq!("time-entries".parse::<EntityType>(), Ok(EntityType::TimeEntries));
        assert_eq!("time_entries".parse::<EntityType>(), Ok(EntityType::TimeEntries));
        assert_eq!(" Clients ".parse::<EntityType>(), Ok(EntityType::Clients));
        assert!("invoices".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde_kebab_case() {
        let json = serde_json::to_string(&EntityType::TimeEntries).unwrap();
        assert_eq!(json, "\"time-entries\"");
    }

    #[test]
    fn test_job_status_can_run() {
        assert!(!JobStatus::Draft.can_run());
        assert!(!JobStatus::Mapped.can_run());
        assert!(JobStatus::Validated.can_run());
        assert!(!JobStatus::Running.can_run());
        assert!(JobStatus::Completed.can_run());
    }

    #[test]
    fn test_error_code_string_roundtrip() {
        for code in [
            ErrorCode::TypeCoercion,
            ErrorCode::MissingRequired,
            ErrorCode::UnmappedClient,
            ErrorCode::AssigneeUnassigned,
        ] {
            assert_eq!(code.as_str().parse::<ErrorCode>(), Ok(code));
            assert_eq!(
                serde_json::to_string(&code).unwrap(),
                format!("\"{}\"", code.as_str())
            );
        }
    }
}
