// ==========================================
// 多租户导入引擎 - 审计事件领域模型
// ==========================================
// 红线: 每次执行只记录一条聚合事件，不逐行记录
// 对齐: audit_log 表
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// AuditAction - 审计动作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    TabularImport,  // 表格导入执行
    ConnectorImport, // 连接器导入执行
}

impl AuditAction {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TabularImport => "TabularImport",
            AuditAction::ConnectorImport => "ConnectorImport",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TabularImport" => Some(AuditAction::TabularImport),
            "ConnectorImport" => Some(AuditAction::ConnectorImport),
            _ => None,
        }
    }
}

// ==========================================
// AuditEvent - 审计事件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub actor: String,
    pub action: String,
    pub event_ts: NaiveDateTime,
    /// 作业 ID 或运行 ID
    pub subject_id: String,
    pub entity_type: Option<String>,
    /// 聚合计数 (JSON)
    pub summary_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl AuditEvent {
    /// 创建新的审计事件
    pub fn new(
        tenant_id: impl Into<String>,
        actor: impl Into<String>,
        action: AuditAction,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            actor: actor.into(),
            action: action.as_str().to_string(),
            event_ts: chrono::Utc::now().naive_utc(),
            subject_id: subject_id.into(),
            entity_type: None,
            summary_json: None,
            detail: None,
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// 设置聚合汇总 (转换为JSON)
    pub fn with_summary<T: Serialize>(mut self, summary: &T) -> Self {
        self.summary_json = serde_json::to_value(summary).ok();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
