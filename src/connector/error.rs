// ==========================================
// 多租户导入引擎 - 连接器错误类型
// ==========================================
// 工具: thiserror 派生宏
// 规则: 仅 auth 类外部错误对整个运行致命；其余按项目/任务记行级错误
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 外部 API 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    Auth,
    RateLimited,
    Network,
    NotFound,
    InvalidResponse,
}

impl ExternalErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalErrorKind::Auth => "auth",
            ExternalErrorKind::RateLimited => "rate_limited",
            ExternalErrorKind::Network => "network",
            ExternalErrorKind::NotFound => "not_found",
            ExternalErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("外部 API 错误 [{kind}]: {message}")]
pub struct ExternalApiError {
    pub kind: ExternalErrorKind,
    pub message: String,
}

impl ExternalApiError {
    pub fn new(kind: ExternalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ExternalErrorKind::Auth, message)
    }

    /// 凭证失效后续调用必然失败
    pub fn is_fatal(&self) -> bool {
        self.kind == ExternalErrorKind::Auth
    }
}

/// 连接器错误类型
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error(transparent)]
    External(#[from] ExternalApiError),

    #[error("仓储错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("连接器配置错误: {0}")]
    InvalidOptions(String),

    #[error("执行锁获取失败: {0}")]
    Lock(String),

    /// 运行已落为 failed 终态
    #[error("连接器运行 {run_id} 失败: {reason}")]
    RunFailed { run_id: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ImportError> for ConnectorError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Repository(e) => ConnectorError::Repository(e),
            ImportError::InternalError(msg) => ConnectorError::Lock(msg),
            other => ConnectorError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auth_is_fatal() {
        assert!(ExternalApiError::auth("token expired").is_fatal());
        for kind in [
            ExternalErrorKind::RateLimited,
            ExternalErrorKind::Network,
            ExternalErrorKind::NotFound,
            ExternalErrorKind::InvalidResponse,
        ] {
            assert!(!ExternalApiError::new(kind, "x").is_fatal());
        }
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&ExternalErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }
}
