// ==========================================
// 多租户导入引擎 - API 层错误类型
// ==========================================
// 职责: 把导入/仓储/连接器错误转换为面向调用方的错误与状态码
// 状态码: 400 / 403 / 404 / 409 / 413 / 422 / 500 / 502
// ==========================================

use crate::connector::error::ConnectorError;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 请求错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("上传内容过大: {0}")]
    PayloadTooLarge(String),

    /// 映射/状态不满足执行条件
    #[error("无法处理: {0}")]
    Unprocessable(String),

    // ==========================================
    // 访问与并发
    // ==========================================
    #[error("禁止访问: {0}")]
    Forbidden(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("冲突: {0}")]
    Conflict(String),

    // ==========================================
    // 依赖错误
    // ==========================================
    #[error("外部系统错误: {0}")]
    ExternalApi(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 对应的 HTTP 状态码（由宿主传输层使用）
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidInput(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::Unprocessable(_) => 422,
            ApiError::ExternalApi(_) => 502,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) | ApiError::Other(_) => 500,
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Forbidden { .. } => ApiError::Forbidden(err.to_string()),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::VersionConflict { .. } => ApiError::Conflict(err.to_string()),
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::Unprocessable(format!("无效的状态转换: from={} to={}", from, to))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::ParseError { .. }
            | ImportError::ExcelParseError(_)
            | ImportError::RowLimitExceeded { .. } => ApiError::InvalidInput(err.to_string()),
            ImportError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            ImportError::ConfigError(_) | ImportError::InvalidJobState { .. } => {
                ApiError::Unprocessable(err.to_string())
            }
            ImportError::JobRunning(_) => ApiError::Conflict(err.to_string()),
            ImportError::JobNotFound(id) => ApiError::NotFound(format!("导入作业 {} 不存在", id)),
            ImportError::Repository(repo) => repo.into(),
            ImportError::ConfigReadError(msg) | ImportError::InternalError(msg) => {
                ApiError::InternalError(msg)
            }
            ImportError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 ConnectorError 转换
// ==========================================
impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::External(ext) => ApiError::ExternalApi(ext.to_string()),
            ConnectorError::Repository(repo) => repo.into(),
            ConnectorError::InvalidOptions(msg) => ApiError::InvalidInput(msg),
            ConnectorError::Lock(msg) => ApiError::InternalError(msg),
            err @ ConnectorError::RunFailed { .. } => ApiError::InternalError(err.to_string()),
            ConnectorError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
