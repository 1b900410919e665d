// ==========================================
// 多租户导入引擎 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 这里只放“流程级”错误（中止上传/校验/执行步骤）；
//       行级问题记录为 ErrorRow，不走 Result
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 输入错误（上传步骤致命） =====
    #[error("解析失败 (行 {line}): {message}")]
    ParseError { line: usize, message: String },

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("行数超限: 超过 {max_rows} 行")]
    RowLimitExceeded { max_rows: usize },

    #[error("上传内容过大: {size} 字节，上限 {max} 字节")]
    PayloadTooLarge { size: usize, max: usize },

    // ===== 配置错误（校验/执行步骤致命） =====
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("作业状态不允许 {action}: 当前状态 {status}")]
    InvalidJobState { status: String, action: String },

    #[error("作业正在执行: {0}")]
    JobRunning(String),

    #[error("导入作业不存在: {0}")]
    JobNotFound(String),

    // ===== 依赖错误 =====
    #[error("仓储错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("配置读取失败: {0}")]
    ConfigReadError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    pub fn config(message: impl Into<String>) -> Self {
        ImportError::ConfigError(message.into())
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        ImportError::ParseError {
            line,
            message: message.into(),
        }
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        let line = err
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(0);
        ImportError::ParseError {
            line,
            message: err.to_string(),
        }
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
