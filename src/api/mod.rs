// ==========================================
// 多租户导入引擎 - API 层
// ==========================================
// 职责: 提供请求/响应形状的业务接口，供宿主传输层调用
// ==========================================

pub mod connector_api;
pub mod dispatch;
pub mod error;
pub mod import_api;

// 重导出核心类型
pub use connector_api::{ConnectorApi, ExecuteResponse};
pub use dispatch::spawn_execute;
pub use error::{ApiError, ApiResult};
pub use import_api::{
    ImportApi, JobStatusResponse, JobView, RunResponse, UploadResponse, ValidateResponse,
};
