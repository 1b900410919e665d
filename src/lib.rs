// ==========================================
// 多租户导入引擎 - 核心库
// ==========================================
// 功能: 表格导入（CSV / XLSX）与外部项目管理系统连接器导入
// 技术栈: Rust + Tokio + SQLite
// 红线: 所有读写按 tenant_id 隔离
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 作业/记录/实体/连接器模型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 解析/映射/校验/执行
pub mod importer;

// 连接器层 - 外部系统导入
pub mod connector;

// 配置层 - 导入限额
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 状态组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use api::{ApiError, ApiResult, ConnectorApi, ImportApi};
pub use app::AppState;
pub use domain::job::{ImportJob, RequestContext};
pub use domain::types::{EntityType, ErrorCode, JobStatus};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "多租户导入引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
