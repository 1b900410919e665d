// ==========================================
// 多租户导入引擎 - 应用层
// ==========================================
// 职责: 组装仓储、引擎与 API，供宿主服务持有
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
