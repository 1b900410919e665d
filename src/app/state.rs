// ==========================================
// 多租户导入引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 说明: 单个 SQLite 连接在各仓储间共享；执行锁全局唯一
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{ConnectorApi, ImportApi};
use crate::config::{ConfigManager, ImportConfigReader};
use crate::connector::{ConnectorPipeline, RemoteClient};
use crate::db::{init_schema, open_sqlite_connection};
use crate::importer::{ExecutionLocks, Importer, TabularImporter};
use crate::repository::{
    AuditLogRepository, AuditSink, ConnectorRunRepository, ConnectorRunStore, EntityStore,
    JobStore, SqliteEntityStore, SqliteJobStore,
};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 表格导入API
    pub import_api: Arc<ImportApi>,

    /// 连接器导入API
    pub connector_api: Arc<ConnectorApi>,

    /// 配置管理器（读写 config_kv）
    pub config_manager: Arc<ConfigManager>,

    /// 审计日志仓储（用于查询）
    pub audit_log_repo: Arc<AuditLogRepository>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    /// - remote: 外部系统客户端
    ///
    /// # 返回
    /// - Err(String): 数据库无法打开或建表失败
    pub fn new(db_path: String, remote: Arc<dyn RemoteClient>) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        let mut state = Self::from_connection(conn, remote)?;
        state.db_path = db_path;
        Ok(state)
    }

    /// 从已打开的连接创建（测试使用内存库）
    pub fn from_connection(conn: Connection, remote: Arc<dyn RemoteClient>) -> Result<Self, String> {
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(conn.clone()));
        let entity_store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::new(conn.clone()));
        let run_store: Arc<dyn ConnectorRunStore> = Arc::new(ConnectorRunRepository::new(conn.clone()));
        let audit_log_repo = Arc::new(AuditLogRepository::new(conn.clone()));
        let audit: Arc<dyn AuditSink> = audit_log_repo.clone();

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config: Arc<dyn ImportConfigReader> = config_manager.clone();

        // ==========================================
        // 初始化导入层
        // ==========================================
        let locks = Arc::new(ExecutionLocks::new());
        let importer: Arc<dyn Importer> = Arc::new(TabularImporter::new(
            job_store,
            entity_store.clone(),
            audit.clone(),
            config,
            locks.clone(),
        ));
        let pipeline = Arc::new(ConnectorPipeline::new(
            remote,
            entity_store,
            run_store.clone(),
            audit,
            locks,
        ));

        // ==========================================
        // 创建API实例
        // ==========================================
        let import_api = Arc::new(ImportApi::new(importer));
        let connector_api = Arc::new(ConnectorApi::new(pipeline, run_store));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path: ":memory:".to_string(),
            import_api,
            connector_api,
            config_manager,
            audit_log_repo,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先读取 TENANT_IMPORT_DB_PATH；否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("TENANT_IMPORT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./tenant_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("tenant-import");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("tenant_import.db");
        }
    }

    path.to_string_lossy().to_string()
}
