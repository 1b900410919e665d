// ==========================================
// 多租户导入引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::{ConfigResult, ImportConfigReader, ImportLimits};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    /// 获取所有 global 配置的快照（JSON格式）
    ///
    /// 用于审计事件中记录执行时生效的限额
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 读取正整数配置，缺失或非法时回退默认值
    fn get_usize_or_default(&self, key: &str, default: usize) -> ConfigResult<usize> {
        let value = self.get_global_config_value(key)?;
        let parsed = value
            .as_deref()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0);

        if value.is_some() && parsed.is_none() {
            tracing::warn!(key, raw = ?value, default, "配置值非法，使用默认值");
        }
        Ok(parsed.unwrap_or(default))
    }
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_max_upload_bytes(&self) -> ConfigResult<usize> {
        self.get_usize_or_default(
            config_keys::MAX_UPLOAD_BYTES,
            ImportLimits::DEFAULT_MAX_UPLOAD_BYTES,
        )
    }

    async fn get_max_rows(&self) -> ConfigResult<usize> {
        self.get_usize_or_default(config_keys::MAX_ROWS, ImportLimits::DEFAULT_MAX_ROWS)
    }

    async fn get_sample_row_count(&self) -> ConfigResult<usize> {
        self.get_usize_or_default(
            config_keys::SAMPLE_ROW_COUNT,
            ImportLimits::DEFAULT_SAMPLE_ROW_COUNT,
        )
    }

    async fn get_preview_cap(&self) -> ConfigResult<usize> {
        self.get_usize_or_default(config_keys::PREVIEW_CAP, ImportLimits::DEFAULT_PREVIEW_CAP)
    }

    async fn get_progress_flush_every(&self) -> ConfigResult<usize> {
        self.get_usize_or_default(
            config_keys::PROGRESS_FLUSH_EVERY,
            ImportLimits::DEFAULT_PROGRESS_FLUSH_EVERY,
        )
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 上传限额
    pub const MAX_UPLOAD_BYTES: &str = "import.max_upload_bytes";
    pub const MAX_ROWS: &str = "import.max_rows";

    // 预览
    pub const SAMPLE_ROW_COUNT: &str = "import.sample_row_count";
    pub const PREVIEW_CAP: &str = "import.preview_cap";

    // 执行
    pub const PROGRESS_FLUSH_EVERY: &str = "import.progress_flush_every";
}
