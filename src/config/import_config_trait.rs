// ==========================================
// 多租户导入引擎 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入流程所需的限额/预览配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ImportLimits - 一次性读取的限额快照
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLimits {
    pub max_upload_bytes: usize,
    pub max_rows: usize,
    pub sample_row_count: usize,
    pub preview_cap: usize,
    pub progress_flush_every: usize,
}

impl ImportLimits {
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;
    pub const DEFAULT_MAX_ROWS: usize = 50_000;
    pub const DEFAULT_SAMPLE_ROW_COUNT: usize = 10;
    pub const DEFAULT_PREVIEW_CAP: usize = 50;
    pub const DEFAULT_PROGRESS_FLUSH_EVERY: usize = 100;
}

impl Default for ImportLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: Self::DEFAULT_MAX_UPLOAD_BYTES,
            max_rows: Self::DEFAULT_MAX_ROWS,
            sample_row_count: Self::DEFAULT_SAMPLE_ROW_COUNT,
            preview_cap: Self::DEFAULT_PREVIEW_CAP,
            progress_flush_every: Self::DEFAULT_PROGRESS_FLUSH_EVERY,
        }
    }
}

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（config_kv 表）、StaticImportConfig（固定值）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 上传文本最大字节数（解析前检查）
    ///
    /// # 默认值
    /// - 200 MiB
    async fn get_max_upload_bytes(&self) -> ConfigResult<usize>;

    /// 单个作业最大数据行数
    ///
    /// # 默认值
    /// - 50000
    async fn get_max_rows(&self) -> ConfigResult<usize>;

    /// 上传响应中的预览行数
    ///
    /// # 默认值
    /// - 10
    async fn get_sample_row_count(&self) -> ConfigResult<usize>;

    /// 校验结果中错误/警告预览的截断条数
    ///
    /// # 默认值
    /// - 50
    async fn get_preview_cap(&self) -> ConfigResult<usize>;

    /// 执行期间每处理 N 行回写一次进度
    ///
    /// # 默认值
    /// - 100
    async fn get_progress_flush_every(&self) -> ConfigResult<usize>;

    /// 读取全部限额
    async fn load_limits(&self) -> ConfigResult<ImportLimits> {
        Ok(ImportLimits {
            max_upload_bytes: self.get_max_upload_bytes().await?,
            max_rows: self.get_max_rows().await?,
            sample_row_count: self.get_sample_row_count().await?,
            preview_cap: self.get_preview_cap().await?,
            progress_flush_every: self.get_progress_flush_every().await?,
        })
    }
}

// ==========================================
// StaticImportConfig - 固定配置（测试/CLI）
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct StaticImportConfig {
    pub limits: ImportLimits,
}

impl StaticImportConfig {
    pub fn new(limits: ImportLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl ImportConfigReader for StaticImportConfig {
    async fn get_max_upload_bytes(&self) -> ConfigResult<usize> {
        Ok(self.limits.max_upload_bytes)
    }

    async fn get_max_rows(&self) -> ConfigResult<usize> {
        Ok(self.limits.max_rows)
    }

    async fn get_sample_row_count(&self) -> ConfigResult<usize> {
        Ok(self.limits.sample_row_count)
    }

    async fn get_preview_cap(&self) -> ConfigResult<usize> {
        Ok(self.limits.preview_cap)
    }

    async fn get_progress_flush_every(&self) -> ConfigResult<usize> {
        Ok(self.limits.progress_flush_every)
    }
}
