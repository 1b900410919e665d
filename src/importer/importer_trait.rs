// ==========================================
// 多租户导入引擎 - 表格导入 Trait
// ==========================================
// 职责: 定义导入作业生命周期接口（不包含实现）
// 生命周期: create_job → upload → set_mapping → validate → run
// ==========================================

use crate::domain::connector::ImportPhase;
use crate::domain::job::{ColumnMapping, ExecutionSummary, ImportJob, RequestContext, ValidationSummary};
use crate::domain::types::EntityType;
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use std::sync::Arc;

// ==========================================
// Importer Trait
// ==========================================
// 实现者: TabularImporter
// 说明: run 同步等待完成；是否派生后台任务由调用方决定
#[async_trait]
pub trait Importer: Send + Sync {
    /// 创建草稿作业
    async fn create_job(&self, ctx: &RequestContext, entity_type: EntityType) -> ImportResult<ImportJob>;

    /// 上传 CSV 文本
    ///
    /// # 返回
    /// - Ok(ImportJob): 已写入列/行/样本行/建议映射，状态 mapped
    /// - Err(PayloadTooLarge): 超过上传大小上限（解析前检查）
    /// - Err(RowLimitExceeded): 超过行数上限，作业不变
    /// - Err(ParseError): 引号语法错误 / 表头为空或重复
    async fn upload(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        file_name: Option<String>,
        csv_text: &str,
    ) -> ImportResult<ImportJob>;

    /// 上传 XLSX 工作簿（取第一个工作表），约束同 upload
    async fn upload_workbook(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        file_name: Option<String>,
        bytes: &[u8],
    ) -> ImportResult<ImportJob>;

    /// 替换映射；状态回到 mapped，必须重新 validate 才能 run
    async fn set_mapping(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        mapping: Vec<ColumnMapping>,
        auto_create_missing: Option<bool>,
    ) -> ImportResult<ImportJob>;

    /// 试运行（只读）
    async fn validate(&self, ctx: &RequestContext, job_id: &str) -> ImportResult<ValidationSummary>;

    /// 执行导入
    ///
    /// # 前置状态
    /// - validated / completed / completed_with_errors
    /// - running → JobRunning；其他 → ConfigError
    async fn run(
        &self,
        ctx: &RequestContext,
        job_id: &str,
        auto_create_missing: Option<bool>,
    ) -> ImportResult<ExecutionSummary>;

    async fn get_job(&self, ctx: &RequestContext, job_id: &str) -> ImportResult<ImportJob>;

    async fn list_jobs(&self, ctx: &RequestContext) -> ImportResult<Vec<ImportJob>>;
}

// ==========================================
// PhaseListener - 阶段回调
// ==========================================
// 表格导入: committing_rows → finished
// 连接器: resolving_clients → importing_users → importing_projects → importing_tasks → finished
pub trait PhaseListener: Send + Sync {
    fn on_phase(&self, subject_id: &str, phase: ImportPhase);
}

pub struct NoopPhaseListener;

impl PhaseListener for NoopPhaseListener {
    fn on_phase(&self, _subject_id: &str, _phase: ImportPhase) {}
}

// ==========================================
// BatchImport Trait - 试运行 / 执行
// ==========================================
// 实现者: TabularJobImport（单个作业）, ConnectorImport（单次连接器请求）
// 说明: 实现只负责跑完；await 还是 tokio::spawn 由 API 层决定
#[async_trait]
pub trait BatchImport: Send + Sync {
    /// 试运行结果
    type Estimate: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// 作业 ID 或运行 ID（未建运行记录时为空）
    fn subject_id(&self) -> &str;

    /// 只读试运行
    async fn validate(&self, ctx: &RequestContext) -> Result<Self::Estimate, Self::Error>;

    /// 执行并返回汇总；失败的运行返回 Err
    async fn execute(
        &self,
        ctx: &RequestContext,
        listener: Arc<dyn PhaseListener>,
    ) -> Result<ExecutionSummary, Self::Error>;
}
