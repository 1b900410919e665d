// ==========================================
// 多租户导入引擎 - 连接器导入 API
// ==========================================
// 职责: 试运行 / 派生后台执行 / 轮询运行记录
// 说明: execute 立即返回 run_id，执行在 tokio 任务中进行
// ==========================================

use crate::api::dispatch::spawn_execute;
use crate::api::error::{ApiError, ApiResult};
use crate::connector::{ConnectorImport, ConnectorPipeline};
use crate::domain::connector::{ConnectorImportRun, ConnectorRequest, DryRunResult, RunStatus};
use crate::domain::job::RequestContext;
use crate::importer::{BatchImport, NoopPhaseListener, PhaseListener};
use crate::repository::ConnectorRunStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// execute 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub run_id: String,
    pub status: RunStatus,
}

/// 连接器导入API
pub struct ConnectorApi {
    pipeline: Arc<ConnectorPipeline>,
    run_store: Arc<dyn ConnectorRunStore>,
    listener: Arc<dyn PhaseListener>,
}

impl ConnectorApi {
    pub fn new(pipeline: Arc<ConnectorPipeline>, run_store: Arc<dyn ConnectorRunStore>) -> Self {
        Self {
            pipeline,
            run_store,
            listener: Arc::new(NoopPhaseListener),
        }
    }

    /// 替换阶段回调（例如推送给前端）
    pub fn with_listener(mut self, listener: Arc<dyn PhaseListener>) -> Self {
        self.listener = listener;
        self
    }

    pub async fn validate(
        &self,
        ctx: &RequestContext,
        request: &ConnectorRequest,
    ) -> ApiResult<DryRunResult> {
        let unit = ConnectorImport::new(self.pipeline.clone(), request.clone());
        Ok(unit.validate(ctx).await?)
    }

    /// 创建运行记录并在后台执行
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        request: &ConnectorRequest,
    ) -> ApiResult<ExecuteResponse> {
        let unit = ConnectorImport::start(self.pipeline.clone(), ctx, request.clone()).await?;
        let response = ExecuteResponse {
            run_id: unit.subject_id().to_string(),
            status: RunStatus::Running,
        };
        spawn_execute(unit, ctx.clone(), self.listener.clone());

        info!(tenant_id = %ctx.tenant_id, run_id = %response.run_id, "连接器运行已派发");
        Ok(response)
    }

    pub async fn get_run(&self, ctx: &RequestContext, run_id: &str) -> ApiResult<ConnectorImportRun> {
        self.run_store
            .get_run(&ctx.tenant_id, run_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("连接器运行 {} 不存在", run_id)))
    }

    pub async fn list_runs(&self, ctx: &RequestContext) -> ApiResult<Vec<ConnectorImportRun>> {
        Ok(self.run_store.list_runs(&ctx.tenant_id).await?)
    }
}
