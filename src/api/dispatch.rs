// ==========================================
// 多租户导入引擎 - 后台派发
// ==========================================
// 职责: 在 tokio 任务中执行 BatchImport，结果只进日志
// 说明: 轮询方通过作业/运行记录查看进度与终态
// ==========================================

use crate::domain::job::RequestContext;
use crate::importer::{BatchImport, PhaseListener};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub fn spawn_execute<B>(
    unit: B,
    ctx: RequestContext,
    listener: Arc<dyn PhaseListener>,
) -> JoinHandle<()>
where
    B: BatchImport + 'static,
{
    tokio::spawn(async move {
        match unit.execute(&ctx, listener).await {
            Ok(summary) => info!(
                tenant_id = %ctx.tenant_id,
                subject_id = %unit.subject_id(),
                created = summary.created,
                updated = summary.updated,
                errors = summary.errors,
                "后台执行完成"
            ),
            Err(err) => error!(
                tenant_id = %ctx.tenant_id,
                subject_id = %unit.subject_id(),
                error = %err,
                "后台执行失败"
            ),
        }
    })
}
