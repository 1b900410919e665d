// ==========================================
// 多租户导入引擎 - 命令行入口
// ==========================================
// 用法: tenant-import <租户ID> <实体类型> <文件.csv|文件.xlsx> [--auto-create]
// 流程: 建作业 → 上传 → 采用建议映射 → 试运行 → 执行 → 输出错误报告
// 环境变量: TENANT_IMPORT_DB_PATH / RUST_LOG / LOG_FORMAT
// ==========================================

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tenant_import::app::{get_default_db_path, AppState};
use tenant_import::connector::InMemoryRemoteClient;
use tenant_import::{logging, RequestContext};

const CLI_ACTOR: &str = "cli";

fn usage() -> String {
    format!(
        "{} {}\n用法: tenant-import <租户ID> <实体类型> <文件.csv|文件.xlsx> [--auto-create]",
        tenant_import::APP_NAME,
        tenant_import::VERSION
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    let auto_create = args.iter().any(|a| a == "--auto-create");
    let (tenant_id, entity_type, file_path) = match positional.as_slice() {
        [tenant, entity, file] => (tenant.as_str(), entity.as_str(), file.as_str()),
        _ => {
            eprintln!("{}", usage());
            std::process::exit(2);
        }
    };

    let db_path = get_default_db_path();
    tracing::info!(db_path = %db_path, "使用数据库");
    // 命令行只做表格导入，连接器客户端留空
    let state = AppState::new(db_path, Arc::new(InMemoryRemoteClient::default()))?;
    let api = state.import_api.clone();
    let ctx = RequestContext::new(tenant_id, CLI_ACTOR);

    let job = api.create_job(&ctx, entity_type).await?;
    let file_name = Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string());
    let upload = if file_path.to_lowercase().ends_with(".xlsx") {
        let bytes = tokio::fs::read(file_path).await?;
        api.upload_workbook(&ctx, &job.job_id, file_name, &bytes).await?
    } else {
        let text = tokio::fs::read_to_string(file_path).await?;
        api.upload(&ctx, &job.job_id, file_name, &text).await?
    };
    println!("作业 {}: {} 行, 列 {:?}", job.job_id, upload.row_count, upload.columns);

    let validation = api.validate(&ctx, &job.job_id).await?;
    println!("试运行: {}", serde_json::to_string_pretty(&validation.summary)?);
    if !validation.summary.unmapped_required.is_empty() {
        eprintln!("必填字段未映射: {:?}", validation.summary.unmapped_required);
        std::process::exit(1);
    }

    let result = api
        .run(&ctx, &job.job_id, auto_create.then_some(true))
        .await?;
    println!("执行结果: {}", serde_json::to_string_pretty(&result.summary)?);

    if result.summary.errors > 0 || result.summary.skipped > 0 {
        print!("{}", api.errors_csv(&ctx, &job.job_id).await?);
    }
    Ok(())
}
