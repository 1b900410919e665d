// ==========================================
// 表格导入集成测试
// ==========================================
// 测试目标: 上传 → 映射 → 试运行 → 执行 全流程（SQLite 临时库）
// 覆盖: 批内去重、重复执行幂等、行数上限、租户隔离、映射变更后重新校验、
//       单行落库失败不中断、引用自动创建、错误报告 CSV、执行阶段回调
// ==========================================


use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tenant_import::config::{config_keys, ImportLimits, StaticImportConfig};
use tenant_import::connector::InMemoryRemoteClient;
use tenant_import::domain::entity::{
    NewClient, NewProject, NewTask, NewTimeEntry, NewUser, TenantSnapshot, UpsertOutcome,
};
use tenant_import::domain::job::ColumnMapping;
use tenant_import::domain::connector::ImportPhase;
use tenant_import::importer::{
    generate_csv, parse, ExecutionLocks, ImportError, Importer, PhaseListener, TabularImporter,
};
use tenant_import::logging;
use tenant_import::repository::{
    AuditLogRepository, EntityStore, RepositoryError, RepositoryResult, SqliteEntityStore,
    SqliteJobStore,
};
use tenant_import::{ApiError, EntityType, ErrorCode, ImportApi, JobStatus};
use test_helpers::{create_test_db, create_test_state, ctx, shared_connection};

const CLIENTS_CSV: &str = "companyName,industry\nAcme Corp,Tech\nAcme Corp,Tech";

fn empty_remote() -> Arc<InMemoryRemoteClient> {
    Arc::new(InMemoryRemoteClient::default())
}

// ==========================================
// 测试1: 批内重复行 → 1 创建 1 跳过
// ==========================================
#[tokio::test]
async fn test_clients_in_batch_duplicate() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "clients").await.unwrap();
    let upload = api
        .upload(&ctx, &job.job_id, Some("clients.csv".to_string()), CLIENTS_CSV)
        .await
        .unwrap();
    assert_eq!(upload.row_count, 2);
    assert_eq!(upload.columns, vec!["companyName", "industry"]);
    assert_eq!(upload.suggested_mapping[0].target_field.as_deref(), Some("companyName"));
    assert_eq!(upload.suggested_mapping[1].target_field.as_deref(), Some("industry"));

    let validation = api.validate(&ctx, &job.job_id).await.unwrap();
    assert_eq!(validation.summary.would_create, 1);
    assert_eq!(validation.summary.would_skip, 1);
    assert_eq!(validation.summary.would_fail, 0);
    assert!(validation.summary.is_consistent());
    assert_eq!(validation.errors_preview[0].error_code, ErrorCode::Duplicate);
    assert_eq!(validation.errors_preview[0].row, 2);

    let result = api.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(result.summary.created, 1);
    assert_eq!(result.summary.skipped, 1);
    assert_eq!(result.summary.errors, 0);
    assert!(result.summary.is_consistent());
    assert_eq!(result.job.status, JobStatus::Completed);

    let status = api.get_job(&ctx, &job.job_id).await.unwrap();
    assert_eq!(status.progress.processed, 2);
    assert_eq!(status.progress.total, 2);

    // 执行写入审计
    let events = state.audit_log_repo.list_by_tenant("tenant-a", 10).unwrap();
    assert!(events.iter().any(|e| e.subject_id == job.job_id));
}

// ==========================================
// 测试2: 同一作业执行两次，第二次无新建
// ==========================================
#[tokio::test]
async fn test_second_run_is_idempotent() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "clients").await.unwrap();
    api.upload(&ctx, &job.job_id, None, "companyName\nAcme\nBeta\n")
        .await
        .unwrap();
    api.validate(&ctx, &job.job_id).await.unwrap();

    let first = api.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(first.summary.created, 2);

    let revalidated = api.validate(&ctx, &job.job_id).await.unwrap();
    assert_eq!(revalidated.summary.would_create, 0);
    assert_eq!(revalidated.summary.would_skip, 2);

    let second = api.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(second.summary.created, 0);
    assert_eq!(second.summary.skipped, 2);
    assert!(second.summary.is_consistent());

    // 错误行只保留本次执行的结果
    let errors = api.errors_json(&ctx, &job.job_id).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.error_code == ErrorCode::Duplicate));
}

// ==========================================
// 测试3: 超过行数上限，作业不落任何行
// ==========================================
#[tokio::test]
async fn test_row_cap_rejected_before_persist() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    state
        .config_manager
        .set_global_config_value(config_keys::MAX_ROWS, "2")
        .unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "clients").await.unwrap();
    let err = api
        .upload(&ctx, &job.job_id, None, "companyName\nA\nB\nC\n")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let status = api.get_job(&ctx, &job.job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Draft);
    assert_eq!(status.job.row_count, 0);

    // 恰好等于上限可以上传
    let upload = api
        .upload(&ctx, &job.job_id, None, "companyName\nA\nB\n")
        .await
        .unwrap();
    assert_eq!(upload.row_count, 2);
}

// ==========================================
// 测试4: 跨租户访问作业 → Forbidden
// ==========================================
#[tokio::test]
async fn test_tenant_isolation() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();

    let owner = ctx("tenant-a");
    let intruder = ctx("tenant-b");
    let job = api.create_job(&owner, "clients").await.unwrap();
    api.upload(&owner, &job.job_id, None, "companyName\nSecret Co\n")
        .await
        .unwrap();

    let err = api.get_job(&intruder, &job.job_id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert_eq!(err.status_code(), 403);
    assert!(!err.to_string().contains("Secret Co"));

    let err = api.validate(&intruder, &job.job_id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert!(api.list_jobs(&intruder).await.unwrap().is_empty());
}

// ==========================================
// 测试5: 校验后修改映射需重新校验
// ==========================================
#[tokio::test]
async fn test_mapping_change_requires_revalidation() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "clients").await.unwrap();
    api.upload(&ctx, &job.job_id, None, "Company,Sector\nAcme,Tech\n")
        .await
        .unwrap();
    api.validate(&ctx, &job.job_id).await.unwrap();

    let view = api
        .set_mapping(
            &ctx,
            &job.job_id,
            vec![
                ColumnMapping::new("Company", "companyName"),
                ColumnMapping::unmapped("Sector"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Mapped);
    assert!(view.validation_summary.is_none());

    let err = api.run(&ctx, &job.job_id, None).await.unwrap_err();
    assert_eq!(err.status_code(), 422);

    api.validate(&ctx, &job.job_id).await.unwrap();
    let result = api.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(result.summary.created, 1);
}

// ==========================================
// 测试6: 未映射的源列与未知目标字段
// ==========================================
#[tokio::test]
async fn test_set_mapping_rejects_unknown_field() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "clients").await.unwrap();
    let upload = api
        .upload(&ctx, &job.job_id, None, "Company Name,Favourite Color\nAcme,Blue\n")
        .await
        .unwrap();
    assert_eq!(upload.suggested_mapping[0].target_field.as_deref(), Some("companyName"));
    assert_eq!(upload.suggested_mapping[1].target_field, None);

    let err = api
        .set_mapping(
            &ctx,
            &job.job_id,
            vec![ColumnMapping::new("Company Name", "shoeSize")],
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
}

// ==========================================
// 测试7: 引用缺失 → 默认跳过；开启自动创建后执行成功
// ==========================================
#[tokio::test]
async fn test_projects_auto_create_missing_client() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "projects").await.unwrap();
    api.upload(
        &ctx,
        &job.job_id,
        None,
        "Project Name,Client\nWebsite Redesign,Globex\nMobile App,Globex\n",
    )
    .await
    .unwrap();

    let validation = api.validate(&ctx, &job.job_id).await.unwrap();
    assert_eq!(validation.summary.would_skip, 2);
    assert!(validation
        .errors_preview
        .iter()
        .all(|e| e.error_code == ErrorCode::UnresolvedReference));

    let result = api.run(&ctx, &job.job_id, Some(true)).await.unwrap();
    assert_eq!(result.summary.created, 2);
    assert!(result.job.auto_create_missing);

    // 客户只创建一次，并发出自动创建警告
    let errors = api.errors_json(&ctx, &job.job_id).await.unwrap();
    assert!(errors
        .iter()
        .all(|e| e.error_code == ErrorCode::AutoCreateReference));
}

// ==========================================
// 测试8: 错误报告 CSV 可被解析回来
// ==========================================
#[tokio::test]
async fn test_error_report_csv() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let state = create_test_state(&db_path, empty_remote()).unwrap();
    let api = state.import_api.clone();
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "users").await.unwrap();
    api.upload(
        &ctx,
        &job.job_id,
        None,
        "email,firstName\nnot-an-email,\"Doe, Jane\"\nok@example.com,Ok\n",
    )
    .await
    .unwrap();
    api.validate(&ctx, &job.job_id).await.unwrap();
    let result = api.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(result.summary.created, 1);
    assert_eq!(result.summary.errors, 1);
    assert_eq!(result.job.status, JobStatus::CompletedWithErrors);

    let report = api.errors_csv(&ctx, &job.job_id).await.unwrap();
    let table = parse(&report, 100).unwrap();
    assert_eq!(table.headers, vec!["row", "primaryKey", "errorCode", "message"]);
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0][0], "1");
    assert_eq!(table.rows[0][2], "TYPE_COERCION");
}

// ==========================================
// 测试9: 含逗号/引号/换行的值可往返
// ==========================================
#[test]
fn test_csv_round_trip_with_special_values() {
    let headers = vec!["name".to_string(), "notes".to_string()];
    let rows = vec![
        vec!["Acme, Inc.".to_string(), "said \"hi\"".to_string()],
        vec!["Multi".to_string(), "line one\nline two".to_string()],
        vec!["Plain".to_string(), "x".to_string()],
    ];

    let csv = generate_csv(&headers, &rows);
    let table = parse(&csv, 100).unwrap();
    assert_eq!(table.headers, headers);
    assert_eq!(table.rows, rows);
}

// ==========================================
// 测试10: 单行落库失败记为行错误，后续行继续
// ==========================================

/// 对指定客户名插入失败的实体库
struct RejectingEntityStore {
    inner: SqliteEntityStore,
    reject_name: String,
}

#[async_trait]
impl EntityStore for RejectingEntityStore {
    async fn load_snapshot(&self, tenant_id: &str) -> RepositoryResult<TenantSnapshot> {
        self.inner.load_snapshot(tenant_id).await
    }

    async fn insert_client(&self, tenant_id: &str, client: &NewClient) -> RepositoryResult<String> {
        if client.name == self.reject_name {
            return Err(RepositoryError::FieldValueError {
                field: "name".to_string(),
                message: "rejected by store".to_string(),
            });
        }
        self.inner.insert_client(tenant_id, client).await
    }

    async fn insert_project(&self, tenant_id: &str, project: &NewProject) -> RepositoryResult<String> {
        self.inner.insert_project(tenant_id, project).await
    }

    async fn insert_task(&self, tenant_id: &str, task: &NewTask) -> RepositoryResult<String> {
        self.inner.insert_task(tenant_id, task).await
    }

    async fn insert_user(&self, tenant_id: &str, user: &NewUser) -> RepositoryResult<String> {
        self.inner.insert_user(tenant_id, user).await
    }

    async fn insert_time_entry(
        &self,
        tenant_id: &str,
        entry: &NewTimeEntry,
    ) -> RepositoryResult<String> {
        self.inner.insert_time_entry(tenant_id, entry).await
    }

    async fn upsert_project(
        &self,
        tenant_id: &str,
        project: &NewProject,
    ) -> RepositoryResult<(String, UpsertOutcome)> {
        self.inner.upsert_project(tenant_id, project).await
    }

    async fn upsert_task(
        &self,
        tenant_id: &str,
        task: &NewTask,
    ) -> RepositoryResult<(String, UpsertOutcome)> {
        self.inner.upsert_task(tenant_id, task).await
    }

    async fn upsert_user(
        &self,
        tenant_id: &str,
        user: &NewUser,
    ) -> RepositoryResult<(String, UpsertOutcome)> {
        self.inner.upsert_user(tenant_id, user).await
    }
}

#[tokio::test]
async fn test_row_persistence_failure_does_not_abort() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path).unwrap();
    let importer = TabularImporter::new(
        Arc::new(SqliteJobStore::new(conn.clone())),
        Arc::new(RejectingEntityStore {
            inner: SqliteEntityStore::new(conn.clone()),
            reject_name: "Broken".to_string(),
        }),
        Arc::new(AuditLogRepository::new(conn)),
        Arc::new(StaticImportConfig::new(ImportLimits {
            progress_flush_every: 1,
            ..Default::default()
        })),
        Arc::new(ExecutionLocks::new()),
    );
    let ctx = ctx("tenant-a");

    let job = importer.create_job(&ctx, EntityType::Clients).await.unwrap();
    importer
        .upload(&ctx, &job.job_id, None, "companyName\nAlpha\nBroken\nGamma\n")
        .await
        .unwrap();
    importer.validate(&ctx, &job.job_id).await.unwrap();

    let summary = importer.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(summary.errors, 1);
    assert!(summary.is_consistent());

    let job = importer.get_job(&ctx, &job.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.error_rows.len(), 1);
    assert_eq!(job.error_rows[0].row, 2);
    assert_eq!(job.error_rows[0].error_code, ErrorCode::PersistenceError);
}

// ==========================================
// 测试11: 草稿作业不能校验
// ==========================================
#[tokio::test]
async fn test_validate_draft_job_is_rejected() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path).unwrap();
    let importer = TabularImporter::new(
        Arc::new(SqliteJobStore::new(conn.clone())),
        Arc::new(SqliteEntityStore::new(conn.clone())),
        Arc::new(AuditLogRepository::new(conn)),
        Arc::new(StaticImportConfig::new(ImportLimits::default())),
        Arc::new(ExecutionLocks::new()),
    );
    let ctx = ctx("tenant-a");

    let job = importer.create_job(&ctx, EntityType::Tasks).await.unwrap();
    let err = importer.validate(&ctx, &job.job_id).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidJobState { .. }));
}

// ==========================================
// 测试12: API 同步执行时按顺序回调阶段
// ==========================================
#[derive(Default)]
struct PhaseRecorder(Mutex<Vec<(String, ImportPhase)>>);

impl PhaseListener for PhaseRecorder {
    fn on_phase(&self, subject_id: &str, phase: ImportPhase) {
        if let Ok(mut phases) = self.0.lock() {
            phases.push((subject_id.to_string(), phase));
        }
    }
}

#[tokio::test]
async fn test_run_reports_phases_to_listener() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path).unwrap();
    let importer = TabularImporter::new(
        Arc::new(SqliteJobStore::new(conn.clone())),
        Arc::new(SqliteEntityStore::new(conn.clone())),
        Arc::new(AuditLogRepository::new(conn)),
        Arc::new(StaticImportConfig::new(ImportLimits::default())),
        Arc::new(ExecutionLocks::new()),
    );
    let recorder = Arc::new(PhaseRecorder::default());
    let api = ImportApi::new(Arc::new(importer)).with_listener(recorder.clone());
    let ctx = ctx("tenant-a");

    let job = api.create_job(&ctx, "clients").await.unwrap();
    api.upload(&ctx, &job.job_id, None, "companyName\nAcme\n")
        .await
        .unwrap();
    api.validate(&ctx, &job.job_id).await.unwrap();
    // 校验不触发阶段回调
    assert!(recorder.0.lock().unwrap().is_empty());

    let result = api.run(&ctx, &job.job_id, None).await.unwrap();
    assert_eq!(result.summary.created, 1);
    assert_eq!(
        recorder.0.lock().unwrap().clone(),
        vec![
            (job.job_id.clone(), ImportPhase::CommittingRows),
            (job.job_id.clone(), ImportPhase::Finished),
        ]
    );
}
