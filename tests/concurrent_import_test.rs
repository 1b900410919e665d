// ==========================================
// 并发导入集成测试
// ==========================================
// 测试目标: 同一租户的并发执行在执行锁下串行化
// 覆盖: 两个客户作业同时执行只创建一次、自动创建时等待被引用实体的锁、
//       admins 与 users 共用一把锁
// ==========================================


use std::sync::Arc;
use std::time::Duration;

use tenant_import::config::{ImportLimits, StaticImportConfig};
use tenant_import::importer::{ExecutionLocks, Importer, TabularImporter};
use tenant_import::logging;
use tenant_import::repository::{
    AuditLogRepository, EntityStore, SqliteEntityStore, SqliteJobStore,
};
use tenant_import::{EntityType, JobStatus, RequestContext};
use test_helpers::{create_test_db, ctx, shared_connection};

struct Fixture {
    importer: Arc<TabularImporter>,
    entities: Arc<SqliteEntityStore>,
    locks: Arc<ExecutionLocks>,
}

fn fixture(db_path: &str) -> Fixture {
    let conn = shared_connection(db_path).unwrap();
    let entities = Arc::new(SqliteEntityStore::new(conn.clone()));
    let locks = Arc::new(ExecutionLocks::new());
    let importer = Arc::new(TabularImporter::new(
        Arc::new(SqliteJobStore::new(conn.clone())),
        entities.clone(),
        Arc::new(AuditLogRepository::new(conn)),
        Arc::new(StaticImportConfig::new(ImportLimits::default())),
        locks.clone(),
    ));
    Fixture {
        importer,
        entities,
        locks,
    }
}

/// 建作业 → 上传 → 试运行，返回 job_id
async fn validated_job(
    importer: &TabularImporter,
    ctx: &RequestContext,
    entity_type: EntityType,
    csv_text: &str,
) -> String {
    let job = importer.create_job(ctx, entity_type).await.unwrap();
    importer.upload(ctx, &job.job_id, None, csv_text).await.unwrap();
    importer.validate(ctx, &job.job_id).await.unwrap();
    job.job_id
}

// ==========================================
// 测试1: 两个含同一客户的作业同时执行 → 只创建一次
// ==========================================
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_jobs_create_client_once() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let f = fixture(&db_path);
    let ctx = ctx("tenant-a");

    let first = validated_job(&f.importer, &ctx, EntityType::Clients, "companyName\nAcme Corp\n").await;
    let second = validated_job(&f.importer, &ctx, EntityType::Clients, "companyName\nAcme Corp\n").await;

    // 两者试运行时都预计新建
    let (a, b) = tokio::join!(
        f.importer.run(&ctx, &first, None),
        f.importer.run(&ctx, &second, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.created + b.created, 1);
    assert_eq!(a.skipped + b.skipped, 1);
    assert_eq!(a.errors + b.errors, 0);

    let snapshot = f.entities.load_snapshot("tenant-a").await.unwrap();
    assert_eq!(snapshot.clients.len(), 1);
    assert_eq!(snapshot.clients[0].name, "Acme Corp");
}

// ==========================================
// 测试2: 工时自动创建 用户/项目 时等待对应实体的锁
// ==========================================
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_create_waits_for_referent_locks() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let f = fixture(&db_path);
    let ctx = ctx("tenant-a");

    let job_id = validated_job(
        &f.importer,
        &ctx,
        EntityType::TimeEntries,
        "userEmail,date,hours,projectName\nbob@x.io,2025-01-02,2,Apollo\n",
    )
    .await;

    // 模拟另一项目导入与用户导入正在执行
    let held = f
        .locks
        .acquire_many("tenant-a", &[EntityType::Projects, EntityType::Users])
        .await
        .unwrap();

    let runner = {
        let importer = f.importer.clone();
        let ctx = ctx.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { importer.run(&ctx, &job_id, Some(true)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!runner.is_finished());
    let snapshot = f.entities.load_snapshot("tenant-a").await.unwrap();
    assert!(snapshot.projects.is_empty());
    assert!(snapshot.users.is_empty());
    assert!(snapshot.time_entries.is_empty());

    drop(held);
    let summary = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.created, 1);

    let snapshot = f.entities.load_snapshot("tenant-a").await.unwrap();
    assert_eq!(snapshot.projects.len(), 1);
    assert_eq!(snapshot.projects[0].name, "Apollo");
    assert_eq!(snapshot.users.len(), 1);
    assert_eq!(snapshot.time_entries.len(), 1);

    let job = f.importer.get_job(&ctx, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

// ==========================================
// 测试3: 未开启自动创建时不等待被引用实体的锁
// ==========================================
#[tokio::test]
async fn test_without_auto_create_only_own_lock() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let f = fixture(&db_path);
    let ctx = ctx("tenant-a");

    let job_id = validated_job(&f.importer, &ctx, EntityType::Projects, "name\nApollo\n").await;
    let _held = f.locks.acquire("tenant-a", EntityType::Clients).await.unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), f.importer.run(&ctx, &job_id, None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.created, 1);
}

// ==========================================
// 测试4: 管理员导入与用户导入互斥
// ==========================================
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admins_job_waits_for_users_lock() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let f = fixture(&db_path);
    let ctx = ctx("tenant-a");

    let job_id = validated_job(&f.importer, &ctx, EntityType::Admins, "email\nann@x.io\n").await;
    let held = f.locks.acquire("tenant-a", EntityType::Users).await.unwrap();

    let runner = {
        let importer = f.importer.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { importer.run(&ctx, &job_id, None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!runner.is_finished());

    drop(held);
    let summary = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.created, 1);

    let snapshot = f.entities.load_snapshot("tenant-a").await.unwrap();
    assert_eq!(snapshot.users.len(), 1);
    assert_eq!(snapshot.users[0].email, "ann@x.io");
}
