// ==========================================
// 多租户导入引擎 - 校验引擎（试运行）
// ==========================================
// 职责: 对作业全部行做只读分类，生成 ValidationSummary
// 红线: 不写实体库；可与其他租户作业并发
// ==========================================

use crate::config::ImportLimits;
use crate::domain::job::{ErrorRow, ImportJob, ValidationSummary};
use crate::importer::error::ImportResult;
use crate::importer::field_catalog::fields_for;
use crate::importer::field_mapper::{unmapped_required, PreparedMapping};
use crate::importer::row_classifier::{RowClassifier, RowOutcome};
use crate::repository::EntityStore;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 试运行结果: 汇总 + 完整错误/警告行
#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub summary: ValidationSummary,
    /// 按行号排列的全部错误与警告
    pub error_rows: Vec<ErrorRow>,
}

pub struct ValidationEngine {
    entity_store: Arc<dyn EntityStore>,
}

impl ValidationEngine {
    pub fn new(entity_store: Arc<dyn EntityStore>) -> Self {
        Self { entity_store }
    }

    #[instrument(skip(self, job, limits), fields(job_id = %job.job_id, entity_type = %job.entity_type))]
    pub async fn validate_job(
        &self,
        job: &ImportJob,
        limits: &ImportLimits,
    ) -> ImportResult<ValidationOutput> {
        let mapping = PreparedMapping::prepare(job.entity_type, &job.columns, &job.mapping)?;
        let unmapped = unmapped_required(&job.mapping, fields_for(job.entity_type));

        let snapshot = self.entity_store.load_snapshot(&job.tenant_id).await?;
        debug!(
            clients = snapshot.clients.len(),
            projects = snapshot.projects.len(),
            users = snapshot.users.len(),
            "查找表已加载"
        );

        let mut classifier = RowClassifier::new(&mapping, &snapshot, job.auto_create_missing);
        let mut summary = ValidationSummary {
            total_rows: job.total_rows(),
            unmapped_required: unmapped,
            ..Default::default()
        };
        let mut error_rows = Vec::new();

        for (idx, row) in job.raw_rows.iter().enumerate() {
            let row_no = idx + 1;
            let classified = classifier.classify(row_no, row);
            match &classified.outcome {
                RowOutcome::Create(plan) => {
                    summary.would_create += 1;
                    classifier.accept_planned(row_no, plan);
                }
                RowOutcome::Skip(error) => {
                    summary.would_skip += 1;
                    summary.error_count += 1;
                    error_rows.push(error.clone());
                    if summary.errors.len() < limits.preview_cap {
                        summary.errors.push(error.clone());
                    }
                }
                RowOutcome::Fail(error) => {
                    summary.would_fail += 1;
                    summary.error_count += 1;
                    error_rows.push(error.clone());
                    if summary.errors.len() < limits.preview_cap {
                        summary.errors.push(error.clone());
                    }
                }
            }
            for warning in classified.warnings {
                summary.warning_count += 1;
                if summary.warnings.len() < limits.preview_cap {
                    summary.warnings.push(warning.clone());
                }
                error_rows.push(warning);
            }
        }

        info!(
            would_create = summary.would_create,
            would_skip = summary.would_skip,
            would_fail = summary.would_fail,
            warnings = summary.warning_count,
            unmapped_required = summary.unmapped_required.len(),
            "试运行完成"
        );

        Ok(ValidationOutput {
            summary,
            error_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::entity::NewClient;
    use crate::domain::job::ColumnMapping;
    use crate::domain::types::{EntityType, ErrorCode};
    use crate::importer::error::ImportError;
    use crate::repository::SqliteEntityStore;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn store() -> Arc<SqliteEntityStore> {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        Arc::new(SqliteEntityStore::new(Arc::new(Mutex::new(conn))))
    }

    fn client_job(rows: &[[&str; 2]]) -> ImportJob {
        let mut job = ImportJob::new("job-1", "t1", "u1", EntityType::Clients);
        job.columns = vec!["companyName".to_string(), "industry".to_string()];
        job.raw_rows = rows
            .iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect();
        job.mapping = vec![
            ColumnMapping::new("companyName", "companyName"),
            ColumnMapping::new("industry", "industry"),
        ];
        job
    }

    #[tokio::test]
    async fn test_in_batch_duplicate() {
        let engine = ValidationEngine::new(store());
        let job = client_job(&[["Acme Corp", "Tech"], ["Acme Corp", "Tech"]]);

        let output = engine.validate_job(&job, &ImportLimits::default()).await.unwrap();
        assert_eq!(output.summary.would_create, 1);
        assert_eq!(output.summary.would_skip, 1);
        assert_eq!(output.summary.would_fail, 0);
        assert!(output.summary.is_consistent());
        assert_eq!(output.error_rows[0].row, 2);
        assert_eq!(output.error_rows[0].error_code, ErrorCode::Duplicate);
    }

    #[tokio::test]
    async fn test_existing_entity_duplicate_and_missing_required() {
        let store = store();
        store.insert_client("t1", &NewClient::named("Globex")).await.unwrap();
        let engine = ValidationEngine::new(store);
        let job = client_job(&[["globex", ""], ["", "Retail"], ["Initech", ""]]);

        let output = engine.validate_job(&job, &ImportLimits::default()).await.unwrap();
        assert_eq!(output.summary.would_create, 1);
        assert_eq!(output.summary.would_skip, 1);
        assert_eq!(output.summary.would_fail, 1);
        let codes: Vec<ErrorCode> = output.error_rows.iter().map(|e| e.error_code).collect();
        assert_eq!(codes, vec![ErrorCode::Duplicate, ErrorCode::MissingRequired]);
    }

    #[tokio::test]
    async fn test_preview_is_capped() {
        let engine = ValidationEngine::new(store());
        let rows: Vec<[&str; 2]> = (0..5).map(|_| ["", "x"]).collect();
        let job = client_job(&rows);
        let limits = ImportLimits {
            preview_cap: 2,
            ..Default::default()
        };

        let output = engine.validate_job(&job, &limits).await.unwrap();
        assert_eq!(output.summary.would_fail, 5);
        assert_eq!(output.summary.errors.len(), 2);
        assert_eq!(output.summary.error_count, 5);
        assert_eq!(output.error_rows.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_mapping_is_config_error() {
        let engine = ValidationEngine::new(store());
        let mut job = client_job(&[["Acme", "Tech"]]);
        job.mapping = vec![ColumnMapping::unmapped("companyName")];

        let err = engine
            .validate_job(&job, &ImportLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::ConfigError(_)));
    }
}
