// ==========================================
// 多租户导入引擎 - 连接器写入端
// ==========================================
// 职责: 把流水线的写操作落到实体库（执行）或只做判定（试运行）
// 实现者: StoreWriter（落库 + 阶段持久化）, DryRunWriter（只读）
// ==========================================

use crate::connector::error::ConnectorResult;
use crate::domain::connector::ImportPhase;
use crate::domain::entity::{NewClient, NewProject, NewTask, NewUser, TenantSnapshot, UpsertOutcome};
use crate::domain::job::ErrorRow;
use crate::importer::PhaseListener;
use crate::repository::{ConnectorRunStore, EntityStore, RepositoryResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

// ==========================================
// EntityWriter Trait
// ==========================================
#[async_trait]
pub trait EntityWriter: Send + Sync {
    /// 进入新阶段；error_log 为截至目前的错误与警告，供轮询方查看
    async fn enter_phase(&self, phase: ImportPhase, error_log: &[ErrorRow]) -> ConnectorResult<()>;

    async fn create_client(&self, name: &str) -> RepositoryResult<String>;

    async fn upsert_project(&self, project: &NewProject) -> RepositoryResult<(String, UpsertOutcome)>;

    async fn upsert_task(&self, task: &NewTask) -> RepositoryResult<(String, UpsertOutcome)>;

    async fn upsert_user(&self, user: &NewUser) -> RepositoryResult<(String, UpsertOutcome)>;
}

// ==========================================
// StoreWriter - 执行模式
// ==========================================
pub struct StoreWriter {
    tenant_id: String,
    run_id: String,
    entity_store: Arc<dyn EntityStore>,
    run_store: Arc<dyn ConnectorRunStore>,
    listener: Arc<dyn PhaseListener>,
}

impl StoreWriter {
    pub fn new(
        tenant_id: impl Into<String>,
        run_id: impl Into<String>,
        entity_store: Arc<dyn EntityStore>,
        run_store: Arc<dyn ConnectorRunStore>,
        listener: Arc<dyn PhaseListener>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            run_id: run_id.into(),
            entity_store,
            run_store,
            listener,
        }
    }
}

#[async_trait]
impl EntityWriter for StoreWriter {
    async fn enter_phase(&self, phase: ImportPhase, error_log: &[ErrorRow]) -> ConnectorResult<()> {
        self.run_store
            .update_phase(&self.tenant_id, &self.run_id, phase.as_str(), error_log)
            .await?;
        info!(run_id = %self.run_id, phase = %phase, errors = error_log.len(), "进入导入阶段");
        self.listener.on_phase(&self.run_id, phase);
        Ok(())
    }

    async fn create_client(&self, name: &str) -> RepositoryResult<String> {
        self.entity_store
            .insert_client(&self.tenant_id, &NewClient::named(name))
            .await
    }

    async fn upsert_project(&self, project: &NewProject) -> RepositoryResult<(String, UpsertOutcome)> {
        self.entity_store.upsert_project(&self.tenant_id, project).await
    }

    async fn upsert_task(&self, task: &NewTask) -> RepositoryResult<(String, UpsertOutcome)> {
        self.entity_store.upsert_task(&self.tenant_id, task).await
    }

    async fn upsert_user(&self, user: &NewUser) -> RepositoryResult<(String, UpsertOutcome)> {
        self.entity_store.upsert_user(&self.tenant_id, user).await
    }
}

// ==========================================
// DryRunWriter - 试运行模式
// ==========================================
// 依据快照判定 created/updated；新实体返回占位 ID
pub struct DryRunWriter {
    projects: HashMap<String, String>,
    tasks: HashMap<String, String>,
    users_by_external: HashMap<String, String>,
    users_by_email: HashMap<String, String>,
}

impl DryRunWriter {
    pub fn from_snapshot(snapshot: &TenantSnapshot) -> Self {
        let by_external = |items: Vec<(Option<&String>, &String)>| -> HashMap<String, String> {
            items
                .into_iter()
                .filter_map(|(ext, id)| ext.map(|e| (e.clone(), id.clone())))
                .collect()
        };
        Self {
            projects: by_external(
                snapshot
                    .projects
                    .iter()
                    .map(|p| (p.external_id.as_ref(), &p.id))
                    .collect(),
            ),
            tasks: by_external(
                snapshot
                    .tasks
                    .iter()
                    .map(|t| (t.external_id.as_ref(), &t.id))
                    .collect(),
            ),
            users_by_external: by_external(
                snapshot
                    .users
                    .iter()
                    .map(|u| (u.external_id.as_ref(), &u.id))
                    .collect(),
            ),
            users_by_email: snapshot
                .users
                .iter()
                .map(|u| (u.email.trim().to_lowercase(), u.id.clone()))
                .collect(),
        }
    }

    fn placeholder(kind: &str, key: &str) -> String {
        format!("dry-run:{}:{}", kind, key)
    }

    fn outcome(existing: Option<&String>, kind: &str, key: &str) -> (String, UpsertOutcome) {
        match existing {
            Some(id) => (id.clone(), UpsertOutcome::Updated),
            None => (Self::placeholder(kind, key), UpsertOutcome::Created),
        }
    }
}

#[async_trait]
impl EntityWriter for DryRunWriter {
    async fn enter_phase(&self, _phase: ImportPhase, _error_log: &[ErrorRow]) -> ConnectorResult<()> {
        Ok(())
    }

    async fn create_client(&self, name: &str) -> RepositoryResult<String> {
        Ok(Self::placeholder("client", &name.to_lowercase()))
    }

    async fn upsert_project(&self, project: &NewProject) -> RepositoryResult<(String, UpsertOutcome)> {
        let key = project.external_id.as_deref().unwrap_or(&project.name);
        let existing = project
            .external_id
            .as_ref()
            .and_then(|ext| self.projects.get(ext));
        Ok(Self::outcome(existing, "project", key))
    }

    async fn upsert_task(&self, task: &NewTask) -> RepositoryResult<(String, UpsertOutcome)> {
        let key = task.external_id.as_deref().unwrap_or(&task.title);
        let existing = task.external_id.as_ref().and_then(|ext| self.tasks.get(ext));
        Ok(Self::outcome(existing, "task", key))
    }

    async fn upsert_user(&self, user: &NewUser) -> RepositoryResult<(String, UpsertOutcome)> {
        let email = user.email.trim().to_lowercase();
        let existing = user
            .external_id
            .as_ref()
            .and_then(|ext| self.users_by_external.get(ext))
            .or_else(|| self.users_by_email.get(&email));
        Ok(Self::outcome(existing, "user", &email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{ProjectRecord, UserRecord};

    fn snapshot() -> TenantSnapshot {
        TenantSnapshot {
            projects: vec![ProjectRecord {
                id: "local-p1".to_string(),
                name: "Website".to_string(),
                client_id: None,
                external_id: Some("p1".to_string()),
            }],
            users: vec![UserRecord {
                id: "local-u1".to_string(),
                email: "Jane@Example.com".to_string(),
                first_name: None,
                last_name: None,
                external_id: None,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dry_run_outcomes_follow_snapshot() {
        let writer = DryRunWriter::from_snapshot(&snapshot());

        let known = NewProject {
            name: "Website".to_string(),
            external_id: Some("p1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            writer.upsert_project(&known).await.unwrap(),
            ("local-p1".to_string(), UpsertOutcome::Updated)
        );

        let fresh = NewProject {
            name: "Mobile".to_string(),
            external_id: Some("p9".to_string()),
            ..Default::default()
        };
        let (id, outcome) = writer.upsert_project(&fresh).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert!(id.starts_with("dry-run:project:"));
    }

    #[tokio::test]
    async fn test_dry_run_user_matches_email_case_insensitive() {
        let writer = DryRunWriter::from_snapshot(&snapshot());
        let user = NewUser::with_email("jane@example.com");
        let (id, outcome) = writer.upsert_user(&user).await.unwrap();
        assert_eq!(id, "local-u1");
        assert_eq!(outcome, UpsertOutcome::Updated);
    }
}
