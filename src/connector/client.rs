// ==========================================
// 多租户导入引擎 - 外部系统客户端
// ==========================================
// 职责: 定义项目管理系统的只读访问接口
// 实现者: InMemoryRemoteClient（固定数据，可注入故障）
// 说明: HTTP 实现由宿主应用提供，流水线只依赖 Trait
// ==========================================

use crate::connector::error::{ExternalApiError, ExternalErrorKind};
use crate::domain::connector::{
    RemoteProject, RemoteSection, RemoteTask, RemoteTeam, RemoteUser, RemoteWorkspace,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub type RemoteResult<T> = Result<T, ExternalApiError>;

// ==========================================
// RemoteClient Trait
// ==========================================
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_workspace(&self, workspace_id: &str) -> RemoteResult<RemoteWorkspace>;

    async fn list_teams(&self, workspace_id: &str) -> RemoteResult<Vec<RemoteTeam>>;

    async fn list_projects(&self, workspace_id: &str) -> RemoteResult<Vec<RemoteProject>>;

    async fn list_sections(&self, project_id: &str) -> RemoteResult<Vec<RemoteSection>>;

    async fn list_tasks(&self, project_id: &str) -> RemoteResult<Vec<RemoteTask>>;

    async fn list_users(&self, workspace_id: &str) -> RemoteResult<Vec<RemoteUser>>;
}

// ==========================================
// InMemoryRemoteClient
// ==========================================
// 故障注入键: "<方法名>:<参数>"，例如 "list_tasks:p2"
#[derive(Default)]
pub struct InMemoryRemoteClient {
    workspace: Option<RemoteWorkspace>,
    teams: Vec<RemoteTeam>,
    projects: Vec<RemoteProject>,
    sections: Vec<RemoteSection>,
    tasks: Vec<RemoteTask>,
    users: Vec<RemoteUser>,
    failures: Mutex<HashMap<String, ExternalApiError>>,
}

impl InMemoryRemoteClient {
    pub fn new(workspace_id: &str, workspace_name: &str) -> Self {
        Self {
            workspace: Some(RemoteWorkspace {
                id: workspace_id.to_string(),
                name: workspace_name.to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn with_team(mut self, team: RemoteTeam) -> Self {
        self.teams.push(team);
        self
    }

    pub fn with_project(mut self, project: RemoteProject) -> Self {
        self.projects.push(project);
        self
    }

    pub fn with_section(mut self, section: RemoteSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_task(mut self, task: RemoteTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_user(mut self, user: RemoteUser) -> Self {
        self.users.push(user);
        self
    }

    /// 注入故障；同一键持续失败直到 clear_failure
    pub fn fail_on(&self, call: impl Into<String>, error: ExternalApiError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(call.into(), error);
        }
    }

    pub fn clear_failure(&self, call: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(call);
        }
    }

    fn check(&self, method: &str, arg: &str) -> RemoteResult<()> {
        let key = format!("{}:{}", method, arg);
        match self.failures.lock() {
            Ok(failures) => match failures.get(&key) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }

    fn workspace_matches(&self, workspace_id: &str) -> RemoteResult<&RemoteWorkspace> {
        self.workspace
            .as_ref()
            .filter(|ws| ws.id == workspace_id)
            .ok_or_else(|| {
                ExternalApiError::new(
                    ExternalErrorKind::NotFound,
                    format!("工作区 {} 不存在", workspace_id),
                )
            })
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemoteClient {
    async fn get_workspace(&self, workspace_id: &str) -> RemoteResult<RemoteWorkspace> {
        self.check("get_workspace", workspace_id)?;
        self.workspace_matches(workspace_id).cloned()
    }

    async fn list_teams(&self, workspace_id: &str) -> RemoteResult<Vec<RemoteTeam>> {
        self.check("list_teams", workspace_id)?;
        self.workspace_matches(workspace_id)?;
        Ok(self.teams.clone())
    }

    async fn list_projects(&self, workspace_id: &str) -> RemoteResult<Vec<RemoteProject>> {
        self.check("list_projects", workspace_id)?;
        self.workspace_matches(workspace_id)?;
        Ok(self.projects.clone())
    }

    async fn list_sections(&self, project_id: &str) -> RemoteResult<Vec<RemoteSection>> {
        self.check("list_sections", project_id)?;
        Ok(self
            .sections
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, project_id: &str) -> RemoteResult<Vec<RemoteTask>> {
        self.check("list_tasks", project_id)?;
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_users(&self, workspace_id: &str) -> RemoteResult<Vec<RemoteUser>> {
        self.check("list_users", workspace_id)?;
        self.workspace_matches(workspace_id)?;
        Ok(self.users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, project_id: &str) -> RemoteTask {
        RemoteTask {
            id: id.to_string(),
            project_id: project_id.to_string(),
            section_id: None,
            name: format!("Task {}", id),
            notes: None,
            assignee: None,
            completed: false,
            due_on: None,
        }
    }

    #[tokio::test]
    async fn test_tasks_filtered_by_project() {
        let client = InMemoryRemoteClient::new("ws", "Workspace")
            .with_task(task("t1", "p1"))
            .with_task(task("t2", "p2"));

        let tasks = client.list_tasks("p1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
    }

    #[tokio::test]
    async fn test_unknown_workspace_is_not_found() {
        let client = InMemoryRemoteClient::new("ws", "Workspace");
        let err = client.list_projects("other").await.unwrap_err();
        assert_eq!(err.kind, ExternalErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let client = InMemoryRemoteClient::new("ws", "Workspace").with_task(task("t1", "p1"));
        client.fail_on("list_tasks:p1", ExternalApiError::auth("token revoked"));

        let err = client.list_tasks("p1").await.unwrap_err();
        assert!(err.is_fatal());

        client.clear_failure("list_tasks:p1");
        assert_eq!(client.list_tasks("p1").await.unwrap().len(), 1);
    }
}
