// ==========================================
// 多租户导入引擎 - 引用解析查找表
// ==========================================
// 职责: 按名称/邮箱（忽略大小写）解析引用 → 本地 ID 或待创建引用
// 生命周期: 每次 validate / run 从租户快照重建，行间共享
// ==========================================

use crate::domain::entity::TenantSnapshot;
use std::collections::HashMap;

/// 待自动创建的被引用实体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingReferent {
    Client { name: String },
    Project { name: String },
    User { email: String },
    /// 挂在某个项目（按名称）下的任务
    Task { project_name: String, title: String },
}

impl PendingReferent {
    pub fn entity_label(&self) -> &'static str {
        match self {
            PendingReferent::Client { .. } => "client",
            PendingReferent::Project { .. } => "project",
            PendingReferent::User { .. } => "user",
            PendingReferent::Task { .. } => "task",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            PendingReferent::Client { name } | PendingReferent::Project { name } => name,
            PendingReferent::User { email } => email,
            PendingReferent::Task { title, .. } => title,
        }
    }

    /// 创建顺序: 客户 → 项目 → 用户 → 任务
    pub fn creation_rank(&self) -> u8 {
        match self {
            PendingReferent::Client { .. } => 0,
            PendingReferent::Project { .. } => 1,
            PendingReferent::User { .. } => 2,
            PendingReferent::Task { .. } => 3,
        }
    }
}

/// 引用解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Existing(String),
    Pending(PendingReferent),
}

impl RefTarget {
    /// 自然键中使用的引用标识
    pub fn key(&self) -> String {
        match self {
            RefTarget::Existing(id) => id.clone(),
            RefTarget::Pending(p) => format!(
                "pending:{}:{}",
                p.entity_label(),
                p.display_name().to_lowercase()
            ),
        }
    }

    pub fn existing_id(&self) -> Option<&str> {
        match self {
            RefTarget::Existing(id) => Some(id),
            RefTarget::Pending(_) => None,
        }
    }
}

/// 一行导入数据解析出的引用
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRefs {
    pub client: Option<RefTarget>,
    pub project: Option<RefTarget>,
    pub user: Option<RefTarget>,
    pub task: Option<RefTarget>,
}

impl ResolvedRefs {
    /// 所有待创建的引用（按创建顺序）
    pub fn pending(&self) -> Vec<PendingReferent> {
        let mut pending: Vec<PendingReferent> = [&self.client, &self.project, &self.user, &self.task]
            .into_iter()
            .flatten()
            .filter_map(|target| match target {
                RefTarget::Pending(p) => Some(p.clone()),
                RefTarget::Existing(_) => None,
            })
            .collect();
        pending.sort_by_key(PendingReferent::creation_rank);
        pending
    }
}

fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

// ==========================================
// LookupTables - 租户查找表
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    clients: HashMap<String, RefTarget>,
    projects: HashMap<String, RefTarget>,
    users_by_email: HashMap<String, RefTarget>,
    users_by_name: HashMap<String, RefTarget>,
    /// (项目引用键, 任务标题)
    tasks: HashMap<(String, String), RefTarget>,
    tasks_by_title: HashMap<String, RefTarget>,
}

impl LookupTables {
    /// 从快照构建；同名时保留最先出现的记录
    pub fn from_snapshot(snapshot: &TenantSnapshot) -> Self {
        let mut tables = Self::default();
        for client in &snapshot.clients {
            tables
                .clients
                .entry(fold(&client.name))
                .or_insert_with(|| RefTarget::Existing(client.id.clone()));
        }
        for project in &snapshot.projects {
            tables
                .projects
                .entry(fold(&project.name))
                .or_insert_with(|| RefTarget::Existing(project.id.clone()));
        }
        for user in &snapshot.users {
            let target = RefTarget::Existing(user.id.clone());
            tables
                .users_by_email
                .entry(fold(&user.email))
                .or_insert_with(|| target.clone());
            if let Some(name) = user.full_name() {
                tables.users_by_name.entry(fold(&name)).or_insert(target);
            }
        }
        for task in &snapshot.tasks {
            let target = RefTarget::Existing(task.id.clone());
            tables
                .tasks
                .entry((task.project_id.clone(), fold(&task.title)))
                .or_insert_with(|| target.clone());
            tables
                .tasks_by_title
                .entry(fold(&task.title))
                .or_insert(target);
        }
        tables
    }

    pub fn client(&self, name: &str) -> Option<&RefTarget> {
        self.clients.get(&fold(name))
    }

    pub fn project(&self, name: &str) -> Option<&RefTarget> {
        self.projects.get(&fold(name))
    }

    /// 按邮箱查找，其次按 "名 姓"
    pub fn user(&self, email_or_name: &str) -> Option<&RefTarget> {
        let key = fold(email_or_name);
        self.users_by_email
            .get(&key)
            .or_else(|| self.users_by_name.get(&key))
    }

    /// 有项目时在项目内查找，否则按标题全局查找
    pub fn task(&self, project: Option<&RefTarget>, title: &str) -> Option<&RefTarget> {
        match project {
            Some(project) => self.tasks.get(&(project.key(), fold(title))),
            None => self.tasks_by_title.get(&fold(title)),
        }
    }

    /// 登记待创建引用（试运行中后续行可见）
    pub fn add_pending(&mut self, referent: &PendingReferent) {
        let target = RefTarget::Pending(referent.clone());
        self.register(referent, target);
    }

    /// 登记已创建引用的本地 ID
    pub fn add_created(&mut self, referent: &PendingReferent, id: impl Into<String>) {
        self.register(referent, RefTarget::Existing(id.into()));
    }

    fn register(&mut self, referent: &PendingReferent, target: RefTarget) {
        match referent {
            PendingReferent::Client { name } => {
                self.clients.insert(fold(name), target);
            }
            PendingReferent::Project { name } => {
                self.projects.insert(fold(name), target);
            }
            PendingReferent::User { email } => {
                self.users_by_email.insert(fold(email), target);
            }
            PendingReferent::Task { project_name, title } => {
                let project_key = self
                    .project(project_name)
                    .map(RefTarget::key)
                    .unwrap_or_else(|| format!("pending:project:{}", fold(project_name)));
                self.tasks_by_title
                    .entry(fold(title))
                    .or_insert_with(|| target.clone());
                self.tasks.insert((project_key, fold(title)), target);
            }
        }
    }

    /// 把待创建引用替换为已创建的本地 ID（执行阶段）
    pub fn materialize(&self, target: &RefTarget) -> Option<String> {
        match target {
            RefTarget::Existing(id) => Some(id.clone()),
            RefTarget::Pending(referent) => {
                let current = match referent {
                    PendingReferent::Client { name } => self.client(name),
                    PendingReferent::Project { name } => self.project(name),
                    PendingReferent::User { email } => self.user(email),
                    PendingReferent::Task { project_name, title } => {
                        let project = self.project(project_name);
                        self.task(project, title)
                    }
                };
                current.and_then(RefTarget::existing_id).map(str::to_string)
            }
        }
    }

    pub fn materialize_refs(&self, refs: &ResolvedRefs) -> Option<MaterializedRefs> {
        let resolve = |target: &Option<RefTarget>| match target {
            Some(t) => self.materialize(t).map(Some),
            None => Some(None),
        };
        Some(MaterializedRefs {
            client_id: resolve(&refs.client)?,
            project_id: resolve(&refs.project)?,
            user_id: resolve(&refs.user)?,
            task_id: resolve(&refs.task)?,
        })
    }
}

/// 全部落地为本地 ID 的引用
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedRefs {
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
}

impl MaterializedRefs {
    pub fn as_resolved(&self) -> ResolvedRefs {
        let wrap = |id: &Option<String>| id.clone().map(RefTarget::Existing);
        ResolvedRefs {
            client: wrap(&self.client_id),
            project: wrap(&self.project_id),
            user: wrap(&self.user_id),
            task: wrap(&self.task_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{ClientRecord, ProjectRecord, TaskRecord, UserRecord};

    fn snapshot() -> TenantSnapshot {
        TenantSnapshot {
            clients: vec![ClientRecord {
                id: "c1".to_string(),
                name: "Acme Corp".to_string(),
            }],
            projects: vec![ProjectRecord {
                id: "p1".to_string(),
                name: "Website".to_string(),
                client_id: Some("c1".to_string()),
                external_id: None,
            }],
            tasks: vec![TaskRecord {
                id: "t1".to_string(),
                project_id: "p1".to_string(),
                title: "Design".to_string(),
                external_id: None,
            }],
            users: vec![UserRecord {
                id: "u1".to_string(),
                email: "Ann@Corp.io".to_string(),
                first_name: Some("Ann".to_string()),
                last_name: Some("Lee".to_string()),
                external_id: None,
            }],
            time_entries: vec![],
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let tables = LookupTables::from_snapshot(&snapshot());
        assert_eq!(tables.client(" acme corp "), Some(&RefTarget::Existing("c1".to_string())));
        assert_eq!(tables.user("ann@corp.IO"), Some(&RefTarget::Existing("u1".to_string())));
        assert_eq!(tables.user("ann lee"), Some(&RefTarget::Existing("u1".to_string())));
        assert_eq!(tables.project("website"), Some(&RefTarget::Existing("p1".to_string())));
        assert!(tables.client("Globex").is_none());
    }

    #[test]
    fn test_task_lookup_scoped_by_project() {
        let tables = LookupTables::from_snapshot(&snapshot());
        let project = tables.project("Website").cloned();
        assert!(tables.task(project.as_ref(), "design").is_some());
        assert!(tables.task(Some(&RefTarget::Existing("p9".to_string())), "design").is_none());
        assert!(tables.task(None, "DESIGN").is_some());
    }

    #[test]
    fn test_pending_then_created() {
        let mut tables = LookupTables::from_snapshot(&snapshot());
        let referent = PendingReferent::Client {
            name: "Globex".to_string(),
        };

        tables.add_pending(&referent);
        let pending = tables.client("globex").cloned().unwrap();
        assert_eq!(pending.key(), "pending:client:globex");
        assert_eq!(tables.materialize(&pending), None);

        tables.add_created(&referent, "c2");
        assert_eq!(tables.materialize(&pending), Some("c2".to_string()));
    }

    #[test]
    fn test_pending_task_under_pending_project() {
        let mut tables = LookupTables::default();
        let project = PendingReferent::Project {
            name: "Launch".to_string(),
        };
        let task = PendingReferent::Task {
            project_name: "Launch".to_string(),
            title: "Kickoff".to_string(),
        };
        tables.add_pending(&project);
        tables.add_pending(&task);

        let project_ref = tables.project("launch").cloned();
        assert!(matches!(
            tables.task(project_ref.as_ref(), "kickoff"),
            Some(RefTarget::Pending(_))
        ));
    }

    #[test]
    fn test_resolved_refs_pending_order() {
        let refs = ResolvedRefs {
            client: None,
            project: Some(RefTarget::Pending(PendingReferent::Project {
                name: "P".to_string(),
            })),
            user: Some(RefTarget::Pending(PendingReferent::User {
                email: "x@y.io".to_string(),
            })),
            task: Some(RefTarget::Pending(PendingReferent::Task {
                project_name: "P".to_string(),
                title: "T".to_string(),
            })),
        };
        let ranks: Vec<u8> = refs.pending().iter().map(|p| p.creation_rank()).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }
}
