// ==========================================
// 多租户导入引擎 - 实体库仓储
// ==========================================
// 职责: 导入目标实体（客户/项目/任务/用户/工时）的读写
// 红线: Repository 不含业务规则，只做数据 CRUD；所有查询按 tenant_id 过滤
// ==========================================

use crate::domain::entity::{
    ClientRecord, NewClient, NewProject, NewTask, NewTimeEntry, NewUser, ProjectRecord,
    TaskRecord, TenantSnapshot, TimeEntryRecord, UpsertOutcome, UserRecord,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// EntityStore Trait
// ==========================================
// 实现者: SqliteEntityStore
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// 加载租户的全部查找表（引用解析 + 去重）
    async fn load_snapshot(&self, tenant_id: &str) -> RepositoryResult<TenantSnapshot>;

    async fn insert_client(&self, tenant_id: &str, client: &NewClient) -> RepositoryResult<String>;

    async fn insert_project(&self, tenant_id: &str, project: &NewProject)
        -> RepositoryResult<String>;

    async fn insert_task(&self, tenant_id: &str, task: &NewTask) -> RepositoryResult<String>;

    async fn insert_user(&self, tenant_id: &str, user: &NewUser) -> RepositoryResult<String>;

    async fn insert_time_entry(
        &self,
        tenant_id: &str,
        entry: &NewTimeEntry,
    ) -> RepositoryResult<String>;

    /// 按 external_id 创建或更新项目
    async fn upsert_project(
        &self,
        tenant_id: &str,
        project: &NewProject,
    ) -> RepositoryResult<(String, UpsertOutcome)>;

    /// 按 external_id 创建或更新任务
    async fn upsert_task(
        &self,
        tenant_id: &str,
        task: &NewTask,
    ) -> RepositoryResult<(String, UpsertOutcome)>;

    /// 按 external_id（其次邮箱）创建或更新用户
    async fn upsert_user(
        &self,
        tenant_id: &str,
        user: &NewUser,
    ) -> RepositoryResult<(String, UpsertOutcome)>;
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn fmt_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date(raw: &str) -> RepositoryResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| RepositoryError::FieldValueError {
        field: "entry_date".to_string(),
        message: e.to_string(),
    })
}

// ==========================================
// SqliteEntityStore
// ==========================================
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn insert_project_conn(
        conn: &Connection,
        tenant_id: &str,
        project: &NewProject,
    ) -> RepositoryResult<String> {
        let id = new_id();
        let now = now_str();
        conn.execute(
            r#"
            INSERT INTO project (
                id, tenant_id, name, client_id, status, start_date, end_date,
                budget, description, external_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
            params![
                id,
                tenant_id,
                project.name,
                project.client_id,
                project.status,
                fmt_date(project.start_date),
                fmt_date(project.end_date),
                project.budget,
                project.description,
                project.external_id,
                now,
            ],
        )?;
        Ok(id)
    }

    fn insert_task_conn(conn: &Connection, tenant_id: &str, task: &NewTask) -> RepositoryResult<String> {
        let id = new_id();
        let now = now_str();
        conn.execute(
            r#"
            INSERT INTO task (
                id, tenant_id, project_id, title, assignee_id, status, priority,
                due_date, estimate_hours, description, completed, external_id,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
            params![
                id,
                tenant_id,
                task.project_id,
                task.title,
                task.assignee_id,
                task.status,
                task.priority,
                fmt_date(task.due_date),
                task.estimate_hours,
                task.description,
                task.completed,
                task.external_id,
                now,
            ],
        )?;
        Ok(id)
    }

    fn insert_user_conn(conn: &Connection, tenant_id: &str, user: &NewUser) -> RepositoryResult<String> {
        let id = new_id();
        let now = now_str();
        conn.execute(
            r#"
            INSERT INTO app_user (
                id, tenant_id, email, email_key, first_name, last_name, role,
                job_title, hourly_rate, active, is_admin, external_id,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            "#,
            params![
                id,
                tenant_id,
                user.email.trim(),
                user.email.trim().to_lowercase(),
                user.first_name,
                user.last_name,
                user.role,
                user.job_title,
                user.hourly_rate,
                user.active,
                user.is_admin,
                user.external_id,
                now,
            ],
        )?;
        Ok(id)
    }

    fn find_id_by_external(
        conn: &Connection,
        table: &str,
        tenant_id: &str,
        external_id: &str,
    ) -> RepositoryResult<Option<String>> {
        let sql = format!(
            "SELECT id FROM {} WHERE tenant_id = ?1 AND external_id = ?2",
            table
        );
        let id = conn
            .query_row(&sql, params![tenant_id, external_id], |row| row.get(0))
            .optional()?;
        Ok(id)
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn load_snapshot(&self, tenant_id: &str) -> RepositoryResult<TenantSnapshot> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare("SELECT id, name FROM client WHERE tenant_id = ?1 ORDER BY created_at")?;
        let clients = stmt
            .query_map(params![tenant_id], |row| {
                Ok(ClientRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, client_id, external_id FROM project WHERE tenant_id = ?1 ORDER BY created_at",
        )?;
        let projects = stmt
            .query_map(params![tenant_id], |row| {
                Ok(ProjectRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    client_id: row.get(2)?,
                    external_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, project_id, title, external_id FROM task WHERE tenant_id = ?1 ORDER BY created_at",
        )?;
        let tasks = stmt
            .query_map(params![tenant_id], |row| {
                Ok(TaskRecord {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    title: row.get(2)?,
                    external_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, email, first_name, last_name, external_id FROM app_user WHERE tenant_id = ?1 ORDER BY created_at",
        )?;
        let users = stmt
            .query_map(params![tenant_id], |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    external_id: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, project_id, entry_date, hours, description FROM time_entry WHERE tenant_id = ?1",
        )?;
        let raw_entries = stmt
            .query_map(params![tenant_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut time_entries = Vec::with_capacity(raw_entries.len());
        for (id, user_id, project_id, date, hours, description) in raw_entries {
            time_entries.push(TimeEntryRecord {
                id,
                user_id,
                project_id,
                date: parse_date(&date)?,
                hours,
                description,
            });
        }

        tracing::debug!(
            tenant_id,
            clients = clients.len(),
            projects = projects.len(),
            tasks = tasks.len(),
            users = users.len(),
            time_entries = time_entries.len(),
            "实体快照已加载"
        );

        Ok(TenantSnapshot {
            clients,
            projects,
            tasks,
            users,
            time_entries,
        })
    }

    async fn insert_client(&self, tenant_id: &str, client: &NewClient) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let id = new_id();
        conn.execute(
            r#"
            INSERT INTO client (
                id, tenant_id, name, name_key, industry, contact_name,
                contact_email, phone, website, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id,
                tenant_id,
                client.name.trim(),
                client.name.trim().to_lowercase(),
                client.industry,
                client.contact_name,
                client.contact_email,
                client.phone,
                client.website,
                client.notes,
                now_str(),
            ],
        )?;
        Ok(id)
    }

    async fn insert_project(
        &self,
        tenant_id: &str,
        project: &NewProject,
    ) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_project_conn(&conn, tenant_id, project)
    }

    async fn insert_task(&self, tenant_id: &str, task: &NewTask) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_task_conn(&conn, tenant_id, task)
    }

    async fn insert_user(&self, tenant_id: &str, user: &NewUser) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_user_conn(&conn, tenant_id, user)
    }

    async fn insert_time_entry(
        &self,
        tenant_id: &str,
        entry: &NewTimeEntry,
    ) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let id = new_id();
        conn.execute(
            r#"
            INSERT INTO time_entry (
                id, tenant_id, user_id, project_id, task_id, entry_date,
                hours, description, billable, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                id,
                tenant_id,
                entry.user_id,
                entry.project_id,
                entry.task_id,
                entry.date.format("%Y-%m-%d").to_string(),
                entry.hours,
                entry.description,
                entry.billable,
                now_str(),
            ],
        )?;
        Ok(id)
    }

    async fn upsert_project(
        &self,
        tenant_id: &str,
        project: &NewProject,
    ) -> RepositoryResult<(String, UpsertOutcome)> {
        let conn = self.get_conn()?;
        let existing = match project.external_id.as_deref() {
            Some(ext) => Self::find_id_by_external(&conn, "project", tenant_id, ext)?,
            None => None,
        };

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE project
                    SET name = ?1, client_id = COALESCE(?2, client_id),
                        end_date = COALESCE(?3, end_date),
                        description = COALESCE(?4, description), updated_at = ?5
                    WHERE id = ?6 AND tenant_id = ?7
                    "#,
                    params![
                        project.name,
                        project.client_id,
                        fmt_date(project.end_date),
                        project.description,
                        now_str(),
                        id,
                        tenant_id,
                    ],
                )?;
                Ok((id, UpsertOutcome::Updated))
            }
            None => {
                let id = Self::insert_project_conn(&conn, tenant_id, project)?;
                Ok((id, UpsertOutcome::Created))
            }
        }
    }

    async fn upsert_task(
        &self,
        tenant_id: &str,
        task: &NewTask,
    ) -> RepositoryResult<(String, UpsertOutcome)> {
        let conn = self.get_conn()?;
        let existing = match task.external_id.as_deref() {
            Some(ext) => Self::find_id_by_external(&conn, "task", tenant_id, ext)?,
            None => None,
        };

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE task
                    SET project_id = ?1, title = ?2, assignee_id = ?3, status = ?4,
                        due_date = ?5, description = ?6, completed = ?7, updated_at = ?8
                    WHERE id = ?9 AND tenant_id = ?10
                    "#,
                    params![
                        task.project_id,
                        task.title,
                        task.assignee_id,
                        task.status,
                        fmt_date(task.due_date),
                        task.description,
                        task.completed,
                        now_str(),
                        id,
                        tenant_id,
                    ],
                )?;
                Ok((id, UpsertOutcome::Updated))
            }
            None => {
                let id = Self::insert_task_conn(&conn, tenant_id, task)?;
                Ok((id, UpsertOutcome::Created))
            }
        }
    }

    async fn upsert_user(
        &self,
        tenant_id: &str,
        user: &NewUser,
    ) -> RepositoryResult<(String, UpsertOutcome)> {
        let conn = self.get_conn()?;
        let mut existing = match user.external_id.as_deref() {
            Some(ext) => Self::find_id_by_external(&conn, "app_user", tenant_id, ext)?,
            None => None,
        };
        if existing.is_none() {
            existing = conn
                .query_row(
                    "SELECT id FROM app_user WHERE tenant_id = ?1 AND email_key = ?2",
                    params![tenant_id, user.email.trim().to_lowercase()],
                    |row| row.get(0),
                )
                .optional()?;
        }

        match existing {
            Some(id) => {
                conn.execute(
                    r#"
                    UPDATE app_user
                    SET first_name = COALESCE(?1, first_name),
                        last_name = COALESCE(?2, last_name),
                        external_id = COALESCE(external_id, ?3),
                        updated_at = ?4
                    WHERE id = ?5 AND tenant_id = ?6
                    "#,
                    params![
                        user.first_name,
                        user.last_name,
                        user.external_id,
                        now_str(),
                        id,
                        tenant_id,
                    ],
                )?;
                Ok((id, UpsertOutcome::Updated))
            }
            None => {
                let id = Self::insert_user_conn(&conn, tenant_id, user)?;
                Ok((id, UpsertOutcome::Created))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn store() -> SqliteEntityStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteEntityStore::new(Arc::new(Mutex::new(conn)))
    }

    #[tokio::test]
    async fn test_client_name_unique_per_tenant() {
        let store = store();
        store.insert_client("t1", &NewClient::named("Acme")).await.unwrap();

        let err = store
            .insert_client("t1", &NewClient::named("ACME "))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

        // 其他租户不受影响
        store.insert_client("t2", &NewClient::named("Acme")).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_is_tenant_scoped() {
        let store = store();
        store.insert_client("t1", &NewClient::named("Acme")).await.unwrap();
        store
            .insert_user("t2", &NewUser::with_email("bob@corp.io"))
            .await
            .unwrap();

        let snap = store.load_snapshot("t1").await.unwrap();
        assert_eq!(snap.clients.len(), 1);
        assert!(snap.users.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_project_by_external_id() {
        let store = store();
        let project = NewProject {
            name: "Website".to_string(),
            external_id: Some("ext-1".to_string()),
            ..Default::default()
        };

        let (id1, first) = store.upsert_project("t1", &project).await.unwrap();
        let renamed = NewProject {
            name: "Website v2".to_string(),
            ..project.clone()
        };
        let (id2, second) = store.upsert_project("t1", &renamed).await.unwrap();

        assert_eq!(first, UpsertOutcome::Created);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(id1, id2);

        let snap = store.load_snapshot("t1").await.unwrap();
        assert_eq!(snap.projects.len(), 1);
        assert_eq!(snap.projects[0].name, "Website v2");
    }

    #[tokio::test]
    async fn test_upsert_user_matches_existing_email() {
        let store = store();
        let id = store
            .insert_user("t1", &NewUser::with_email("Ann@Corp.io"))
            .await
            .unwrap();

        let remote = NewUser {
            external_id: Some("r-9".to_string()),
            first_name: Some("Ann".to_string()),
            ..NewUser::with_email("ann@corp.io")
        };
        let (matched, outcome) = store.upsert_user("t1", &remote).await.unwrap();

        assert_eq!(matched, id);
        assert_eq!(outcome, UpsertOutcome::Updated);
        let snap = store.load_snapshot("t1").await.unwrap();
        assert_eq!(snap.users[0].external_id.as_deref(), Some("r-9"));
    }

    #[tokio::test]
    async fn test_time_entry_roundtrip_through_snapshot() {
        let store = store();
        let user_id = store
            .insert_user("t1", &NewUser::with_email("ann@corp.io"))
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        store
            .insert_time_entry(
                "t1",
                &NewTimeEntry {
                    user_id: user_id.clone(),
                    date,
                    hours: 2.5,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let snap = store.load_snapshot("t1").await.unwrap();
        assert_eq!(snap.time_entries.len(), 1);
        assert_eq!(snap.time_entries[0].date, date);
        assert_eq!(snap.time_entries[0].user_id, user_id);
    }
}
