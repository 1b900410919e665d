// ==========================================
// 多租户导入引擎 - 冲突处理器
// ==========================================
// 职责: 计算自然键，检测与已有实体 / 同批次前序行的重复
// 自然键: 引用部分用本地 ID（或待创建引用键），文本部分小写
// ==========================================

use crate::domain::entity::TenantSnapshot;
use crate::domain::record::ImportRow;
use crate::domain::types::EntityType;
use crate::importer::reference_resolver::{RefTarget, ResolvedRefs};
use std::collections::{HashMap, HashSet};

const KEY_SEPARATOR: &str = "\u{1f}";

fn fold(value: &str) -> String {
    value.trim().to_lowercase()
}

fn join_key(parts: &[String]) -> String {
    parts.join(KEY_SEPARATOR)
}

fn time_entry_key(
    user: &str,
    date: chrono::NaiveDate,
    project: Option<&str>,
    hours: f64,
    description: Option<&str>,
) -> String {
    join_key(&[
        user.to_string(),
        date.format("%Y-%m-%d").to_string(),
        project.unwrap_or_default().to_string(),
        format!("{:.2}", hours),
        description.map(fold).unwrap_or_default(),
    ])
}

/// 导入行的自然键
pub fn natural_key(row: &ImportRow, refs: &ResolvedRefs) -> String {
    let ref_key = |target: &Option<RefTarget>| target.as_ref().map(RefTarget::key).unwrap_or_default();
    match row {
        ImportRow::Client(r) => fold(&r.company_name),
        ImportRow::Project(r) => join_key(&[ref_key(&refs.client), fold(&r.name)]),
        ImportRow::Task(r) => join_key(&[ref_key(&refs.project), fold(&r.title)]),
        ImportRow::User(r) => fold(&r.email),
        ImportRow::TimeEntry(r) => time_entry_key(
            &ref_key(&refs.user),
            r.date,
            refs.project.as_ref().map(|p| p.key()).as_deref(),
            r.hours,
            r.description.as_deref(),
        ),
    }
}

/// 租户内已有实体的自然键
pub fn existing_keys(entity_type: EntityType, snapshot: &TenantSnapshot) -> HashSet<String> {
    match entity_type {
        EntityType::Clients => snapshot.clients.iter().map(|c| fold(&c.name)).collect(),
        EntityType::Projects => snapshot
            .projects
            .iter()
            .map(|p| join_key(&[p.client_id.clone().unwrap_or_default(), fold(&p.name)]))
            .collect(),
        EntityType::Tasks => snapshot
            .tasks
            .iter()
            .map(|t| join_key(&[t.project_id.clone(), fold(&t.title)]))
            .collect(),
        EntityType::Users | EntityType::Admins => {
            snapshot.users.iter().map(|u| fold(&u.email)).collect()
        }
        EntityType::TimeEntries => snapshot
            .time_entries
            .iter()
            .map(|e| {
                time_entry_key(
                    &e.user_id,
                    e.date,
                    e.project_id.as_deref(),
                    e.hours,
                    e.description.as_deref(),
                )
            })
            .collect(),
    }
}

/// 重复类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicate {
    /// 与已有实体重复
    Existing,
    /// 与同批次前序行重复（行号）
    InBatch(usize),
}

impl Duplicate {
    pub fn message(&self) -> String {
        match self {
            Duplicate::Existing => "记录已存在".to_string(),
            Duplicate::InBatch(row) => format!("与第 {} 行重复", row),
        }
    }
}

// ==========================================
// ConflictHandler - 自然键登记表
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ConflictHandler {
    existing: HashSet<String>,
    batch: HashMap<String, usize>,
}

impl ConflictHandler {
    pub fn new(existing: HashSet<String>) -> Self {
        Self {
            existing,
            batch: HashMap::new(),
        }
    }

    pub fn check(&self, key: &str) -> Option<Duplicate> {
        if self.existing.contains(key) {
            return Some(Duplicate::Existing);
        }
        self.batch.get(key).map(|row| Duplicate::InBatch(*row))
    }

    /// 登记本批次已接受的行（首次出现者保留）
    pub fn register(&mut self, key: String, row: usize) {
        self.batch.entry(key).or_insert(row);
    }
}
