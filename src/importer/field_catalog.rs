// ==========================================
// 多租户导入引擎 - 标准字段目录
// ==========================================
// 职责: 每个实体类型的标准字段表（名称/类型/必填/别名/引用）
// 约束: 顺序有意义（别名冲突时先注册者胜出）
// ==========================================

use crate::domain::types::{EntityType, ValueType};
use serde::Serialize;

// ==========================================
// FieldSpec - 字段定义
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: &'static str,
    pub value_type: ValueType,
    pub required: bool,
    pub aliases: &'static [&'static str],
    /// 引用的目标实体（按名称/邮箱解析）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<EntityType>,
}

const fn field(
    name: &'static str,
    value_type: ValueType,
    required: bool,
    aliases: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        value_type,
        required,
        aliases,
        references: None,
    }
}

const fn reference(
    name: &'static str,
    value_type: ValueType,
    required: bool,
    aliases: &'static [&'static str],
    target: EntityType,
) -> FieldSpec {
    FieldSpec {
        name,
        value_type,
        required,
        aliases,
        references: Some(target),
    }
}

use ValueType::{Bool, Date, Email, Number, String as Text};

static CLIENT_FIELDS: &[FieldSpec] = &[
    field(
        "companyName",
        Text,
        true,
        &["company", "company name", "client", "client name", "organization", "org", "account", "name"],
    ),
    field("industry", Text, false, &["sector", "vertical"]),
    field("contactName", Text, false, &["contact", "contact person", "primary contact"]),
    field("contactEmail", Email, false, &["email", "contact email", "e-mail"]),
    field("phone", Text, false, &["phone number", "telephone", "tel", "mobile"]),
    field("website", Text, false, &["url", "web", "site", "homepage"]),
    field("notes", Text, false, &["note", "comments", "description"]),
];

static PROJECT_FIELDS: &[FieldSpec] = &[
    field("name", Text, true, &["project", "project name", "title"]),
    reference(
        "clientName",
        Text,
        false,
        &["client", "company", "customer", "account"],
        EntityType::Clients,
    ),
    field("status", Text, false, &["state", "project status"]),
    field("startDate", Date, false, &["start", "start date", "begins"]),
    field("endDate", Date, false, &["end", "end date", "due date", "deadline"]),
    field("budget", Number, false, &["amount", "project budget", "value"]),
    field("description", Text, false, &["notes", "details", "summary"]),
];

static TASK_FIELDS: &[FieldSpec] = &[
    field("title", Text, true, &["task", "task name", "name", "summary"]),
    reference(
        "projectName",
        Text,
        true,
        &["project", "project title"],
        EntityType::Projects,
    ),
    reference(
        "assigneeEmail",
        Email,
        false,
        &["assignee", "assigned to", "owner", "owner email"],
        EntityType::Users,
    ),
    field("status", Text, false, &["state"]),
    field("priority", Text, false, &["prio", "importance"]),
    field("dueDate", Date, false, &["due", "due on", "deadline"]),
    field("estimateHours", Number, false, &["estimate", "estimated hours", "hours"]),
    field("description", Text, false, &["notes", "details"]),
];

static USER_FIELDS: &[FieldSpec] = &[
    field("email", Email, true, &["e-mail", "email address", "mail", "user email"]),
    field("firstName", Text, false, &["first", "first name", "given name"]),
    field("lastName", Text, false, &["last", "last name", "surname", "family name"]),
    field("role", Text, false, &["access level", "permission"]),
    field("jobTitle", Text, false, &["title", "position", "job"]),
    field("hourlyRate", Number, false, &["rate", "hourly rate", "bill rate", "cost rate"]),
    field("active", Bool, false, &["enabled", "is active"]),
];

static TIME_ENTRY_FIELDS: &[FieldSpec] = &[
    // 邮箱或全名
    reference(
        "userEmail",
        Text,
        true,
        &["user", "email", "employee", "member", "person", "name"],
        EntityType::Users,
    ),
    field("date", Date, true, &["day", "entry date", "work date"]),
    field("hours", Number, true, &["duration", "time", "hours worked", "qty"]),
    reference("projectName", Text, false, &["project"], EntityType::Projects),
    reference("taskTitle", Text, false, &["task", "task name"], EntityType::Tasks),
    field("description", Text, false, &["notes", "note", "comment", "details"]),
    field("billable", Bool, false, &["is billable", "billed"]),
];

/// 实体类型的标准字段（有序）
pub fn fields_for(entity_type: EntityType) -> &'static [FieldSpec] {
    match entity_type {
        EntityType::Clients => CLIENT_FIELDS,
        EntityType::Projects => PROJECT_FIELDS,
        EntityType::Tasks => TASK_FIELDS,
        EntityType::Users | EntityType::Admins => USER_FIELDS,
        EntityType::TimeEntries => TIME_ENTRY_FIELDS,
    }
}

pub fn find_field(entity_type: EntityType, name: &str) -> Option<&'static FieldSpec> {
    fields_for(entity_type).iter().find(|f| f.name == name)
}

pub fn required_fields(entity_type: EntityType) -> impl Iterator<Item = &'static FieldSpec> {
    fields_for(entity_type).iter().filter(|f| f.required)
}

/// 错误报告中 primaryKey 列取值的字段
pub fn primary_field(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Clients => "companyName",
        EntityType::Projects => "name",
        EntityType::Tasks => "title",
        EntityType::Users | EntityType::Admins => "email",
        EntityType::TimeEntries => "userEmail",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::field_mapper::normalize_header;
    use std::collections::HashSet;

    #[test]
    fn test_every_entity_has_required_primary_field() {
        for entity_type in EntityType::ALL {
            let primary = find_field(entity_type, primary_field(entity_type)).unwrap();
            assert!(primary.required, "{} primary field must be required", entity_type);
        }
    }

    #[test]
    fn test_aliases_disjoint_within_each_catalog() {
        for entity_type in EntityType::ALL {
            let mut seen = HashSet::new();
            for spec in fields_for(entity_type) {
                for key in std::iter::once(spec.name).chain(spec.aliases.iter().copied()) {
                    assert!(
                        seen.insert(normalize_header(key)),
                        "alias '{}' claimed twice in {}",
                        key,
                        entity_type
                    );
                }
            }
        }
    }

    #[test]
    fn test_required_fields_for_time_entries() {
        let names: Vec<&str> = required_fields(EntityType::TimeEntries).map(|f| f.name).collect();
        assert_eq!(names, vec!["userEmail", "date", "hours"]);
    }

    #[test]
    fn test_field_spec_serializes_camel_case() {
        let json = serde_json::to_value(fields_for(EntityType::Projects)[1]).unwrap();
        assert_eq!(json["name"], "clientName");
        assert_eq!(json["valueType"], "string");
        assert_eq!(json["references"], "clients");
    }
}
