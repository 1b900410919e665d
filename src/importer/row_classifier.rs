// ==========================================
// 多租户导入引擎 - 行分类器
// ==========================================
// 职责: 单行判定 create / skip / fail，试运行与执行共用
// 顺序: 映射+类型转换 → 必填 → 引用解析 → 自然键去重 → 范围警告
// 状态: 查找表与批内自然键随行推进而增长
// ==========================================

use crate::domain::entity::TenantSnapshot;
use crate::domain::job::{ErrorRow, Row};
use crate::domain::record::ImportRow;
use crate::domain::types::{EntityType, ErrorCode};
use crate::importer::conflict_handler::{existing_keys, natural_key, ConflictHandler};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::dq_validator::DqValidator;
use crate::importer::field_catalog::required_fields;
use crate::importer::field_mapper::PreparedMapping;
use crate::importer::reference_resolver::{
    LookupTables, MaterializedRefs, PendingReferent, RefTarget, ResolvedRefs,
};

/// 待创建的行
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlan {
    pub row: ImportRow,
    pub refs: ResolvedRefs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Create(CreatePlan),
    Skip(ErrorRow),
    Fail(ErrorRow),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRow {
    /// 数据行号（从 1 开始）
    pub row_no: usize,
    pub primary_key: String,
    pub outcome: RowOutcome,
    /// 仅 Create 时携带
    pub warnings: Vec<ErrorRow>,
}

// ==========================================
// RowClassifier
// ==========================================
pub struct RowClassifier<'a> {
    mapping: &'a PreparedMapping,
    cleaner: DataCleaner,
    dq_validator: DqValidator,
    lookup: LookupTables,
    conflicts: ConflictHandler,
    auto_create_missing: bool,
}

impl<'a> RowClassifier<'a> {
    pub fn new(
        mapping: &'a PreparedMapping,
        snapshot: &TenantSnapshot,
        auto_create_missing: bool,
    ) -> Self {
        Self {
            mapping,
            cleaner: DataCleaner,
            dq_validator: DqValidator,
            lookup: LookupTables::from_snapshot(snapshot),
            conflicts: ConflictHandler::new(existing_keys(mapping.entity_type(), snapshot)),
            auto_create_missing,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.mapping.entity_type()
    }

    pub fn lookup(&self) -> &LookupTables {
        &self.lookup
    }

    /// 判定一行（不修改状态）
    pub fn classify(&self, row_no: usize, row: &Row) -> ClassifiedRow {
        let raw_key = self.mapping.raw_primary_key(row);
        let fail = |code: ErrorCode, message: String| ClassifiedRow {
            row_no,
            primary_key: raw_key.clone(),
            outcome: RowOutcome::Fail(ErrorRow::new(row_no, raw_key.clone(), code, message)),
            warnings: Vec::new(),
        };

        // 1-2. 映射 + 类型转换
        let record = match self.mapping.apply(&self.cleaner, row) {
            Ok(record) => record,
            Err(issues) => {
                let message = issues
                    .iter()
                    .map(|i| format!("{}: {}", i.field, i.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                return fail(ErrorCode::TypeCoercion, message);
            }
        };

        // 3. 必填
        let missing: Vec<&str> = required_fields(self.entity_type())
            .filter(|f| !record.contains(f.name))
            .map(|f| f.name)
            .collect();
        if !missing.is_empty() {
            return fail(
                ErrorCode::MissingRequired,
                format!("缺少必填字段: {}", missing.join(", ")),
            );
        }
        let Some(import_row) = ImportRow::from_typed(self.entity_type(), &record) else {
            return fail(ErrorCode::MissingRequired, "缺少必填字段".to_string());
        };
        let primary_key = import_row.primary_key();

        // 4. 引用解析
        let (refs, introduced) = match self.resolve_references(&import_row) {
            Ok(resolved) => resolved,
            Err(unresolved) => {
                return ClassifiedRow {
                    row_no,
                    primary_key: primary_key.clone(),
                    outcome: RowOutcome::Skip(ErrorRow::new(
                        row_no,
                        primary_key,
                        ErrorCode::UnresolvedReference,
                        unresolved.join("; "),
                    )),
                    warnings: Vec::new(),
                };
            }
        };

        // 5. 自然键去重
        if let Some(duplicate) = self.conflicts.check(&natural_key(&import_row, &refs)) {
            return ClassifiedRow {
                row_no,
                primary_key: primary_key.clone(),
                outcome: RowOutcome::Skip(ErrorRow::new(
                    row_no,
                    primary_key,
                    ErrorCode::Duplicate,
                    duplicate.message(),
                )),
                warnings: Vec::new(),
            };
        }

        // 6. 创建 + 警告
        let mut warnings: Vec<ErrorRow> = introduced
            .iter()
            .map(|referent| {
                ErrorRow::new(
                    row_no,
                    primary_key.clone(),
                    ErrorCode::AutoCreateReference,
                    format!(
                        "将自动创建 {} '{}'",
                        referent.entity_label(),
                        referent.display_name()
                    ),
                )
            })
            .collect();
        warnings.extend(
            self.dq_validator
                .validate_ranges(&import_row)
                .into_iter()
                .map(|v| ErrorRow::new(row_no, primary_key.clone(), ErrorCode::ValueOutOfRange, v.message)),
        );

        ClassifiedRow {
            row_no,
            primary_key,
            outcome: RowOutcome::Create(CreatePlan {
                row: import_row,
                refs,
            }),
            warnings,
        }
    }

    /// 试运行接受一行: 待创建引用与自然键对后续行可见
    pub fn accept_planned(&mut self, row_no: usize, plan: &CreatePlan) {
        for referent in plan.refs.pending() {
            self.lookup.add_pending(&referent);
        }
        self.conflicts.register(natural_key(&plan.row, &plan.refs), row_no);
    }

    /// 执行阶段: 引用已真实创建
    pub fn referent_created(&mut self, referent: &PendingReferent, id: &str) {
        self.lookup.add_created(referent, id);
    }

    /// 执行阶段: 行已落库
    pub fn accept_created(&mut self, row_no: usize, plan: &CreatePlan, refs: &MaterializedRefs) {
        self.conflicts
            .register(natural_key(&plan.row, &refs.as_resolved()), row_no);
    }

    fn resolve_references(
        &self,
        row: &ImportRow,
    ) -> Result<(ResolvedRefs, Vec<PendingReferent>), Vec<String>> {
        let mut resolution = Resolution::new(self.auto_create_missing);
        let mut refs = ResolvedRefs::default();

        match row {
            ImportRow::Project(p) => {
                if let Some(name) = &p.client_name {
                    refs.client = resolution.resolve(
                        self.lookup.client(name),
                        Some(PendingReferent::Client { name: name.clone() }),
                        "客户",
                        name,
                    );
                }
            }
            ImportRow::Task(t) => {
                refs.project = resolution.resolve(
                    self.lookup.project(&t.project_name),
                    Some(PendingReferent::Project {
                        name: t.project_name.clone(),
                    }),
                    "项目",
                    &t.project_name,
                );
                if let Some(email) = &t.assignee_email {
                    refs.user = resolution.resolve(
                        self.lookup.user(email),
                        Some(PendingReferent::User {
                            email: email.clone(),
                        }),
                        "用户",
                        email,
                    );
                }
            }
            ImportRow::TimeEntry(e) => {
                // 只有邮箱可以自动创建用户
                let user_referent = self
                    .cleaner
                    .parse_email(&e.user)
                    .ok()
                    .map(|email| PendingReferent::User { email });
                refs.user = resolution.resolve(self.lookup.user(&e.user), user_referent, "用户", &e.user);

                if let Some(name) = &e.project_name {
                    refs.project = resolution.resolve(
                        self.lookup.project(name),
                        Some(PendingReferent::Project { name: name.clone() }),
                        "项目",
                        name,
                    );
                }
                if let Some(title) = &e.task_title {
                    let found = self.lookup.task(refs.project.as_ref(), title);
                    // 任务必须挂在项目下才能自动创建
                    let task_referent = e.project_name.as_ref().map(|project_name| {
                        PendingReferent::Task {
                            project_name: project_name.clone(),
                            title: title.clone(),
                        }
                    });
                    refs.task = resolution.resolve(found, task_referent, "任务", title);
                }
            }
            ImportRow::Client(_) | ImportRow::User(_) => {}
        }

        resolution.finish(refs)
    }
}

/// 单行引用解析的累积状态
struct Resolution {
    auto_create: bool,
    unresolved: Vec<String>,
    introduced: Vec<PendingReferent>,
}

impl Resolution {
    fn new(auto_create: bool) -> Self {
        Self {
            auto_create,
            unresolved: Vec::new(),
            introduced: Vec::new(),
        }
    }

    fn resolve(
        &mut self,
        found: Option<&RefTarget>,
        referent: Option<PendingReferent>,
        label: &str,
        value: &str,
    ) -> Option<RefTarget> {
        if let Some(target) = found {
            return Some(target.clone());
        }
        match referent {
            Some(referent) if self.auto_create => {
                self.introduced.push(referent.clone());
                Some(RefTarget::Pending(referent))
            }
            _ => {
                self.unresolved.push(format!("{} '{}' 不存在", label, value));
                None
            }
        }
    }

    fn finish(self, refs: ResolvedRefs) -> Result<(ResolvedRefs, Vec<PendingReferent>), Vec<String>> {
        if self.unresolved.is_empty() {
            Ok((refs, self.introduced))
        } else {
            Err(self.unresolved)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{ClientRecord, UserRecord};
    use crate::domain::job::ColumnMapping;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn project_mapping() -> PreparedMapping {
        PreparedMapping::prepare(
            EntityType::Projects,
            &strings(&["Project", "Client", "Budget"]),
            &[
                ColumnMapping::new("Project", "name"),
                ColumnMapping::new("Client", "clientName"),
                ColumnMapping::new("Budget", "budget"),
            ],
        )
        .unwrap()
    }

    fn snapshot() -> TenantSnapshot {
        TenantSnapshot {
            clients: vec![ClientRecord {
                id: "c1".to_string(),
                name: "Acme".to_string(),
            }],
            users: vec![UserRecord {
                id: "u1".to_string(),
                email: "ann@corp.io".to_string(),
                first_name: Some("Ann".to_string()),
                last_name: Some("Lee".to_string()),
                external_id: None,
            }],
            ..Default::default()
        }
    }

    fn error_code(row: &ClassifiedRow) -> Option<ErrorCode> {
        match &row.outcome {
            RowOutcome::Create(_) => None,
            RowOutcome::Skip(e) | RowOutcome::Fail(e) => Some(e.error_code),
        }
    }

    #[test]
    fn test_classification_order() {
        let mapping = project_mapping();
        let classifier = RowClassifier::new(&mapping, &snapshot(), false);

        // 类型错误优先于必填缺失
        let row = classifier.classify(1, &strings(&["", "Acme", "lots"]));
        assert!(matches!(row.outcome, RowOutcome::Fail(_)));
        assert_eq!(error_code(&row), Some(ErrorCode::TypeCoercion));

        let row = classifier.classify(2, &strings(&["", "Acme", "10"]));
        assert_eq!(error_code(&row), Some(ErrorCode::MissingRequired));

        let row = classifier.classify(3, &strings(&["Site", "Globex", "10"]));
        assert!(matches!(row.outcome, RowOutcome::Skip(_)));
        assert_eq!(error_code(&row), Some(ErrorCode::UnresolvedReference));

        let row = classifier.classify(4, &strings(&["Site", "acme", "10"]));
        assert_eq!(error_code(&row), None);
        assert!(row.warnings.is_empty());
    }

    #[test]
    fn test_batch_duplicate_after_accept() {
        let mapping = project_mapping();
        let mut classifier = RowClassifier::new(&mapping, &snapshot(), false);

        let first = classifier.classify(1, &strings(&["Site", "Acme", ""]));
        let RowOutcome::Create(plan) = &first.outcome else {
            panic!("expected create, got {:?}", first.outcome);
        };
        classifier.accept_planned(1, plan);

        let second = classifier.classify(2, &strings(&["SITE", "ACME", ""]));
        assert_eq!(error_code(&second), Some(ErrorCode::Duplicate));
        match second.outcome {
            RowOutcome::Skip(e) => assert_eq!(e.message, "与第 1 行重复"),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_create_warns_once_per_referent() {
        let mapping = project_mapping();
        let mut classifier = RowClassifier::new(&mapping, &snapshot(), true);

        let first = classifier.classify(1, &strings(&["Site", "Globex", "-5"]));
        let codes: Vec<ErrorCode> = first.warnings.iter().map(|w| w.error_code).collect();
        assert_eq!(
            codes,
            vec![ErrorCode::AutoCreateReference, ErrorCode::ValueOutOfRange]
        );
        let RowOutcome::Create(plan) = &first.outcome else {
            panic!("expected create");
        };
        classifier.accept_planned(1, plan);

        // 后续行看到待创建的客户，不再警告
        let second = classifier.classify(2, &strings(&["Portal", "globex", "1"]));
        assert!(matches!(second.outcome, RowOutcome::Create(_)));
        assert!(second.warnings.is_empty());
    }

    #[test]
    fn test_time_entry_user_by_name_cannot_be_auto_created() {
        let mapping = PreparedMapping::prepare(
            EntityType::TimeEntries,
            &strings(&["Who", "Day", "Hours"]),
            &[
                ColumnMapping::new("Who", "userEmail"),
                ColumnMapping::new("Day", "date"),
                ColumnMapping::new("Hours", "hours"),
            ],
        )
        .unwrap();
        let classifier = RowClassifier::new(&mapping, &snapshot(), true);

        let known = classifier.classify(1, &strings(&["Ann Lee", "2025-02-03", "2"]));
        assert!(matches!(known.outcome, RowOutcome::Create(_)));

        let by_name = classifier.classify(2, &strings(&["Bob Stone", "2025-02-03", "2"]));
        assert_eq!(error_code(&by_name), Some(ErrorCode::UnresolvedReference));

        let by_email = classifier.classify(3, &strings(&["bob@corp.io", "2025-02-03", "2"]));
        assert!(matches!(by_email.outcome, RowOutcome::Create(_)));
        assert_eq!(by_email.warnings[0].error_code, ErrorCode::AutoCreateReference);
    }
}
