// ==========================================
// 多租户导入引擎 - 数据质量校验器
// ==========================================
// 职责: 数值/日期范围检查，只产生警告，不阻断导入
// ==========================================

use crate::domain::record::ImportRow;

/// 工时上限（单条记录，小时）
pub const MAX_HOURS_PER_ENTRY: f64 = 24.0;

/// 范围违规（字段 + 说明）
#[derive(Debug, Clone, PartialEq)]
pub struct RangeViolation {
    pub field: &'static str,
    pub message: String,
}

fn non_negative(field: &'static str, value: Option<f64>, out: &mut Vec<RangeViolation>) {
    if let Some(v) = value {
        if v < 0.0 {
            out.push(RangeViolation {
                field,
                message: format!("{} 不应为负数: {}", field, v),
            });
        }
    }
}

pub struct DqValidator;

impl DqValidator {
    pub fn validate_ranges(&self, row: &ImportRow) -> Vec<RangeViolation> {
        let mut violations = Vec::new();
        match row {
            ImportRow::Project(p) => {
                non_negative("budget", p.budget, &mut violations);
                if let (Some(start), Some(end)) = (p.start_date, p.end_date) {
                    if end < start {
                        violations.push(RangeViolation {
                            field: "endDate",
                            message: format!("结束日期 {} 早于开始日期 {}", end, start),
                        });
                    }
                }
            }
            ImportRow::Task(t) => non_negative("estimateHours", t.estimate_hours, &mut violations),
            ImportRow::User(u) => non_negative("hourlyRate", u.hourly_rate, &mut violations),
            ImportRow::TimeEntry(e) => {
                if e.hours <= 0.0 || e.hours > MAX_HOURS_PER_ENTRY {
                    violations.push(RangeViolation {
                        field: "hours",
                        message: format!(
                            "工时 {} 超出范围 (0, {}]",
                            e.hours, MAX_HOURS_PER_ENTRY
                        ),
                    });
                }
            }
            ImportRow::Client(_) => {}
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{ProjectRow, TimeEntryRow};
    use chrono::NaiveDate;

    fn entry(hours: f64) -> ImportRow {
        ImportRow::TimeEntry(TimeEntryRow {
            user: "ann@corp.io".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            hours,
            project_name: None,
            task_title: None,
            description: None,
            billable: None,
        })
    }

    #[test]
    fn test_hours_range() {
        let validator = DqValidator;
        assert!(validator.validate_ranges(&entry(8.0)).is_empty());
        assert!(validator.validate_ranges(&entry(24.0)).is_empty());
        assert_eq!(validator.validate_ranges(&entry(0.0))[0].field, "hours");
        assert_eq!(validator.validate_ranges(&entry(25.0)).len(), 1);
    }

    #[test]
    fn test_project_budget_and_dates() {
        let row = ImportRow::Project(ProjectRow {
            name: "Website".to_string(),
            client_name: None,
            status: None,
            start_date: NaiveDate::from_ymd_opt(2025, 5, 1),
            end_date: NaiveDate::from_ymd_opt(2025, 4, 1),
            budget: Some(-10.0),
            description: None,
        });
        let fields: Vec<&str> = DqValidator
            .validate_ranges(&row)
            .iter()
            .map(|v| v.field)
            .collect();
        assert_eq!(fields, vec!["budget", "endDate"]);
    }
}
