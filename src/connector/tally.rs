// ==========================================
// 多租户导入引擎 - 连接器计数
// ==========================================
// 每个处理单元（客户/项目/任务/用户）恰好落入一个桶:
// created / updated / skipped / failed
// 不变量: 四桶之和 == 已编号单元数
// ==========================================

use crate::domain::connector::{DryRunResult, EntityEstimate};
use crate::domain::entity::UpsertOutcome;
use crate::domain::job::{ErrorRow, ExecutionSummary};
use crate::domain::types::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Clients,
    Projects,
    Tasks,
    Users,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindTally {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl KindTally {
    fn estimate(&self) -> EntityEstimate {
        EntityEstimate {
            would_create: self.created,
            would_update: self.updated,
            would_skip: self.skipped + self.failed,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunTally {
    pub clients: KindTally,
    pub projects: KindTally,
    pub tasks: KindTally,
    pub users: KindTally,
    errors: Vec<ErrorRow>,
    warnings: Vec<ErrorRow>,
    items: usize,
}

impl RunTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为下一个处理单元编号（从 1 开始）
    pub fn next_item(&mut self) -> usize {
        self.items += 1;
        self.items
    }

    fn bucket(&mut self, bucket: Bucket) -> &mut KindTally {
        match bucket {
            Bucket::Clients => &mut self.clients,
            Bucket::Projects => &mut self.projects,
            Bucket::Tasks => &mut self.tasks,
            Bucket::Users => &mut self.users,
        }
    }

    pub fn record(&mut self, bucket: Bucket, outcome: UpsertOutcome) {
        let tally = self.bucket(bucket);
        match outcome {
            UpsertOutcome::Created => tally.created += 1,
            UpsertOutcome::Updated => tally.updated += 1,
        }
    }

    pub fn skip(&mut self, bucket: Bucket) {
        self.bucket(bucket).skipped += 1;
    }

    /// 跳过并记录原因
    pub fn skip_with(
        &mut self,
        bucket: Bucket,
        row: usize,
        key: &str,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        self.skip(bucket);
        self.errors.push(ErrorRow::new(row, key, code, message));
    }

    pub fn fail(
        &mut self,
        bucket: Bucket,
        row: usize,
        key: &str,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        self.bucket(bucket).failed += 1;
        self.errors.push(ErrorRow::new(row, key, code, message));
    }

    pub fn warn(&mut self, row: usize, key: &str, code: ErrorCode, message: impl Into<String>) {
        self.warnings.push(ErrorRow::new(row, key, code, message));
    }

    pub fn has_failures(&self) -> bool {
        [self.clients, self.projects, self.tasks, self.users]
            .iter()
            .any(|t| t.failed > 0)
    }

    pub fn summary(&self, elapsed_ms: u64) -> ExecutionSummary {
        let kinds = [self.clients, self.projects, self.tasks, self.users];
        ExecutionSummary {
            created: kinds.iter().map(|t| t.created).sum(),
            updated: kinds.iter().map(|t| t.updated).sum(),
            skipped: kinds.iter().map(|t| t.skipped).sum(),
            errors: kinds.iter().map(|t| t.failed).sum(),
            total_rows: self.items,
            elapsed_ms,
        }
    }

    /// 错误与警告合并，按单元编号排序
    pub fn error_log(&self) -> Vec<ErrorRow> {
        let mut log: Vec<ErrorRow> = self
            .errors
            .iter()
            .chain(self.warnings.iter())
            .cloned()
            .collect();
        log.sort_by_key(|e| e.row);
        log
    }

    pub fn into_dry_run(self) -> DryRunResult {
        DryRunResult {
            clients: self.clients.estimate(),
            projects: self.projects.estimate(),
            tasks: self.tasks.estimate(),
            users: self.users.estimate(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_consistent() {
        let mut tally = RunTally::new();
        tally.next_item();
        tally.record(Bucket::Clients, UpsertOutcome::Created);
        let row = tally.next_item();
        tally.fail(Bucket::Projects, row, "p2", ErrorCode::UnmappedClient, "未映射");
        let row = tally.next_item();
        tally.skip_with(Bucket::Tasks, row, "t1", ErrorCode::UnresolvedReference, "无负责人");
        tally.next_item();
        tally.record(Bucket::Users, UpsertOutcome::Updated);

        let summary = tally.summary(5);
        assert!(summary.is_consistent());
        assert_eq!(summary.total_rows, 4);
        assert_eq!(summary.errors, 1);
        assert!(tally.has_failures());
    }

    #[test]
    fn test_error_log_sorted_by_row() {
        let mut tally = RunTally::new();
        tally.fail(Bucket::Tasks, 3, "t3", ErrorCode::PersistenceError, "写入失败");
        tally.warn(1, "t1", ErrorCode::AssigneeUnassigned, "未分配");
        let rows: Vec<usize> = tally.error_log().iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![1, 3]);
    }

    #[test]
    fn test_dry_run_folds_failures_into_skip() {
        let mut tally = RunTally::new();
        tally.fail(Bucket::Projects, 1, "p1", ErrorCode::UnmappedClient, "未映射");
        tally.record(Bucket::Projects, UpsertOutcome::Created);
        let result = tally.into_dry_run();
        assert_eq!(result.projects.would_skip, 1);
        assert_eq!(result.projects.would_create, 1);
        assert_eq!(result.errors.len(), 1);
    }
}
