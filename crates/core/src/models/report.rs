use serde::{Deserialize, Serialize};

use super::{CompletedStepStatus, LedgerWrite, ScheduledTaskStatus};

/// 一次定时任务扫描的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// 扫描到的候选任务数
    pub examined: usize,
    /// 实际认领并处理的任务数
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// 未到期、已在运行或认领失败而跳过的任务数
    pub skipped: usize,
    /// 处理时出现定义错误或存储错误的任务数
    pub errors: usize,
}

impl SweepReport {
    pub fn record_processed(&mut self, status: ScheduledTaskStatus) {
        self.processed += 1;
        match status {
            ScheduledTaskStatus::Completed => self.completed += 1,
            ScheduledTaskStatus::Failed => self.failed += 1,
            ScheduledTaskStatus::Pending | ScheduledTaskStatus::Running => {}
        }
    }
}

/// 一次工作流步骤的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 账本中已有 COMPLETED 记录，未执行任务
    AlreadyCompleted,
    /// 执行了任务并写入账本
    Executed {
        status: CompletedStepStatus,
        write: LedgerWrite,
    },
}

impl StepOutcome {
    pub fn was_executed(&self) -> bool {
        matches!(self, StepOutcome::Executed { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepOutcome::Executed {
                status: CompletedStepStatus::Failed,
                ..
            }
        )
    }
}

/// 一次日期偏移扫描的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSweepReport {
    pub object_classes: usize,
    /// 聚合查询返回的对象实例数
    pub candidates: usize,
    /// 触发执行的步骤数
    pub fired: usize,
    /// 触发后任务执行失败的步骤数
    pub failed: usize,
    pub errors: usize,
}

impl WorkflowSweepReport {
    pub fn merge(&mut self, other: &WorkflowSweepReport) {
        self.object_classes += other.object_classes;
        self.candidates += other.candidates;
        self.fired += other.fired;
        self.failed += other.failed;
        self.errors += other.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_counts_terminal_statuses() {
        let mut report = SweepReport::default();
        report.record_processed(ScheduledTaskStatus::Completed);
        report.record_processed(ScheduledTaskStatus::Failed);
        report.record_processed(ScheduledTaskStatus::Completed);
        assert_eq!(report.processed, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_step_outcome_flags() {
        let failed = StepOutcome::Executed {
            status: CompletedStepStatus::Failed,
            write: LedgerWrite::Inserted,
        };
        assert!(failed.was_executed());
        assert!(failed.is_failure());
        assert!(!StepOutcome::AlreadyCompleted.was_executed());
    }
}
