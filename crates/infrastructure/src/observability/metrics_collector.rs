//! 引擎指标
//!
//! 只负责记录，不安装导出器；未安装全局 recorder 时所有记录都是空操作。

use metrics::{counter, histogram, Counter, Histogram};

pub struct MetricsCollector {
    task_executions_total: Counter,
    task_failures_total: Counter,
    task_timeouts_total: Counter,
    task_execution_duration: Histogram,
    workflow_steps_total: Counter,
    workflow_step_failures_total: Counter,
    ledger_duplicates_total: Counter,
    log_write_failures_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            task_executions_total: counter!("automation_task_executions_total"),
            task_failures_total: counter!("automation_task_failures_total"),
            task_timeouts_total: counter!("automation_task_timeouts_total"),
            task_execution_duration: histogram!("automation_task_execution_duration_seconds"),
            workflow_steps_total: counter!("automation_workflow_steps_total"),
            workflow_step_failures_total: counter!("automation_workflow_step_failures_total"),
            ledger_duplicates_total: counter!("automation_ledger_duplicates_total"),
            log_write_failures_total: counter!("automation_log_write_failures_total"),
        }
    }

    pub fn record_task_execution(&self, failed: bool, duration_seconds: f64) {
        self.task_executions_total.increment(1);
        self.task_execution_duration.record(duration_seconds);
        if failed {
            self.task_failures_total.increment(1);
        }
    }

    pub fn record_task_timeout(&self) {
        self.task_timeouts_total.increment(1);
    }

    pub fn record_workflow_step(&self, failed: bool) {
        self.workflow_steps_total.increment(1);
        if failed {
            self.workflow_step_failures_total.increment(1);
        }
    }

    pub fn record_ledger_duplicate(&self) {
        self.ledger_duplicates_total.increment(1);
    }

    pub fn record_log_write_failure(&self) {
        self.log_write_failures_total.increment(1);
    }

    /// 记录一次扫描的耗时，`sweep` 为扫描类型标签
    pub fn record_sweep_duration(&self, sweep: &'static str, duration_seconds: f64) {
        histogram!("automation_sweep_duration_seconds", "sweep" => sweep).record(duration_seconds);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
