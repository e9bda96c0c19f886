//! 对象工作流服务
//!
//! 三种触发方式共用同一个执行入口 `process_workflow_step`：
//! - 手动触发：调用方直接指定步骤与触发值
//! - 属性变更触发：对象保存后比较新旧字段值
//! - 日期偏移触发：按对象类型批量扫描日期字段
//!
//! 同一 (对象类型, 主键, 步骤, 触发值) 的 COMPLETED 记录阻止再次执行，
//! FAILED 记录不阻止重试。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use automation_core::{
    models::{
        CompletedStepKey, CompletedStepStatus, DueStepCandidate, LedgerWrite,
        ObjectWorkflowCompletedStep, ObjectWorkflowStep, StepOutcome, StepTrigger,
        TaskConfiguration, WorkflowObject, WorkflowSweepReport, DEFAULT_TRIGGER_VALUE,
    },
    traits::{
        render_task_error, render_task_output, CompletedStepRepository, DueStepQuery,
        TaskResolver, WorkflowStepRepository, WorkflowStepService,
    },
    AutomationError, AutomationResult, Clock,
};
use automation_infrastructure::{MetricsCollector, StructuredLogger};

pub struct ObjectWorkflowService {
    step_repo: Arc<dyn WorkflowStepRepository>,
    ledger: Arc<dyn CompletedStepRepository>,
    due_query: Arc<dyn DueStepQuery>,
    registry: Arc<dyn TaskResolver>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl ObjectWorkflowService {
    pub fn new(
        step_repo: Arc<dyn WorkflowStepRepository>,
        ledger: Arc<dyn CompletedStepRepository>,
        due_query: Arc<dyn DueStepQuery>,
        registry: Arc<dyn TaskResolver>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            step_repo,
            ledger,
            due_query,
            registry,
            clock,
            metrics,
        }
    }

    async fn record_outcome(
        &self,
        completed: &ObjectWorkflowCompletedStep,
    ) -> AutomationResult<LedgerWrite> {
        match self.ledger.record(completed).await {
            Ok(write) => Ok(write),
            Err(e) if e.is_unique_violation() => Ok(LedgerWrite::DuplicateIgnored),
            Err(e) => Err(e),
        }
    }

    /// 对一组按偏移降序排列的步骤，处理一个候选对象；返回触发的步骤结果
    async fn fire_first_due_step(
        &self,
        object_class: &str,
        steps: &[(Duration, ObjectWorkflowStep)],
        candidate: &DueStepCandidate,
        now: DateTime<Utc>,
    ) -> AutomationResult<Option<StepOutcome>> {
        let Some(watched_value) = candidate.watched_value.as_deref() else {
            return Ok(None);
        };
        let Some(watched_date) = parse_watched_date(watched_value) else {
            warn!(
                "对象 {}#{} 的日期字段值无法解析: '{}'",
                object_class, candidate.object_pk, watched_value
            );
            return Ok(None);
        };

        let elapsed = now.signed_duration_since(watched_date);
        for (offset, step) in steps {
            if candidate.last_completed_step_key.as_deref() == Some(step.step_key.as_str()) {
                break;
            }
            if elapsed >= *offset {
                let outcome = self
                    .process_workflow_step(
                        object_class,
                        &candidate.object_pk,
                        &step.step_key,
                        Some(watched_value),
                    )
                    .await?;
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl WorkflowStepService for ObjectWorkflowService {
    #[instrument(skip(self), fields(workflow.object_class = object_class, workflow.step_key = step_key))]
    async fn process_workflow_step(
        &self,
        object_class: &str,
        object_pk: &str,
        step_key: &str,
        trigger_value: Option<&str>,
    ) -> AutomationResult<StepOutcome> {
        let key = CompletedStepKey::new(
            object_class,
            object_pk,
            step_key,
            trigger_value.unwrap_or(DEFAULT_TRIGGER_VALUE),
        );

        if let Some(existing) = self.ledger.find(&key).await? {
            if existing.is_completed() {
                StructuredLogger::log_workflow_step_skipped(&key, "already_completed");
                return Ok(StepOutcome::AlreadyCompleted);
            }
            debug!("步骤 {} 上次执行失败，重新执行", key);
        }

        let step = self
            .step_repo
            .find(object_class, step_key)
            .await?
            .ok_or_else(|| AutomationError::step_not_found(object_class, step_key))?;
        let implementation = self.registry.resolve(&step.task_identifier)?;

        let configuration = step_configuration(&step, &key)?;
        let (status, log_output) = match implementation.run(&configuration).await {
            Ok(value) => (CompletedStepStatus::Completed, render_task_output(&value)),
            Err(e) => (CompletedStepStatus::Failed, Some(render_task_error(&e))),
        };
        self.metrics
            .record_workflow_step(status == CompletedStepStatus::Failed);

        let completed = ObjectWorkflowCompletedStep {
            key,
            status,
            completed_time: self.clock.now(),
            log_output,
        };
        let write = self.record_outcome(&completed).await?;
        if write == LedgerWrite::DuplicateIgnored {
            self.metrics.record_ledger_duplicate();
            StructuredLogger::log_ledger_duplicate_ignored(&completed.key);
        }

        StructuredLogger::log_workflow_step_completed(
            &completed.key,
            &step.task_identifier,
            status,
            completed.log_output.as_deref(),
        );
        Ok(StepOutcome::Executed { status, write })
    }

    async fn process_property_change_workflow_steps(
        &self,
        object_class: &str,
        object_pk: &str,
        previous_object: Option<&(dyn WorkflowObject + Sync)>,
        new_object: Option<&(dyn WorkflowObject + Sync)>,
    ) -> AutomationResult<Vec<StepOutcome>> {
        let Some(new_object) = new_object else {
            debug!("对象 {}#{} 已删除，跳过属性变更检查", object_class, object_pk);
            return Ok(Vec::new());
        };

        let steps = self
            .step_repo
            .find_by_trigger(object_class, StepTrigger::PropertyChange)
            .await?;
        let now = self.clock.now();

        // 单个步骤的定义错误不影响其余步骤，全部处理完后返回第一个错误
        let mut outcomes = Vec::new();
        let mut first_error = None;
        for step in &steps {
            let result = match step.watched_field() {
                Ok(field) => {
                    let previous_value = previous_object.and_then(|o| o.field_value(field));
                    let new_value = new_object.field_value(field);
                    if previous_value == new_value {
                        continue;
                    }

                    debug!(
                        "对象 {}#{} 字段 {} 发生变化，触发步骤 {}",
                        object_class, object_pk, field, step.step_key
                    );
                    let trigger_value = property_change_trigger_value(
                        previous_value.as_ref(),
                        new_value.as_ref(),
                        now,
                    );
                    self.process_workflow_step(
                        object_class,
                        object_pk,
                        &step.step_key,
                        Some(&trigger_value),
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    StructuredLogger::log_system_error(
                        "workflow",
                        &format!("property_change({}#{}/{})", object_class, object_pk, step.step_key),
                        &e,
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    #[instrument(skip(self))]
    async fn process_due_workflow_steps_for_object_class(
        &self,
        object_class: &str,
    ) -> AutomationResult<WorkflowSweepReport> {
        let steps = self
            .step_repo
            .find_by_trigger(object_class, StepTrigger::DateOffsetDays)
            .await?;

        let mut report = WorkflowSweepReport {
            object_classes: 1,
            ..WorkflowSweepReport::default()
        };

        let mut groups: BTreeMap<String, Vec<(Duration, ObjectWorkflowStep)>> = BTreeMap::new();
        for step in steps {
            match step.date_offset() {
                Ok(trigger) => groups
                    .entry(trigger.field)
                    .or_default()
                    .push((trigger.offset, step)),
                Err(e) => {
                    report.errors += 1;
                    StructuredLogger::log_system_error(
                        "workflow",
                        &format!("parse_date_offset({}/{})", object_class, step.step_key),
                        &e,
                    );
                }
            }
        }

        let now = self.clock.now();
        for (field, mut group) in groups {
            group.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.step_key.cmp(&b.1.step_key)));
            let ranked_step_keys: Vec<String> =
                group.iter().map(|(_, step)| step.step_key.clone()).collect();

            let candidates = self
                .due_query
                .find_due_step_candidates(object_class, &field, &ranked_step_keys)
                .await?;
            debug!(
                "对象类型 {} 字段 {} 返回 {} 个候选对象",
                object_class,
                field,
                candidates.len()
            );
            report.candidates += candidates.len();

            for candidate in &candidates {
                match self
                    .fire_first_due_step(object_class, &group, candidate, now)
                    .await
                {
                    Ok(Some(outcome)) if outcome.was_executed() => {
                        report.fired += 1;
                        if outcome.is_failure() {
                            report.failed += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        report.errors += 1;
                        StructuredLogger::log_system_error(
                            "workflow",
                            &format!("fire_due_step({}#{})", object_class, candidate.object_pk),
                            &e,
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn sweep_due_workflow_steps(
        &self,
        object_classes: &[String],
    ) -> AutomationResult<WorkflowSweepReport> {
        let timer = Instant::now();
        let mut report = WorkflowSweepReport::default();

        for object_class in object_classes {
            match self
                .process_due_workflow_steps_for_object_class(object_class)
                .await
            {
                Ok(class_report) => report.merge(&class_report),
                Err(e) => {
                    report.object_classes += 1;
                    report.errors += 1;
                    StructuredLogger::log_system_error(
                        "workflow",
                        &format!("sweep_object_class({object_class})"),
                        &e,
                    );
                }
            }
        }

        self.metrics
            .record_sweep_duration("workflow_steps", timer.elapsed().as_secs_f64());
        info!(
            "工作流日期偏移扫描完成: {} 个对象类型，{} 个候选，触发 {} 个步骤",
            report.object_classes, report.candidates, report.fired
        );
        Ok(report)
    }
}

/// 传给任务实现的配置：步骤自身的配置，加上步骤定义、对象主键和触发值
pub fn step_configuration(
    step: &ObjectWorkflowStep,
    key: &CompletedStepKey,
) -> AutomationResult<TaskConfiguration> {
    let mut configuration = step.task_configuration.clone();
    configuration.insert("step".to_string(), serde_json::to_value(step)?);
    configuration.insert(
        "object_pk".to_string(),
        Value::String(key.object_pk.clone()),
    );
    configuration.insert(
        "trigger_value".to_string(),
        Value::String(key.trigger_value.clone()),
    );
    Ok(configuration)
}

/// 属性变更的触发值
///
/// 由旧值、新值和精确到秒的当前时间计算 SHA-256。每次变更得到新的触发值，
/// 同一秒内重复保存同一变更会落到同一条完成记录上。
pub fn property_change_trigger_value(
    previous: Option<&Value>,
    new: Option<&Value>,
    now: DateTime<Utc>,
) -> String {
    let render = |value: Option<&Value>| value.map_or_else(|| "null".to_string(), Value::to_string);
    let material = format!("{}|{}|{}", render(previous), render(new), now.timestamp());
    format!("{:x}", Sha256::digest(material.as_bytes()))
}

/// 解析日期字段值：RFC 3339、`YYYY-MM-DD HH:MM:SS[.f][+zz:zz]` 或 `YYYY-MM-DD`，无时区时按 UTC
pub fn parse_watched_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_watched_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(parse_watched_date("2024-03-10"), Some(expected));
        assert_eq!(parse_watched_date("2024-03-10 00:00:00"), Some(expected));
        assert_eq!(parse_watched_date("2024-03-10T00:00:00Z"), Some(expected));
        assert_eq!(parse_watched_date("2024-03-10 02:00:00+02:00"), Some(expected));
        assert_eq!(parse_watched_date("not a date"), None);
    }

    #[test]
    fn test_property_change_trigger_value() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let a = property_change_trigger_value(Some(&json!("draft")), Some(&json!("sent")), now);
        let same_second = property_change_trigger_value(
            Some(&json!("draft")),
            Some(&json!("sent")),
            now + Duration::milliseconds(400),
        );
        let next_second = property_change_trigger_value(
            Some(&json!("draft")),
            Some(&json!("sent")),
            now + Duration::seconds(1),
        );
        let other_change = property_change_trigger_value(None, Some(&json!("sent")), now);

        assert_eq!(a.len(), 64);
        assert_eq!(a, same_second);
        assert_ne!(a, next_second);
        assert_ne!(a, other_change);
    }

    #[test]
    fn test_step_configuration_includes_context() {
        let mut step = ObjectWorkflowStep::new("Account", "welcome", StepTrigger::Manual, "send_mail");
        step.task_configuration
            .insert("template".to_string(), json!("welcome"));
        let key = CompletedStepKey::new("Account", "42", "welcome", DEFAULT_TRIGGER_VALUE);

        let configuration = step_configuration(&step, &key).unwrap();
        assert_eq!(configuration["template"], json!("welcome"));
        assert_eq!(configuration["object_pk"], json!("42"));
        assert_eq!(configuration["trigger_value"], json!("N/A"));
        assert_eq!(configuration["step"]["step_key"], json!("welcome"));
    }
}
