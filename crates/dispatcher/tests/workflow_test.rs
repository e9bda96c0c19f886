use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use sqlx::error::{DatabaseError, ErrorKind};

use automation_core::{
    models::{
        CompletedStepKey, CompletedStepStatus, LedgerWrite, ObjectWorkflowCompletedStep,
        StepOutcome, DEFAULT_TRIGGER_VALUE,
    },
    traits::{CompletedStepRepository, WorkflowStepRepository, WorkflowStepService},
    AutomationError, AutomationResult, FixedClock, TaskRegistry,
};
use automation_dispatcher::ObjectWorkflowService;
use automation_infrastructure::MetricsCollector;
use automation_testing_utils::{
    base_time, FailingTask, InMemoryWorkflowStore, RecordingTask, WorkflowStepBuilder,
};

struct Fixture {
    store: Arc<InMemoryWorkflowStore>,
    clock: Arc<FixedClock>,
    service: ObjectWorkflowService,
}

fn fixture(registry: TaskRegistry) -> Fixture {
    let store = Arc::new(InMemoryWorkflowStore::new());
    let clock = Arc::new(FixedClock::new(base_time()));
    let service = ObjectWorkflowService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(registry),
        clock.clone(),
        Arc::new(MetricsCollector::new()),
    );
    Fixture {
        store,
        clock,
        service,
    }
}

fn executed(status: CompletedStepStatus, write: LedgerWrite) -> StepOutcome {
    StepOutcome::Executed { status, write }
}

#[tokio::test]
async fn test_manual_step_runs_once() {
    let mail = RecordingTask::new().with_output(json!({"message_id": "m-1"}));
    let fx = fixture(TaskRegistry::builder().register("send_mail", mail.clone()).build());
    let mut configuration = serde_json::Map::new();
    configuration.insert("template".to_string(), json!("welcome"));
    fx.store
        .create(
            &WorkflowStepBuilder::new("Account", "welcome")
                .with_task("send_mail")
                .with_configuration(configuration)
                .build(),
        )
        .await
        .unwrap();

    let first = fx
        .service
        .process_workflow_step("Account", "42", "welcome", None)
        .await
        .unwrap();
    assert_eq!(
        first,
        executed(CompletedStepStatus::Completed, LedgerWrite::Inserted)
    );

    let second = fx
        .service
        .process_workflow_step("Account", "42", "welcome", None)
        .await
        .unwrap();
    assert_eq!(second, StepOutcome::AlreadyCompleted);
    assert_eq!(mail.calls(), 1);

    let seen = mail.last_configuration().unwrap();
    assert_eq!(seen["template"], json!("welcome"));
    assert_eq!(seen["object_pk"], json!("42"));
    assert_eq!(seen["trigger_value"], json!(DEFAULT_TRIGGER_VALUE));
    assert_eq!(seen["step"]["task_identifier"], json!("send_mail"));

    let entry = fx
        .store
        .ledger_entry(&CompletedStepKey::new(
            "Account",
            "42",
            "welcome",
            DEFAULT_TRIGGER_VALUE,
        ))
        .unwrap();
    assert!(entry.is_completed());
    assert_eq!(entry.completed_time, base_time());
    assert_eq!(entry.log_output.as_deref(), Some(r#"{"message_id":"m-1"}"#));

    // 不同的对象或触发值各自独立
    fx.service
        .process_workflow_step("Account", "43", "welcome", None)
        .await
        .unwrap();
    fx.service
        .process_workflow_step("Account", "42", "welcome", Some("campaign-2"))
        .await
        .unwrap();
    assert_eq!(mail.calls(), 3);
}

#[tokio::test]
async fn test_failed_step_is_retried() {
    let flaky = FailingTask::times(1, "smtp unavailable");
    let fx = fixture(TaskRegistry::builder().register("send_mail", flaky.clone()).build());
    fx.store
        .create(
            &WorkflowStepBuilder::new("Account", "welcome")
                .with_task("send_mail")
                .build(),
        )
        .await
        .unwrap();

    let first = fx
        .service
        .process_workflow_step("Account", "1", "welcome", None)
        .await
        .unwrap();
    assert_eq!(
        first,
        executed(CompletedStepStatus::Failed, LedgerWrite::Inserted)
    );
    let key = CompletedStepKey::new("Account", "1", "welcome", DEFAULT_TRIGGER_VALUE);
    assert!(fx
        .store
        .ledger_entry(&key)
        .unwrap()
        .log_output
        .unwrap()
        .contains("smtp unavailable"));

    let second = fx
        .service
        .process_workflow_step("Account", "1", "welcome", None)
        .await
        .unwrap();
    assert_eq!(
        second,
        executed(CompletedStepStatus::Completed, LedgerWrite::Replaced)
    );

    let third = fx
        .service
        .process_workflow_step("Account", "1", "welcome", None)
        .await
        .unwrap();
    assert_eq!(third, StepOutcome::AlreadyCompleted);
    assert_eq!(flaky.calls(), 2);
    assert_eq!(fx.store.ledger_entries().len(), 1);
}

#[tokio::test]
async fn test_definition_errors_propagate() {
    let fx = fixture(TaskRegistry::default());
    fx.store
        .create(
            &WorkflowStepBuilder::new("Account", "welcome")
                .with_task("unregistered")
                .build(),
        )
        .await
        .unwrap();

    let missing_step = fx
        .service
        .process_workflow_step("Account", "1", "nope", None)
        .await;
    assert!(matches!(
        missing_step,
        Err(AutomationError::StepNotFound { .. })
    ));

    let missing_task = fx
        .service
        .process_workflow_step("Account", "1", "welcome", None)
        .await;
    assert!(matches!(
        missing_task,
        Err(AutomationError::TaskImplementationNotFound { .. })
    ));
    assert!(fx.store.ledger_entries().is_empty());
}

#[tokio::test]
async fn test_property_change_triggers_on_changed_value() {
    let notify = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("notify", notify.clone()).build());
    fx.store
        .create(
            &WorkflowStepBuilder::new("Invoice", "on_status")
                .property_change("status")
                .with_task("notify")
                .build(),
        )
        .await
        .unwrap();

    let draft = json!({"status": "draft", "total": 10});
    let draft_more = json!({"status": "draft", "total": 12});
    let sent = json!({"status": "sent", "total": 12});

    let unchanged = fx
        .service
        .process_property_change_workflow_steps("Invoice", "9", Some(&draft), Some(&draft_more))
        .await
        .unwrap();
    assert!(unchanged.is_empty());

    let changed = fx
        .service
        .process_property_change_workflow_steps("Invoice", "9", Some(&draft_more), Some(&sent))
        .await
        .unwrap();
    assert_eq!(
        changed,
        vec![executed(CompletedStepStatus::Completed, LedgerWrite::Inserted)]
    );

    // 同一秒内重复提交同一变更不会再次执行
    let repeated = fx
        .service
        .process_property_change_workflow_steps("Invoice", "9", Some(&draft_more), Some(&sent))
        .await
        .unwrap();
    assert_eq!(repeated, vec![StepOutcome::AlreadyCompleted]);
    assert_eq!(notify.calls(), 1);

    fx.clock.advance(Duration::seconds(1));
    fx.service
        .process_property_change_workflow_steps("Invoice", "9", Some(&draft_more), Some(&sent))
        .await
        .unwrap();
    assert_eq!(notify.calls(), 2);

    let trigger_value = notify.last_configuration().unwrap()["trigger_value"].clone();
    assert_eq!(trigger_value.as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_property_change_creation_and_deletion() {
    let notify = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("notify", notify.clone()).build());
    fx.store
        .create(
            &WorkflowStepBuilder::new("Invoice", "on_status")
                .property_change("status")
                .with_task("notify")
                .build(),
        )
        .await
        .unwrap();

    let sent = json!({"status": "sent"});
    let created = fx
        .service
        .process_property_change_workflow_steps("Invoice", "1", None, Some(&sent))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);

    let no_status = json!({"total": 1});
    let created_without_value = fx
        .service
        .process_property_change_workflow_steps("Invoice", "2", None, Some(&no_status))
        .await
        .unwrap();
    assert!(created_without_value.is_empty());

    let deleted = fx
        .service
        .process_property_change_workflow_steps("Invoice", "1", Some(&sent), None)
        .await
        .unwrap();
    assert!(deleted.is_empty());
    assert_eq!(notify.calls(), 1);
}

#[tokio::test]
async fn test_date_offset_steps_fire_in_order() {
    let reminder = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("remind", reminder.clone()).build());
    for (step_key, offset) in [("before_7", -7), ("on_day", 0), ("after_3", 3)] {
        fx.store
            .create(
                &WorkflowStepBuilder::new("Subscription", step_key)
                    .date_offset("expires_at", offset)
                    .with_task("remind")
                    .build(),
            )
            .await
            .unwrap();
    }
    fx.store
        .put_object("Subscription", "1", json!({"expires_at": "2024-03-12"}));
    fx.store
        .put_object("Subscription", "2", json!({"expires_at": null}));

    let step_of_last_call = |task: &RecordingTask| {
        task.last_configuration().unwrap()["step"]["step_key"]
            .as_str()
            .unwrap()
            .to_string()
    };

    // 到期前两天：只满足 -7 天的步骤
    let report = fx
        .service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.fired, 1);
    assert_eq!(step_of_last_call(&reminder), "before_7");
    assert_eq!(
        reminder.last_configuration().unwrap()["trigger_value"],
        json!("2024-03-12")
    );

    let report = fx
        .service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(report.fired, 0);

    fx.clock
        .set(Utc.with_ymd_and_hms(2024, 3, 12, 9, 0, 0).unwrap());
    let report = fx
        .service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(report.fired, 1);
    assert_eq!(step_of_last_call(&reminder), "on_day");

    fx.clock
        .set(Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap());
    fx.service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(step_of_last_call(&reminder), "after_3");

    let report = fx
        .service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(report.fired, 0);
    assert_eq!(reminder.calls(), 3);
}

#[tokio::test]
async fn test_date_offset_fires_latest_step_and_restarts_on_new_value() {
    let reminder = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("remind", reminder.clone()).build());
    for (step_key, offset) in [("before_7", -7), ("after_3", 3)] {
        fx.store
            .create(
                &WorkflowStepBuilder::new("Subscription", step_key)
                    .date_offset("expires_at", offset)
                    .with_task("remind")
                    .build(),
            )
            .await
            .unwrap();
    }
    fx.store
        .put_object("Subscription", "5", json!({"expires_at": "2024-01-01 00:00:00"}));

    // 早已过期：直接触发偏移最大的步骤，之前的步骤不补发
    fx.service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    fx.service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(reminder.calls(), 1);
    assert_eq!(
        reminder.last_configuration().unwrap()["step"]["step_key"],
        json!("after_3")
    );

    // 续期后日期变化，按新值重新开始
    fx.store
        .put_object("Subscription", "5", json!({"expires_at": "2024-03-15"}));
    fx.service
        .process_due_workflow_steps_for_object_class("Subscription")
        .await
        .unwrap();
    assert_eq!(reminder.calls(), 2);
    assert_eq!(
        reminder.last_configuration().unwrap()["step"]["step_key"],
        json!("before_7")
    );
}

#[tokio::test]
async fn test_sweep_reports_errors_per_class() {
    let reminder = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("remind", reminder.clone()).build());
    fx.store
        .create(
            &WorkflowStepBuilder::new("Subscription", "on_day")
                .date_offset("expires_at", 0)
                .with_task("remind")
                .build(),
        )
        .await
        .unwrap();
    fx.store
        .create(
            &WorkflowStepBuilder::new("Subscription", "broken")
                .date_offset("expires_at", 0)
                .with_trigger_data("expires_at")
                .with_task("remind")
                .build(),
        )
        .await
        .unwrap();
    fx.store
        .put_object("Subscription", "1", json!({"expires_at": "2024-03-01"}));
    fx.store
        .create(
            &WorkflowStepBuilder::new("Unmapped", "on_day")
                .date_offset("due_at", 0)
                .with_task("remind")
                .build(),
        )
        .await
        .unwrap();

    let report = fx
        .service
        .sweep_due_workflow_steps(&["Subscription".to_string(), "Unmapped".to_string()])
        .await
        .unwrap();
    assert_eq!(report.object_classes, 2);
    assert_eq!(report.candidates, 1);
    assert_eq!(report.fired, 1);
    assert_eq!(report.errors, 2);
    assert_eq!(reminder.calls(), 1);
}

#[tokio::test]
async fn test_out_of_range_offset_does_not_abort_sweep() {
    let reminder = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("remind", reminder.clone()).build());
    for (step_key, offset) in [("on_day", 0), ("far_future", 999_999_999_999_999)] {
        fx.store
            .create(
                &WorkflowStepBuilder::new("Subscription", step_key)
                    .date_offset("expires_at", offset)
                    .with_task("remind")
                    .build(),
            )
            .await
            .unwrap();
    }
    fx.store
        .put_object("Subscription", "1", json!({"expires_at": "2024-03-01"}));

    let report = fx
        .service
        .sweep_due_workflow_steps(&["Subscription".to_string()])
        .await
        .unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.fired, 1);
    assert_eq!(
        reminder.last_configuration().unwrap()["step"]["step_key"],
        json!("on_day")
    );
}

#[tokio::test]
async fn test_property_change_evaluates_all_steps_before_reporting_error() {
    let notify = RecordingTask::new();
    let fx = fixture(TaskRegistry::builder().register("notify", notify.clone()).build());
    fx.store
        .create(
            &WorkflowStepBuilder::new("Invoice", "a_broken")
                .property_change("status")
                .with_trigger_data("  ")
                .with_task("notify")
                .build(),
        )
        .await
        .unwrap();
    fx.store
        .create(
            &WorkflowStepBuilder::new("Invoice", "b_on_status")
                .property_change("status")
                .with_task("notify")
                .build(),
        )
        .await
        .unwrap();
    fx.store
        .create(
            &WorkflowStepBuilder::new("Invoice", "c_missing_task")
                .property_change("status")
                .with_task("unregistered")
                .build(),
        )
        .await
        .unwrap();

    let draft = json!({"status": "draft"});
    let sent = json!({"status": "sent"});
    let result = fx
        .service
        .process_property_change_workflow_steps("Invoice", "3", Some(&draft), Some(&sent))
        .await;

    assert!(result.is_err());
    assert_eq!(notify.calls(), 1);
    let completed: Vec<_> = fx
        .store
        .ledger_entries()
        .into_iter()
        .filter(|e| e.key.step_key == "b_on_status")
        .collect();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].is_completed());
}

#[derive(Debug)]
struct UniqueConstraintFailed;

impl fmt::Display for UniqueConstraintFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UNIQUE constraint failed: object_workflow_completed_steps")
    }
}

impl std::error::Error for UniqueConstraintFailed {}

impl DatabaseError for UniqueConstraintFailed {
    fn message(&self) -> &str {
        "UNIQUE constraint failed: object_workflow_completed_steps"
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::UniqueViolation
    }
}

enum Race {
    /// 另一个处理器在本次写入之前写入了 COMPLETED
    CompletedFirst,
    /// 存储层直接报告唯一约束冲突
    UniqueViolation,
}

/// 在 `find` 与 `record` 之间模拟并发写入的账本
struct RacingLedger {
    inner: Arc<InMemoryWorkflowStore>,
    race: Race,
}

#[async_trait]
impl CompletedStepRepository for RacingLedger {
    async fn find(
        &self,
        key: &CompletedStepKey,
    ) -> AutomationResult<Option<ObjectWorkflowCompletedStep>> {
        CompletedStepRepository::find(self.inner.as_ref(), key).await
    }

    async fn record(&self, step: &ObjectWorkflowCompletedStep) -> AutomationResult<LedgerWrite> {
        match self.race {
            Race::CompletedFirst => {
                let mut winner = step.clone();
                winner.status = CompletedStepStatus::Completed;
                winner.log_output = Some("winner".to_string());
                self.inner.record(&winner).await?;
                self.inner.record(step).await
            }
            Race::UniqueViolation => Err(AutomationError::Database(sqlx::Error::Database(
                Box::new(UniqueConstraintFailed),
            ))),
        }
    }

    async fn find_for_object(
        &self,
        object_class: &str,
        object_pk: &str,
    ) -> AutomationResult<Vec<ObjectWorkflowCompletedStep>> {
        self.inner.find_for_object(object_class, object_pk).await
    }
}

async fn run_racing_step(race: Race) -> (StepOutcome, Arc<InMemoryWorkflowStore>, RecordingTask) {
    let mail = RecordingTask::new();
    let store = Arc::new(InMemoryWorkflowStore::new());
    store
        .create(
            &WorkflowStepBuilder::new("Account", "welcome")
                .with_task("send_mail")
                .build(),
        )
        .await
        .unwrap();
    let service = ObjectWorkflowService::new(
        store.clone(),
        Arc::new(RacingLedger {
            inner: store.clone(),
            race,
        }),
        store.clone(),
        Arc::new(TaskRegistry::builder().register("send_mail", mail.clone()).build()),
        Arc::new(FixedClock::new(base_time())),
        Arc::new(MetricsCollector::new()),
    );

    let outcome = service
        .process_workflow_step("Account", "42", "welcome", None)
        .await
        .unwrap();
    (outcome, store, mail)
}

#[tokio::test]
async fn test_losing_ledger_race_is_benign_duplicate() {
    let (outcome, store, mail) = run_racing_step(Race::CompletedFirst).await;
    assert_eq!(
        outcome,
        executed(CompletedStepStatus::Completed, LedgerWrite::DuplicateIgnored)
    );
    assert_eq!(mail.calls(), 1);

    let entry = store
        .ledger_entry(&CompletedStepKey::new(
            "Account",
            "42",
            "welcome",
            DEFAULT_TRIGGER_VALUE,
        ))
        .unwrap();
    assert_eq!(entry.log_output.as_deref(), Some("winner"));
}

#[tokio::test]
async fn test_unique_violation_on_ledger_is_benign_duplicate() {
    let (outcome, store, mail) = run_racing_step(Race::UniqueViolation).await;
    assert_eq!(
        outcome,
        executed(CompletedStepStatus::Completed, LedgerWrite::DuplicateIgnored)
    );
    assert_eq!(mail.calls(), 1);
    assert!(store.ledger_entries().is_empty());
}
