//! 仓储 trait 的内存实现
//!
//! 行为与 SQLite 实现保持一致（认领是比较并设置、完成记录不会覆盖 COMPLETED），
//! 用于不需要数据库的单元测试。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use automation_core::{
    models::{
        field_value_text, CompletedStepKey, CompletedStepStatus, DueStepCandidate, LedgerWrite,
        Lookup, ObjectWorkflowCompletedStep, ObjectWorkflowStep, ScheduledTask, ScheduledTaskLog,
        ScheduledTaskStatus, StepTrigger, WorkflowObject,
    },
    traits::{
        CompletedStepRepository, DueStepQuery, ScheduledTaskLogRepository,
        ScheduledTaskRepository, WorkflowStepRepository,
    },
    AutomationError, AutomationResult,
};

/// ScheduledTaskRepository 的内存实现
#[derive(Debug, Clone)]
pub struct InMemoryScheduledTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, ScheduledTask>>>,
    next_id: Arc<Mutex<i64>>,
}

impl InMemoryScheduledTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        let max_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        let task_map = tasks.into_iter().map(|t| (t.id, t)).collect();
        Self {
            tasks: Arc::new(Mutex::new(task_map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get(&self, id: i64) -> Option<ScheduledTask> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn get_all_tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    fn select<F>(&self, predicate: F) -> Vec<ScheduledTask>
    where
        F: Fn(&ScheduledTask) -> bool,
    {
        self.get_all_tasks().into_iter().filter(predicate).collect()
    }
}

impl Default for InMemoryScheduledTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduledTaskRepository for InMemoryScheduledTaskRepository {
    async fn create(&self, task: &ScheduledTask) -> AutomationResult<ScheduledTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_task = task.clone();
        new_task.id = *next_id;
        *next_id += 1;

        tasks.insert(new_task.id, new_task.clone());
        Ok(new_task)
    }

    async fn get_by_id(&self, id: i64) -> AutomationResult<Option<ScheduledTask>> {
        Ok(self.get(id))
    }

    async fn update(&self, task: &ScheduledTask) -> AutomationResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(AutomationError::ScheduledTaskNotFound { id: task.id }),
        }
    }

    async fn find_due(&self, now: DateTime<Utc>) -> AutomationResult<Vec<ScheduledTask>> {
        let mut due = self.select(|t| t.is_due(now));
        due.sort_by_key(|t| (t.next_start_time, t.id));
        Ok(due)
    }

    async fn find_stalled(&self, now: DateTime<Utc>) -> AutomationResult<Vec<ScheduledTask>> {
        Ok(self.select(|t| t.is_stalled(now)))
    }

    async fn try_claim(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
        timeout_time: DateTime<Utc>,
    ) -> AutomationResult<Lookup<ScheduledTask>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(Lookup::NotFound);
        };
        if task.is_running() {
            return Ok(Lookup::Stale);
        }
        task.status = ScheduledTaskStatus::Running;
        task.last_start_time = Some(started_at);
        task.timeout_time = Some(timeout_time);
        task.updated_at = started_at;
        Ok(Lookup::Found(task.clone()))
    }

    async fn mark_timed_out(
        &self,
        id: i64,
        expected_timeout_time: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        next_start_time: Option<DateTime<Utc>>,
    ) -> AutomationResult<Lookup<ScheduledTask>> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(Lookup::NotFound);
        };
        if !task.is_running() || task.timeout_time != Some(expected_timeout_time) {
            return Ok(Lookup::Stale);
        }
        task.status = ScheduledTaskStatus::Failed;
        task.last_end_time = Some(ended_at);
        task.next_start_time = next_start_time;
        task.updated_at = ended_at;
        Ok(Lookup::Found(task.clone()))
    }
}

/// ScheduledTaskLogRepository 的内存实现
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduledTaskLogRepository {
    logs: Arc<Mutex<Vec<ScheduledTaskLog>>>,
}

impl InMemoryScheduledTaskLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.logs.lock().unwrap().len()
    }

    pub fn get_all_logs(&self) -> Vec<ScheduledTaskLog> {
        self.logs.lock().unwrap().clone()
    }

    pub fn logs_for(&self, task_id: i64) -> Vec<ScheduledTaskLog> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ScheduledTaskLogRepository for InMemoryScheduledTaskLogRepository {
    async fn create(&self, log: &ScheduledTaskLog) -> AutomationResult<ScheduledTaskLog> {
        let mut logs = self.logs.lock().unwrap();
        let mut new_log = log.clone();
        new_log.id = logs.len() as i64 + 1;
        logs.push(new_log.clone());
        Ok(new_log)
    }

    async fn find_by_task(
        &self,
        task_id: i64,
        limit: i64,
    ) -> AutomationResult<Vec<ScheduledTaskLog>> {
        let mut logs = self.logs_for(task_id);
        logs.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        logs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(logs)
    }
}

/// 工作流相关存储的内存实现：步骤定义、完成记录以及按类型保存的领域对象
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowStore {
    steps: Arc<Mutex<BTreeMap<(String, String), ObjectWorkflowStep>>>,
    ledger: Arc<Mutex<HashMap<CompletedStepKey, ObjectWorkflowCompletedStep>>>,
    objects: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记对象类型，未登记的类型在批量查询时视为未映射
    pub fn register_object_class(&self, object_class: &str) {
        self.objects
            .lock()
            .unwrap()
            .entry(object_class.to_string())
            .or_default();
    }

    pub fn put_object(&self, object_class: &str, object_pk: &str, object: Value) {
        self.objects
            .lock()
            .unwrap()
            .entry(object_class.to_string())
            .or_default()
            .insert(object_pk.to_string(), object);
    }

    pub fn ledger_entries(&self) -> Vec<ObjectWorkflowCompletedStep> {
        let mut entries: Vec<_> = self.ledger.lock().unwrap().values().cloned().collect();
        entries.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        entries
    }

    pub fn ledger_entry(&self, key: &CompletedStepKey) -> Option<ObjectWorkflowCompletedStep> {
        self.ledger.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl WorkflowStepRepository for InMemoryWorkflowStore {
    async fn create(&self, step: &ObjectWorkflowStep) -> AutomationResult<ObjectWorkflowStep> {
        let mut steps = self.steps.lock().unwrap();
        let key = (step.object_class.clone(), step.step_key.clone());
        if steps.contains_key(&key) {
            return Err(AutomationError::DatabaseOperation(format!(
                "工作流步骤已存在: {}/{}",
                step.object_class, step.step_key
            )));
        }
        let mut created = step.clone();
        created.id = steps.len() as i64 + 1;
        steps.insert(key, created.clone());
        Ok(created)
    }

    async fn find(
        &self,
        object_class: &str,
        step_key: &str,
    ) -> AutomationResult<Option<ObjectWorkflowStep>> {
        let steps = self.steps.lock().unwrap();
        Ok(steps
            .get(&(object_class.to_string(), step_key.to_string()))
            .cloned())
    }

    async fn find_by_trigger(
        &self,
        object_class: &str,
        trigger: StepTrigger,
    ) -> AutomationResult<Vec<ObjectWorkflowStep>> {
        let steps = self.steps.lock().unwrap();
        Ok(steps
            .values()
            .filter(|s| s.object_class == object_class && s.step_trigger == trigger)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CompletedStepRepository for InMemoryWorkflowStore {
    async fn find(
        &self,
        key: &CompletedStepKey,
    ) -> AutomationResult<Option<ObjectWorkflowCompletedStep>> {
        Ok(self.ledger_entry(key))
    }

    async fn record(&self, step: &ObjectWorkflowCompletedStep) -> AutomationResult<LedgerWrite> {
        let mut ledger = self.ledger.lock().unwrap();
        match ledger.get(&step.key) {
            None => {
                ledger.insert(step.key.clone(), step.clone());
                Ok(LedgerWrite::Inserted)
            }
            Some(existing) if existing.is_completed() => Ok(LedgerWrite::DuplicateIgnored),
            Some(_) => {
                ledger.insert(step.key.clone(), step.clone());
                Ok(LedgerWrite::Replaced)
            }
        }
    }

    async fn find_for_object(
        &self,
        object_class: &str,
        object_pk: &str,
    ) -> AutomationResult<Vec<ObjectWorkflowCompletedStep>> {
        let mut entries: Vec<_> = self
            .ledger
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.key.object_class == object_class && e.key.object_pk == object_pk)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.completed_time.cmp(&a.completed_time));
        Ok(entries)
    }
}

#[async_trait]
impl DueStepQuery for InMemoryWorkflowStore {
    async fn find_due_step_candidates(
        &self,
        object_class: &str,
        field: &str,
        ranked_step_keys: &[String],
    ) -> AutomationResult<Vec<DueStepCandidate>> {
        let objects = self.objects.lock().unwrap();
        let instances =
            objects
                .get(object_class)
                .ok_or_else(|| AutomationError::UnmappedObjectClass {
                    object_class: object_class.to_string(),
                })?;
        if ranked_step_keys.is_empty() {
            return Ok(Vec::new());
        }

        let ledger = self.ledger.lock().unwrap();
        let candidates = instances
            .iter()
            .filter_map(|(object_pk, object)| {
                let watched_value = field_value_text(&object.field_value(field)?);
                let last_completed_step_key = ranked_step_keys
                    .iter()
                    .find(|step_key| {
                        let key = CompletedStepKey::new(
                            object_class,
                            object_pk.as_str(),
                            step_key.as_str(),
                            watched_value.as_str(),
                        );
                        ledger
                            .get(&key)
                            .is_some_and(|e| e.status == CompletedStepStatus::Completed)
                    })
                    .cloned();
                Some(DueStepCandidate {
                    object_pk: object_pk.clone(),
                    watched_value: Some(watched_value),
                    last_completed_step_key,
                })
            })
            .collect();
        Ok(candidates)
    }
}
