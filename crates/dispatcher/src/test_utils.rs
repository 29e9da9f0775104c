//! 测试用的协作方替身

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use scheduler_core::{
    Boefje, BoefjeMeta, BoefjeTask, Job, JobStore, MimeType, Normalizer, NormalizerTask,
    ObjectGraph, Ooi, Organisation, Plugin, PluginCatalog, PrioritizedItem, RawData,
    RawDataService, SchedulerError, SchedulerResult, Task, TaskFilter, TaskStore,
};

pub fn boefje_task(boefje: &str, ooi: &str, organisation: &str) -> BoefjeTask {
    BoefjeTask::new(Boefje::new(boefje), Some(ooi.to_string()), organisation)
}

pub fn boefje_item(scheduler_id: &str, boefje: &str, ooi: &str, priority: i64) -> PrioritizedItem {
    let task = boefje_task(boefje, ooi, "org1");
    PrioritizedItem::from_task(scheduler_id, task.id, task.hash(), priority, &task)
        .expect("serializable task")
}

pub fn raw_data(boefje: &str, organisation: &str, mime_types: &[&str]) -> RawData {
    RawData {
        id: Uuid::new_v4(),
        boefje_meta: BoefjeMeta {
            id: Uuid::new_v4(),
            boefje: Boefje::new(boefje),
            input_ooi: Some("Hostname|internet|example.com".to_string()),
            organization: organisation.to_string(),
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
        },
        mime_types: mime_types
            .iter()
            .map(|m| MimeType { value: m.to_string() })
            .collect(),
    }
}

pub fn normalizer_task(normalizer: &str, organisation: &str) -> NormalizerTask {
    NormalizerTask::new(
        Normalizer {
            id: normalizer.to_string(),
            name: None,
            version: None,
        },
        raw_data("dns-records", organisation, &["boefje/dns-records"]),
    )
}

/// 内存中的对象图
#[derive(Default)]
pub struct FakeObjectGraph {
    objects: Mutex<Vec<Ooi>>,
    random: Mutex<Vec<Ooi>>,
    fail: bool,
    tree_calls: AtomicUsize,
}

impl FakeObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_objects(self, objects: Vec<Ooi>) -> Self {
        *self.objects.lock().unwrap() = objects;
        self
    }

    pub fn with_random(self, objects: Vec<Ooi>) -> Self {
        *self.random.lock().unwrap() = objects;
        self
    }

    pub fn tree_calls(&self) -> usize {
        self.tree_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> SchedulerResult<()> {
        if self.fail {
            Err(SchedulerError::connector("octopoes", "unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectGraph for FakeObjectGraph {
    async fn get_objects_by_object_types(
        &self,
        _organisation_id: &str,
        object_types: &[String],
        scan_levels: &[u8],
    ) -> SchedulerResult<Vec<Ooi>> {
        self.check()?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| object_types.contains(&o.object_type))
            .filter(|o| o.scan_level().is_some_and(|l| scan_levels.contains(&l)))
            .cloned()
            .collect())
    }

    async fn get_random_objects(
        &self,
        _organisation_id: &str,
        n: usize,
        _scan_levels: &[u8],
    ) -> SchedulerResult<Vec<Ooi>> {
        self.check()?;
        Ok(self.random.lock().unwrap().iter().take(n).cloned().collect())
    }

    async fn get_object(&self, _organisation_id: &str, reference: &str) -> SchedulerResult<Ooi> {
        self.check()?;
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.primary_key == reference)
            .cloned()
            .ok_or_else(|| SchedulerError::connector("octopoes", "not found"))
    }

    async fn get_findings_by_ooi(&self, _organisation_id: &str, _reference: &str) -> SchedulerResult<Vec<Value>> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(vec![json!({ "object_type": "Finding" })])
    }

    async fn get_children_by_ooi(&self, _organisation_id: &str, _reference: &str) -> SchedulerResult<Vec<Value>> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(Vec::new())
    }

    async fn is_healthy(&self) -> bool {
        !self.fail
    }
}

/// 内存中的插件目录
#[derive(Default)]
pub struct FakePluginCatalog {
    pub organisations: Mutex<Vec<Organisation>>,
    pub boefjes: Mutex<Vec<Plugin>>,
    pub new_boefjes: Mutex<Vec<Plugin>>,
    pub normalizers: Mutex<Vec<Plugin>>,
}

impl FakePluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organisations(self, organisations: Vec<Organisation>) -> Self {
        *self.organisations.lock().unwrap() = organisations;
        self
    }

    pub fn with_boefjes(self, boefjes: Vec<Plugin>) -> Self {
        *self.boefjes.lock().unwrap() = boefjes;
        self
    }

    pub fn with_new_boefjes(self, boefjes: Vec<Plugin>) -> Self {
        *self.new_boefjes.lock().unwrap() = boefjes;
        self
    }

    pub fn with_normalizers(self, normalizers: Vec<Plugin>) -> Self {
        *self.normalizers.lock().unwrap() = normalizers;
        self
    }
}

#[async_trait]
impl PluginCatalog for FakePluginCatalog {
    async fn get_organisations(&self) -> SchedulerResult<Vec<Organisation>> {
        Ok(self.organisations.lock().unwrap().clone())
    }

    async fn get_boefjes_by_type_and_org_id(
        &self,
        object_type: &str,
        _organisation_id: &str,
    ) -> SchedulerResult<Vec<Plugin>> {
        Ok(self
            .boefjes
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.consumes.iter().any(|c| c == object_type))
            .cloned()
            .collect())
    }

    async fn get_new_boefjes_by_org_id(&self, _organisation_id: &str) -> SchedulerResult<Vec<Plugin>> {
        Ok(std::mem::take(&mut *self.new_boefjes.lock().unwrap()))
    }

    async fn get_normalizers_by_org_id_and_type(
        &self,
        _organisation_id: &str,
        mime_type: &str,
    ) -> SchedulerResult<Vec<Plugin>> {
        Ok(self
            .normalizers
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.consumes.iter().any(|c| c == mime_type))
            .cloned()
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// 以 `boefje_id/input_ooi` 为键的最近运行记录
#[derive(Default)]
pub struct FakeRawDataService {
    runs: Mutex<HashMap<String, BoefjeMeta>>,
}

impl FakeRawDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, meta: BoefjeMeta) {
        let key = format!("{}/{}", meta.boefje.id, meta.input_ooi.clone().unwrap_or_default());
        self.runs.lock().unwrap().insert(key, meta);
    }
}

#[async_trait]
impl RawDataService for FakeRawDataService {
    async fn get_last_run_boefje(
        &self,
        boefje_id: &str,
        input_ooi: Option<&str>,
        _organisation_id: &str,
    ) -> SchedulerResult<Option<BoefjeMeta>> {
        let key = format!("{}/{}", boefje_id, input_ooi.unwrap_or_default());
        Ok(self.runs.lock().unwrap().get(&key).cloned())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// 所有写操作都失败的存储
pub struct FailingStore;

fn unavailable() -> SchedulerError {
    SchedulerError::store_error("存储不可用")
}

#[async_trait]
impl TaskStore for FailingStore {
    async fn get_task_by_id(&self, _id: Uuid) -> SchedulerResult<Option<Task>> {
        Ok(None)
    }

    async fn create_task(&self, _task: &Task) -> SchedulerResult<Task> {
        Err(unavailable())
    }

    async fn update_task(&self, _task: &Task) -> SchedulerResult<Task> {
        Err(unavailable())
    }

    async fn get_tasks_by_hash(&self, _hash: &str) -> SchedulerResult<Vec<Task>> {
        Err(unavailable())
    }

    async fn get_tasks(&self, _filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, usize)> {
        Err(unavailable())
    }

    async fn cancel_tasks(&self, _scheduler_id: &str, _ids: &[Uuid]) -> SchedulerResult<usize> {
        Err(unavailable())
    }
}

#[async_trait]
impl JobStore for FailingStore {
    async fn get_job_by_hash(&self, _hash: &str) -> SchedulerResult<Option<Job>> {
        Err(unavailable())
    }

    async fn create_job(&self, _job: &Job) -> SchedulerResult<Job> {
        Err(unavailable())
    }

    async fn update_job(&self, _job: &Job) -> SchedulerResult<Job> {
        Err(unavailable())
    }

    async fn get_jobs(&self, _scheduler_id: &str, _enabled: Option<bool>) -> SchedulerResult<Vec<Job>> {
        Err(unavailable())
    }

    async fn get_scheduled_jobs(
        &self,
        _scheduler_id: &str,
        _max_checked_at: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Job>> {
        Err(unavailable())
    }
}
