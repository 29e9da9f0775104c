use std::sync::Arc;

use scheduler_core::{AppConfig, JobStore, ObjectGraph, PluginCatalog, RawDataService, TaskStore};

/// 调度器共享的配置与协作方
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub task_store: Arc<dyn TaskStore>,
    pub job_store: Arc<dyn JobStore>,
    pub object_graph: Arc<dyn ObjectGraph>,
    pub plugin_catalog: Arc<dyn PluginCatalog>,
    pub raw_data: Arc<dyn RawDataService>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        task_store: Arc<dyn TaskStore>,
        job_store: Arc<dyn JobStore>,
        object_graph: Arc<dyn ObjectGraph>,
        plugin_catalog: Arc<dyn PluginCatalog>,
        raw_data: Arc<dyn RawDataService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            task_store,
            job_store,
            object_graph,
            plugin_catalog,
            raw_data,
        }
    }
}
