pub mod config;
pub mod filters;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use filters::{Filter, FilterColumn, FilterOperator, FilterRequest, LogicalOperator};
pub use models::{
    Boefje, BoefjeMeta, BoefjeTask, ItemKind, Job, MimeType, MutationOperationType, Normalizer,
    NormalizerTask, Ooi, Organisation, Plugin, PrioritizedItem, RawData, RawDataReceived,
    ScanProfile, ScanProfileMutation, Task, TaskFilter, TaskStatus,
};
pub use scheduler_errors::{QueueError, SchedulerError, SchedulerResult};
pub use traits::{
    EventSource, JobStore, Listener, ObjectGraph, PluginCatalog, RawDataService, TaskStore,
};
