pub mod app_config;
pub mod database;
pub mod message_queue;
pub mod observability;
pub mod scheduler;
pub mod services;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use message_queue::MessageQueueConfig;
pub use observability::ObservabilityConfig;
pub use scheduler::{BoefjeRankerKind, SchedulerConfig};
pub use services::ServicesConfig;
