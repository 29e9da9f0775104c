//! 事件输入
//!
//! - `MemoryEventSource`: 进程内事件缓冲区，调度器从这里读取事件
//! - `AmqpListener`: 从 AMQP 队列消费事件并写入缓冲区

pub mod amqp;
pub mod memory;

pub use amqp::AmqpListener;
pub use memory::MemoryEventSource;

/// 组织的扫描级别变更队列名
pub fn scan_profile_mutations_queue(organisation_id: &str) -> String {
    format!("{organisation_id}__scan_profile_mutations")
}

/// 组织的原始数据到达队列名
pub fn raw_file_received_queue(organisation_id: &str) -> String {
    format!("{organisation_id}__raw_file_received")
}
