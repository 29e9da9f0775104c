pub mod boefje;
pub mod item;
pub mod job;
pub mod normalizer;
pub mod ooi;
pub mod plugin;
pub mod task;

pub use boefje::{Boefje, BoefjeMeta, BoefjeTask};
pub use item::{ItemKind, PrioritizedItem};
pub use job::Job;
pub use normalizer::{MimeType, Normalizer, NormalizerTask, RawData, RawDataReceived};
pub use ooi::{MutationOperationType, Ooi, Organisation, ScanProfile, ScanProfileMutation};
pub use plugin::Plugin;
pub use task::{Task, TaskFilter, TaskStatus};

use sha2::{Digest, Sha256};

/// 计算逻辑任务身份哈希
///
/// 同一个插件 + 输入对象 + 组织总是得到同一个哈希，队列依赖它去重。
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("-").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(&["dns-records", "Hostname|internet|example.com", "org1"]);
        let b = content_hash(&["dns-records", "Hostname|internet|example.com", "org1"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_hash_differs_per_organisation() {
        let a = content_hash(&["dns-records", "Hostname|internet|example.com", "org1"]);
        let b = content_hash(&["dns-records", "Hostname|internet|example.com", "org2"]);
        assert_ne!(a, b);
    }
}
