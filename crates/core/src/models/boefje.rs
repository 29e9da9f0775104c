use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{content_hash, Plugin};

/// 扫描插件（boefje）的引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Boefje {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl Boefje {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            version: None,
        }
    }
}

impl From<&Plugin> for Boefje {
    fn from(plugin: &Plugin) -> Self {
        Self {
            id: plugin.id.clone(),
            name: plugin.name.clone(),
            version: plugin.version.clone(),
        }
    }
}

/// 一次对某个对象运行某个 boefje 的扫描任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoefjeTask {
    pub id: Uuid,
    pub boefje: Boefje,
    #[serde(default)]
    pub input_ooi: Option<String>,
    pub organization: String,
}

impl BoefjeTask {
    pub fn new(boefje: Boefje, input_ooi: Option<String>, organization: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            boefje,
            input_ooi,
            organization: organization.into(),
        }
    }

    /// `boefje.id-input_ooi-organization` 的 SHA-256
    pub fn hash(&self) -> String {
        content_hash(&[
            &self.boefje.id,
            self.input_ooi.as_deref().unwrap_or_default(),
            &self.organization,
        ])
    }
}

/// 原始数据服务（bytes）记录的一次 boefje 运行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoefjeMeta {
    pub id: Uuid,
    pub boefje: Boefje,
    #[serde(default)]
    pub input_ooi: Option<String>,
    pub organization: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ignores_task_id() {
        let a = BoefjeTask::new(Boefje::new("nmap"), Some("IPAddressV4|internet|1.1.1.1".into()), "org1");
        let b = BoefjeTask::new(Boefje::new("nmap"), Some("IPAddressV4|internet|1.1.1.1".into()), "org1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_depends_on_input() {
        let a = BoefjeTask::new(Boefje::new("nmap"), Some("IPAddressV4|internet|1.1.1.1".into()), "org1");
        let b = BoefjeTask::new(Boefje::new("nmap"), Some("IPAddressV4|internet|8.8.8.8".into()), "org1");
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_boefje_from_plugin() {
        let plugin = Plugin::boefje("dns-records", 1, &["Hostname"]);
        let boefje = Boefje::from(&plugin);
        assert_eq!(boefje.id, "dns-records");
    }
}
