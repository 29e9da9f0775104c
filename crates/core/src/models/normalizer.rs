use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{content_hash, BoefjeMeta, Plugin};

/// 后处理插件（normalizer）的引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Normalizer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl From<&Plugin> for Normalizer {
    fn from(plugin: &Plugin) -> Self {
        Self {
            id: plugin.id.clone(),
            name: plugin.name.clone(),
            version: plugin.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MimeType {
    pub value: String,
}

/// boefje 产生的一份原始输出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawData {
    pub id: Uuid,
    pub boefje_meta: BoefjeMeta,
    #[serde(default)]
    pub mime_types: Vec<MimeType>,
}

impl RawData {
    pub fn mime_type_values(&self) -> impl Iterator<Item = &str> {
        self.mime_types.iter().map(|m| m.value.as_str())
    }
}

/// 原始数据到达事件，来自 `{org}__raw_file_received`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawDataReceived {
    pub organization: String,
    pub raw_data: RawData,
    pub created_at: DateTime<Utc>,
}

/// 对一份原始数据运行某个 normalizer 的任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizerTask {
    pub id: Uuid,
    pub normalizer: Normalizer,
    pub raw_data: RawData,
}

impl NormalizerTask {
    pub fn new(normalizer: Normalizer, raw_data: RawData) -> Self {
        Self {
            id: Uuid::new_v4(),
            normalizer,
            raw_data,
        }
    }

    pub fn organization(&self) -> &str {
        &self.raw_data.boefje_meta.organization
    }

    /// `normalizer.id-raw_data.id-organization` 的 SHA-256
    pub fn hash(&self) -> String {
        content_hash(&[
            &self.normalizer.id,
            &self.raw_data.id.to_string(),
            self.organization(),
        ])
    }
}
