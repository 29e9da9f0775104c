use serde::{Deserialize, Serialize};

/// 租户组织
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Organisation {
    pub id: String,
    pub name: String,
}

impl Organisation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 对象图中的对象（OOI）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ooi {
    pub primary_key: String,
    pub object_type: String,
    #[serde(default)]
    pub scan_profile: Option<ScanProfile>,
}

impl Ooi {
    pub fn new(primary_key: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            object_type: object_type.into(),
            scan_profile: None,
        }
    }

    pub fn with_scan_level(mut self, level: u8) -> Self {
        self.scan_profile = Some(ScanProfile {
            reference: self.primary_key.clone(),
            level: Some(level),
            scan_profile_type: "declared".to_string(),
        });
        self
    }

    /// 对象的扫描级别，没有扫描配置或级别时为 `None`
    pub fn scan_level(&self) -> Option<u8> {
        self.scan_profile.as_ref().and_then(|profile| profile.level)
    }
}

/// 扫描配置：决定允许对对象运行的扫描强度 (0-4)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanProfile {
    pub reference: String,
    #[serde(default)]
    pub level: Option<u8>,
    pub scan_profile_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperationType {
    Create,
    Update,
    Delete,
}

/// 扫描级别变更事件，来自 `{org}__scan_profile_mutations`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanProfileMutation {
    pub operation: MutationOperationType,
    pub primary_key: String,
    #[serde(default)]
    pub value: Option<Ooi>,
}
