use serde::{Deserialize, Serialize};

/// 插件目录（katalogus）中的插件描述
///
/// `plugin_type` 为 `boefje` 或 `normalizer`；`consumes` 对 boefje 来说是对象类型，
/// 对 normalizer 来说是 mime 类型。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plugin {
    pub id: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scan_level: Option<u8>,
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default)]
    pub produces: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Plugin {
    pub fn boefje(id: impl Into<String>, scan_level: u8, consumes: &[&str]) -> Self {
        Self {
            id: id.into(),
            plugin_type: "boefje".to_string(),
            name: None,
            version: None,
            enabled: true,
            scan_level: Some(scan_level),
            consumes: consumes.iter().map(|s| s.to_string()).collect(),
            produces: Vec::new(),
        }
    }

    pub fn normalizer(id: impl Into<String>, consumes: &[&str]) -> Self {
        Self {
            id: id.into(),
            plugin_type: "normalizer".to_string(),
            name: None,
            version: None,
            enabled: true,
            scan_level: None,
            consumes: consumes.iter().map(|s| s.to_string()).collect(),
            produces: Vec::new(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
