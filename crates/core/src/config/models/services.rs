use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 外部服务地址
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub octopoes_url: String,
    pub katalogus_url: String,
    pub bytes_url: String,
    pub bytes_user: String,
    pub bytes_password: String,
    pub request_timeout_seconds: u64,
    /// 连接失败时的重试次数
    pub retries: u32,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            octopoes_url: "http://localhost:8001".to_string(),
            katalogus_url: "http://localhost:8003".to_string(),
            bytes_url: "http://localhost:8002".to_string(),
            bytes_user: "test".to_string(),
            bytes_password: "secret".to_string(),
            request_timeout_seconds: 30,
            retries: 3,
        }
    }
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("octopoes_url", &self.octopoes_url),
            ("katalogus_url", &self.katalogus_url),
            ("bytes_url", &self.bytes_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("{name} 必须是HTTP地址: {url}"));
            }
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }
}
