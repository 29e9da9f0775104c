//! 外部服务的 HTTP 连接器
//!
//! 传输层错误在这里按种类转换为 `SchedulerError`（超时、无法连接、调用失败），
//! 并在调用边界记录日志。

pub mod bytes;
pub mod katalogus;
pub mod octopoes;

pub use bytes::BytesClient;
pub use katalogus::KatalogusClient;
pub use octopoes::{ObjectPager, OctopoesClient};

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use scheduler_core::config::ServicesConfig;
use scheduler_core::{SchedulerError, SchedulerResult};

/// 带重试的 HTTP 服务基座
#[derive(Debug, Clone)]
pub struct HttpService {
    name: &'static str,
    host: String,
    client: Client,
    retries: u32,
}

impl HttpService {
    pub fn new(
        name: &'static str,
        host: &str,
        timeout: Duration,
        retries: u32,
    ) -> SchedulerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::connector(name, format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            name,
            host: host.trim_end_matches('/').to_string(),
            client,
            retries,
        })
    }

    pub fn from_config(name: &'static str, host: &str, config: &ServicesConfig) -> SchedulerResult<Self> {
        Self::new(name, host, config.request_timeout(), config.retries)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn connector_error(&self, message: impl Into<String>) -> SchedulerError {
        SchedulerError::connector(self.name, message)
    }

    /// 发送请求；可重试的错误（连接失败、超时）按退避重试，非 2xx 响应直接返回错误
    pub async fn send<F>(&self, build: F) -> SchedulerResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let url = response.url().to_string();
                    warn!(service = self.name, %url, %status, "外部服务返回错误状态");
                    return Err(self.connector_error(format!("{url} 返回 {status}")));
                }
                Err(e) => {
                    let err = SchedulerError::from_request_error(self.name, &e);
                    if !err.is_retryable() || attempt >= self.retries {
                        warn!(service = self.name, attempt, error = %err, "外部服务调用失败");
                        return Err(err);
                    }
                    attempt += 1;
                    debug!(service = self.name, attempt, error = %err, "请求失败，准备重试");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SchedulerResult<T> {
        let url = self.url(path);
        let response = self.send(|client| client.get(&url).query(query)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| self.connector_error(format!("解析 {url} 响应失败: {e}")))
    }

    /// 健康探测：请求成功即视为健康
    pub async fn is_host_healthy(&self, path: &str) -> bool {
        let url = self.url(path);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(service = self.name, %url, status = %response.status(), "健康检查失败");
                false
            }
            Err(e) => {
                warn!(service = self.name, %url, error = %e, "健康检查失败");
                false
            }
        }
    }
}

/// 把扫描级别展开为重复的查询参数
pub(crate) fn scan_level_params(scan_levels: &[u8]) -> Vec<(&'static str, String)> {
    let mut levels = scan_levels.to_vec();
    levels.sort_unstable();
    levels.dedup();
    levels
        .into_iter()
        .map(|level| ("scan_level", level.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_level_params_deduplicated() {
        let params = scan_level_params(&[3, 1, 3]);
        assert_eq!(
            params,
            vec![("scan_level", "1".to_string()), ("scan_level", "3".to_string())]
        );
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let service =
            HttpService::new("octopoes", "http://localhost:8001/", Duration::from_secs(1), 0)
                .unwrap();
        assert_eq!(service.url("/org1/objects"), "http://localhost:8001/org1/objects");
    }
}
