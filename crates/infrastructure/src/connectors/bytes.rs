//! 原始数据服务（bytes）客户端
//!
//! bytes 需要先用用户名密码换取访问令牌，令牌失效（401）时重新登录一次。

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use scheduler_core::config::ServicesConfig;
use scheduler_core::{BoefjeMeta, RawDataService, SchedulerError, SchedulerResult};

use super::HttpService;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct BytesClient {
    service: HttpService,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl BytesClient {
    pub fn new(service: HttpService, username: &str, password: &str) -> Self {
        Self {
            service,
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
        }
    }

    pub fn from_config(config: &ServicesConfig) -> SchedulerResult<Self> {
        let service = HttpService::from_config("bytes", &config.bytes_url, config)?;
        Ok(Self::new(service, &config.bytes_user, &config.bytes_password))
    }

    async fn login(&self) -> SchedulerResult<String> {
        let url = self.service.url("/token");
        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        let response = self
            .service
            .send(|client| client.post(&url).form(&form))
            .await?;
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| SchedulerError::connector("bytes", format!("解析令牌失败: {e}")))?
            .access_token;

        *self.token.write().await = Some(token.clone());
        debug!("bytes 登录成功");
        Ok(token)
    }

    async fn token(&self) -> SchedulerResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn get_boefje_meta(
        &self,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.service
            .client()
            .get(self.service.url("/bytes/boefje_meta"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
    }
}

#[async_trait]
impl RawDataService for BytesClient {
    async fn get_last_run_boefje(
        &self,
        boefje_id: &str,
        input_ooi: Option<&str>,
        organisation_id: &str,
    ) -> SchedulerResult<Option<BoefjeMeta>> {
        let mut query = vec![
            ("boefje_id", boefje_id.to_string()),
            ("organization", organisation_id.to_string()),
            ("limit", "1".to_string()),
            ("descending", "true".to_string()),
        ];
        if let Some(input_ooi) = input_ooi {
            query.push(("input_ooi", input_ooi.to_string()));
        }

        let token = self.token().await?;
        let mut response = self.get_boefje_meta(&token, &query).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("bytes 令牌失效，重新登录");
            let token = self.login().await?;
            response = self.get_boefje_meta(&token, &query).await?;
        }

        let response = response
            .error_for_status()
            .map_err(|e| SchedulerError::connector("bytes", e.to_string()))?;
        let metas: Vec<BoefjeMeta> = response
            .json()
            .await
            .map_err(|e| SchedulerError::connector("bytes", format!("解析 boefje_meta 失败: {e}")))?;
        Ok(metas.into_iter().next())
    }

    async fn is_healthy(&self) -> bool {
        self.service.is_host_healthy("/health").await
    }
}
