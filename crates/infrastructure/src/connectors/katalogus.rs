//! 插件目录服务（katalogus）客户端

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use scheduler_core::config::ServicesConfig;
use scheduler_core::{Organisation, Plugin, PluginCatalog, SchedulerResult};

use super::HttpService;

#[derive(Deserialize)]
#[serde(untagged)]
enum OrganisationsResponse {
    Keyed(HashMap<String, Organisation>),
    List(Vec<Organisation>),
}

/// katalogus REST 客户端
///
/// 记录每个组织已见过的已启用 boefje，用于找出新启用的插件。
pub struct KatalogusClient {
    service: HttpService,
    seen_boefjes: Mutex<HashMap<String, HashSet<String>>>,
}

impl KatalogusClient {
    pub fn new(service: HttpService) -> Self {
        Self {
            service,
            seen_boefjes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ServicesConfig) -> SchedulerResult<Self> {
        Ok(Self::new(HttpService::from_config(
            "katalogus",
            &config.katalogus_url,
            config,
        )?))
    }

    async fn get_plugins(&self, organisation_id: &str, plugin_type: &str) -> SchedulerResult<Vec<Plugin>> {
        let path = format!("/v1/organisations/{organisation_id}/plugins");
        self.service
            .get_json(&path, &[("plugin_type", plugin_type.to_string())])
            .await
    }
}

#[async_trait]
impl PluginCatalog for KatalogusClient {
    async fn get_organisations(&self) -> SchedulerResult<Vec<Organisation>> {
        let response: OrganisationsResponse =
            self.service.get_json("/v1/organisations", &[]).await?;

        let mut organisations = match response {
            OrganisationsResponse::Keyed(map) => map.into_values().collect::<Vec<_>>(),
            OrganisationsResponse::List(list) => list,
        };
        organisations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(organisations)
    }

    async fn get_boefjes_by_type_and_org_id(
        &self,
        object_type: &str,
        organisation_id: &str,
    ) -> SchedulerResult<Vec<Plugin>> {
        let boefjes = self.get_plugins(organisation_id, "boefje").await?;
        Ok(boefjes
            .into_iter()
            .filter(|b| b.consumes.iter().any(|c| c == object_type))
            .collect())
    }

    async fn get_new_boefjes_by_org_id(&self, organisation_id: &str) -> SchedulerResult<Vec<Plugin>> {
        let enabled: Vec<Plugin> = self
            .get_plugins(organisation_id, "boefje")
            .await?
            .into_iter()
            .filter(|b| b.enabled)
            .collect();

        let mut seen = self.seen_boefjes.lock().await;
        let known = seen.entry(organisation_id.to_string()).or_default();

        let new_boefjes: Vec<Plugin> = enabled
            .iter()
            .filter(|b| !known.contains(&b.id))
            .cloned()
            .collect();

        // 被禁用的插件从记录中移除，重新启用后会再次被视为新插件
        *known = enabled.iter().map(|b| b.id.clone()).collect();

        debug!(organisation_id, count = new_boefjes.len(), "新启用的boefje");
        Ok(new_boefjes)
    }

    async fn get_normalizers_by_org_id_and_type(
        &self,
        organisation_id: &str,
        mime_type: &str,
    ) -> SchedulerResult<Vec<Plugin>> {
        let normalizers = self.get_plugins(organisation_id, "normalizer").await?;
        Ok(normalizers
            .into_iter()
            .filter(|n| n.consumes.iter().any(|c| c == mime_type))
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        self.service.is_host_healthy("/health").await
    }
}
