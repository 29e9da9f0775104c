//! 对象图服务（octopoes）客户端

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use scheduler_core::config::ServicesConfig;
use scheduler_core::{ObjectGraph, Ooi, Organisation, SchedulerResult};

use super::{scan_level_params, HttpService};

/// 分页大小
pub const PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct ObjectPage {
    count: usize,
    #[serde(default)]
    items: Vec<Ooi>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    reference: String,
    #[serde(default)]
    children: HashMap<String, Vec<TreeNode>>,
}

#[derive(Debug, Deserialize)]
struct ObjectTree {
    root: TreeNode,
    #[serde(default)]
    store: HashMap<String, Value>,
}

impl ObjectTree {
    /// 通过 `finding` 关系可达的节点
    fn findings(&self) -> Vec<Value> {
        let mut found = Vec::new();
        self.collect_findings(&self.root, &mut found);
        found
    }

    fn collect_findings(&self, node: &TreeNode, found: &mut Vec<Value>) {
        for (relation, children) in &node.children {
            for child in children {
                if relation == "finding" {
                    if let Some(object) = self.store.get(&child.reference) {
                        found.push(object.clone());
                    }
                }
                self.collect_findings(child, found);
            }
        }
    }

    /// 除根以外的全部节点
    fn children(&self) -> Vec<Value> {
        self.store
            .iter()
            .filter(|(reference, _)| **reference != self.root.reference)
            .map(|(_, object)| object.clone())
            .collect()
    }
}

/// 按对象类型分页拉取对象的惰性序列
///
/// 第一次调用 `next_page` 时以 `limit=1` 取得总数，之后以 `PAGE_SIZE` 翻页，
/// 直到取满总数。`restart` 后重新取总数。
pub struct ObjectPager<'a> {
    service: &'a HttpService,
    organisation_id: String,
    object_types: Vec<String>,
    scan_levels: Vec<u8>,
    count: Option<usize>,
    offset: usize,
}

impl<'a> ObjectPager<'a> {
    fn new(
        service: &'a HttpService,
        organisation_id: &str,
        object_types: &[String],
        scan_levels: &[u8],
    ) -> Self {
        Self {
            service,
            organisation_id: organisation_id.to_string(),
            object_types: object_types.to_vec(),
            scan_levels: scan_levels.to_vec(),
            count: None,
            offset: 0,
        }
    }

    fn params(&self, offset: usize, limit: usize) -> Vec<(&'static str, String)> {
        let mut params: Vec<(&'static str, String)> = self
            .object_types
            .iter()
            .map(|t| ("types", t.clone()))
            .collect();
        params.extend(scan_level_params(&self.scan_levels));
        params.push(("offset", offset.to_string()));
        params.push(("limit", limit.to_string()));
        params
    }

    async fn fetch(&self, offset: usize, limit: usize) -> SchedulerResult<ObjectPage> {
        let path = format!("/{}/objects", self.organisation_id);
        self.service.get_json(&path, &self.params(offset, limit)).await
    }

    /// 服务端报告的对象总数（首次翻页后可用）
    pub fn count(&self) -> Option<usize> {
        self.count
    }

    pub async fn next_page(&mut self) -> SchedulerResult<Option<Vec<Ooi>>> {
        let count = match self.count {
            Some(count) => count,
            None => {
                let count = self.fetch(0, 1).await?.count;
                debug!(organisation_id = %self.organisation_id, count, "对象总数");
                self.count = Some(count);
                count
            }
        };

        if self.offset >= count {
            return Ok(None);
        }

        let page = self.fetch(self.offset, PAGE_SIZE).await?;
        if page.items.is_empty() {
            self.offset = count;
            return Ok(None);
        }

        self.offset += PAGE_SIZE;
        Ok(Some(page.items))
    }

    pub fn restart(&mut self) {
        self.count = None;
        self.offset = 0;
    }
}

/// octopoes REST 客户端
pub struct OctopoesClient {
    service: HttpService,
    organisations: RwLock<Vec<Organisation>>,
}

impl OctopoesClient {
    pub fn new(service: HttpService, organisations: Vec<Organisation>) -> Self {
        Self {
            service,
            organisations: RwLock::new(organisations),
        }
    }

    pub fn from_config(config: &ServicesConfig) -> SchedulerResult<Self> {
        let service = HttpService::from_config("octopoes", &config.octopoes_url, config)?;
        Ok(Self::new(service, Vec::new()))
    }

    /// 更新需要做健康探测的组织列表
    pub fn set_organisations(&self, organisations: Vec<Organisation>) {
        let mut guard = self
            .organisations
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = organisations;
    }

    pub fn pager(
        &self,
        organisation_id: &str,
        object_types: &[String],
        scan_levels: &[u8],
    ) -> ObjectPager<'_> {
        ObjectPager::new(&self.service, organisation_id, object_types, scan_levels)
    }

    async fn get_tree(&self, organisation_id: &str, reference: &str) -> SchedulerResult<ObjectTree> {
        let path = format!("/{organisation_id}/tree");
        self.service
            .get_json(
                &path,
                &[("reference", reference.to_string()), ("depth", "2".to_string())],
            )
            .await
    }
}

#[async_trait]
impl ObjectGraph for OctopoesClient {
    async fn get_objects_by_object_types(
        &self,
        organisation_id: &str,
        object_types: &[String],
        scan_levels: &[u8],
    ) -> SchedulerResult<Vec<Ooi>> {
        let mut pager = self.pager(organisation_id, object_types, scan_levels);
        let mut objects = Vec::new();
        while let Some(page) = pager.next_page().await? {
            objects.extend(page);
        }
        Ok(objects)
    }

    async fn get_random_objects(
        &self,
        organisation_id: &str,
        n: usize,
        scan_levels: &[u8],
    ) -> SchedulerResult<Vec<Ooi>> {
        let path = format!("/{organisation_id}/objects/random");
        let mut params = vec![("amount", n.to_string())];
        params.extend(scan_level_params(scan_levels));
        self.service.get_json(&path, &params).await
    }

    async fn get_object(&self, organisation_id: &str, reference: &str) -> SchedulerResult<Ooi> {
        let path = format!("/{organisation_id}");
        self.service
            .get_json(&path, &[("reference", reference.to_string())])
            .await
    }

    async fn get_findings_by_ooi(
        &self,
        organisation_id: &str,
        reference: &str,
    ) -> SchedulerResult<Vec<Value>> {
        Ok(self.get_tree(organisation_id, reference).await?.findings())
    }

    async fn get_children_by_ooi(
        &self,
        organisation_id: &str,
        reference: &str,
    ) -> SchedulerResult<Vec<Value>> {
        Ok(self.get_tree(organisation_id, reference).await?.children())
    }

    async fn is_healthy(&self) -> bool {
        let organisations = self
            .organisations
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        for organisation in organisations {
            if !self
                .service
                .is_host_healthy(&format!("/{}/health", organisation.id))
                .await
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> ObjectTree {
        serde_json::from_value(json!({
            "root": {
                "reference": "Hostname|internet|example.com",
                "children": {
                    "finding": [
                        {"reference": "Finding|1", "children": {}}
                    ],
                    "dns_records": [
                        {
                            "reference": "DNSARecord|1",
                            "children": {
                                "finding": [{"reference": "Finding|2"}]
                            }
                        }
                    ]
                }
            },
            "store": {
                "Hostname|internet|example.com": {"object_type": "Hostname"},
                "Finding|1": {"object_type": "Finding", "id": 1},
                "Finding|2": {"object_type": "Finding", "id": 2},
                "DNSARecord|1": {"object_type": "DNSARecord"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_findings_follow_finding_relation() {
        let mut ids: Vec<i64> = tree()
            .findings()
            .iter()
            .filter_map(|f| f["id"].as_i64())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_children_exclude_root() {
        let children = tree().children();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c["object_type"] != "Hostname"));
    }
}
