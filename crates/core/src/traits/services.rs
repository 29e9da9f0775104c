//! 外部服务接口
//!
//! - `ObjectGraph`: 对象图查询服务（octopoes）
//! - `PluginCatalog`: 插件目录服务（katalogus）
//! - `RawDataService`: 原始数据服务（bytes）
//!
//! 实现方负责在调用边界把传输层错误转换为 `SchedulerError`，
//! 无法连接和超时分别归为 `ServiceUnavailable` 与 `Timeout`。

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{BoefjeMeta, Ooi, Organisation, Plugin};
use crate::SchedulerResult;

#[async_trait]
pub trait ObjectGraph: Send + Sync {
    /// 分页拉取指定类型、指定扫描级别的全部对象
    async fn get_objects_by_object_types(
        &self,
        organisation_id: &str,
        object_types: &[String],
        scan_levels: &[u8],
    ) -> SchedulerResult<Vec<Ooi>>;

    async fn get_random_objects(
        &self,
        organisation_id: &str,
        n: usize,
        scan_levels: &[u8],
    ) -> SchedulerResult<Vec<Ooi>>;

    async fn get_object(&self, organisation_id: &str, reference: &str) -> SchedulerResult<Ooi>;

    /// 深度为 2 的对象树中通过 `finding` 关系可达的节点
    async fn get_findings_by_ooi(
        &self,
        organisation_id: &str,
        reference: &str,
    ) -> SchedulerResult<Vec<Value>>;

    /// 深度为 2 的对象树中除根以外的全部节点
    async fn get_children_by_ooi(
        &self,
        organisation_id: &str,
        reference: &str,
    ) -> SchedulerResult<Vec<Value>>;

    /// 所有已配置组织的健康探测都成功时为 true
    async fn is_healthy(&self) -> bool;
}

#[async_trait]
pub trait PluginCatalog: Send + Sync {
    async fn get_organisations(&self) -> SchedulerResult<Vec<Organisation>>;

    async fn get_boefjes_by_type_and_org_id(
        &self,
        object_type: &str,
        organisation_id: &str,
    ) -> SchedulerResult<Vec<Plugin>>;

    /// 自上次调用以来新启用的 boefje
    async fn get_new_boefjes_by_org_id(&self, organisation_id: &str)
        -> SchedulerResult<Vec<Plugin>>;

    async fn get_normalizers_by_org_id_and_type(
        &self,
        organisation_id: &str,
        mime_type: &str,
    ) -> SchedulerResult<Vec<Plugin>>;

    async fn is_healthy(&self) -> bool;
}

#[async_trait]
pub trait RawDataService: Send + Sync {
    /// 某个 boefje 对某个对象最近一次的运行记录
    async fn get_last_run_boefje(
        &self,
        boefje_id: &str,
        input_ooi: Option<&str>,
        organisation_id: &str,
    ) -> SchedulerResult<Option<BoefjeMeta>>;

    async fn is_healthy(&self) -> bool;
}
