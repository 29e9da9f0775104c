use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use scheduler_core::{ObjectGraph, Organisation};
use scheduler_infrastructure::connectors::HttpService;
use scheduler_infrastructure::OctopoesClient;

const TOTAL_OBJECTS: usize = 1200;

fn param(params: &[(String, String)], key: &str) -> Option<usize> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}

async fn objects(Query(params): Query<Vec<(String, String)>>) -> Json<Value> {
    let offset = param(&params, "offset").unwrap_or(0);
    let limit = param(&params, "limit").unwrap_or(TOTAL_OBJECTS);
    let end = (offset + limit).min(TOTAL_OBJECTS);

    let items: Vec<Value> = (offset..end)
        .map(|n| {
            json!({
                "primary_key": format!("Hostname|internet|host-{n}.example.com"),
                "object_type": "Hostname",
            })
        })
        .collect();

    Json(json!({ "count": TOTAL_OBJECTS, "items": items }))
}

async fn random_objects(Query(params): Query<Vec<(String, String)>>) -> Json<Value> {
    let amount = param(&params, "amount").unwrap_or(0);
    let items: Vec<Value> = (0..amount)
        .map(|n| {
            json!({
                "primary_key": format!("IPAddressV4|internet|10.0.0.{n}"),
                "object_type": "IPAddressV4",
                "scan_profile": {
                    "reference": format!("IPAddressV4|internet|10.0.0.{n}"),
                    "level": 2,
                    "scan_profile_type": "declared",
                },
            })
        })
        .collect();
    Json(Value::Array(items))
}

async fn tree() -> Json<Value> {
    Json(json!({
        "root": {
            "reference": "Hostname|internet|example.com",
            "children": {
                "finding": [
                    { "reference": "Finding|Hostname|internet|example.com|KAT-NO-DMARC", "children": {} }
                ],
                "dns_a_records": [
                    { "reference": "IPAddressV4|internet|1.1.1.1", "children": {} }
                ],
            },
        },
        "store": {
            "Hostname|internet|example.com": { "object_type": "Hostname" },
            "Finding|Hostname|internet|example.com|KAT-NO-DMARC": { "object_type": "Finding" },
            "IPAddressV4|internet|1.1.1.1": { "object_type": "IPAddressV4" },
        },
    }))
}

async fn health(Path(org): Path<String>) -> Result<Json<Value>, axum::http::StatusCode> {
    if org == "org1" {
        Ok(Json(json!({ "healthy": true })))
    } else {
        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn spawn_fake_octopoes() -> Result<SocketAddr> {
    let app = Router::new()
        .route("/{org}/objects", get(objects))
        .route("/{org}/objects/random", get(random_objects))
        .route("/{org}/tree", get(tree))
        .route("/{org}/health", get(health));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn client(addr: SocketAddr, organisations: Vec<Organisation>) -> Result<OctopoesClient> {
    let service = HttpService::new("octopoes", &format!("http://{addr}"), Duration::from_secs(5), 0)?;
    Ok(OctopoesClient::new(service, organisations))
}

#[tokio::test]
async fn test_objects_are_paged_until_count() -> Result<()> {
    let addr = spawn_fake_octopoes().await?;
    let octopoes = client(addr, vec![])?;

    let objects = octopoes
        .get_objects_by_object_types("org1", &["Hostname".to_string()], &[1, 2])
        .await?;
    assert_eq!(objects.len(), TOTAL_OBJECTS);
    assert_eq!(objects[0].primary_key, "Hostname|internet|host-0.example.com");

    let mut pager = octopoes.pager("org1", &["Hostname".to_string()], &[1]);
    let first = pager.next_page().await?.expect("first page");
    assert_eq!(first.len(), 1000);
    assert_eq!(pager.count(), Some(TOTAL_OBJECTS));
    let second = pager.next_page().await?.expect("second page");
    assert_eq!(second.len(), 200);
    assert!(pager.next_page().await?.is_none());

    pager.restart();
    assert!(pager.next_page().await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_random_objects() -> Result<()> {
    let addr = spawn_fake_octopoes().await?;
    let octopoes = client(addr, vec![])?;

    let objects = octopoes.get_random_objects("org1", 5, &[1, 2, 3]).await?;
    assert_eq!(objects.len(), 5);
    assert!(objects.iter().all(|o| o.scan_level() == Some(2)));
    Ok(())
}

#[tokio::test]
async fn test_tree_findings_and_children() -> Result<()> {
    let addr = spawn_fake_octopoes().await?;
    let octopoes = client(addr, vec![])?;

    let findings = octopoes
        .get_findings_by_ooi("org1", "Hostname|internet|example.com")
        .await?;
    assert_eq!(findings, vec![json!({ "object_type": "Finding" })]);

    let children = octopoes
        .get_children_by_ooi("org1", "Hostname|internet|example.com")
        .await?;
    assert_eq!(children.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_health_requires_every_organisation() -> Result<()> {
    let addr = spawn_fake_octopoes().await?;

    let healthy = client(addr, vec![Organisation::new("org1", "Org 1")])?;
    assert!(healthy.is_healthy().await);

    let unhealthy = client(
        addr,
        vec![Organisation::new("org1", "Org 1"), Organisation::new("org2", "Org 2")],
    )?;
    assert!(!unhealthy.is_healthy().await);
    Ok(())
}
