use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use httpmock::prelude::*;
use odata_validator::core::catalog::RuleSelection;
use odata_validator::core::http::HttpConfig;
use odata_validator::domain::model::{JobRecord, JobStatus, Outcome, PayloadType, RuleResult};
use odata_validator::domain::ports::ResultProvider;
use odata_validator::{
    FileResultProvider, InMemoryResultProvider, JobQueue, JobWorkers, LocalStorage, RuleCatalog,
    RuleEngine, ValidationExecutor, ValidationService,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const CSDL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Demo" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Product">
        <Key><PropertyRef Name="ID"/></Key>
        <Property Name="ID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String"/>
      </EntityType>
      <EntityContainer Name="Container">
        <EntitySet Name="Products" EntityType="Demo.Product"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

const JSON_V4: &str = "application/json;odata.metadata=minimal";

/// 模擬一個只有 Products 的 OData V4 服務
async fn mock_service(server: &MockServer) {
    let context = server.url("/svc/$metadata#Products");
    let feed = serde_json::json!({
        "@odata.context": context,
        "value": [
            {"ID": 1, "Name": "Bread"},
            {"ID": 2, "Name": "Milk"}
        ]
    });
    let service_document = serde_json::json!({
        "@odata.context": server.url("/svc/$metadata"),
        "value": [{"name": "Products", "kind": "EntitySet", "url": "Products"}]
    });

    server
        .mock_async(|when, then| {
            when.method(GET).path("/svc/Products");
            then.status(200)
                .header("content-type", JSON_V4)
                .header("OData-Version", "4.0")
                .body(feed.to_string());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/svc/");
            then.status(200)
                .header("content-type", JSON_V4)
                .header("OData-Version", "4.0")
                .body(service_document.to_string());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/svc/$metadata");
            then.status(200)
                .header("content-type", "application/xml")
                .header("OData-Version", "4.0")
                .body(CSDL);
        })
        .await;
}

struct Stack {
    service: Arc<ValidationService>,
    workers: JobWorkers,
}

fn stack(results: Arc<dyn ResultProvider>, workers: usize) -> Stack {
    let catalog = Arc::new(RuleCatalog::builtin().unwrap());
    let engine = RuleEngine::new(catalog.clone(), RuleSelection::default(), Duration::from_secs(10));
    let executor = Arc::new(ValidationExecutor::new(
        engine,
        HttpConfig {
            timeout_seconds: 5,
            ..HttpConfig::default()
        },
        results.clone(),
    ));
    let (queue, receiver) = JobQueue::new(8);
    let workers = JobWorkers::start(receiver, workers, executor, results.clone());
    let service = Arc::new(ValidationService::new(queue, results, catalog, workers.workers()));
    Stack { service, workers }
}

async fn call(app: &axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn wait_until_finished(app: &axum::Router, id: uuid::Uuid) -> JobRecord {
    for _ in 0..200 {
        let request = Request::builder()
            .uri(format!("/jobs/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app, request).await;
        assert_eq!(status, StatusCode::OK);
        let record: JobRecord = serde_json::from_slice(&body).unwrap();
        if record.status.is_finished() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not finish", id);
}

#[tokio::test]
async fn test_job_runs_through_api_against_mock_service() {
    let server = MockServer::start_async().await;
    mock_service(&server).await;

    let results = Arc::new(InMemoryResultProvider::new());
    let Stack { service, workers } = stack(results.clone(), 2);
    let app = odata_validator::server::router(service.clone());

    let body = serde_json::json!({
        "uri": server.url("/svc/Products"),
        "format": "json"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let submitted: JobRecord = serde_json::from_slice(&body).unwrap();

    let finished = wait_until_finished(&app, submitted.id).await;
    assert_eq!(finished.status, JobStatus::Complete, "{:?}", finished.error);
    assert_eq!(finished.payload_type, Some(PayloadType::Feed));
    let summary = finished.summary.unwrap();
    assert!(summary.total > 0);

    let request = Request::builder()
        .uri(format!("/jobs/{}/results", submitted.id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let rule_results: Vec<RuleResult> = serde_json::from_slice(&body).unwrap();
    assert_eq!(rule_results.len(), summary.total);
    let value_rule = rule_results
        .iter()
        .find(|r| r.rule_name == "Feed.Core.2001")
        .unwrap();
    assert_eq!(value_rule.outcome, Outcome::Success);

    let request = Request::builder()
        .uri(format!("/jobs/{}/report", submitted.id))
        .body(Body::empty())
        .unwrap();
    let (status, archive) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let archive = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
    assert_eq!(archive.len(), 3);

    drop(app);
    drop(service);
    workers.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_target_fails_job() {
    let results = Arc::new(InMemoryResultProvider::new());
    let Stack { service, workers } = stack(results.clone(), 1);

    let record = service
        .submit(odata_validator::domain::model::ValidationRequest::new(
            "http://127.0.0.1:1/svc/",
        ))
        .await
        .unwrap();

    drop(service);
    workers.shutdown().await;

    let stored = results.job(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.is_some());
    assert!(results.results(record.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_results_survive_restart() {
    let server = MockServer::start_async().await;
    mock_service(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let provider: Arc<dyn ResultProvider> =
        Arc::new(FileResultProvider::new(LocalStorage::new(dir.path())));
    let Stack { service, workers } = stack(provider, 1);
    let record = tokio_test::assert_ok!(
        service
            .submit(odata_validator::domain::model::ValidationRequest::new(
                server.url("/svc/Products"),
            ))
            .await
    );
    drop(service);
    workers.shutdown().await;

    // 以新的 provider 讀回磁碟上的結果
    let reopened = FileResultProvider::new(LocalStorage::new(dir.path()));
    let stored = reopened.job(record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Complete, "{:?}", stored.error);
    let rule_results = reopened.results(record.id).await.unwrap();
    assert_eq!(rule_results.len(), stored.summary.unwrap().total);
    assert!(dir.path().join("jobs/index.json").exists());
}
