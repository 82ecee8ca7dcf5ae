use mockito::{Matcher, Mock, Server, ServerGuard};
use rv_catalog::models::{Availability, ConnectivityMode, Phase};
use rv_catalog::{CatalogApp, Config};
use serde_json::json;

use crate::common::builders::{count_available, local_items, remote_items};

async fn mock_media(server: &mut ServerGuard, mode: &str, body: serde_json::Value) -> Mock {
    server
        .mock("GET", "/api/media")
        .match_query(Matcher::UrlEncoded("mode".into(), mode.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn mock_status(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/api/status/fast")
        .with_status(200)
        .with_body(
            json!({
                "services": {
                    "internet": {"connected": true},
                    "jellyfin": {"connected": true},
                    "local_media": {"available": true},
                    "vlc": {"status": "available"}
                }
            })
            .to_string(),
        )
        .create_async()
        .await
}

/// Config pointed entirely at the mock server, nothing leaves the machine
async fn local_config(server: &mut ServerGuard) -> Config {
    server
        .mock("GET", "/generate_204")
        .with_status(204)
        .create_async()
        .await;

    let mut config = Config::default();
    config.catalog.base_url = server.url();
    config.catalog.request_timeout_secs = 5;
    config.network.dns_target = "localhost:80".to_string();
    config.network.http_target = format!("{}/generate_204", server.url());
    config.network.tcp_target = server.host_with_port();
    config.network.method_timeout_secs = 2;
    config.cache.persist_snapshots = false;
    config.retry.max_retries = 0;
    config
}

#[tokio::test]
async fn test_full_cycle_against_http_backend() {
    let mut server = Server::new_async().await;
    let config = local_config(&mut server).await;
    let _status = mock_status(&mut server).await;
    let local = mock_media(&mut server, "local", json!({"media": local_items(10)})).await;
    let unified = mock_media(&mut server, "unified", json!({"media": remote_items(15, 4)})).await;

    let app = CatalogApp::from_config(config).await.unwrap();
    let first = app.start().await.unwrap();
    assert_eq!(first.len(), 10);

    app.loader().wait_for_background().await;

    let items = app.loader().unified_items().await;
    assert_eq!(items.len(), 21);
    assert_eq!(items.iter().filter(|i| i.enhanced).count(), 4);
    assert_eq!(count_available(&items, Availability::Both), 4);
    assert_eq!(count_available(&items, Availability::LocalOnly), 6);

    let state = app.loader().loading_state().await;
    assert_eq!(state.phase, Phase::UnifiedComplete);
    assert_eq!(state.mode, ConnectivityMode::Online);
    assert!(state.user_interaction_enabled);
    assert!(state.errors.is_empty());

    local.assert_async().await;
    unified.assert_async().await;
    app.shutdown().await;
}

#[tokio::test]
async fn test_rejected_remote_request_keeps_local_catalog() {
    let mut server = Server::new_async().await;
    let config = local_config(&mut server).await;
    let _status = mock_status(&mut server).await;
    let _local = mock_media(&mut server, "local", json!({"media": local_items(3)})).await;
    let _unified = server
        .mock("GET", "/api/media")
        .match_query(Matcher::UrlEncoded("mode".into(), "unified".into()))
        .with_status(400)
        .with_body("bad query")
        .create_async()
        .await;

    let app = CatalogApp::from_config(config).await.unwrap();
    app.start().await.unwrap();
    app.loader().wait_for_background().await;

    let state = app.loader().loading_state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(state.mode, ConnectivityMode::Degraded);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(app.loader().unified_items().await.len(), 3);

    app.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_local_source_fails_start() {
    let mut server = Server::new_async().await;
    let config = local_config(&mut server).await;
    let _status = mock_status(&mut server).await;
    let _local = server
        .mock("GET", "/api/media")
        .match_query(Matcher::UrlEncoded("mode".into(), "local".into()))
        .with_status(500)
        .create_async()
        .await;

    let app = CatalogApp::from_config(config).await.unwrap();
    let err = app.start().await.unwrap_err();
    assert!(format!("{:#}", err).contains("no fresh local snapshot"));
    app.shutdown().await;
}
