use std::time::Duration;

use segmentation_config::AppConfig;
use segmentation_gateway::SegmentationServer;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test]
async fn server_serves_until_shutdown_signal() {
    let dir = std::env::temp_dir().join(format!("segmentation-server-{}", uuid::Uuid::new_v4()));
    let mut config = AppConfig::default();
    config.database.path = dir.join("seg.db");
    config.reports.dir = dir.join("reports");
    config.http.shutdown_timeout_secs = 2;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        SegmentationServer::new(config)
            .serve_until(listener, async {
                let _ = stop_rx.await;
            })
            .await
    });

    let client = reqwest::Client::new();
    let mut healthy = false;
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("http://{addr}/health")).send().await
            && resp.status().is_success()
        {
            healthy = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(healthy, "server never became healthy");

    let resp = client
        .post(format!("http://{addr}/user"))
        .json(&serde_json::json!({ "name": "John" }))
        .send()
        .await
        .expect("create user request");
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    stop_tx.send(()).expect("server still running");
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop within timeout")
        .expect("server task should not panic");
    assert!(result.is_ok());

    let _ = std::fs::remove_dir_all(dir);
}
