//! HTTP surface tests against a live router on an ephemeral port.

mod fixtures;
mod helpers;

use serde_json::{json, Value};
use std::time::Duration;
use tokio_test::assert_ok;

use model3d_watcher::app_state::AppState;
use model3d_watcher::routes;

use helpers::{mount_download, mount_status, mount_submit, TestEnv, PUBLISH_BASE};

/// Serve the router and return its base URL.
async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::router(state, None);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn get_status(client: &reqwest::Client, base: &str) -> Value {
    client
        .get(format!("{base}/api/v1/model3d/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_and_idle_status() {
    let env = TestEnv::start().await;
    let base = serve(env.state()).await;
    let client = reqwest::Client::new();

    let health = assert_ok!(client.get(format!("{base}/health")).send().await);
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_runs"], 0);

    let status = get_status(&client, &base).await;
    assert_eq!(status, json!({"status": "idle", "model": null}));
}

#[tokio::test]
async fn test_disabled_toggle_does_not_start() {
    let env = TestEnv::start().await;
    let base = serve(env.state()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v1/model3d/runs"))
        .json(&json!({"image_path": "room.png", "enabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"outcome": "disabled"}));

    let status = get_status(&client, &base).await;
    assert_eq!(status["status"], "disabled by user");
}

#[tokio::test]
async fn test_missing_credentials() {
    let mut env = TestEnv::start().await;
    env.config.model_api_key = None;
    let base = serve(env.state()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v1/model3d/runs"))
        .json(&json!({"image_path": "room.png"}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"outcome": "missing_credentials"}));

    let status = get_status(&client, &base).await;
    assert_eq!(status["status"], "no API key configured");
}

#[tokio::test]
async fn test_invalid_request_rejected() {
    let env = TestEnv::start().await;
    let base = serve(env.state()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v1/model3d/runs"))
        .json(&json!({"image_path": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("image_path"));
}

#[tokio::test]
async fn test_cancel_unknown_run() {
    let env = TestEnv::start().await;
    let base = serve(env.state()).await;
    let client = reqwest::Client::new();

    let response = client
        .delete(format!("{base}/api/v1/model3d/runs/{}", uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_trigger_runs_in_background() {
    let env = TestEnv::start().await;
    mount_submit(&env.server, "J1").await;
    mount_status(
        &env.server,
        "J1",
        fixtures::done_with_files_flat(&[env.file_url("out.glb")]),
    )
    .await;
    mount_download(&env.server, "out.glb", fixtures::GLB_BYTES).await;

    let image = env.write_image("room.png", &fixtures::png_bytes("room"));
    let state = env.state();
    let base = serve(state.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v1/model3d/runs"))
        .json(&json!({"image_path": image.display().to_string(), "api_key": "override"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "started");
    assert!(body["run_id"].is_string());

    helpers::wait_for_status(
        state.store.as_ref(),
        |s| s.starts_with("success"),
        Duration::from_secs(10),
    )
    .await;

    let status = get_status(&client, &base).await;
    assert_eq!(
        status["status"],
        format!("success: model ready at {PUBLISH_BASE}/out.glb")
    );
    assert_eq!(
        status["model"],
        env.artifacts_dir().join("out.glb").display().to_string()
    );
}

#[tokio::test]
async fn test_status_model_prefers_staged_file() {
    let env = TestEnv::start().await;
    let state = env.state();
    let base = serve(state.clone()).await;
    let client = reqwest::Client::new();

    let url = format!("{PUBLISH_BASE}/scene.glb");
    helpers::seed_pointer(&state, &url).await;
    let status = get_status(&client, &base).await;
    assert_eq!(status["model"], url);

    std::fs::create_dir_all(env.artifacts_dir()).unwrap();
    let staged = env.artifacts_dir().join("scene.glb");
    std::fs::write(&staged, fixtures::GLB_BYTES).unwrap();
    let status = get_status(&client, &base).await;
    assert_eq!(status["model"], staged.display().to_string());
}
