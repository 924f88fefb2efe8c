use anyhow::Result;
use mockito::Server;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use configflow_agent::config::AgentConfig;
use configflow_agent::server::{self, AppState};
use configflow_agent::test_utils::{FakeRunner, UpdateTestEnvironment, fake_elf, md5_hex};
use configflow_agent::upgrade::SelfUpdater;

const TOKEN: &str = "integration-token";

async fn start_agent(env: &UpdateTestEnvironment, runner: FakeRunner) -> Result<(String, Arc<SelfUpdater>)> {
    let mut config = AgentConfig::default();
    config.token = TOKEN.to_string();
    config.service_name = "mihomo".to_string();
    let updater = Arc::new(SelfUpdater::new(env.settings(), Arc::new(runner))?);
    let state = AppState {
        config: Arc::new(config),
        updater: Arc::clone(&updater),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = server::serve(listener, state).await;
    });
    Ok((base, updater))
}

async fn wait_until_idle(updater: &SelfUpdater) {
    for _ in 0..200 {
        if !updater.is_updating() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("update did not finish in time");
}

#[tokio::test]
async fn test_update_endpoint_runs_cycle_in_background() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    let new_binary = fake_elf(b"configflow-agent v2");

    let mut artifacts = Server::new_async().await;
    let mock = artifacts
        .mock("GET", "/agent")
        .with_status(200)
        .with_body(new_binary.clone())
        .create_async()
        .await;

    let (base, updater) =
        start_agent(&env, FakeRunner::systemd_healthy("configflow-agent")).await?;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/update"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "version": "2.0.0",
            "download_url": format!("{}/agent", artifacts.url()),
            "md5sum": md5_hex(&new_binary),
        }))
        .send()
        .await?;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Update started");

    wait_until_idle(&updater).await;

    mock.assert_async().await;
    assert_eq!(env.live_contents()?, new_binary);
    assert_eq!(std::fs::read(env.backup_path())?, UpdateTestEnvironment::original_binary());
    Ok(())
}

#[tokio::test]
async fn test_update_endpoint_rejects_without_token() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    let (base, updater) = start_agent(&env, FakeRunner::new()).await?;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/update"))
        .json(&json!({ "version": "2.0.0", "download_url": "http://127.0.0.1:9/agent" }))
        .send()
        .await?;

    assert_eq!(resp.status(), 401);
    assert!(!updater.is_updating());
    assert!(!env.backup_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_second_update_is_rejected_while_first_runs() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    let (base, updater) = start_agent(&env, FakeRunner::new()).await?;

    // Hold the slot as a running cycle would
    let guard = updater.try_begin()?;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/update"))
        .bearer_auth(TOKEN)
        .json(&json!({ "version": "2.0.0", "download_url": "http://127.0.0.1:9/agent" }))
        .send()
        .await?;

    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await?;
    assert_eq!(body["success"], false);

    drop(guard);
    assert!(!updater.is_updating());
    Ok(())
}
