use anyhow::Result;
use mockito::Server;
use std::sync::Arc;

use configflow_agent::core::UpdateError;
use configflow_agent::service::{CommandOutput, ServiceStatus};
use configflow_agent::test_utils::{FakeRunner, UpdateTestEnvironment, fake_elf, md5_hex};
use configflow_agent::upgrade::{ArchTag, SelfUpdater, UpdateOutcome, UpdateRequest};

const SERVICE: &str = "configflow-agent";

fn request(url: String, md5sum: Option<String>) -> UpdateRequest {
    UpdateRequest {
        version: "2.0.0".to_string(),
        download_url: url,
        md5sum,
    }
}

async fn serve_artifact(server: &mut Server, body: Vec<u8>) -> mockito::Mock {
    server
        .mock("GET", "/agent")
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_healthy_update_replaces_binary() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    let new_binary = fake_elf(b"configflow-agent v2");

    let mut server = Server::new_async().await;
    let mock = serve_artifact(&mut server, new_binary.clone()).await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE));
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let outcome = updater
        .update(request(format!("{}/agent", server.url()), Some(md5_hex(&new_binary))))
        .await?;

    mock.assert_async().await;
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            version: "2.0.0".to_string(),
            status: ServiceStatus::Active,
        }
    );
    assert_eq!(env.live_contents()?, new_binary);
    assert_eq!(std::fs::read(env.backup_path())?, UpdateTestEnvironment::original_binary());
    assert!(!env.staging_path().exists());
    assert_eq!(runner.count("systemctl restart"), 1);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&env.live_binary)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
    Ok(())
}

#[tokio::test]
async fn test_failed_restart_rolls_back() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, fake_elf(b"configflow-agent v2 broken")).await;

    let runner = Arc::new(
        FakeRunner::systemd_healthy(SERVICE).respond_once(
            "systemctl restart configflow-agent",
            CommandOutput::failed(1, "Job for configflow-agent.service failed"),
        ),
    );
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let outcome = updater.update(request(format!("{}/agent", server.url()), None)).await?;

    match outcome {
        UpdateOutcome::RolledBack {
            cause,
        } => assert!(matches!(cause, UpdateError::RestartCommandFailed { .. })),
        other => panic!("expected rollback, got {other}"),
    }
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    // One restart for the new binary, one after restoring the old one
    assert_eq!(runner.count("systemctl restart"), 2);
    assert!(!updater.is_updating());
    Ok(())
}

#[tokio::test]
async fn test_inactive_after_restart_rolls_back() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, fake_elf(b"configflow-agent v2 crashes")).await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE).respond_once(
        "systemctl is-active --quiet configflow-agent",
        CommandOutput::failed(3, ""),
    ));
    let updater = SelfUpdater::new(env.settings(), runner)?;

    let outcome = updater.update(request(format!("{}/agent", server.url()), None)).await?;

    match outcome {
        UpdateOutcome::RolledBack {
            cause: UpdateError::HealthCheckFailed {
                status,
                ..
            },
        } => assert_eq!(status, ServiceStatus::Inactive.as_str()),
        other => panic!("expected health check rollback, got {other}"),
    }
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    Ok(())
}

#[tokio::test]
async fn test_rollback_restart_failure_is_degraded() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, fake_elf(b"v2")).await;

    let runner = Arc::new(
        FakeRunner::new()
            .with_tool("systemctl")
            .respond("systemctl restart configflow-agent", CommandOutput::failed(1, "boom"))
            .respond("systemctl start configflow-agent", CommandOutput::failed(1, "boom")),
    );
    let updater = SelfUpdater::new(env.settings(), runner)?;

    let outcome = updater.update(request(format!("{}/agent", server.url()), None)).await?;

    assert!(matches!(outcome, UpdateOutcome::Degraded { .. }));
    // The old binary is back even though the service is down
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    Ok(())
}

#[tokio::test]
async fn test_html_response_is_rejected_before_backup() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;

    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/agent")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Login required</body></html>")
        .create_async()
        .await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE));
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let err = updater.update(request(format!("{}/agent", server.url()), None)).await.unwrap_err();

    match err {
        UpdateError::NotAnExecutable {
            header,
            ..
        } => assert_eq!(header, "3c68746d"),
        other => panic!("expected NotAnExecutable, got {other:?}"),
    }
    assert!(!env.backup_path().exists());
    assert!(!env.staging_path().exists());
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_checksum_mismatch_aborts_before_install() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, fake_elf(b"tampered")).await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE));
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let expected = md5_hex(&fake_elf(b"published"));
    let err = updater
        .update(request(format!("{}/agent", server.url()), Some(expected.clone())))
        .await
        .unwrap_err();

    match err {
        UpdateError::ChecksumMismatch {
            expected: got_expected,
            actual,
            ..
        } => {
            assert_eq!(got_expected, expected);
            assert_eq!(actual, md5_hex(&fake_elf(b"tampered")));
        }
        other => panic!("expected ChecksumMismatch, got {other:?}"),
    }
    assert!(!env.backup_path().exists());
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sha256_checksum_accepted() -> Result<()> {
    use sha2::{Digest, Sha256};

    let env = UpdateTestEnvironment::new()?;
    let new_binary = fake_elf(b"configflow-agent v3");
    let digest = hex::encode(Sha256::digest(&new_binary));

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, new_binary.clone()).await;

    let updater =
        SelfUpdater::new(env.settings(), Arc::new(FakeRunner::systemd_healthy(SERVICE)))?;
    let outcome = updater
        .update(request(format!("{}/agent", server.url()), Some(format!("sha256:{digest}"))))
        .await?;

    assert!(matches!(outcome, UpdateOutcome::Updated { .. }));
    assert_eq!(env.live_contents()?, new_binary);
    Ok(())
}

#[tokio::test]
async fn test_not_found_is_download_error() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;

    let mut server = Server::new_async().await;
    let _mock = server.mock("GET", "/agent").with_status(404).create_async().await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE));
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let err = updater.update(request(format!("{}/agent", server.url()), None)).await.unwrap_err();

    assert!(matches!(err, UpdateError::Download { .. }));
    assert!(!err.requires_rollback());
    assert!(!env.staging_path().exists());
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_backup_failure_aborts_before_install() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    std::fs::remove_file(&env.live_binary)?;

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, fake_elf(b"configflow-agent v2")).await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE));
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let err = updater.update(request(format!("{}/agent", server.url()), None)).await.unwrap_err();

    assert_eq!(err.kind(), "backup_failed");
    assert!(!err.requires_rollback());
    assert!(!env.staging_path().exists());
    assert!(!env.backup_path().exists());
    // Nothing was installed in place of the missing binary
    assert!(!env.live_binary.exists());
    assert!(runner.calls().is_empty());
    assert!(!updater.is_updating());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_install_failure_leaves_live_binary() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let env = UpdateTestEnvironment::new()?;
    let bin_dir = env.live_binary.parent().unwrap().to_path_buf();
    std::fs::set_permissions(&bin_dir, std::fs::Permissions::from_mode(0o555))?;

    // Permission bits do not bind root
    if std::fs::write(bin_dir.join(".writable-check"), b"").is_ok() {
        std::fs::set_permissions(&bin_dir, std::fs::Permissions::from_mode(0o755))?;
        return Ok(());
    }

    let mut server = Server::new_async().await;
    let _mock = serve_artifact(&mut server, fake_elf(b"configflow-agent v2")).await;

    let runner = Arc::new(FakeRunner::systemd_healthy(SERVICE));
    let updater = SelfUpdater::new(env.settings(), runner.clone())?;

    let result = updater.update(request(format!("{}/agent", server.url()), None)).await;
    std::fs::set_permissions(&bin_dir, std::fs::Permissions::from_mode(0o755))?;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), "install_failed");
    assert!(!err.requires_rollback());
    assert!(!env.staging_path().exists());
    assert_eq!(env.live_contents()?, UpdateTestEnvironment::original_binary());
    // The backup was taken, but no restart was attempted
    assert_eq!(std::fs::read(env.backup_path())?, UpdateTestEnvironment::original_binary());
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_repeated_updates_keep_single_backup() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    let v2 = fake_elf(b"configflow-agent v2");
    let v3 = fake_elf(b"configflow-agent v3");

    let mut server = Server::new_async().await;
    let _v2 = server.mock("GET", "/v2").with_status(200).with_body(v2.clone()).create_async().await;
    let _v3 = server.mock("GET", "/v3").with_status(200).with_body(v3.clone()).create_async().await;

    let updater =
        SelfUpdater::new(env.settings(), Arc::new(FakeRunner::systemd_healthy(SERVICE)))?;

    updater.update(request(format!("{}/v2", server.url()), None)).await?;
    updater.update(request(format!("{}/v3", server.url()), None)).await?;

    assert_eq!(env.live_contents()?, v3);
    // The slot holds the binary that was live right before the last swap
    assert_eq!(std::fs::read(env.backup_path())?, v2);

    let backups: Vec<String> =
        env.work_dir_files()?.into_iter().filter(|name| name.ends_with(".bak")).collect();
    assert_eq!(backups, vec!["configflow-agent.bak".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_server_url_selects_arch_artifact() -> Result<()> {
    let env = UpdateTestEnvironment::new()?;
    let new_binary = fake_elf(b"from the panel");

    let mut server = Server::new_async().await;
    let path = format!("/api/agents/download/configflow-agent-{}", ArchTag::detect());
    let mock = server
        .mock("GET", path.as_str())
        .with_status(200)
        .with_body(new_binary.clone())
        .create_async()
        .await;

    let mut settings = env.settings();
    settings.server_url = Some(server.url());
    let updater = SelfUpdater::new(settings, Arc::new(FakeRunner::systemd_healthy(SERVICE)))?;

    updater.update(request("http://ignored.invalid/agent".to_string(), None)).await?;

    mock.assert_async().await;
    assert_eq!(env.live_contents()?, new_binary);
    Ok(())
}
