//! Integration tests for the one-shot `authtoken` command.

#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{eventually, fake_agent, is_running, recorded_args, recorded_pids, spawn_count};
use supervisor::options::BinDirFn;
use supervisor::{set_authtoken, set_authtoken_with_options, AgentOptions, Supervisor, SupervisorError};

fn redirect_to(dir: &std::path::Path) -> BinDirFn {
    let dir = dir.to_path_buf();
    Arc::new(move |_: &std::path::Path| dir.clone())
}

#[tokio::test]
async fn stdout_means_token_saved() {
    let dir = fake_agent("echo 'Authtoken saved to configuration file: /tmp/ngrok.yml'\nexec sleep 30");

    set_authtoken("tok123", None, Some(redirect_to(dir.path())))
        .await
        .unwrap();
    assert_eq!(recorded_args(dir.path()), vec!["authtoken tok123"]);
}

#[tokio::test]
async fn config_path_is_passed_through() {
    let dir = fake_agent("echo saved\nexec sleep 30");

    set_authtoken(
        "tok123",
        Some(PathBuf::from("/tmp/c.yml")),
        Some(redirect_to(dir.path())),
    )
    .await
    .unwrap();
    assert_eq!(recorded_args(dir.path()), vec!["authtoken tok123 --config=/tmp/c.yml"]);
}

#[tokio::test]
async fn stderr_means_token_rejected() {
    let dir = fake_agent("echo 'ERROR: invalid token' >&2\nexec sleep 30");

    let err = set_authtoken("bad", None, Some(redirect_to(dir.path())))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::TokenRejected));
    assert_eq!(err.to_string(), "cant set authtoken");
}

#[tokio::test]
async fn process_is_killed_after_success() {
    let dir = fake_agent("echo saved\nexec sleep 30");

    set_authtoken("tok123", None, Some(redirect_to(dir.path())))
        .await
        .unwrap();
    let pid = recorded_pids(dir.path())[0];
    assert!(eventually(|| !is_running(pid)).await);
}

#[tokio::test]
async fn process_is_killed_after_rejection() {
    let dir = fake_agent("echo nope >&2\nexec sleep 30");

    assert!(set_authtoken("tok123", None, Some(redirect_to(dir.path()))).await.is_err());
    let pid = recorded_pids(dir.path())[0];
    assert!(eventually(|| !is_running(pid)).await);
}

#[tokio::test]
async fn silent_exit_uses_exit_status() {
    let ok = fake_agent("exit 0");
    set_authtoken("tok123", None, Some(redirect_to(ok.path())))
        .await
        .unwrap();

    let failing = fake_agent("exit 2");
    let err = set_authtoken("tok123", None, Some(redirect_to(failing.path())))
        .await
        .unwrap_err();
    match err {
        SupervisorError::Exited(status) => assert_eq!(status.code(), Some(2)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn options_variant_passes_all_flags() {
    let dir = fake_agent("echo saved\nexec sleep 30");
    let opts = AgentOptions::new()
        .with_authtoken("tok123")
        .with_region("eu")
        .with_config_path("/tmp/c.yml")
        .with_bin_dir({
            let dir = dir.path().to_path_buf();
            move |_| dir.clone()
        });

    set_authtoken_with_options(&opts).await.unwrap();
    assert_eq!(
        recorded_args(dir.path()),
        vec!["authtoken tok123 --region=eu --config=/tmp/c.yml"]
    );
}

#[tokio::test]
async fn calls_are_independent() {
    let dir = fake_agent("echo saved\nexec sleep 30");
    let bin = redirect_to(dir.path());

    let (a, b) = futures_util::future::join(
        set_authtoken("tok-a", None, Some(bin.clone())),
        set_authtoken("tok-b", None, Some(bin)),
    )
    .await;
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(spawn_count(dir.path()), 2, "no de-duplication for authtoken");
}

#[tokio::test]
async fn supervisor_runs_authtoken_from_its_bin_dir() {
    let dir = fake_agent("echo saved\nexec sleep 30");
    let sup = Supervisor::new(dir.path());

    sup.set_authtoken(&AgentOptions::new().with_authtoken("tok123"))
        .await
        .unwrap();
    assert_eq!(recorded_args(dir.path()), vec!["authtoken tok123"]);
}
