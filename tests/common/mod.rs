//! Fake agent binaries for integration tests.
//!
//! Each fake is a shell script named like the real agent, written into a temp
//! directory. Every run appends its arguments to `args.log`, its pid to
//! `pids.log`, then runs the given body.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use supervisor::agent::binary_name;

pub const READY_LINE: &str =
    r#"t=2024-01-01T00:00:00+0000 lvl=info msg="starting web service" obj=web addr=127.0.0.1:4040"#;

pub fn fake_agent(body: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> args.log\necho $$ >> pids.log\n{}\n",
        body
    );
    let path = dir.path().join(binary_name());
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    dir
}

/// Agent that reports ready after `delay` and then stays up.
pub fn ready_agent(delay: &str) -> TempDir {
    fake_agent(&format!("sleep {}\necho '{}'\nexec sleep 30", delay, READY_LINE))
}

pub fn spawn_count(dir: &Path) -> usize {
    fs::read_to_string(dir.join("pids.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

pub fn recorded_args(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("args.log"))
        .unwrap_or_default()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

pub fn recorded_pids(dir: &Path) -> Vec<u32> {
    fs::read_to_string(dir.join("pids.log"))
        .unwrap_or_default()
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect()
}

pub fn is_running(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
