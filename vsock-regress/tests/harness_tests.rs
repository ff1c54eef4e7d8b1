// Harness sequencing, driven by /bin/sh stand-ins for the two binaries

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use vsock_regress::harness::{PASS_BANNER, START_BANNER};
use vsock_regress::{Harness, HarnessConfig, RegressError, StepCommand};

fn sh(name: &str, script: &str) -> StepCommand {
    StepCommand::new(name, "/bin/sh").arg("-c").arg(script)
}

fn config(server: &str, client: &str) -> HarnessConfig {
    HarnessConfig {
        server: sh("server", server),
        client: sh("client", client),
        startup_grace: Duration::from_millis(100),
        client_timeout: Duration::from_secs(5),
        server_timeout: Duration::from_secs(5),
        runs: 1,
    }
}

fn run(config: HarnessConfig) -> (Result<(), RegressError>, String) {
    let mut harness = Harness::new(config, Vec::new());
    let result = harness.run();
    let out = String::from_utf8(harness.into_output()).unwrap();
    (result, out)
}

fn touch(path: &Path) -> String {
    format!("echo ran >> '{}'", path.display())
}

#[test]
fn prints_both_banners_on_success() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("client-ran");

    let (result, out) = run(config("sleep 0.3", &touch(&marker)));
    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(out, format!("{}\n{}\n", START_BANNER, PASS_BANNER));
    assert!(marker.exists());
}

#[test]
fn server_startup_failure_skips_client() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("client-ran");

    let (result, out) = run(config("exit 3", &touch(&marker)));
    match result {
        Err(e @ RegressError::StepFailed { .. }) => {
            assert_eq!(e.exit_code(), 3);
            if let RegressError::StepFailed { step, .. } = e {
                assert_eq!(step, "server");
            }
        }
        other => panic!("expected server failure, got {:?}", other),
    }
    assert_eq!(out, format!("{}\n", START_BANNER));
    assert!(!marker.exists());
}

#[test]
fn client_failure_stops_server() {
    let started = Instant::now();
    let (result, out) = run(config("sleep 10", "exit 7"));

    match result {
        Err(RegressError::StepFailed { step, code, .. }) => {
            assert_eq!(step, "client");
            assert_eq!(code, Some(7));
        }
        other => panic!("expected client failure, got {:?}", other),
    }
    assert!(!out.contains(PASS_BANNER));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn server_failure_after_client_is_reported() {
    let (result, out) = run(config("sleep 0.3; exit 5", "true"));
    match result {
        Err(RegressError::StepFailed { step, code, .. }) => {
            assert_eq!(step, "server");
            assert_eq!(code, Some(5));
        }
        other => panic!("expected server failure, got {:?}", other),
    }
    assert!(!out.contains(PASS_BANNER));
}

#[test]
fn hung_server_times_out() {
    let mut cfg = config("sleep 10", "true");
    cfg.server_timeout = Duration::from_millis(200);

    let started = Instant::now();
    let (result, _) = run(cfg);
    assert!(matches!(result, Err(RegressError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn hung_client_times_out() {
    let mut cfg = config("sleep 30", "sleep 30");
    cfg.client_timeout = Duration::from_millis(200);
    cfg.server_timeout = Duration::from_millis(200);

    let started = Instant::now();
    let (result, out) = run(cfg);
    match result {
        Err(e @ RegressError::Timeout(_)) => assert_eq!(e.exit_code(), 5),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(!out.contains(PASS_BANNER));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn repeated_runs_have_identical_outcomes() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("client-runs");

    let mut cfg = config("sleep 0.2", &touch(&marker));
    cfg.runs = 2;

    let (first, first_out) = run(cfg.clone());
    let (second, second_out) = run(cfg);
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(first_out, second_out);
    assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 4);
}
