// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use std::os::unix::fs::PermissionsExt;

const EVENT_WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    _root: tempfile::TempDir,
    data_root: PathBuf,
    service_dir: PathBuf,
    runner: PathBuf,
}

fn fixture(runner_body: &str) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let data_root = root.path().join("data");
    std::fs::create_dir_all(&data_root).unwrap();
    let service_dir = root.path().join("svc");
    std::fs::create_dir_all(&service_dir).unwrap();

    let runner = root.path().join("runner.sh");
    std::fs::write(&runner, runner_body).unwrap();
    std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();

    Fixture { _root: root, data_root, service_dir, runner }
}

fn manager(fx: &Fixture) -> Arc<InstanceManager> {
    InstanceManager::new(&fx.data_root, Some(fx.runner.display().to_string()))
}

fn valid_project(id: &str) -> Project {
    Project::from_json(
        id,
        &json!({"name": id, "serviceId": "svc", "config": {"device": {"host": "h", "port": 502}}}),
    )
    .unwrap()
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<InstanceEvent>) -> InstanceEvent {
    tokio::time::timeout(EVENT_WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn launch_runs_and_reaps_a_short_lived_service() {
    let fx = fixture("#!/bin/sh\necho \"service up\"\nexit 0\n");
    let mgr = manager(&fx);
    let mut rx = mgr.subscribe();

    let id = mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap();
    assert!(id.starts_with("inst_"));

    match next_event(&mut rx).await {
        InstanceEvent::Started { instance_id, project_id, pid } => {
            assert_eq!(instance_id, id);
            assert_eq!(project_id, "p1");
            assert_ne!(pid, 0);
        }
        other => panic!("expected Started, got {other:?}"),
    }
    match next_event(&mut rx).await {
        InstanceEvent::Finished { instance_id, exit_code, crashed, .. } => {
            assert_eq!(instance_id, id);
            assert_eq!(exit_code, 0);
            assert!(!crashed);
        }
        other => panic!("expected Finished, got {other:?}"),
    }

    assert_eq!(mgr.count(None), 0);
}

#[tokio::test]
async fn runner_receives_service_dir_config_and_guard_args() {
    // Echo the arguments and the config file contents into stdout.
    let fx = fixture(concat!(
        "#!/bin/sh\n",
        "echo \"dir=$1\"\n",
        "echo \"arg2=$2\"\n",
        "echo \"arg3=$3\"\n",
        "cfg=\"${2#--config-file=}\"\n",
        "cat \"$cfg\"\n",
        "exit 0\n",
    ));
    let mgr = manager(&fx);
    let mut rx = mgr.subscribe();

    mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap();
    let _ = next_event(&mut rx).await;
    let _ = next_event(&mut rx).await;

    // Log writers flush asynchronously after the reaper fires.
    let log_path = fx.data_root.join("logs").join("p1.log");
    let mut content = String::new();
    for _ in 0..100 {
        content = std::fs::read_to_string(&log_path).unwrap_or_default();
        if content.contains("port") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(content.contains(&format!("dir={}", fx.service_dir.display())));
    assert!(content.contains("arg2=--config-file="));
    assert!(content.contains("arg3=--guard="));
    // Merged project config was written to the temp file.
    assert!(content.contains("\"port\":502"));
}

#[tokio::test]
async fn log_lines_carry_timestamp_prefixes_and_stderr_marker() {
    let fx = fixture("#!/bin/sh\necho out-line\necho err-line >&2\nexit 0\n");
    let mgr = manager(&fx);
    let mut rx = mgr.subscribe();

    mgr.start_instance(&valid_project("logs"), &fx.service_dir).await.unwrap();
    let _ = next_event(&mut rx).await;
    let _ = next_event(&mut rx).await;

    let log_path = fx.data_root.join("logs").join("logs.log");
    let mut content = String::new();
    for _ in 0..100 {
        content = std::fs::read_to_string(&log_path).unwrap_or_default();
        if content.contains("out-line") && content.contains("err-line") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let out = content.lines().find(|l| l.contains("out-line")).unwrap();
    let err = content.lines().find(|l| l.contains("err-line")).unwrap();
    assert!(out.contains(" | out-line"));
    assert!(!out.contains("[stderr]"));
    assert!(err.contains(" | [stderr] err-line"));
    // ISO timestamp prefix.
    assert!(out.starts_with("20"));
}

#[tokio::test]
async fn temp_config_is_deleted_after_finish() {
    let fx = fixture("#!/bin/sh\nsleep 0.3\nexit 0\n");
    let mgr = manager(&fx);
    let mut rx = mgr.subscribe();

    let id = mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap();
    let args = mgr.command_line(&id).unwrap();
    let config_path = args
        .iter()
        .find_map(|a| a.strip_prefix("--config-file="))
        .map(PathBuf::from)
        .unwrap();
    assert!(config_path.exists());

    let _ = next_event(&mut rx).await; // started
    let _ = next_event(&mut rx).await; // finished
    assert!(!config_path.exists());
}

#[tokio::test]
async fn abnormal_exit_is_reported_as_failed() {
    let fx = fixture("#!/bin/sh\nexit 3\n");
    let mgr = manager(&fx);
    let mut rx = mgr.subscribe();

    mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap();
    let _ = next_event(&mut rx).await;
    match next_event(&mut rx).await {
        InstanceEvent::Finished { exit_code, crashed, .. } => {
            assert_eq!(exit_code, 3);
            assert!(!crashed);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn terminate_kills_a_long_running_instance() {
    let fx = fixture("#!/bin/sh\nsleep 60\n");
    let mgr = manager(&fx);
    let mut rx = mgr.subscribe();

    let id = mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap();
    let _ = next_event(&mut rx).await;
    assert_eq!(mgr.count(Some("p1")), 1);

    assert!(mgr.terminate_instance(&id));
    match next_event(&mut rx).await {
        InstanceEvent::Finished { crashed, .. } => assert!(crashed),
        other => panic!("expected Finished, got {other:?}"),
    }
    assert_eq!(mgr.count(None), 0);
    assert!(!mgr.terminate_instance(&id)); // already gone
}

#[tokio::test]
async fn per_project_counts_sum_to_the_global_count() {
    let fx = fixture("#!/bin/sh\nsleep 60\n");
    let mgr = manager(&fx);

    mgr.start_instance(&valid_project("a"), &fx.service_dir).await.unwrap();
    mgr.start_instance(&valid_project("a"), &fx.service_dir).await.unwrap();
    mgr.start_instance(&valid_project("b"), &fx.service_dir).await.unwrap();

    assert_eq!(mgr.count(Some("a")), 2);
    assert_eq!(mgr.count(Some("b")), 1);
    assert_eq!(mgr.count(Some("a")) + mgr.count(Some("b")), mgr.count(None));
    assert_eq!(mgr.list(Some("a")).len(), 2);
    assert_eq!(mgr.list(None).len(), 3);

    mgr.terminate_by_project("a");
    mgr.wait_all_finished(Duration::from_secs(2)).await;
    // Project b was force-killed by the grace expiry path.
    assert_eq!(mgr.count(None), 0);
}

#[tokio::test]
async fn wait_all_finished_force_kills_stragglers() {
    let fx = fixture("#!/bin/sh\nsleep 60\n");
    let mgr = manager(&fx);

    mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap();
    let start = std::time::Instant::now();
    mgr.wait_all_finished(Duration::from_millis(300)).await;
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(mgr.count(None), 0);
}

#[tokio::test]
async fn invalid_project_is_rejected_before_any_side_effect() {
    let fx = fixture("#!/bin/sh\nexit 0\n");
    let mgr = manager(&fx);
    let mut project = valid_project("p1");
    project.invalidate("device.host: required field missing");

    let err = mgr.start_instance(&project, &fx.service_dir).await.unwrap_err();
    assert!(matches!(err, LaunchError::ProjectInvalid(_)));
    assert_eq!(mgr.count(None), 0);
}

#[tokio::test]
async fn missing_service_dir_fails_fast() {
    let fx = fixture("#!/bin/sh\nexit 0\n");
    let mgr = manager(&fx);
    let err = mgr
        .start_instance(&valid_project("p1"), &fx.service_dir.join("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::ServiceDirMissing(_)));
}

#[tokio::test]
async fn unresolvable_runner_is_program_not_found() {
    let fx = fixture("#!/bin/sh\nexit 0\n");
    let mgr = InstanceManager::new(&fx.data_root, Some("/does/not/exist".to_string()));
    let err = mgr.start_instance(&valid_project("p1"), &fx.service_dir).await.unwrap_err();
    assert!(matches!(err, LaunchError::ProgramNotFound));
}

#[tokio::test]
async fn relative_runner_paths_resolve_under_the_data_root() {
    let fx = fixture("#!/bin/sh\nexit 0\n");
    let target = fx.data_root.join("bin");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::copy(&fx.runner, target.join("runner.sh")).unwrap();
    std::fs::set_permissions(
        target.join("runner.sh"),
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();

    let mgr = InstanceManager::new(&fx.data_root, Some("bin/runner.sh".to_string()));
    assert_eq!(mgr.find_service_program(), Some(fx.data_root.join("bin/runner.sh")));
}
