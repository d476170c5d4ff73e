//! Playbook runner tests

use std::path::PathBuf;

use nessus_deployer::deploy::inventory::InventoryBuilder;
use nessus_deployer::deploy::runner::{DeploymentRunner, OutputLine, RunnerOptions};
use nessus_deployer::errors::DeployerError;

use crate::support::{collect, leftover_inventories, request, stub_playbook, stub_runner};

#[tokio::test]
async fn test_lines_in_order_then_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(
        dir.path(),
        "i=1\nwhile [ $i -le 40 ]; do\n  echo \"out $i\"\n  echo \"err $i\" >&2\n  i=$((i + 1))\ndone\n",
    );
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();

    let lines = collect(stub_runner(&script).execute(payload).unwrap()).await;

    let mut expected = Vec::new();
    for i in 1..=40 {
        expected.push(OutputLine::Line(format!("out {i}")));
        expected.push(OutputLine::Line(format!("err {i}")));
    }
    expected.push(OutputLine::Exit(0));
    assert_eq!(lines, expected);
}

#[tokio::test]
async fn test_playbook_receives_inventory_and_playbook() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), "echo \"$1\"\ncat \"$2\" | head -n 1\necho \"$3\"\n");
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();

    let lines = collect(stub_runner(&script).execute(payload).unwrap()).await;
    assert_eq!(
        lines,
        vec![
            OutputLine::Line("-i".to_string()),
            OutputLine::Line("[agents]".to_string()),
            OutputLine::Line("deploy_nessus_agent.yml".to_string()),
            OutputLine::Exit(0),
        ]
    );
}

#[tokio::test]
async fn test_payload_removed_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), "echo \"$2\"\n");
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();
    let path = payload.path().to_path_buf();

    let lines = collect(stub_runner(&script).execute(payload).unwrap()).await;
    assert_eq!(lines[0], OutputLine::Line(path.display().to_string()));
    assert_eq!(lines.last(), Some(&OutputLine::Exit(0)));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_payload_removed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), "echo boom >&2\nexit 3\n");
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();
    let path = payload.path().to_path_buf();

    let lines = collect(stub_runner(&script).execute(payload).unwrap()).await;
    assert_eq!(
        lines,
        vec![OutputLine::Line("boom".to_string()), OutputLine::Exit(3)]
    );
    assert_eq!(lines.last().unwrap().to_event_data(), "PLAYBOOK_EXIT=3");
    assert!(!path.exists());
}

#[tokio::test]
async fn test_launch_failure_removes_payload() {
    let dir = tempfile::tempdir().unwrap();
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();
    let path = payload.path().to_path_buf();

    let runner = DeploymentRunner::new(RunnerOptions {
        program: PathBuf::from("/nonexistent/ansible-playbook"),
        args: Vec::new(),
        playbook: PathBuf::from("deploy_nessus_agent.yml"),
    });

    assert!(matches!(
        runner.execute(payload),
        Err(DeployerError::ProcessLaunchError(_))
    ));
    assert!(!path.exists());
    assert!(leftover_inventories(dir.path()).is_empty());
}

#[tokio::test]
async fn test_dropped_stream_still_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), "for i in 1 2 3 4 5; do echo line $i; done\nexit 2\n");
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();
    let path = payload.path().to_path_buf();

    let mut stream = stub_runner(&script).execute(payload).unwrap();
    assert_eq!(
        stream.next_line().await,
        Some(OutputLine::Line("line 1".to_string()))
    );

    // Stop reading; the driver must still reap the child and remove the file
    let code = stream.into_driver().await.unwrap();
    assert_eq!(code, 2);
    assert!(!path.exists());
}
