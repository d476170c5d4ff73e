//! End-to-end deployment job tests

use nessus_deployer::deploy::runner::OutputLine;
use nessus_deployer::errors::DeployerError;
use nessus_deployer::models::run::HostStatus;
use nessus_deployer::storage::runs::CSV_HEADERS;
use secrecy::SecretString;

use crate::support::{job_context, leftover_inventories, request, stub_playbook};

const TWO_HOST_PLAYBOOK: &str = "echo 'h1 ... SUCCESS'\necho 'h2 ... FAILED'\nexit 1\n";

#[tokio::test]
async fn test_two_host_run_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), TWO_HOST_PLAYBOOK);
    let jobs = job_context(dir.path(), &script).await;

    let mut job = jobs.start(request(&["h1", "h2"])).await.unwrap();

    let mut events = Vec::new();
    while let Some(line) = job.output.recv().await {
        events.push(line.to_event_data());
    }
    assert_eq!(
        events,
        vec!["h1 ... SUCCESS", "h2 ... FAILED", "PLAYBOOK_EXIT=1"]
    );

    let record = job.task.await.unwrap().unwrap();
    assert_eq!(record.initiator, "alice");
    assert_eq!(record.exit_code, Some(1));
    assert_eq!(record.raw_log, "h1 ... SUCCESS\nh2 ... FAILED\n");
    assert_eq!(record.host_results.len(), 2);
    assert_eq!(record.host_results["h1"].status, HostStatus::Success);
    assert_eq!(record.host_results["h2"].status, HostStatus::Failed);
    assert_eq!(record.host_results["h2"].details, "h2 ... FAILED");

    let stored = jobs.recorder.get_run(record.id).await.unwrap();
    assert_eq!(stored.host_results, record.host_results);

    let csv = jobs.recorder.export_csv(record.id).await.unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], CSV_HEADERS.join(","));
    assert_eq!(lines[1], "h1,No,No,success");
    assert_eq!(lines[2], "h2,No,No,failed");

    assert!(leftover_inventories(dir.path()).is_empty());
}

#[tokio::test]
async fn test_agent_markers_reach_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(
        dir.path(),
        "echo 'changed: [web01] => Remove Rapid7 agent'\n\
         echo 'changed: [web01] => Install Nessus agent package'\n\
         echo 'web01 : ok=4 changed=2 unreachable=0 failed=0 skipped=0'\n",
    );
    let jobs = job_context(dir.path(), &script).await;

    let mut job = jobs.start(request(&["web01", "web02"])).await.unwrap();
    while job.output.recv().await.is_some() {}
    let record = job.task.await.unwrap().unwrap();

    let web01 = &record.host_results["web01"];
    assert!(web01.removed_legacy_agent);
    assert!(web01.installed_agent);
    assert_eq!(web01.status, HostStatus::Success);

    // Never mentioned in the output
    assert_eq!(record.host_results["web02"].status, HostStatus::Unknown);

    let csv = jobs.recorder.export_csv(record.id).await.unwrap();
    assert!(csv.lines().any(|l| l == "web01,Yes,Yes,success"));
}

#[tokio::test]
async fn test_disconnected_watcher_still_records() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), TWO_HOST_PLAYBOOK);
    let jobs = job_context(dir.path(), &script).await;

    let job = jobs.start(request(&["h1", "h2"])).await.unwrap();
    drop(job.output);

    let record = job.task.await.unwrap().unwrap();
    assert_eq!(record.exit_code, Some(1));
    assert_eq!(jobs.recorder.list_runs().await.unwrap().len(), 1);
    assert!(leftover_inventories(dir.path()).is_empty());
}

#[tokio::test]
async fn test_invalid_request_never_launches() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let script = stub_playbook(dir.path(), &format!("touch '{}'\n", marker.display()));
    let jobs = job_context(dir.path(), &script).await;

    let mut req = request(&["h1"]);
    req.credential.username = String::new();
    assert!(matches!(
        jobs.start(req).await,
        Err(DeployerError::ValidationError(_))
    ));

    let mut req = request(&["h1"]);
    req.credential.password = SecretString::from(String::new());
    assert!(jobs.start(req).await.is_err());

    jobs.tracker.close();
    jobs.tracker.wait().await;
    assert!(!marker.exists());
    assert!(jobs.recorder.list_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let script = stub_playbook(dir.path(), "echo 'h1 SUCCESS'\n");
    let jobs = job_context(dir.path(), &script).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut job = jobs.start(request(&["h1"])).await.unwrap();
        let mut last = None;
        while let Some(line) = job.output.recv().await {
            last = Some(line);
        }
        assert_eq!(last, Some(OutputLine::Exit(0)));
        ids.push(job.task.await.unwrap().unwrap().id);
    }

    let listed: Vec<i64> = jobs
        .recorder
        .list_runs()
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
}
