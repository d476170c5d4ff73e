//! One deployment, end to end
//!
//! The job drains the runner, keeps the raw log and host summary, forwards
//! each line to whoever is watching and records the run when the playbook
//! exits. A watcher that disconnects does not stop the job.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, Instrument, Span};

use crate::deploy::classify::HostSummary;
use crate::deploy::inventory::InventoryBuilder;
use crate::deploy::request::DeploymentRequest;
use crate::deploy::runner::{DeploymentRunner, OutputLine, OutputStream};
use crate::errors::DeployerError;
use crate::models::run::RunRecord;
use crate::storage::runs::RunRecorder;
use crate::utils::generate_uuid;

const SUBSCRIBER_BUFFER: usize = 256;

/// A started deployment
pub struct DeploymentJob {
    /// Output lines in order, ending with `OutputLine::Exit`
    pub output: mpsc::Receiver<OutputLine>,

    /// Resolves once the run has been recorded
    pub task: JoinHandle<Result<RunRecord, DeployerError>>,
}

/// Everything a deployment needs besides the request
#[derive(Clone)]
pub struct JobContext {
    pub builder: InventoryBuilder,
    pub runner: DeploymentRunner,
    pub recorder: Arc<RunRecorder>,
    pub tracker: TaskTracker,
}

impl JobContext {
    /// Build the inventory, launch the playbook and start the job.
    ///
    /// Validation and launch errors surface here, before any output.
    pub async fn start(&self, request: DeploymentRequest) -> Result<DeploymentJob, DeployerError> {
        let deployment_id = generate_uuid();
        let span = info_span!(
            "deployment",
            id = %deployment_id,
            initiator = %request.initiator,
        );
        self.launch(request, span.clone()).instrument(span).await
    }

    async fn launch(
        &self,
        request: DeploymentRequest,
        span: Span,
    ) -> Result<DeploymentJob, DeployerError> {
        // Writing and syncing the inventory is blocking file I/O
        let builder = self.builder.clone();
        let blocking_span = Span::current();
        let (payload, request) = tokio::task::spawn_blocking(move || {
            blocking_span.in_scope(|| builder.build(&request).map(|payload| (payload, request)))
        })
        .await
        .map_err(|e| DeployerError::Internal(format!("Inventory task failed: {}", e)))??;

        let stream = self.runner.execute(payload)?;

        info!(
            "Deployment started against {} host(s): {}",
            request.hosts.len(),
            request.hosts.join(", ")
        );

        // Only the initiator and hosts move into the job
        let DeploymentRequest {
            initiator, hosts, ..
        } = request;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let recorder = self.recorder.clone();
        let task = self
            .tracker
            .spawn(run_job(initiator, hosts, stream, tx, recorder).instrument(span));

        Ok(DeploymentJob { output: rx, task })
    }
}

async fn run_job(
    initiator: String,
    hosts: Vec<String>,
    mut stream: OutputStream,
    subscriber: mpsc::Sender<OutputLine>,
    recorder: Arc<RunRecorder>,
) -> Result<RunRecord, DeployerError> {
    let mut raw_log = String::new();
    let mut summary = HostSummary::new(&hosts);
    let mut exit_code = None;
    let mut watching = true;

    while let Some(item) = stream.next_line().await {
        match &item {
            OutputLine::Line(line) => {
                raw_log.push_str(line);
                raw_log.push('\n');
                summary.observe(line);
            }
            OutputLine::Exit(code) => exit_code = Some(*code),
        }

        if watching && subscriber.send(item).await.is_err() {
            info!("Watcher disconnected, deployment continues");
            watching = false;
        }
    }

    let host_results = summary.finish();
    match recorder
        .record(&initiator, &raw_log, &host_results, exit_code)
        .await
    {
        Ok(record) => {
            info!(
                "Recorded run {} (exit code {:?})",
                record.id, record.exit_code
            );
            Ok(record)
        }
        Err(e) => {
            error!("Failed to record run: {}", e);
            Err(e)
        }
    }
}
