//! Playbook process runner
//!
//! Launches `ansible-playbook` against an inventory and exposes its combined
//! stdout/stderr as a channel of lines. A driver task owns the child process,
//! so cleanup happens whether or not anyone is still reading.

use std::io::{BufRead, BufReader, PipeReader};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::deploy::inventory::InventoryPayload;
use crate::errors::DeployerError;
use crate::storage::settings::PlaybookSettings;

/// Prefix of the final line carrying the playbook exit code
pub const EXIT_SENTINEL_PREFIX: &str = "PLAYBOOK_EXIT=";

/// Exit code reported when the process status could not be collected
pub const UNKNOWN_EXIT_CODE: i32 = -1;

const LINE_BUFFER: usize = 256;

/// One item of playbook output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    /// A line of combined stdout/stderr, without its terminator
    Line(String),

    /// The process has exited and its inventory is gone. Always last.
    Exit(i32),
}

impl OutputLine {
    /// Text sent to the browser for this item
    pub fn to_event_data(&self) -> String {
        match self {
            OutputLine::Line(line) => line.clone(),
            OutputLine::Exit(code) => format!("{}{}", EXIT_SENTINEL_PREFIX, code),
        }
    }
}

/// Live, single-pass output of one playbook run
pub struct OutputStream {
    inner: ReceiverStream<OutputLine>,
    driver: JoinHandle<i32>,
}

impl OutputStream {
    /// Receive the next item
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.inner.as_mut().recv().await
    }

    /// Handle of the task that owns the child process; resolves to the exit code
    pub fn into_driver(self) -> JoinHandle<i32> {
        self.driver
    }
}

/// How the playbook is invoked
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Executable, `ansible-playbook` in production
    pub program: PathBuf,

    /// Arguments placed before `-i <inventory> <playbook>`
    pub args: Vec<String>,

    /// Playbook path
    pub playbook: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&PlaybookSettings::default())
    }
}

impl From<&PlaybookSettings> for RunnerOptions {
    fn from(settings: &PlaybookSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.extra_args.clone(),
            playbook: settings.playbook.clone(),
        }
    }
}

/// Runs the playbook, one child process per call
#[derive(Debug, Clone, Default)]
pub struct DeploymentRunner {
    options: RunnerOptions,
}

impl DeploymentRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    /// Launch the playbook against `payload`.
    ///
    /// Launch failures are returned here, before any output exists, and the
    /// payload is deleted. Once launched, the returned stream yields every
    /// output line in order followed by exactly one `OutputLine::Exit`; by the
    /// time that sentinel is delivered the payload has been deleted.
    pub fn execute(&self, payload: InventoryPayload) -> Result<OutputStream, DeployerError> {
        let (reader, child) = match self.spawn(&payload) {
            Ok(spawned) => spawned,
            Err(e) => {
                discard_payload(payload);
                return Err(e);
            }
        };

        info!(
            "Launched {} (pid {:?}) with inventory {}",
            self.options.program.display(),
            child.id(),
            payload.path().display()
        );

        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
        let reader_task = tokio::task::spawn_blocking(move || read_lines(reader, line_tx));

        let (out_tx, out_rx) = mpsc::channel(LINE_BUFFER);
        let driver = tokio::spawn(drive(child, payload, reader_task, line_rx, out_tx));

        Ok(OutputStream {
            inner: ReceiverStream::new(out_rx),
            driver,
        })
    }

    fn spawn(&self, payload: &InventoryPayload) -> Result<(PipeReader, Child), DeployerError> {
        let launch_error = |e: std::io::Error| {
            DeployerError::ProcessLaunchError(format!("{}: {}", self.options.program.display(), e))
        };

        // stdout and stderr share one pipe so their relative order survives
        let (reader, writer) = std::io::pipe().map_err(launch_error)?;
        let writer_err = writer.try_clone().map_err(launch_error)?;

        // The command (and with it our copies of the write end) is dropped at
        // the end of this statement, so EOF arrives when the child exits.
        let child = Command::new(&self.options.program)
            .args(&self.options.args)
            .arg("-i")
            .arg(payload.path())
            .arg(&self.options.playbook)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err)
            .spawn()
            .map_err(launch_error)?;

        Ok((reader, child))
    }
}

/// Blocking read loop: split the pipe into lines and forward them
fn read_lines(reader: PipeReader, tx: mpsc::Sender<std::io::Result<String>>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.blocking_send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    // reader dropped here: the output handle is closed
}

async fn drive(
    mut child: Child,
    payload: InventoryPayload,
    reader_task: JoinHandle<()>,
    mut line_rx: mpsc::Receiver<std::io::Result<String>>,
    out_tx: mpsc::Sender<OutputLine>,
) -> i32 {
    let mut subscribed = true;

    while let Some(item) = line_rx.recv().await {
        match item {
            Ok(line) => {
                if subscribed && out_tx.send(OutputLine::Line(line)).await.is_err() {
                    debug!("Output consumer went away, draining playbook output");
                    subscribed = false;
                }
            }
            Err(e) => {
                warn!("Error reading playbook output: {}", e);
                break;
            }
        }
    }

    // 1. close the output handle
    drop(line_rx);
    if let Err(e) = reader_task.await {
        warn!("Playbook output reader panicked: {}", e);
    }

    // 2. wait for exit
    let code = match child.wait().await {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("Failed to wait for playbook process: {}", e);
            UNKNOWN_EXIT_CODE
        }
    };

    // 3. delete the inventory, whatever the outcome
    discard_payload(payload);

    info!("Playbook exited with code {}", code);

    // 4. sentinel
    if subscribed {
        let _ = out_tx.send(OutputLine::Exit(code)).await;
    }

    code
}

fn discard_payload(payload: InventoryPayload) {
    let path = payload.path().to_path_buf();
    match payload.close() {
        Ok(()) => debug!("Removed inventory {}", path.display()),
        Err(e) => warn!("Failed to remove inventory {}: {}", path.display(), e),
    }
}

/// Exit code of a finished process; a signal death maps to minus the signal number
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    UNKNOWN_EXIT_CODE
}
