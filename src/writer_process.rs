use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bridge::BridgeEvent;
use crate::error::BridgeError;
use crate::transport::{EventSender, FrameWriter};

/// Helper subprocess that writes Actisense lines to the CAN bus for us.
///
/// Lines are handed to a writer task, so a stalled pipe only delays that task.
/// The process exit is reported as [`BridgeEvent::WriterExited`] unless the exit
/// was requested through [`FrameWriter::kill`].
pub struct WriterProcess {
    program: String,
    lines: mpsc::UnboundedSender<String>,
    kill: Option<oneshot::Sender<()>>,
}

impl WriterProcess {
    /// Spawns `sh -c "<program> <device>"`. Must be called inside a tokio runtime.
    pub fn spawn(program: &str, device: &str, events: EventSender) -> Result<Self, BridgeError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("{} {}", program, device))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: program.to_string(),
                source,
            })?;
        info!("Started {} for {} (pid {:?})", program, device, child.id());

        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_lines(stdin, lines_rx, program.to_string()));
        }
        if let Some(stderr) = child.stderr.take() {
            let program = program.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("{}: {}", program, line);
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(child, kill_rx, events, program.to_string()));

        Ok(Self {
            program: program.to_string(),
            lines: lines_tx,
            kill: Some(kill_tx),
        })
    }
}

impl FrameWriter for WriterProcess {
    fn write_line(&mut self, line: &str) -> Result<(), BridgeError> {
        self.lines
            .send(format!("{}\n", line))
            .map_err(|_| BridgeError::WriterClosed)
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            debug!("killing {}", self.program);
            let _ = kill.send(());
        }
    }
}

impl Drop for WriterProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn write_lines(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>, program: String) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!("failed to write to {}: {}", program, e);
            break;
        }
    }
}

async fn supervise(mut child: Child, kill: oneshot::Receiver<()>, events: EventSender, program: String) {
    tokio::select! {
        status = child.wait() => {
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("failed to wait for {}: {}", program, e);
                    None
                }
            };
            let _ = events.send(BridgeEvent::WriterExited { code });
        }
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!("{} already gone: {}", program, e);
            }
            let _ = child.wait().await;
        }
    }
}
