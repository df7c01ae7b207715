//! Process transport: owns the engine subprocess and shuttles lines
//! between it and the session over unbounded channels.

use std::path::Path;
use std::process::Stdio;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::engine::EngineError;

/// Channel ends handed to the session: it writes outbound command lines
/// into `outbound` and its pump drains engine output from `inbound`.
pub struct EngineIo {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Spawn the engine executable with piped stdio and start the writer and
/// reader tasks. The returned [`Child`] must be kept alive for the
/// duration of the session; dropping it kills the process.
pub fn spawn_engine_process(path: &Path) -> Result<(EngineIo, Child), EngineError> {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::StartupFailed(format!("spawn {}: {}", path.display(), e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| EngineError::StartupFailed("engine stdin unavailable".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::StartupFailed("engine stdout unavailable".to_string()))?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(line) = out_rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err()
                || stdin.write_all(b"\n").await.is_err()
                || stdin.flush().await.is_err()
            {
                warn!("engine stdin closed; dropping outbound line");
                break;
            }
        }
        debug!("engine writer task finished");
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if in_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("error reading engine output: {}", e);
                    break;
                }
            }
        }
        debug!("engine reader task finished");
    });

    Ok((EngineIo { outbound: out_tx, inbound: in_rx }, child))
}
