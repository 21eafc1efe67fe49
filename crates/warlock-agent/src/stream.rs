//! Streamed subprocess sessions.
//!
//! A session runs `bash -c <command>` and forwards every chunk of stdout
//! and stderr to the panel as it arrives, followed by exactly one terminal
//! event. Sessions have no timeout and cannot be cancelled by the panel.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warlock_protocol::{StreamEvent, StreamRequest};

use crate::outbound::Outbound;

/// Read buffer size per pipe.
const CHUNK_SIZE: usize = 16 * 1024;

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

impl Pipe {
    fn event(self, session_id: &str, data: String) -> StreamEvent {
        let session_id = session_id.to_owned();
        match self {
            Self::Stdout => StreamEvent::Stdout { session_id, data },
            Self::Stderr => StreamEvent::Stderr { session_id, data },
        }
    }
}

/// Starts stream sessions and tracks how many are live.
#[derive(Debug, Clone)]
pub struct StreamManager {
    outbound: Outbound,
    default_dir: Option<PathBuf>,
    active: Arc<AtomicUsize>,
}

impl StreamManager {
    /// Manager emitting through `outbound`.
    #[must_use]
    pub fn new(outbound: Outbound, default_dir: Option<PathBuf>) -> Self {
        Self {
            outbound,
            default_dir,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of sessions that have not yet emitted their terminal event.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a session. The returned handle completes after the terminal
    /// event has been queued.
    pub fn start(&self, request: StreamRequest) -> JoinHandle<()> {
        let StreamRequest {
            session_id,
            command,
            cwd,
        } = request;
        let cwd = cwd.map(PathBuf::from).or_else(|| self.default_dir.clone());
        let outbound = self.outbound.clone();
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);

        info!(session_id = %session_id, command = %command, "Stream session started");
        tokio::spawn(async move {
            let terminal = run_session(&session_id, &command, cwd, &outbound).await;
            match &terminal {
                StreamEvent::Closed { code, .. } => {
                    info!(session_id = %session_id, code = ?code, "Stream session closed");
                },
                StreamEvent::Errored { error, .. } => {
                    warn!(session_id = %session_id, error = %error, "Stream session failed");
                },
                _ => {},
            }
            outbound.stream(terminal);
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

/// Run one session to completion, returning its terminal event.
async fn run_session(
    session_id: &str,
    command: &str,
    cwd: Option<PathBuf>,
    outbound: &Outbound,
) -> StreamEvent {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return StreamEvent::Errored {
                session_id: session_id.to_owned(),
                error: e.to_string(),
            };
        },
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err) = tokio::join!(
        pump(stdout, Pipe::Stdout, session_id, outbound),
        pump(stderr, Pipe::Stderr, session_id, outbound),
    );
    for (pipe, result) in [("stdout", out), ("stderr", err)] {
        if let Err(e) = result {
            debug!(session_id, pipe, error = %e, "Stream pipe read failed");
        }
    }

    match child.wait().await {
        Ok(status) => StreamEvent::Closed {
            session_id: session_id.to_owned(),
            code: status.code(),
        },
        Err(e) => StreamEvent::Errored {
            session_id: session_id.to_owned(),
            error: e.to_string(),
        },
    }
}

/// Forward chunks from `pipe` until EOF.
async fn pump<R>(
    pipe: Option<R>,
    kind: Pipe,
    session_id: &str,
    outbound: &Outbound,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut buf = vec![0_u8; CHUNK_SIZE];
    let mut decoder = Utf8Decoder::default();
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            if let Some(rest) = decoder.finish() {
                outbound.stream(kind.event(session_id, rest));
            }
            return Ok(());
        }
        let text = decoder.decode(buf.get(..n).unwrap_or_default());
        if !text.is_empty() {
            outbound.stream(kind.event(session_id, text));
        }
    }
}

/// Lossy UTF-8 decoding that holds back a character split across reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // Only an incomplete sequence at the very end is held back.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let tail = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
