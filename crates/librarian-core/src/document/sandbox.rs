//! Time-boxed execution for work that may hang or blow up on bad input.

use crate::config::DocumentConfig;
use std::any::Any;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long to wait for pipe EOF once the child itself has exited. A
/// grandchild that inherited the pipes can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Where document probes and in-process repairs run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isolation {
    /// Same process, no deadline. Used by tests and embedders.
    InProcess,
    /// A child process running `program worker ...`, killed at its deadline.
    Subprocess { program: PathBuf },
}

impl Isolation {
    /// Subprocess isolation through the configured worker executable.
    ///
    /// The worker must answer the hidden `worker` subcommands, which only the
    /// `librarian` binary does, so a host that did not name one gets
    /// in-process checks instead of a child that cannot reply.
    pub fn from_config(config: &DocumentConfig) -> Self {
        if !config.isolate {
            return Self::InProcess;
        }
        match config.worker_program.as_deref() {
            Some(program) if !program.trim().is_empty() => Self::Subprocess {
                program: PathBuf::from(program),
            },
            _ => {
                debug!("No worker program configured, validating in-process");
                Self::InProcess
            }
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stderr_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        text.lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("killed after {0:?}")]
    TimedOut(Duration),

    #[error("IO error while supervising child: {0}")]
    Io(#[from] io::Error),
}

/// Run `command` to completion or kill it once `timeout` elapses.
///
/// Both pipes are drained on their own threads so a chatty child cannot
/// block on a full pipe. The child is always reaped before returning; output
/// still unread after [`DRAIN_GRACE`] is abandoned along with its reader.
pub fn run_with_deadline(mut command: Command, timeout: Duration) -> Result<CommandOutput, SandboxError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| SandboxError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = wait_until(&mut child, Instant::now() + timeout);
    let drained_by = Instant::now() + DRAIN_GRACE;
    let stdout = collect(stdout, drained_by);
    let stderr = collect(stderr, drained_by);

    match waited? {
        Some(status) => Ok(CommandOutput {
            status,
            stdout,
            stderr,
        }),
        None => {
            debug!("Killed {} after {:?}", program, timeout);
            Err(SandboxError::TimedOut(timeout))
        }
    }
}

/// `Ok(None)` means the deadline passed and the child was killed and reaped.
fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                // Exited between try_wait and kill.
                if e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Drain> {
    pipe.map(|mut pipe| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = buf.clone();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(());
        });
        Drain { buf, done }
    })
}

/// Whatever the reader has collected by EOF or `until`, whichever is first.
fn collect(drain: Option<Drain>, until: Instant) -> Vec<u8> {
    let Some(drain) = drain else {
        return Vec::new();
    };
    if drain
        .done
        .recv_timeout(until.saturating_duration_since(Instant::now()))
        .is_err()
    {
        warn!("Child output still open after exit, abandoning the reader");
    }
    drain
        .buf
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default()
}

/// Run `f`, turning a panic inside the native parser into an error value.
pub fn guarded<T>(f: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(format!("parser panicked: {}", panic_message(&payload))),
    }
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
