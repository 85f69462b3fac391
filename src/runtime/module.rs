use crate::error::{CallError, HarnessError, Result};
use crate::protocol::{encode_line, Envelope, ModuleMessage, Request, ResponseBody};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Grace period for a killed process to be reaped
const KILL_WAIT: Duration = Duration::from_secs(2);

const SPAWN_ATTEMPTS: u32 = 5;

type PendingCalls = SyncMutex<HashMap<u64, oneshot::Sender<ResponseBody>>>;

/// A launched module subprocess and its request/response channel
#[derive(Debug)]
pub(crate) struct ModuleProcess {
    name: String,
    models: Vec<String>,
    call_timeout: Duration,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl ModuleProcess {
    /// Spawn the executable and wait for its handshake until `deadline`
    pub async fn launch(
        name: &str,
        executable: &Path,
        call_timeout: Duration,
        deadline: Instant,
    ) -> Result<Self> {
        info!("Launching module '{}' from {}", name, executable.display());

        let mut child = spawn(executable).await.map_err(|e| {
            HarnessError::module_launch(
                name.to_string(),
                format!("failed to spawn {}: {}", executable.display(), e),
            )
        })?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(forward_stderr(
                name.to_string(),
                stderr,
                cancel.clone(),
            )));
        }

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                abort(&mut child, &cancel).await;
                return Err(HarnessError::module_launch(name, "stdio pipes unavailable"));
            }
        };

        let mut lines = BufReader::new(stdout).lines();
        let models = match timeout_at(deadline, lines.next_line()).await {
            Err(_) => {
                abort(&mut child, &cancel).await;
                return Err(HarnessError::module_launch(
                    name,
                    "no handshake before the bootstrap deadline",
                ));
            }
            Ok(Err(e)) => {
                abort(&mut child, &cancel).await;
                return Err(HarnessError::module_launch(
                    name.to_string(),
                    format!("failed to read handshake: {}", e),
                ));
            }
            Ok(Ok(None)) => {
                let reason = match timeout(KILL_WAIT, child.wait()).await {
                    Ok(Ok(status)) => format!("exited with {} before handshake", status),
                    _ => "closed stdout before handshake".to_string(),
                };
                abort(&mut child, &cancel).await;
                return Err(HarnessError::module_launch(name.to_string(), reason));
            }
            Ok(Ok(Some(line))) => match serde_json::from_str::<ModuleMessage>(&line) {
                Ok(ModuleMessage::Ready { models }) => models,
                Ok(other) => {
                    abort(&mut child, &cancel).await;
                    return Err(HarnessError::module_launch(
                        name.to_string(),
                        format!("expected ready handshake, got {:?}", other),
                    ));
                }
                Err(e) => {
                    abort(&mut child, &cancel).await;
                    return Err(HarnessError::module_launch(
                        name.to_string(),
                        format!("malformed handshake: {}", e),
                    ));
                }
            },
        };

        info!(
            "Module '{}' (pid {:?}) advertises models: {}",
            name,
            child.id(),
            models.join(", ")
        );

        let pending: Arc<PendingCalls> = Arc::new(SyncMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        tasks.push(tokio::spawn(read_responses(
            name.to_string(),
            lines,
            Arc::clone(&pending),
            Arc::clone(&alive),
            cancel.clone(),
        )));

        Ok(Self {
            name: name.to_string(),
            models,
            call_timeout,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            alive,
            next_id: AtomicU64::new(1),
            cancel,
            tasks: SyncMutex::new(tasks),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn advertises(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Send one request and wait for the matching response.
    ///
    /// Safe to call concurrently; responses are matched by id.
    pub async fn call(&self, request: Request) -> std::result::Result<ResponseBody, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        // The reader clears `pending` after flipping `alive`, so checking after
        // the insert cannot miss a dead module.
        if !self.alive.load(Ordering::SeqCst) {
            self.pending.lock().remove(&id);
            return Err(CallError::Transport(format!(
                "module '{}' is not running",
                self.name
            )));
        }

        match timeout(self.call_timeout, self.exchange(id, request, rx)).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => {
                self.pending.lock().remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CallError::Timeout(self.call_timeout))
            }
        }
    }

    async fn exchange(
        &self,
        id: u64,
        request: Request,
        rx: oneshot::Receiver<ResponseBody>,
    ) -> std::result::Result<ResponseBody, CallError> {
        let line = encode_line(&Envelope { id, request })
            .map_err(|e| CallError::Transport(format!("failed to encode request: {}", e)))?;

        {
            let mut stdin = self.stdin.lock().await;
            let writer = stdin.as_mut().ok_or(CallError::RuntimeClosed)?;
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| CallError::Transport(format!("write to module failed: {}", e)))?;
            writer
                .flush()
                .await
                .map_err(|e| CallError::Transport(format!("flush to module failed: {}", e)))?;
        }
        trace!("Sent request {} to module '{}'", id, self.name);

        rx.await.map_err(|_| {
            CallError::Transport(format!("module '{}' closed the connection", self.name))
        })
    }

    /// Ask the module to exit, then kill it if it is still running at `deadline`.
    ///
    /// Calling this again after it has run is a no-op.
    pub async fn shutdown(&self, deadline: Instant) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            debug!("Module '{}' already shut down", self.name);
            return Ok(());
        };

        info!("Shutting down module '{}'", self.name);

        if self.alive.load(Ordering::SeqCst) {
            match timeout_at(deadline, self.call(Request::Shutdown)).await {
                Ok(Ok(ResponseBody::Closed)) => debug!("Module '{}' acknowledged shutdown", self.name),
                Ok(Ok(body)) => warn!(
                    "Module '{}' answered shutdown with '{}'",
                    self.name,
                    body.kind()
                ),
                Ok(Err(e)) => debug!("Shutdown request to '{}' failed: {}", self.name, e),
                Err(_) => warn!("Module '{}' did not acknowledge shutdown", self.name),
            }
        }

        // Closing stdin is the fallback exit signal
        self.stdin.lock().await.take();

        let result = match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!("Module '{}' exited cleanly", self.name);
                Ok(())
            }
            Ok(Ok(status)) => Err(HarnessError::teardown(
                self.name.clone(),
                format!("exited with {}", status),
            )),
            Ok(Err(e)) => Err(HarnessError::teardown(
                self.name.clone(),
                format!("failed to wait for exit: {}", e),
            )),
            Err(_) => {
                warn!(
                    "Module '{}' still running at teardown deadline, killing it",
                    self.name
                );
                abort(&mut child, &self.cancel).await;
                Err(HarnessError::teardown(
                    self.name.as_str(),
                    "did not exit before the teardown deadline and was killed",
                ))
            }
        };

        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if timeout(KILL_WAIT, task).await.is_err() {
                error!("Background task for module '{}' did not stop", self.name);
            }
        }

        result
    }
}

async fn spawn(executable: &Path) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        let result = Command::new(executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        match result {
            // A freshly copied artifact can still be open for writing in a forked sibling
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                debug!("{} is busy, retrying spawn", executable.display());
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other,
        }
    }
}

async fn abort(child: &mut Child, cancel: &CancellationToken) {
    if let Err(e) = child.start_kill() {
        debug!("Kill failed (process likely exited): {}", e);
    }
    let _ = timeout(KILL_WAIT, child.wait()).await;
    cancel.cancel();
}

async fn read_responses(
    module: String,
    mut lines: Lines<BufReader<ChildStdout>>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch(&module, &line, &pending),
                Ok(None) => {
                    debug!("Module '{}' closed its stdout", module);
                    break;
                }
                Err(e) => {
                    warn!("Failed reading from module '{}': {}", module, e);
                    break;
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders fails every outstanding call
    pending.lock().clear();
}

fn dispatch(module: &str, line: &str, pending: &PendingCalls) {
    match serde_json::from_str::<ModuleMessage>(line) {
        Ok(ModuleMessage::Response { id, body }) => {
            let sender = pending.lock().remove(&id);
            match sender {
                Some(sender) => {
                    trace!("Module '{}' answered request {} with '{}'", module, id, body.kind());
                    let _ = sender.send(body);
                }
                None => debug!("Module '{}' answered unknown or expired request {}", module, id),
            }
        }
        Ok(ModuleMessage::Ready { .. }) => {
            warn!("Module '{}' repeated its handshake", module);
        }
        Err(e) => warn!("Module '{}' sent an unparseable line: {}", module, e),
    }
}

async fn forward_stderr(module: String, stderr: ChildStderr, cancel: CancellationToken) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => debug!(module = %module, "{}", line),
                Ok(None) | Err(_) => break,
            }
        }
    }
}
