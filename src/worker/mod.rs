//! Python model worker pool.
//! Each slot owns one `python worker.py` child spoken to over stdin/stdout
//! (see [`protocol`]). Dead workers respawn lazily on next use.
//! Stateful calls (landmark tracking) are pinned to a slot by key; the rest
//! go to any idle slot.
//! Health check: ping every interval, 3 consecutive failures → slot torn down.

pub mod adapters;
pub mod protocol;
#[cfg(test)]
pub(crate) mod testing;

pub use adapters::{WorkerClassifier, WorkerExtractor, WorkerGenerator};

use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ModelPaths, WorkerConfig};
use protocol::{read_frame, write_frame, WorkerRequest, WorkerResponse};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn model worker `{python}`: {source}")]
    Spawn {
        python: String,
        #[source]
        source: std::io::Error,
    },
    #[error("model worker IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model worker message of {0} bytes exceeds limit")]
    MessageTooLarge(usize),
    #[error("encode worker request: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode worker response: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("model worker reported {kind}: {message}")]
    Remote { kind: String, message: String },
    #[error("expected `{expected}` response, got `{actual}`")]
    UnexpectedResponse { expected: String, actual: String },
    #[error("model worker response missing `{0}`")]
    MissingField(&'static str),
    #[error("model worker pool has no slots")]
    NoSlots,
}

impl WorkerError {
    /// Whether the worker process should be considered broken.
    fn is_fatal_to_process(&self) -> bool {
        matches!(
            self,
            WorkerError::Io(_)
                | WorkerError::MessageTooLarge(_)
                | WorkerError::Decode(_)
                | WorkerError::UnexpectedResponse { .. }
        )
    }

    /// Worker could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, WorkerError::Spawn { .. } | WorkerError::NoSlots)
    }
}

/// How to start a worker process.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub python_bin: String,
    pub script: PathBuf,
    pub args: Vec<String>,
}

impl WorkerLaunch {
    /// `python script --classifier <path> [--translator-model <dir>] [--translator-tokenizer <dir>]`
    pub fn from_config(worker: &WorkerConfig, models: &ModelPaths) -> Self {
        let mut args = vec![
            "--classifier".to_string(),
            models.classifier.display().to_string(),
        ];
        if let Some(model) = &models.translator_model {
            args.push("--translator-model".into());
            args.push(model.display().to_string());
        }
        if let Some(tokenizer) = &models.translator_tokenizer {
            args.push("--translator-tokenizer".into());
            args.push(tokenizer.display().to_string());
        }
        args.push("--max-trackers".into());
        args.push(worker.max_trackers.to_string());
        Self {
            python_bin: worker.python_bin.clone(),
            script: worker.script.clone(),
            args,
        }
    }
}

/// What a worker reports about its loaded models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescription {
    pub keypoint_dim: usize,
    pub num_classes: usize,
    pub generator_loaded: bool,
}

/// Managed worker process with stdin/stdout handles.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl WorkerProcess {
    fn spawn(launch: &WorkerLaunch, slot: usize) -> Result<Self, WorkerError> {
        info!(
            slot,
            script = %launch.script.display(),
            python = %launch.python_bin,
            "spawning model worker"
        );
        let spawn_err = |source| WorkerError::Spawn {
            python: launch.python_bin.clone(),
            source,
        };
        let mut child = Command::new(&launch.python_bin)
            .arg(&launch.script)
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // worker logs pass through
            .spawn()
            .map_err(spawn_err)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_err(std::io::Error::other("worker stdin not captured"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_err(std::io::Error::other("worker stdout not captured"))
        })?;
        info!(slot, pid = child.id(), "model worker spawned");
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    fn round_trip(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerResponse, WorkerError> {
        write_frame(&mut self.stdin, &request.encode()?)?;
        WorkerResponse::decode(&read_frame(&mut self.stdout)?)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // Best-effort shutdown, then make sure it is gone.
        if let Ok(bytes) = WorkerRequest::Shutdown.encode() {
            let _ = write_frame(&mut self.stdin, &bytes);
        }
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            if !self.is_alive() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct WorkerSlot {
    process: Mutex<Option<WorkerProcess>>,
    health_failures: AtomicU32,
}

/// Fixed-size pool of model workers. Blocking; call from blocking threads.
pub struct WorkerPool {
    launch: WorkerLaunch,
    slots: Vec<WorkerSlot>,
    next: AtomicUsize,
    available: AtomicBool,
    max_health_failures: u32,
}

impl WorkerPool {
    pub fn new(launch: WorkerLaunch, size: usize, max_health_failures: u32) -> Self {
        let slots = (0..size)
            .map(|_| WorkerSlot {
                process: Mutex::new(None),
                health_failures: AtomicU32::new(0),
            })
            .collect();
        Self {
            launch,
            slots,
            next: AtomicUsize::new(0),
            available: AtomicBool::new(false),
            max_health_failures: max_health_failures.max(1),
        }
    }

    pub fn from_config(worker: &WorkerConfig, models: &ModelPaths) -> Self {
        Self::new(
            WorkerLaunch::from_config(worker, models),
            worker.pool_size,
            worker.max_health_failures,
        )
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of slots with a spawned process.
    pub fn running(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.process.lock().is_some())
            .count()
    }

    pub fn is_running(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.process.lock().is_some())
    }

    /// Slot that owns `key`. Stable for the lifetime of the pool.
    pub fn slot_for(&self, key: &str) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let hash = blake3::hash(key.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        Some((u64::from_le_bytes(head) % self.slots.len() as u64) as usize)
    }

    /// Send a request on the slot owning `key`, waiting for it if busy.
    /// Requests that touch per-key worker state must go through here.
    pub fn call_pinned(
        &self,
        key: &str,
        request: &WorkerRequest<'_>,
    ) -> Result<WorkerResponse, WorkerError> {
        let index = self.slot_for(key).ok_or(WorkerError::NoSlots)?;
        let mut guard = self.slots[index].process.lock();
        self.call_on(index, &mut guard, request)
    }

    /// Send one request on an idle slot (or wait for one) and return the reply.
    pub fn call(&self, request: &WorkerRequest<'_>) -> Result<WorkerResponse, WorkerError> {
        if self.slots.is_empty() {
            return Err(WorkerError::NoSlots);
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        for offset in 0..self.slots.len() {
            let index = (start + offset) % self.slots.len();
            if let Some(mut guard) = self.slots[index].process.try_lock() {
                return self.call_on(index, &mut guard, request);
            }
        }
        let mut guard = self.slots[start].process.lock();
        self.call_on(start, &mut guard, request)
    }

    fn call_on(
        &self,
        index: usize,
        process: &mut Option<WorkerProcess>,
        request: &WorkerRequest<'_>,
    ) -> Result<WorkerResponse, WorkerError> {
        let needs_spawn = match process.as_mut() {
            Some(p) => !p.is_alive(),
            None => true,
        };
        if needs_spawn {
            if process.is_some() {
                warn!(slot = index, "model worker exited, respawning");
            }
            *process = None;
            match WorkerProcess::spawn(&self.launch, index) {
                Ok(p) => {
                    *process = Some(p);
                    self.slots[index].health_failures.store(0, Ordering::SeqCst);
                    self.available.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    self.available.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        let Some(worker) = process.as_mut() else {
            return Err(WorkerError::NoSlots);
        };

        let start = Instant::now();
        let result = worker.round_trip(request);
        match &result {
            Ok(_) => debug!(
                slot = index,
                request = request.kind(),
                elapsed_us = start.elapsed().as_micros() as u64,
                "worker_call"
            ),
            Err(e) if e.is_fatal_to_process() => {
                warn!(slot = index, request = request.kind(), error = %e, "worker call failed, dropping process");
                *process = None;
            }
            Err(_) => {}
        }
        result
    }

    /// Ask a worker which models it loaded.
    pub fn describe(&self) -> Result<WorkerDescription, WorkerError> {
        let response = self.call(&WorkerRequest::Describe)?.expect_type("describe")?;
        Ok(WorkerDescription {
            keypoint_dim: response
                .keypoint_dim
                .ok_or(WorkerError::MissingField("keypoint_dim"))?,
            num_classes: response
                .num_classes
                .ok_or(WorkerError::MissingField("num_classes"))?,
            generator_loaded: response.generator_loaded.unwrap_or(false),
        })
    }

    /// Ping every running slot. Returns whether all answered.
    pub fn health_check(&self) -> bool {
        let mut healthy = true;
        for (index, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.process.lock();
            let Some(worker) = guard.as_mut() else {
                continue;
            };
            let ok = match worker
                .round_trip(&WorkerRequest::Ping)
                .and_then(|r| r.expect_type("pong"))
            {
                Ok(_) => {
                    debug!(slot = index, "health check: pong received");
                    true
                }
                Err(e) => {
                    warn!(slot = index, error = %e, "health check failed");
                    false
                }
            };
            if ok {
                slot.health_failures.store(0, Ordering::SeqCst);
                continue;
            }
            healthy = false;
            let failures = slot.health_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.max_health_failures {
                warn!(
                    slot = index,
                    failures, "max health failures reached, tearing down worker"
                );
                *guard = None;
                slot.health_failures.store(0, Ordering::SeqCst);
            }
        }
        healthy
    }

    /// Run [`health_check`](Self::health_check) every `interval` until cancelled.
    pub fn spawn_health_loop(
        pool: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let pool = Arc::clone(&pool);
                if let Err(e) = tokio::task::spawn_blocking(move || pool.health_check()).await {
                    warn!(error = %e, "health check task failed");
                }
            }
            debug!("worker health loop stopped");
        })
    }

    /// Stop every worker process.
    pub fn shutdown(&self) {
        for slot in &self.slots {
            *slot.process.lock() = None;
        }
        self.available.store(false, Ordering::SeqCst);
        info!("model workers stopped");
    }
}
