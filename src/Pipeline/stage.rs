// Stage lifecycle: one worker thread per stage, cooperative shutdown

use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Cooperative stop request shared between a stage runner and its worker.
///
/// Workers observe the flag between frames; nothing is cancelled mid-frame.
/// In steady state most stages never poll it because the producer-done
/// sentinel propagating through their input rings gets them out.
#[derive(Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A long-running pipeline stage.
///
/// `main_thread` is the worker body; the runtime only guarantees it runs on
/// its own OS thread and that `join` returns once it has. Stages communicate
/// exclusively through ring buffers and share no other mutable state.
pub trait Stage: Send {
    fn unique_name(&self) -> &str;
    fn main_thread(&mut self, shutdown: &ShutdownToken);
}

/// Owns one stage's worker thread: `start` spawns it, `stop` requests
/// cooperative exit, `join` blocks until the worker returns.
pub struct StageRunner {
    name: String,
    shutdown: ShutdownToken,
    stage: Option<Box<dyn Stage>>,
    handle: Option<JoinHandle<()>>,
}

impl StageRunner {
    pub fn new(stage: Box<dyn Stage>) -> Self {
        Self {
            name: stage.unique_name().to_string(),
            shutdown: ShutdownToken::new(),
            stage: Some(stage),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clone of this stage's stop flag, for external stop handles.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Spawn the worker thread running `main_thread`.
    pub fn start(&mut self) {
        let mut stage = self
            .stage
            .take()
            .unwrap_or_else(|| panic!("stage '{}' started twice", self.name));
        let shutdown = self.shutdown.clone();
        let name = self.name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("stage '{}' started", name);
                stage.main_thread(&shutdown);
                info!("stage '{}' exited", name);
            })
            .unwrap_or_else(|e| panic!("failed to spawn thread for stage '{}': {}", self.name, e));
        self.handle = Some(handle);
    }

    /// Request cooperative shutdown. Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.request();
    }

    /// Block until the worker exits. A worker panic is logged, not
    /// propagated; teardown of the rest of the mode continues.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("stage '{}' worker panicked", self.name);
            }
        }
    }
}
