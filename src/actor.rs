//! Single-mutator engine task
//!
//! The [`FocusEngine`] is moved into one tokio task and every mutation reaches
//! it as a message, so an idle callback and the periodic tick can never
//! interleave their read-modify-write cycles. Callers hold a cloneable
//! [`EngineHandle`] and await a oneshot reply.

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::engine::{EngineOutput, FocusEngine, SignalOutcome};
use crate::error::CoreError;
use crate::signals::Signal;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default period of the accounting tick
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(60);

const COMMAND_BUFFER: usize = 64;

enum EngineCommand {
    Tick,
    Signal {
        signal: Signal,
        reply: oneshot::Sender<Result<SignalOutcome, CoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineOutput>,
    },
    StorageChanged {
        keys: Vec<String>,
        reply: oneshot::Sender<Result<bool, CoreError>>,
    },
    UpdateConfig {
        config: Box<CoreConfig>,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// Cloneable handle to a running engine task
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Move `engine` into its own task. Must be called inside a tokio runtime.
pub fn spawn_engine<S>(engine: FocusEngine<S>, clock: Arc<dyn Clock>) -> EngineHandle
where
    S: Storage + 'static,
{
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let worker = tokio::spawn(run(engine, clock, receiver));
    EngineHandle {
        sender,
        ticker: Arc::new(Mutex::new(None)),
        worker: Arc::new(Mutex::new(Some(worker))),
    }
}

async fn run<S: Storage>(
    mut engine: FocusEngine<S>,
    clock: Arc<dyn Clock>,
    mut receiver: mpsc::Receiver<EngineCommand>,
) {
    info!("focus engine task started");
    while let Some(command) = receiver.recv().await {
        // the day key is derived from the moment each command is processed
        let now = clock.now();
        match command {
            EngineCommand::Tick => {
                if let Err(err) = engine.on_tick(now) {
                    error!(error = %err, "tick failed; will retry on the next tick");
                }
            }
            EngineCommand::Signal { signal, reply } => {
                let kind = signal.kind();
                let result = engine.handle(signal, now);
                if let Err(err) = &result {
                    error!(kind, error = %err, "signal handling failed");
                }
                if reply.send(result).is_err() {
                    debug!(kind, "signal caller went away before the reply");
                }
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(engine.snapshot(now));
            }
            EngineCommand::StorageChanged { keys, reply } => {
                let result = engine.on_storage_changed(&keys, now);
                if let Err(err) = &result {
                    error!(error = %err, "reloading configuration failed");
                }
                let _ = reply.send(result);
            }
            EngineCommand::UpdateConfig { config, reply } => {
                let _ = reply.send(engine.update_config(*config, now));
            }
            EngineCommand::Shutdown { reply } => {
                let result = engine.flush();
                if let Err(err) = &result {
                    error!(error = %err, "final keystroke flush failed");
                }
                let _ = reply.send(result);
                break;
            }
        }
    }
    info!("focus engine task stopped");
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .map_err(|_| CoreError::EngineUnavailable("engine task has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CoreError::EngineUnavailable("engine task dropped the request".to_string()))
    }

    /// Deliver one raw signal
    pub async fn signal(&self, signal: Signal) -> Result<SignalOutcome, CoreError> {
        self.request(|reply| EngineCommand::Signal { signal, reply }).await?
    }

    /// Run one accounting tick now, without waiting for its result
    pub async fn tick(&self) -> Result<(), CoreError> {
        self.sender
            .send(EngineCommand::Tick)
            .await
            .map_err(|_| CoreError::EngineUnavailable("engine task has stopped".to_string()))
    }

    pub async fn snapshot(&self) -> Result<EngineOutput, CoreError> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// Forward a change notification from the store
    pub async fn storage_changed(&self, keys: Vec<String>) -> Result<bool, CoreError> {
        self.request(|reply| EngineCommand::StorageChanged { keys, reply })
            .await?
    }

    pub async fn update_config(&self, config: CoreConfig) -> Result<(), CoreError> {
        self.request(|reply| EngineCommand::UpdateConfig {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Register the periodic tick. Returns false when a ticker is already running.
    pub async fn ensure_ticker(&self, period: Duration) -> bool {
        let mut guard = self.ticker.lock().await;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("ticker already running");
            return false;
        }

        let sender = self.sender.clone();
        // first deadline is one period after this call
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let handle = tokio::spawn(async move {
            loop {
                interval.tick().await;
                if sender.send(EngineCommand::Tick).await.is_err() {
                    debug!("engine gone, ticker exiting");
                    break;
                }
            }
        });
        *guard = Some(handle);
        info!(period_secs = period.as_secs(), "ticker started");
        true
    }

    /// Stop the periodic tick. Returns false when none was running.
    pub async fn stop_ticker(&self) -> bool {
        match self.ticker.lock().await.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop the ticker, flush pending keystrokes and wait for the task to end
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.stop_ticker().await;
        let result = self.request(|reply| EngineCommand::Shutdown { reply }).await?;

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(err) = worker.await {
                warn!(error = %err, "engine task ended abnormally");
            }
        }
        result
    }
}
