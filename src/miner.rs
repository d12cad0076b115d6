//! Background miner that turns the pending pool into blocks

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::blockchain::{Block, Ledger, LedgerError};
use crate::config::MinerConfig;
use crate::network::{BlockAnnouncer, NetworkError};

/// Errors that can end one mining attempt
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("Block production failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Block announcement failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Mining task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Control state of one run of the mining loop
///
/// Every `start` creates a fresh run, so a loop that has been told to stop
/// can never be revived by a later `start`.
struct Run {
    running: AtomicBool,

    /// Raised on stop to abandon an in-flight proof of work search
    cancel: Arc<AtomicBool>,
    wake: Notify,
}

impl Run {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            cancel: Arc::new(AtomicBool::new(false)),
            wake: Notify::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns `false` if this run was already stopped
    fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        true
    }
}

/// Long-running block producer
///
/// STOPPED until [`Miner::start`]; while RUNNING it polls the pending pool,
/// produces a block whenever the pool is non-empty and announces it. Errors
/// never end the loop: they are logged and followed by a longer backoff.
pub struct Miner {
    ledger: Ledger,
    announcer: Arc<dyn BlockAnnouncer>,
    config: MinerConfig,
    blocks_mined: Arc<AtomicU64>,

    /// Latest run and the task driving it
    current: Mutex<Option<(Arc<Run>, JoinHandle<()>)>>,
}

impl Miner {
    pub fn new(ledger: Ledger, announcer: Arc<dyn BlockAnnouncer>, config: MinerConfig) -> Self {
        Self {
            ledger,
            announcer,
            config,
            blocks_mined: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<(Arc<Run>, JoinHandle<()>)>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawns the mining loop on the current tokio runtime
    ///
    /// Returns `false` if the miner was already running. A previous run
    /// that is still winding down keeps its own stop signal and exits on
    /// its own.
    pub fn start(&self) -> bool {
        let mut current = self.current();
        if matches!(current.as_ref(), Some((run, _)) if run.is_running()) {
            return false;
        }

        let run = Arc::new(Run::new());
        let worker = Worker {
            ledger: self.ledger.clone(),
            announcer: self.announcer.clone(),
            config: self.config.clone(),
            run: run.clone(),
            blocks_mined: self.blocks_mined.clone(),
        };

        info!("Miner {} started", self.config.address);
        let handle = tokio::spawn(worker.run());
        *current = Some((run, handle));

        true
    }

    /// Asks the loop to exit at its next iteration boundary
    ///
    /// Also cancels a running proof of work search. Returns `false` if the
    /// miner was not running.
    pub fn stop(&self) -> bool {
        let stopped = match self.current().as_ref() {
            Some((run, _)) => run.stop(),
            None => false,
        };

        if stopped {
            info!("Miner {} stopping", self.config.address);
        }
        stopped
    }

    /// Stops the miner and waits for its task to finish
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self.current().take().map(|(_, handle)| handle);

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("Mining task ended abnormally: {}", err);
            }
        }
    }

    pub fn is_mining_active(&self) -> bool {
        matches!(self.current().as_ref(), Some((run, _)) if run.is_running())
    }

    pub fn miner_address(&self) -> &str {
        &self.config.address
    }

    /// Blocks produced by this miner since creation
    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::SeqCst)
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The task side of the miner
struct Worker {
    ledger: Ledger,
    announcer: Arc<dyn BlockAnnouncer>,
    config: MinerConfig,
    run: Arc<Run>,
    blocks_mined: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self) {
        while self.run.is_running() {
            let delay = if self.ledger.pending_len() == 0 {
                self.config.poll_interval
            } else {
                match self.mine_once().await {
                    Ok(block) => {
                        self.blocks_mined.fetch_add(1, Ordering::SeqCst);
                        debug!("Mined block {} ({})", block.index, block.hash);
                        self.config.poll_interval
                    }
                    Err(err) => {
                        if self.run.is_running() {
                            warn!(
                                "Mining attempt failed, backing off for {:?}: {}",
                                self.config.error_backoff, err
                            );
                        }
                        self.config.error_backoff
                    }
                }
            };

            self.pause(delay).await;
        }

        info!("Miner {} stopped", self.config.address);
    }

    async fn mine_once(&self) -> Result<Block, MinerError> {
        let ledger = self.ledger.clone();
        let address = self.config.address.clone();
        let cancel = self.run.cancel.clone();

        // Proof of work is CPU bound, keep it off the async workers
        let block = tokio::task::spawn_blocking(move || {
            ledger.produce_block_with_cancel(&address, &cancel)
        })
        .await??;

        let report = self.announcer.announce_block(&block).await?;
        info!(
            "Announced block {} to {}/{} peers",
            block.index,
            report.delivered.len(),
            report.attempted()
        );

        Ok(block)
    }

    /// Sleeps for `delay` unless woken by a stop request
    async fn pause(&self, delay: Duration) {
        let woken = self.run.wake.notified();
        if !self.run.is_running() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = woken => {}
        }
    }
}
