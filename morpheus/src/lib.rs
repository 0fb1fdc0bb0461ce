//! MORPHEUS - Pair Watcher
//!
//! Awakens the system to market reality: polls pair reserves and wakes the
//! executor when a target's trigger holds.
//!
//! # Responsibilities
//! - One independent polling task per target
//! - Swallow transient RPC errors at the poll layer
//! - Ask the ledger before handing a target to the executor

pub mod trigger;
pub mod watcher;

use seraph::LedgerError;
use sniper_chain::ChainError;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use trinity::TrinityError;

pub use trigger::{evaluate, TriggerDecision};
pub use watcher::{PairWatcher, WatchExit};

/// Morpheus errors
#[derive(Error, Debug)]
pub enum MorpheusError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Execution error: {0}")]
    Execution(#[from] TrinityError),

    #[error("Watcher task failed: {0}")]
    TaskFailed(String),
}

/// Final state of one watcher
#[derive(Debug)]
pub struct WatchSummary {
    pub target: String,
    pub result: Result<WatchExit, MorpheusError>,
}

/// Morpheus watcher coordinator
pub struct Morpheus {
    watchers: Vec<PairWatcher>,
}

impl Morpheus {
    pub fn new() -> Self {
        tracing::info!("MORPHEUS: Awakening to market reality...");
        Self {
            watchers: Vec::new(),
        }
    }

    pub fn add_watcher(&mut self, watcher: PairWatcher) {
        tracing::info!("MORPHEUS: Adding watcher '{}'", watcher.target().name);
        self.watchers.push(watcher);
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Run every watcher as its own task until all are terminal.
    ///
    /// Setting `shutdown` stops watchers that are still polling; a watcher that
    /// already holds an authorization runs its execution to the end.
    pub async fn run_all(self, shutdown: watch::Receiver<bool>) -> Vec<WatchSummary> {
        tracing::info!("MORPHEUS: Starting {} watcher(s)...", self.watchers.len());

        let mut tasks = JoinSet::new();
        for watcher in self.watchers {
            let name = watcher.target().name.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                WatchSummary {
                    target: name,
                    result: watcher.run(shutdown).await,
                }
            });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => {
                    match &summary.result {
                        Ok(exit) => tracing::info!("MORPHEUS: watcher '{}' finished: {:?}", summary.target, exit),
                        Err(e) => tracing::error!("MORPHEUS: watcher '{}' failed: {}", summary.target, e),
                    }
                    summaries.push(summary);
                }
                Err(e) => {
                    tracing::error!("MORPHEUS: watcher task panicked: {}", e);
                    summaries.push(WatchSummary {
                        target: "<unknown>".to_string(),
                        result: Err(MorpheusError::TaskFailed(e.to_string())),
                    });
                }
            }
        }
        summaries
    }
}

impl Default for Morpheus {
    fn default() -> Self {
        Self::new()
    }
}
