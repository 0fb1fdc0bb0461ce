//! Per-target polling loop
//!
//! `IDLE -> POLLING -> TRIGGERED -> handed off`. Polls for one target are
//! strictly sequential; a target fires at most once.

use std::sync::Arc;
use std::time::Duration;

use seraph::{Authorization, Ledger};
use sniper_chain::ChainClient;
use sniper_notify::Notifier;
use sniper_types::{EventKind, LifecycleEvent, PositionState, ReserveSnapshot, Target};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use trinity::{ExecutionReport, SwapExecutor};

use crate::trigger::{evaluate, TriggerDecision};
use crate::MorpheusError;

/// How a watcher ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchExit {
    /// Authorization granted and the executor ran to a terminal outcome
    Executed(ExecutionReport),
    /// The ledger already held a non-UNTRADED record
    Denied(PositionState),
    /// Shutdown requested before the trigger fired
    Stopped,
}

/// Decrements the active-watcher gauge on every exit path
struct ActiveGuard;

impl ActiveGuard {
    fn enter() -> Self {
        sniper_metrics::global().watcher.active_watchers.inc();
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        sniper_metrics::global().watcher.active_watchers.dec();
    }
}

pub struct PairWatcher {
    target: Target,
    chain: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    executor: Arc<dyn SwapExecutor>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
}

impl PairWatcher {
    pub fn new(
        target: Target,
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        executor: Arc<dyn SwapExecutor>,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            target,
            chain,
            ledger,
            executor,
            notifier,
            poll_interval,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn notify(&self, kind: EventKind, details: String) {
        self.notifier.notify(LifecycleEvent::new(
            kind,
            self.target.pair,
            self.target.name.clone(),
            details,
        ));
    }

    async fn poll(&self) -> Result<ReserveSnapshot, MorpheusError> {
        let reserves = self.chain.get_reserves(self.target.pair).await?;
        Ok(ReserveSnapshot::observe(
            self.target.pair,
            &self.target.layout,
            reserves.reserve0,
            reserves.reserve1,
            reserves.block_number,
        ))
    }

    /// Watch until the target fires, the ledger denies it, or shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<WatchExit, MorpheusError> {
        let pair = self.target.pair;
        let pair_label = format!("{:?}", pair);
        let metrics = &sniper_metrics::global().watcher;

        let record = self.ledger.ensure(pair).await?;
        if record.state != PositionState::Untraded {
            info!(
                pair = ?pair,
                state = %record.state,
                "MORPHEUS: {} not armed, skipping",
                self.target.name
            );
            return Ok(WatchExit::Denied(record.state));
        }

        if *shutdown.borrow() {
            return Ok(WatchExit::Stopped);
        }

        let _active = ActiveGuard::enter();
        info!(
            pair = ?pair,
            "MORPHEUS: watching {} ({} {}) every {:?}",
            self.target.name,
            self.target.trigger.kind,
            self.target.trigger.threshold,
            self.poll_interval
        );
        self.notify(
            EventKind::WatchStarted,
            format!("{} {}", self.target.trigger.kind, self.target.trigger.threshold),
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too
                    if changed.is_err() || *shutdown.borrow() {
                        info!(pair = ?pair, "MORPHEUS: {} stopped", self.target.name);
                        return Ok(WatchExit::Stopped);
                    }
                    continue;
                }
            }

            metrics.polls.with_label_values(&[pair_label.as_str()]).inc();
            let snapshot = match self.poll().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    metrics.poll_errors.with_label_values(&[pair_label.as_str()]).inc();
                    warn!(pair = ?pair, "Reserve poll failed, retrying next cycle: {}", e);
                    continue;
                }
            };

            if let Some(price) = snapshot.price {
                // wad to float for the gauge
                let price_f = price.to_string().parse::<f64>().unwrap_or(0.0) / 1e18;
                metrics.last_price.with_label_values(&[pair_label.as_str()]).set(price_f);
            }

            let observed = match evaluate(&self.target, &snapshot) {
                TriggerDecision::Fire { observed } => observed,
                decision => {
                    debug!(pair = ?pair, block = snapshot.block_number, ?decision, "Trigger not met");
                    continue;
                }
            };

            let kind_label = self.target.trigger.kind.to_string();
            metrics
                .triggers
                .with_label_values(&[pair_label.as_str(), kind_label.as_str()])
                .inc();
            info!(
                pair = ?pair,
                block = snapshot.block_number,
                "MORPHEUS: {} triggered, observed {} vs threshold {}",
                self.target.name,
                observed,
                self.target.trigger.threshold
            );
            self.notify(
                EventKind::TriggerHit,
                format!(
                    "{} observed {} threshold {} at block {}",
                    self.target.trigger.kind, observed, self.target.trigger.threshold, snapshot.block_number
                ),
            );

            match self.ledger.authorize(pair).await {
                Ok(Authorization::Granted) => {
                    let report = self.executor.execute(&self.target).await?;
                    return Ok(WatchExit::Executed(report));
                }
                Ok(Authorization::Denied(state)) => {
                    info!(pair = ?pair, state = %state, "MORPHEUS: {} denied by ledger", self.target.name);
                    return Ok(WatchExit::Denied(state));
                }
                Err(e) => {
                    // Still UNTRADED; try again when the predicate next holds
                    error!(pair = ?pair, "Authorization failed: {}", e);
                }
            }
        }
    }
}
