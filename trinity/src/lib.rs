//! TRINITY - Trade Executor
//!
//! Takes action once the ledger has granted a pair. Builds, signs and submits
//! the swap, then drives it to a terminal outcome.
//!
//! # Attempt state machine
//! ```text
//! Submitting -> AwaitingConfirmation -> Confirmed
//!     |               |
//!     +---> Escalate <+---> Submitting (fresh plan, higher gas)
//!               |
//!               +---> Exhausted
//! ```
//! Before every resubmission, and before giving up, receipts of all hashes
//! submitted in this run are checked so an earlier slow-but-mined attempt
//! always wins over a new one.

pub mod gas;
pub mod plan;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use seraph::{Finalization, Ledger, LedgerError};
use sniper_chain::{raw_tx_hash, ChainClient, ChainError, ReceiptDetails, ReceiptStatus};
use sniper_config::{multiplier_bps, SniperConfig};
use sniper_notify::Notifier;
use sniper_types::{now_ms, EventKind, LifecycleEvent, PositionState, ReserveSnapshot, Target, TradeSide};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use gas::GasLadder;
pub use plan::{encode_swap_call, min_amount_out, quote_amount_out, SwapPlan};

/// Trinity execution errors
#[derive(Error, Debug)]
pub enum TrinityError {
    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Invalid executor config: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Terminal result of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Confirmed {
        tx_hash: H256,
        amount_in: U256,
        amount_out: U256,
        executed_price: Option<U256>,
        block_number: u64,
    },
    Exhausted {
        tx_hash: Option<H256>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub attempts: u32,
}

impl ExecutionReport {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Confirmed { .. })
    }
}

/// Executes a swap for a pair the ledger has already marked PENDING, and
/// finalizes the ledger with the outcome.
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn execute(&self, target: &Target) -> Result<ExecutionReport, TrinityError>;
}

/// Executor tunables
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub router: Address,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub fee_bps: u32,
    pub start_gas_multiplier_bps: u32,
    pub gas_multiplier_step_bps: u32,
    pub max_gas_price: Option<U256>,
    pub max_attempts: u32,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub retry_backoff: Duration,
    pub deadline_secs: u64,
}

impl ExecutorSettings {
    pub fn from_config(config: &SniperConfig) -> Result<Self, TrinityError> {
        let router = config
            .chain
            .router_address
            .parse::<Address>()
            .map_err(|_| TrinityError::Config(format!("router address '{}'", config.chain.router_address)))?;
        let executor = &config.executor;

        Ok(Self {
            router,
            chain_id: config.chain.chain_id,
            gas_limit: config.chain.gas_limit,
            fee_bps: config.chain.fee_bps,
            start_gas_multiplier_bps: multiplier_bps(executor.start_gas_multiplier),
            gas_multiplier_step_bps: multiplier_bps(executor.gas_multiplier_step),
            max_gas_price: executor
                .max_gas_price_gwei
                .map(|gwei| U256::from(gwei) * U256::exp10(9)),
            max_attempts: executor.max_attempts.max(1),
            confirmation_timeout: Duration::from_millis(executor.confirmation_timeout_ms),
            receipt_poll_interval: Duration::from_millis(executor.receipt_poll_interval_ms),
            retry_backoff: Duration::from_millis(executor.retry_backoff_ms),
            deadline_secs: executor.deadline_secs,
        })
    }
}

/// Upper bound on the finalize retry delay
const MAX_FINALIZE_BACKOFF: Duration = Duration::from_secs(30);

enum AttemptState {
    Submitting,
    AwaitingConfirmation { tx_hash: H256 },
    Escalate { reason: String, bump_gas: bool },
    Confirmed(ReceiptDetails),
    Exhausted { tx_hash: Option<H256>, reason: String },
}

/// Why a submission attempt did not produce an accepted hash
enum SubmitFailure {
    /// Underpriced or nonce conflict; retry with more gas
    Escalatable(String),
    /// Reads failed before anything was sent
    Transient(String),
    /// The node may hold the transaction; watch this hash
    Ambiguous { tx_hash: H256, reason: String },
    Terminal(String),
}

/// What `run_attempts` ends with
enum Terminal {
    Confirmed(ReceiptDetails),
    Exhausted { tx_hash: Option<H256>, reason: String },
}

enum Watch {
    Mined(ReceiptDetails),
    Reverted(H256),
    TimedOut,
}

/// Per-call bookkeeping
struct Run {
    submitted: Vec<(H256, SwapPlan)>,
    first_nonce: Option<U256>,
    attempts: u32,
}

impl Run {
    fn plan_for(&self, tx_hash: H256) -> Option<&SwapPlan> {
        self.submitted.iter().find(|(h, _)| *h == tx_hash).map(|(_, p)| p)
    }

    fn last_hash(&self) -> Option<H256> {
        self.submitted.last().map(|(h, _)| *h)
    }
}

/// Trinity agent
pub struct TradeExecutor {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    wallet: LocalWallet,
    notifier: Arc<dyn Notifier>,
    settings: ExecutorSettings,
}

impl TradeExecutor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        wallet: LocalWallet,
        notifier: Arc<dyn Notifier>,
        settings: ExecutorSettings,
    ) -> Self {
        let wallet = wallet.with_chain_id(settings.chain_id);
        tracing::info!(
            "TRINITY: Initializing for chain {} with wallet {:?}",
            settings.chain_id,
            wallet.address()
        );
        Self {
            chain,
            ledger,
            wallet,
            notifier,
            settings,
        }
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    fn notify(&self, target: &Target, kind: EventKind, details: String) {
        self.notifier
            .notify(LifecycleEvent::new(kind, target.pair, target.name.clone(), details));
    }

    fn count_attempt(&self, target: &Target, result: &str) {
        let pair = format!("{:?}", target.pair);
        sniper_metrics::global()
            .executor
            .attempts
            .with_label_values(&[pair.as_str(), result])
            .inc();
    }

    /// Read fresh chain state, plan, sign and submit one attempt
    async fn submit_attempt(
        &self,
        target: &Target,
        ladder: &GasLadder,
        run: &mut Run,
    ) -> Result<(H256, SwapPlan), SubmitFailure> {
        let transient = |e: ChainError| SubmitFailure::Transient(e.to_string());

        let reserves = self.chain.get_reserves(target.pair).await.map_err(transient)?;
        let snapshot = ReserveSnapshot::observe(
            target.pair,
            &target.layout,
            reserves.reserve0,
            reserves.reserve1,
            reserves.block_number,
        );
        let (reserve_in, reserve_out) = target.swap_reserves(&snapshot);
        let quoted = quote_amount_out(target.amount_in, reserve_in, reserve_out, self.settings.fee_bps);
        let min_out = min_amount_out(quoted, target.slippage_bps);
        if min_out.is_zero() {
            return Err(SubmitFailure::Transient(format!(
                "quote rounds to zero at block {} (reserves {}/{})",
                reserves.block_number, reserve_in, reserve_out
            )));
        }

        let network_gas = self.chain.get_gas_price().await.map_err(transient)?;
        let mut gas_price = ladder.apply(network_gas);
        if let Some(cap) = self.settings.max_gas_price {
            gas_price = gas_price.min(cap);
        }

        let nonce = self.chain.get_nonce(self.wallet.address()).await.map_err(transient)?;
        match run.first_nonce {
            None => run.first_nonce = Some(nonce),
            Some(first) if first != nonce => {
                return Err(SubmitFailure::Terminal(format!(
                    "account nonce moved from {} to {} outside this execution",
                    first, nonce
                )));
            }
            Some(_) => {}
        }

        let deadline = U256::from((now_ms() / 1_000).max(0) as u64 + self.settings.deadline_secs);
        let plan = SwapPlan {
            token_in: target.input_token(),
            token_out: target.output_token(),
            amount_in: target.amount_in,
            quoted_amount_out: quoted,
            min_amount_out: min_out,
            gas_price,
            gas_multiplier_bps: ladder.current(),
            nonce,
            deadline,
        };

        let raw = plan
            .sign(&self.wallet, self.settings.router, self.settings.chain_id, self.settings.gas_limit)
            .map_err(|e| SubmitFailure::Terminal(e.to_string()))?;
        let local_hash = raw_tx_hash(&raw);

        let pair = format!("{:?}", target.pair);
        sniper_metrics::global()
            .executor
            .gas_multiplier
            .with_label_values(&[pair.as_str()])
            .observe(ladder.current() as f64 / 10_000.0);

        debug!(
            pair = ?target.pair,
            attempt = run.attempts,
            nonce = %nonce,
            gas_price = %gas_price,
            min_out = %min_out,
            "Submitting swap"
        );

        match self.chain.submit_transaction(raw).await {
            Ok(tx_hash) => Ok((tx_hash, plan)),
            Err(e) if e.may_have_landed() => {
                run.submitted.push((local_hash, plan));
                Err(SubmitFailure::Ambiguous { tx_hash: local_hash, reason: e.to_string() })
            }
            Err(e) if e.is_escalatable() => Err(SubmitFailure::Escalatable(e.to_string())),
            // Refused before processing; the same plan is safe to rebuild
            Err(e) if e.is_transient() => Err(SubmitFailure::Transient(e.to_string())),
            Err(e) => Err(SubmitFailure::Terminal(e.to_string())),
        }
    }

    /// Poll one receipt until it is mined or the confirmation window closes
    async fn await_receipt(&self, tx_hash: H256) -> Watch {
        let deadline = Instant::now() + self.settings.confirmation_timeout;
        loop {
            match self.chain.get_receipt(tx_hash).await {
                Ok(ReceiptStatus::Success(details)) => return Watch::Mined(details),
                Ok(ReceiptStatus::Reverted { tx_hash, .. }) => return Watch::Reverted(tx_hash),
                Ok(ReceiptStatus::Pending) => {}
                Err(e) => warn!(tx_hash = ?tx_hash, "Receipt lookup failed: {}", e),
            }

            if Instant::now() + self.settings.receipt_poll_interval > deadline {
                return Watch::TimedOut;
            }
            tokio::time::sleep(self.settings.receipt_poll_interval).await;
        }
    }

    /// Check every hash submitted so far for a mined receipt
    async fn sweep(&self, run: &Run) -> Option<AttemptState> {
        for (tx_hash, _) in &run.submitted {
            match self.chain.get_receipt(*tx_hash).await {
                Ok(ReceiptStatus::Success(details)) => {
                    info!(tx_hash = ?tx_hash, "Earlier attempt was mined");
                    return Some(AttemptState::Confirmed(details));
                }
                Ok(ReceiptStatus::Reverted { tx_hash, .. }) => {
                    return Some(AttemptState::Exhausted {
                        tx_hash: Some(tx_hash),
                        reason: "transaction reverted".to_string(),
                    });
                }
                Ok(ReceiptStatus::Pending) => {}
                Err(e) => warn!(tx_hash = ?tx_hash, "Receipt sweep lookup failed: {}", e),
            }
        }
        None
    }

    /// Executed amounts from the pair's Swap log, falling back to the plan
    fn executed_amounts(&self, target: &Target, details: &ReceiptDetails, run: &Run) -> (U256, U256) {
        let input_is_token0 = match target.side {
            TradeSide::Buy => !target.layout.base_is_token0,
            TradeSide::Sell => target.layout.base_is_token0,
        };

        if let Some(log) = details.swap_for(target.pair) {
            return log.amounts(input_is_token0);
        }

        warn!(
            pair = ?target.pair,
            tx_hash = ?details.tx_hash,
            "No Swap log for pair in receipt; recording planned amounts"
        );
        run.plan_for(details.tx_hash)
            .map(|p| (p.amount_in, p.min_amount_out))
            .unwrap_or((target.amount_in, U256::zero()))
    }

    /// Finalize until the store accepts the write
    async fn finalize(&self, target: &Target, outcome: Finalization) -> Result<(), TrinityError> {
        let mut backoff = self.settings.retry_backoff.max(Duration::from_millis(1));
        loop {
            match self.ledger.finalize(target.pair, outcome.clone()).await {
                Ok(_) => return Ok(()),
                Err(LedgerError::Store(e)) => {
                    error!(
                        pair = ?target.pair,
                        "TRINITY: ledger write failed, retrying in {:?}: {}",
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_FINALIZE_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn run_attempts(&self, target: &Target, run: &mut Run) -> Terminal {
        let mut ladder = GasLadder::new(
            self.settings.start_gas_multiplier_bps,
            self.settings.gas_multiplier_step_bps,
            target.max_gas_multiplier_bps,
        );
        let mut state = AttemptState::Submitting;

        loop {
            state = match state {
                AttemptState::Submitting => {
                    run.attempts += 1;
                    match self.submit_attempt(target, &ladder, run).await {
                        Ok((tx_hash, plan)) => {
                            self.count_attempt(target, "submitted");
                            self.notify(
                                target,
                                EventKind::SwapSubmitted,
                                format!(
                                    "attempt {} tx {:?} gas {}x{:.2} min_out {}",
                                    run.attempts,
                                    tx_hash,
                                    plan.gas_price,
                                    plan.gas_multiplier_bps as f64 / 10_000.0,
                                    plan.min_amount_out
                                ),
                            );
                            run.submitted.push((tx_hash, plan));
                            AttemptState::AwaitingConfirmation { tx_hash }
                        }
                        Err(SubmitFailure::Ambiguous { tx_hash, reason }) => {
                            self.count_attempt(target, "ambiguous");
                            warn!(pair = ?target.pair, tx_hash = ?tx_hash, "Submission outcome unknown: {}", reason);
                            AttemptState::AwaitingConfirmation { tx_hash }
                        }
                        Err(SubmitFailure::Escalatable(reason)) => {
                            self.count_attempt(target, "rejected");
                            AttemptState::Escalate { reason, bump_gas: true }
                        }
                        Err(SubmitFailure::Transient(reason)) => {
                            self.count_attempt(target, "transient");
                            AttemptState::Escalate { reason, bump_gas: false }
                        }
                        Err(SubmitFailure::Terminal(reason)) => {
                            self.count_attempt(target, "terminal");
                            AttemptState::Exhausted { tx_hash: run.last_hash(), reason }
                        }
                    }
                }

                AttemptState::AwaitingConfirmation { tx_hash } => match self.await_receipt(tx_hash).await {
                    Watch::Mined(details) => AttemptState::Confirmed(details),
                    Watch::Reverted(tx_hash) => AttemptState::Exhausted {
                        tx_hash: Some(tx_hash),
                        reason: "transaction reverted".to_string(),
                    },
                    Watch::TimedOut => AttemptState::Escalate {
                        reason: format!(
                            "{:?} not mined within {:?}",
                            tx_hash, self.settings.confirmation_timeout
                        ),
                        bump_gas: true,
                    },
                },

                AttemptState::Escalate { reason, bump_gas } => {
                    warn!(pair = ?target.pair, attempt = run.attempts, "Swap attempt failed: {}", reason);
                    self.notify(
                        target,
                        EventKind::AttemptFailed,
                        format!("attempt {}/{}: {}", run.attempts, self.settings.max_attempts, reason),
                    );

                    if let Some(mined) = self.sweep(run).await {
                        mined
                    } else if run.attempts >= self.settings.max_attempts {
                        AttemptState::Exhausted {
                            tx_hash: run.last_hash(),
                            reason: format!("{} attempts exhausted, last error: {}", run.attempts, reason),
                        }
                    } else {
                        if bump_gas && ladder.at_ceiling() {
                            debug!(pair = ?target.pair, max_bps = ladder.max(), "Gas multiplier at ceiling");
                        } else if bump_gas {
                            let next = ladder.escalate();
                            debug!(pair = ?target.pair, multiplier_bps = next, "Escalating gas");
                        }
                        tokio::time::sleep(self.settings.retry_backoff).await;
                        AttemptState::Submitting
                    }
                }

                AttemptState::Exhausted { tx_hash, reason } => {
                    // An earlier hash may still have been mined
                    return match self.sweep(run).await {
                        Some(AttemptState::Confirmed(details)) => Terminal::Confirmed(details),
                        _ => Terminal::Exhausted { tx_hash, reason },
                    };
                }

                AttemptState::Confirmed(details) => return Terminal::Confirmed(details),
            }
        }
    }
}

#[async_trait]
impl SwapExecutor for TradeExecutor {
    async fn execute(&self, target: &Target) -> Result<ExecutionReport, TrinityError> {
        let started = Instant::now();
        let pair_label = format!("{:?}", target.pair);
        info!(
            "TRINITY: executing {} ({:?} {} of {:?})",
            target.name,
            target.side,
            target.amount_in,
            target.input_token()
        );

        let state = self
            .ledger
            .get(target.pair)
            .await
            .map(|r| r.state)
            .ok_or(LedgerError::UnknownPair(target.pair))?;
        if state != PositionState::Pending {
            return Err(LedgerError::NotPending { pair: target.pair, state }.into());
        }

        let mut run = Run {
            submitted: Vec::new(),
            first_nonce: None,
            attempts: 0,
        };
        let terminal = self.run_attempts(target, &mut run).await;
        let metrics = &sniper_metrics::global().executor;

        let outcome = match terminal {
            Terminal::Confirmed(details) => {
                let (amount_in, amount_out) = self.executed_amounts(target, &details, &run);
                let executed_price = target.execution_price(amount_in, amount_out);

                self.finalize(
                    target,
                    Finalization::Traded {
                        tx_hash: details.tx_hash,
                        amount_in,
                        amount_out,
                        executed_price,
                    },
                )
                .await?;

                metrics
                    .confirmation_latency
                    .with_label_values(&[pair_label.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                metrics.outcomes.with_label_values(&[pair_label.as_str(), "confirmed"]).inc();
                info!(
                    pair = ?target.pair,
                    tx_hash = ?details.tx_hash,
                    block = details.block_number,
                    "TRINITY: swap confirmed, {} in / {} out",
                    amount_in,
                    amount_out
                );
                self.notify(
                    target,
                    EventKind::SwapConfirmed,
                    format!(
                        "tx {:?} block {} in {} out {} price {}",
                        details.tx_hash,
                        details.block_number,
                        amount_in,
                        amount_out,
                        executed_price.map(|p| p.to_string()).unwrap_or_else(|| "n/a".to_string())
                    ),
                );

                ExecutionOutcome::Confirmed {
                    tx_hash: details.tx_hash,
                    amount_in,
                    amount_out,
                    executed_price,
                    block_number: details.block_number,
                }
            }
            Terminal::Exhausted { tx_hash, reason } => {
                self.finalize(
                    target,
                    Finalization::Failed { tx_hash, reason: reason.clone() },
                )
                .await?;

                metrics.outcomes.with_label_values(&[pair_label.as_str(), "failed"]).inc();
                error!(pair = ?target.pair, tx_hash = ?tx_hash, "TRINITY: swap failed: {}", reason);
                self.notify(target, EventKind::SwapFailed, reason.clone());

                ExecutionOutcome::Exhausted { tx_hash, reason }
            }
        };

        Ok(ExecutionReport {
            outcome,
            attempts: run.attempts,
        })
    }
}
