//! NEO - The Orchestrator
//!
//! Master coordinator that resolves configured targets against the chain and
//! supervises one watcher per target.
//!
//! # Responsibilities
//! - Validate configuration before anything touches the chain
//! - Discover pair orientation and token decimals
//! - Wire the ledger, executor and notifier into the watchers
//! - Shut down cleanly on operator request

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::LocalWallet;
use ethers::types::Address;
use morpheus::{Morpheus, PairWatcher, WatchSummary};
use seraph::{Ledger, LedgerError, SqliteStore, StoreError};
use sniper_chain::{ChainClient, ChainError, EthersChainClient};
use sniper_config::{ConfigError, SniperConfig, TargetSpec};
use sniper_notify::{spawn_dispatcher, EventSink, LogSink, Notifier, TelegramSink};
use sniper_types::{PairLayout, Target};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use trinity::{ExecutorSettings, TradeExecutor, TrinityError};

/// How long the notifier may keep draining after the last watcher stops
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// NEO errors
#[derive(Error, Debug)]
pub enum NeoError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Executor error: {0}")]
    Executor(#[from] TrinityError),

    #[error("Target '{name}' does not match pair {pair:?}: {reason}")]
    PairMismatch { name: String, pair: Address, reason: String },

    #[error("Missing private key (set PRIVATE_KEY)")]
    MissingPrivateKey,

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// Open the positions database named in the config
pub async fn open_ledger(config: &SniperConfig) -> Result<Arc<Ledger>, NeoError> {
    let store = SqliteStore::open(&config.ledger.path).await?;
    let ledger = Ledger::open(Arc::new(store)).await?;
    Ok(Arc::new(ledger))
}

/// NEO orchestrator
pub struct Neo {
    config: SniperConfig,
    chain: Arc<dyn ChainClient>,
}

impl Neo {
    pub fn new(config: SniperConfig, chain: Arc<dyn ChainClient>) -> Self {
        tracing::info!("NEO: The One awakens...");
        Self { config, chain }
    }

    /// Validate the config and connect to its RPC endpoint
    pub fn connect(config: SniperConfig) -> Result<Self, NeoError> {
        config.validate()?;
        let chain = EthersChainClient::new(
            &config.chain.rpc_url,
            Duration::from_millis(config.chain.request_timeout_ms),
        )?;
        Ok(Self::new(config, Arc::new(chain)))
    }

    pub fn config(&self) -> &SniperConfig {
        &self.config
    }

    /// Resolve every target's pair orientation and decimals from the chain
    pub async fn resolve_targets(&self) -> Result<Vec<Target>, NeoError> {
        let specs = self.config.target_specs()?;
        let mut targets = Vec::with_capacity(specs.len());
        for spec in &specs {
            let layout = self.pair_layout(spec).await?;
            let target = spec.resolve(layout)?;
            info!(
                pair = ?target.pair,
                base_is_token0 = layout.base_is_token0,
                base_decimals = layout.base_decimals,
                quote_decimals = layout.quote_decimals,
                "NEO: resolved target '{}'",
                target.name
            );
            targets.push(target);
        }
        Ok(targets)
    }

    async fn pair_layout(&self, spec: &TargetSpec) -> Result<PairLayout, NeoError> {
        let (token0, token1) = self.chain.pair_tokens(spec.pair).await?;
        let base_is_token0 = if (spec.base_token, spec.quote_token) == (token0, token1) {
            true
        } else if (spec.base_token, spec.quote_token) == (token1, token0) {
            false
        } else {
            return Err(NeoError::PairMismatch {
                name: spec.name.clone(),
                pair: spec.pair,
                reason: format!("pair holds {:?} and {:?}", token0, token1),
            });
        };

        Ok(PairLayout {
            base_is_token0,
            base_decimals: self.chain.token_decimals(spec.base_token).await?,
            quote_decimals: self.chain.token_decimals(spec.quote_token).await?,
        })
    }

    fn wallet(&self) -> Result<LocalWallet, NeoError> {
        let key = self
            .config
            .private_key
            .as_deref()
            .ok_or(NeoError::MissingPrivateKey)?;
        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| NeoError::InvalidPrivateKey(e.to_string()))
    }

    fn sinks(&self) -> Vec<Arc<dyn EventSink>> {
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogSink)];
        if let Some((token, chat_id)) = self.config.notifier.telegram() {
            sinks.push(Arc::new(TelegramSink::new(token.to_string(), chat_id.to_string())));
        }
        sinks
    }

    /// Run against the configured positions database until every watcher is
    /// terminal or `shutdown` is set.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<WatchSummary>, NeoError> {
        let ledger = open_ledger(&self.config).await?;

        let (handle, dispatcher) = spawn_dispatcher(
            self.sinks(),
            self.config.notifier.queue_capacity,
            Duration::from_millis(self.config.notifier.delivery_timeout_ms),
        );
        let notifier: Arc<dyn Notifier> = Arc::new(handle);

        let result = self.supervise(ledger, notifier, shutdown).await;

        // Every handle is gone once supervise returns; let queued events drain
        if tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, dispatcher).await.is_err() {
            warn!("NEO: notifier did not drain within {:?}", NOTIFY_DRAIN_TIMEOUT);
        }
        debug!("NEO: final metrics\n{}", sniper_metrics::gather_metrics());

        result
    }

    /// Spawn one watcher per resolved target with the given ledger and notifier
    pub async fn supervise(
        &self,
        ledger: Arc<Ledger>,
        notifier: Arc<dyn Notifier>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<WatchSummary>, NeoError> {
        let targets = self.resolve_targets().await?;
        let settings = ExecutorSettings::from_config(&self.config)?;
        let executor = Arc::new(TradeExecutor::new(
            self.chain.clone(),
            ledger.clone(),
            self.wallet()?,
            notifier.clone(),
            settings,
        ));
        info!(
            wallet = ?executor.wallet_address(),
            router = ?executor.settings().router,
            chain_id = executor.settings().chain_id,
            "NEO: executor ready"
        );

        let poll_interval = Duration::from_millis(self.config.watcher.poll_interval_ms);
        let mut morpheus = Morpheus::new();
        for target in targets {
            morpheus.add_watcher(PairWatcher::new(
                target,
                self.chain.clone(),
                ledger.clone(),
                executor.clone(),
                notifier.clone(),
                poll_interval,
            ));
        }

        info!("NEO: supervising {} watcher(s)", morpheus.watcher_count());
        let summaries = morpheus.run_all(shutdown).await;
        info!("NEO: all watchers terminal");
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U256};
    use morpheus::WatchExit;
    use seraph::MemoryStore;
    use sniper_chain::scripted::{ReceiptScript, ScriptedChain, SubmitScript};
    use sniper_chain::ReceiptDetails;
    use sniper_config::{ConfigBuilder, ExecutorConfig, TargetConfig, WatcherConfig};
    use sniper_notify::RecordingNotifier;
    use sniper_types::{EventKind, PositionState, TradeSide, TriggerKind};

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn pair() -> Address {
        Address::repeat_byte(0x33)
    }
    fn usdt() -> Address {
        Address::repeat_byte(0x44)
    }
    fn wbnb() -> Address {
        Address::repeat_byte(0x55)
    }

    fn target_config() -> TargetConfig {
        TargetConfig {
            name: Some("WBNB/USDT".to_string()),
            pair: format!("{:?}", pair()),
            base_token: format!("{:?}", wbnb()),
            quote_token: format!("{:?}", usdt()),
            trigger: TriggerKind::PriceAbove,
            threshold: "300".to_string(),
            amount: "50".to_string(),
            side: TradeSide::Buy,
            slippage_bps: 100,
            max_gas_multiplier: 2.0,
            min_liquidity: None,
        }
    }

    fn config() -> SniperConfig {
        ConfigBuilder::new()
            .watcher(WatcherConfig { poll_interval_ms: 5 })
            .executor(ExecutorConfig {
                confirmation_timeout_ms: 50,
                receipt_poll_interval_ms: 5,
                retry_backoff_ms: 1,
                ..ExecutorConfig::default()
            })
            .private_key(KEY)
            .add_target(target_config())
            .build()
    }

    fn wad(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[tokio::test]
    async fn test_resolve_discovers_orientation() {
        let chain = Arc::new(ScriptedChain::new());
        // quote token sorts first on chain
        chain.set_pair_tokens(pair(), usdt(), wbnb());
        chain.set_decimals(usdt(), 6);

        let neo = Neo::new(config(), chain);
        let targets = neo.resolve_targets().await.unwrap();
        assert_eq!(targets.len(), 1);

        let layout = targets[0].layout;
        assert!(!layout.base_is_token0);
        assert_eq!(layout.base_decimals, 18);
        assert_eq!(layout.quote_decimals, 6);
        // a buy spends 50 USDT at 6 decimals
        assert_eq!(targets[0].amount_in, U256::from(50_000_000u64));
    }

    #[tokio::test]
    async fn test_resolve_rejects_foreign_pair() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_pair_tokens(pair(), usdt(), Address::repeat_byte(0x66));

        let neo = Neo::new(config(), chain);
        assert!(matches!(
            neo.resolve_targets().await,
            Err(NeoError::PairMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_rejects_unsupported_decimals() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_pair_tokens(pair(), wbnb(), usdt());
        chain.set_decimals(wbnb(), 200);

        let neo = Neo::new(config(), chain);
        assert!(matches!(
            neo.resolve_targets().await,
            Err(NeoError::Config(ConfigError::InvalidTarget { .. }))
        ));
    }

    #[tokio::test]
    async fn test_supervise_trades_once_and_finishes() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_pair_tokens(pair(), wbnb(), usdt());
        // 310 USDT per WBNB
        chain.set_reserves(pair(), wad(1_000), wad(310_000));
        chain.push_submit(SubmitScript::Accept(ReceiptScript::mined(ReceiptDetails {
            tx_hash: H256::zero(),
            block_number: 9,
            gas_used: U256::from(120_000u64),
            effective_gas_price: None,
            swaps: Vec::new(),
        })));

        let ledger = Arc::new(Ledger::open(Arc::new(MemoryStore::new())).await.unwrap());
        let events = Arc::new(RecordingNotifier::new());
        let neo = Neo::new(config(), chain.clone());

        let (_tx, rx) = watch::channel(false);
        let summaries = neo.supervise(ledger.clone(), events.clone(), rx).await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert!(matches!(
            summaries[0].result.as_ref().unwrap(),
            WatchExit::Executed(report) if report.is_confirmed()
        ));
        assert_eq!(chain.submitted().len(), 1);
        assert_eq!(ledger.get(pair()).await.unwrap().state, PositionState::Traded);
        assert_eq!(events.count(EventKind::SwapConfirmed), 1);
    }

    #[tokio::test]
    async fn test_supervise_requires_private_key() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_pair_tokens(pair(), wbnb(), usdt());
        let mut config = config();
        config.private_key = None;

        let ledger = Arc::new(Ledger::open(Arc::new(MemoryStore::new())).await.unwrap());
        let neo = Neo::new(config, chain);
        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            neo.supervise(ledger, Arc::new(RecordingNotifier::new()), rx).await,
            Err(NeoError::MissingPrivateKey)
        ));
    }

    #[tokio::test]
    async fn test_open_ledger_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.ledger.path = dir.path().join("positions.db");

        let ledger = open_ledger(&config).await.unwrap();
        ledger.ensure(pair()).await.unwrap();
        drop(ledger);

        let reopened = open_ledger(&config).await.unwrap();
        assert_eq!(reopened.get(pair()).await.unwrap().state, PositionState::Untraded);
    }
}
