//! Executor scenarios against a scripted chain

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use seraph::{Authorization, Ledger, MemoryStore};
use sniper_chain::scripted::{ReceiptScript, ScriptedChain, SubmitScript};
use sniper_chain::{ReceiptDetails, SwapLog};
use sniper_notify::RecordingNotifier;
use sniper_types::{EventKind, PairLayout, PositionState, Target, TradeSide, Trigger, TriggerKind};
use trinity::{ExecutionOutcome, ExecutorSettings, SwapExecutor, TradeExecutor};

const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn pair() -> Address {
    Address::repeat_byte(0x11)
}

fn wad(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

fn target() -> Target {
    Target {
        name: "WBNB/USDT".to_string(),
        pair: pair(),
        base_token: Address::repeat_byte(0xaa),
        quote_token: Address::repeat_byte(0xbb),
        layout: PairLayout { base_is_token0: true, base_decimals: 18, quote_decimals: 18 },
        trigger: Trigger { kind: TriggerKind::PriceAbove, threshold: wad(100) },
        side: TradeSide::Buy,
        amount_in: wad(1_000),
        slippage_bps: 100,
        max_gas_multiplier_bps: 20_000,
        min_liquidity: None,
    }
}

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        router: Address::repeat_byte(0x77),
        chain_id: 56,
        gas_limit: 300_000,
        fee_bps: 25,
        start_gas_multiplier_bps: 12_000,
        gas_multiplier_step_bps: 2_000,
        max_gas_price: None,
        max_attempts: 5,
        confirmation_timeout: Duration::from_millis(40),
        receipt_poll_interval: Duration::from_millis(5),
        retry_backoff: Duration::from_millis(1),
        deadline_secs: 300,
    }
}

/// Receipt whose Swap log reports the given executed amounts
fn receipt(amount_in: U256, amount_out: U256) -> ReceiptDetails {
    ReceiptDetails {
        tx_hash: H256::zero(),
        block_number: 42,
        gas_used: U256::from(150_000u64),
        effective_gas_price: None,
        swaps: vec![SwapLog {
            pair: pair(),
            amount0_in: U256::zero(),
            amount1_in: amount_in,
            amount0_out: amount_out,
            amount1_out: U256::zero(),
        }],
    }
}

fn gas_price_of(raw: &Bytes) -> U256 {
    let (tx, _) = TypedTransaction::decode_signed(&ethers::utils::rlp::Rlp::new(raw)).unwrap();
    tx.gas_price().unwrap()
}

struct Harness {
    chain: Arc<ScriptedChain>,
    store: Arc<MemoryStore>,
    ledger: Arc<Ledger>,
    events: Arc<RecordingNotifier>,
    executor: TradeExecutor,
}

async fn harness(settings: ExecutorSettings) -> Harness {
    let chain = Arc::new(ScriptedChain::new());
    // base 1_000, quote 101_000 => 101 quote per base
    chain.set_reserves(pair(), wad(1_000), wad(101_000));
    chain.set_gas_price(U256::from(5_000_000_000u64));

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::open(store.clone()).await.unwrap());
    ledger.ensure(pair()).await.unwrap();
    assert_eq!(ledger.authorize(pair()).await.unwrap(), Authorization::Granted);

    let events = Arc::new(RecordingNotifier::new());
    let wallet: LocalWallet = KEY.parse().unwrap();
    let executor = TradeExecutor::new(chain.clone(), ledger.clone(), wallet, events.clone(), settings);

    Harness { chain, store, ledger, events, executor }
}

#[tokio::test]
async fn test_underpriced_three_times_then_confirmed() {
    let h = harness(settings()).await;
    for _ in 0..3 {
        h.chain.push_submit(SubmitScript::Reject("transaction underpriced".to_string()));
    }
    let actual_out = U256::from_dec_str("9731000000000000000").unwrap();
    h.chain
        .push_submit(SubmitScript::Accept(ReceiptScript::mined(receipt(wad(1_000), actual_out))));

    let report = h.executor.execute(&target()).await.unwrap();
    assert_eq!(report.attempts, 4);
    assert!(report.is_confirmed());

    // fourth attempt at 1.2 + 3 * 0.2 = 1.8x of 5 gwei
    let submitted = h.chain.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(gas_price_of(&submitted[0].raw), U256::from(9_000_000_000u64));

    let record = h.ledger.get(pair()).await.unwrap();
    assert_eq!(record.state, PositionState::Traded);
    assert_eq!(record.tx_hash, Some(submitted[0].hash));
    assert_eq!(record.amount_in, Some(wad(1_000)));
    // the receipt's amount, not the planned minimum
    assert_eq!(record.amount_out, Some(actual_out));
    assert_eq!(record.executed_price, target().execution_price(wad(1_000), actual_out));

    assert_eq!(h.events.count(EventKind::AttemptFailed), 3);
    assert_eq!(h.events.count(EventKind::SwapSubmitted), 1);
    assert_eq!(h.events.count(EventKind::SwapConfirmed), 1);
}

#[tokio::test]
async fn test_exhaustion_finalizes_failed_terminal() {
    let mut s = settings();
    s.max_attempts = 3;
    let h = harness(s).await;
    for _ in 0..3 {
        h.chain.push_submit(SubmitScript::Accept(ReceiptScript::NeverMined));
    }

    let report = h.executor.execute(&target()).await.unwrap();
    assert_eq!(report.attempts, 3);
    assert!(matches!(report.outcome, ExecutionOutcome::Exhausted { .. }));

    let gas: Vec<U256> = h.chain.submitted().iter().map(|tx| gas_price_of(&tx.raw)).collect();
    assert_eq!(
        gas,
        vec![
            U256::from(6_000_000_000u64),
            U256::from(7_000_000_000u64),
            U256::from(8_000_000_000u64),
        ]
    );

    let record = h.ledger.get(pair()).await.unwrap();
    assert_eq!(record.state, PositionState::FailedTerminal);
    assert!(record.failure_reason.unwrap().contains("3 attempts exhausted"));
    assert_eq!(
        h.ledger.authorize(pair()).await.unwrap(),
        Authorization::Denied(PositionState::FailedTerminal)
    );
    assert_eq!(h.events.count(EventKind::SwapFailed), 1);
}

#[tokio::test]
async fn test_gas_never_exceeds_target_maximum() {
    let mut s = settings();
    s.max_attempts = 6;
    let h = harness(s).await;
    for _ in 0..6 {
        h.chain.push_submit(SubmitScript::Accept(ReceiptScript::NeverMined));
    }

    let mut t = target();
    t.max_gas_multiplier_bps = 15_000;
    h.executor.execute(&t).await.unwrap();

    let gas: Vec<U256> = h.chain.submitted().iter().map(|tx| gas_price_of(&tx.raw)).collect();
    assert_eq!(gas.len(), 6);
    assert!(gas.windows(2).all(|w| w[0] <= w[1]));
    assert!(gas.iter().all(|g| *g <= U256::from(7_500_000_000u64)));
    assert_eq!(gas[5], U256::from(7_500_000_000u64));
}

#[tokio::test]
async fn test_revert_is_terminal_without_retry() {
    let h = harness(settings()).await;
    h.chain.push_submit(SubmitScript::Accept(ReceiptScript::Reverted));

    let report = h.executor.execute(&target()).await.unwrap();
    assert_eq!(report.attempts, 1);
    assert_eq!(h.chain.submitted().len(), 1);

    let record = h.ledger.get(pair()).await.unwrap();
    assert_eq!(record.state, PositionState::FailedTerminal);
    assert_eq!(record.tx_hash, Some(h.chain.submitted()[0].hash));
}

#[tokio::test]
async fn test_terminal_rejection_stops_immediately() {
    let h = harness(settings()).await;
    h.chain.push_submit(SubmitScript::Reject(
        "insufficient funds for gas * price + value".to_string(),
    ));

    let report = h.executor.execute(&target()).await.unwrap();
    assert_eq!(report.attempts, 1);
    assert!(!report.is_confirmed());
    assert_eq!(h.ledger.get(pair()).await.unwrap().state, PositionState::FailedTerminal);
}

#[tokio::test]
async fn test_ambiguous_submit_is_watched_not_resent() {
    let h = harness(settings()).await;
    h.chain.push_submit(SubmitScript::RpcError(
        "connection reset by peer".to_string(),
        ReceiptScript::mined(receipt(wad(1_000), wad(9))),
    ));

    let report = h.executor.execute(&target()).await.unwrap();
    assert!(report.is_confirmed());
    assert_eq!(report.attempts, 1);
    assert_eq!(h.chain.submitted().len(), 1);
    assert_eq!(h.ledger.get(pair()).await.unwrap().amount_out, Some(wad(9)));
}

#[tokio::test]
async fn test_slow_first_attempt_wins_over_resubmission() {
    let mut s = settings();
    // window closes after a single receipt lookup
    s.confirmation_timeout = Duration::from_millis(1);
    s.receipt_poll_interval = Duration::from_millis(10);
    let h = harness(s).await;
    h.chain.push_submit(SubmitScript::Accept(ReceiptScript::Mined {
        after_polls: 1,
        details: receipt(wad(1_000), wad(9)),
    }));

    let report = h.executor.execute(&target()).await.unwrap();
    assert!(report.is_confirmed());
    // the sweep found it mined before a second transaction was built
    assert_eq!(h.chain.submitted().len(), 1);
    assert_eq!(h.ledger.get(pair()).await.unwrap().state, PositionState::Traded);
}

#[tokio::test]
async fn test_gas_price_cap() {
    let mut s = settings();
    s.max_gas_price = Some(U256::from(5_500_000_000u64));
    let h = harness(s).await;
    h.chain
        .push_submit(SubmitScript::Accept(ReceiptScript::mined(receipt(wad(1_000), wad(9)))));

    h.executor.execute(&target()).await.unwrap();
    assert_eq!(
        gas_price_of(&h.chain.submitted()[0].raw),
        U256::from(5_500_000_000u64)
    );
}

#[tokio::test]
async fn test_execute_requires_pending_record() {
    let h = harness(settings()).await;
    h.chain
        .push_submit(SubmitScript::Accept(ReceiptScript::mined(receipt(wad(1_000), wad(9)))));
    h.executor.execute(&target()).await.unwrap();

    // Pair is TRADED now; a second execute must refuse before submitting
    h.chain
        .push_submit(SubmitScript::Accept(ReceiptScript::mined(receipt(wad(1_000), wad(9)))));
    assert!(h.executor.execute(&target()).await.is_err());
    assert_eq!(h.chain.submitted().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_submission_is_resent_at_same_gas() {
    let h = harness(settings()).await;
    h.chain.push_submit(SubmitScript::Reject("limit exceeded".to_string()));
    h.chain
        .push_submit(SubmitScript::Accept(ReceiptScript::mined(receipt(wad(1_000), wad(9)))));

    let report = h.executor.execute(&target()).await.unwrap();
    assert!(report.is_confirmed());
    assert_eq!(report.attempts, 2);

    let submitted = h.chain.submitted();
    assert_eq!(submitted.len(), 1);
    // no escalation for a node that refused under load
    assert_eq!(gas_price_of(&submitted[0].raw), U256::from(6_000_000_000u64));
    assert_eq!(h.ledger.get(pair()).await.unwrap().state, PositionState::Traded);
    assert_eq!(h.events.count(EventKind::AttemptFailed), 1);
}

#[tokio::test]
async fn test_moved_nonce_stops_without_resubmitting() {
    let h = harness(settings()).await;
    h.chain.set_nonce(U256::zero());
    h.chain.push_nonce(U256::one());
    h.chain.push_submit(SubmitScript::Accept(ReceiptScript::NeverMined));
    h.chain.push_submit(SubmitScript::Accept(ReceiptScript::NeverMined));

    let report = h.executor.execute(&target()).await.unwrap();
    assert_eq!(report.attempts, 2);
    assert!(matches!(report.outcome, ExecutionOutcome::Exhausted { .. }));
    assert_eq!(h.chain.submitted().len(), 1);

    let record = h.ledger.get(pair()).await.unwrap();
    assert_eq!(record.state, PositionState::FailedTerminal);
    assert_eq!(record.tx_hash, Some(h.chain.submitted()[0].hash));
    assert!(record.failure_reason.unwrap().contains("nonce moved from 0 to 1"));

    let failed: Vec<_> = h.events.events().into_iter().filter(|e| e.kind == EventKind::SwapFailed).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].details.contains("nonce moved"));
}

#[tokio::test]
async fn test_moved_nonce_final_sweep_finds_first_attempt() {
    let mut s = settings();
    // one lookup while waiting, one in the escalation sweep, one in the final sweep
    s.confirmation_timeout = Duration::from_millis(1);
    s.receipt_poll_interval = Duration::from_millis(10);
    let h = harness(s).await;
    h.chain.set_nonce(U256::zero());
    h.chain.push_nonce(U256::one());
    h.chain.push_submit(SubmitScript::Accept(ReceiptScript::Mined {
        after_polls: 2,
        details: receipt(wad(1_000), wad(9)),
    }));

    let report = h.executor.execute(&target()).await.unwrap();
    assert!(report.is_confirmed());
    assert_eq!(report.attempts, 2);
    assert_eq!(h.chain.submitted().len(), 1);
    assert_eq!(h.chain.receipt_reads(), 3);

    let record = h.ledger.get(pair()).await.unwrap();
    assert_eq!(record.state, PositionState::Traded);
    assert_eq!(record.amount_out, Some(wad(9)));
}

#[tokio::test]
async fn test_finalize_retries_until_store_recovers() {
    let h = harness(settings()).await;
    h.chain
        .push_submit(SubmitScript::Accept(ReceiptScript::mined(receipt(wad(1_000), wad(9)))));
    h.store.fail_writes(true);

    let store = h.store.clone();
    let recover = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.fail_writes(false);
    });

    let report = h.executor.execute(&target()).await.unwrap();
    recover.await.unwrap();
    assert!(report.is_confirmed());

    let record = h.ledger.get(pair()).await.unwrap();
    assert_eq!(record.state, PositionState::Traded);
    assert_eq!(record.tx_hash, Some(h.chain.submitted()[0].hash));
}
