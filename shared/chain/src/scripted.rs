//! Scripted in-memory chain
//!
//! Deterministic [`ChainClient`] for tests: reserves, submissions and receipts
//! are queued up front and replayed in order.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use parking_lot::Mutex;

use crate::{raw_tx_hash, ChainClient, ChainError, ReceiptDetails, ReceiptStatus, Reserves};

/// What happens to the next submitted transaction
#[derive(Debug, Clone)]
pub enum SubmitScript {
    /// Node accepts; the receipt follows the given script
    Accept(ReceiptScript),
    /// Node answers with a JSON-RPC error, classified like a real response
    Reject(String),
    /// Transport fails. The transaction may still have reached the node,
    /// so a receipt script is attached.
    RpcError(String, ReceiptScript),
}

/// How an accepted transaction is mined
#[derive(Debug, Clone)]
pub enum ReceiptScript {
    /// Mined successfully once `after_polls` receipt lookups have returned pending
    Mined { after_polls: u32, details: ReceiptDetails },
    Reverted,
    NeverMined,
}

impl ReceiptScript {
    pub fn mined(details: ReceiptDetails) -> Self {
        ReceiptScript::Mined { after_polls: 0, details }
    }
}

/// A transaction the scripted chain received
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub raw: Bytes,
    pub hash: H256,
}

#[derive(Default)]
struct State {
    reserves: HashMap<Address, VecDeque<Result<Reserves, ChainError>>>,
    tokens: HashMap<Address, (Address, Address)>,
    decimals: HashMap<Address, u8>,
    gas_price: U256,
    nonces: VecDeque<U256>,
    block_number: u64,
    submit_scripts: VecDeque<SubmitScript>,
    receipts: HashMap<H256, (ReceiptScript, u32)>,
    submitted: Vec<SubmittedTx>,
    reserve_reads: HashMap<Address, u32>,
    receipt_reads: u32,
}

#[derive(Default)]
pub struct ScriptedChain {
    state: Mutex<State>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        let chain = Self::default();
        {
            let mut state = chain.state.lock();
            state.gas_price = U256::from(5_000_000_000u64);
            state.block_number = 1;
        }
        chain
    }

    /// Replace every queued reserve read for `pair` with a fixed value
    pub fn set_reserves(&self, pair: Address, reserve0: U256, reserve1: U256) {
        let mut state = self.state.lock();
        let block_number = state.block_number;
        let queue = state.reserves.entry(pair).or_default();
        queue.clear();
        queue.push_back(Ok(Reserves { reserve0, reserve1, block_number }));
    }

    /// Queue one reserve read. The last queued entry repeats once reached.
    pub fn push_reserves(&self, pair: Address, reserves: Result<Reserves, ChainError>) {
        self.state.lock().reserves.entry(pair).or_default().push_back(reserves);
    }

    pub fn set_pair_tokens(&self, pair: Address, token0: Address, token1: Address) {
        self.state.lock().tokens.insert(pair, (token0, token1));
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.state.lock().decimals.insert(token, decimals);
    }

    pub fn set_gas_price(&self, gas_price: U256) {
        self.state.lock().gas_price = gas_price;
    }

    /// Replace every queued nonce read with a fixed value
    pub fn set_nonce(&self, nonce: U256) {
        let mut state = self.state.lock();
        state.nonces.clear();
        state.nonces.push_back(nonce);
    }

    /// Queue one nonce read. The last queued value repeats once reached.
    pub fn push_nonce(&self, nonce: U256) {
        self.state.lock().nonces.push_back(nonce);
    }

    pub fn push_submit(&self, script: SubmitScript) {
        self.state.lock().submit_scripts.push_back(script);
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state.lock().submitted.clone()
    }

    pub fn reserve_reads(&self, pair: Address) -> u32 {
        self.state.lock().reserve_reads.get(&pair).copied().unwrap_or(0)
    }

    pub fn receipt_reads(&self) -> u32 {
        self.state.lock().receipt_reads
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn get_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().block_number)
    }

    async fn get_reserves(&self, pair: Address) -> Result<Reserves, ChainError> {
        let mut state = self.state.lock();
        state.block_number += 1;
        *state.reserve_reads.entry(pair).or_default() += 1;

        let queue = state
            .reserves
            .get_mut(&pair)
            .ok_or_else(|| ChainError::Rpc(format!("no reserves scripted for {:?}", pair)))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or_else(|| Err(ChainError::Rpc("reserve script exhausted".to_string())))
    }

    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address), ChainError> {
        self.state
            .lock()
            .tokens
            .get(&pair)
            .copied()
            .ok_or_else(|| ChainError::Rejected("execution reverted".to_string()))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        Ok(self.state.lock().decimals.get(&token).copied().unwrap_or(18))
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        Ok(self.state.lock().gas_price)
    }

    async fn get_nonce(&self, _account: Address) -> Result<U256, ChainError> {
        let mut state = self.state.lock();
        let next = if state.nonces.len() > 1 {
            state.nonces.pop_front()
        } else {
            state.nonces.front().copied()
        };
        Ok(next.unwrap_or_default())
    }

    async fn submit_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        let mut state = self.state.lock();
        let hash = raw_tx_hash(&raw);
        let script = state
            .submit_scripts
            .pop_front()
            .unwrap_or_else(|| SubmitScript::RpcError("unscripted submission".to_string(), ReceiptScript::NeverMined));

        match script {
            SubmitScript::Accept(receipt) => {
                state.submitted.push(SubmittedTx { raw, hash });
                state.receipts.insert(hash, (receipt, 0));
                Ok(hash)
            }
            SubmitScript::Reject(reason) => Err(ChainError::from_rpc_response(-32000, &reason)),
            SubmitScript::RpcError(reason, receipt) => {
                state.submitted.push(SubmittedTx { raw, hash });
                state.receipts.insert(hash, (receipt, 0));
                Err(ChainError::Rpc(reason))
            }
        }
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<ReceiptStatus, ChainError> {
        let mut state = self.state.lock();
        state.receipt_reads += 1;
        let block_number = state.block_number;

        let Some((script, polls)) = state.receipts.get_mut(&tx_hash) else {
            return Ok(ReceiptStatus::Pending);
        };

        let status = match script {
            ReceiptScript::Mined { after_polls, details } => {
                if *polls >= *after_polls {
                    let mut details = details.clone();
                    details.tx_hash = tx_hash;
                    ReceiptStatus::Success(details)
                } else {
                    ReceiptStatus::Pending
                }
            }
            ReceiptScript::Reverted => ReceiptStatus::Reverted { tx_hash, block_number },
            ReceiptScript::NeverMined => ReceiptStatus::Pending,
        };
        *polls += 1;
        Ok(status)
    }
}
