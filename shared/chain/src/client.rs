//! JSON-RPC chain client over ethers' HTTP provider

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256,
};
use tracing::{debug, warn};

use crate::abi;
use crate::{ChainClient, ChainError, ReceiptDetails, ReceiptStatus, Reserves};

/// Chain client backed by an ethers `Provider<Http>`.
///
/// Every request is bounded by `request_timeout`; a timeout surfaces as
/// [`ChainError::Timeout`] and is treated as transient by callers.
pub struct EthersChainClient {
    provider: Provider<Http>,
    request_timeout: Duration,
}

impl EthersChainClient {
    pub fn new(rpc_url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Rpc(format!("invalid RPC url '{}': {}", rpc_url, e)))?;

        tracing::info!("Chain client connected to {} (timeout {:?})", rpc_url, request_timeout);
        Ok(Self {
            provider,
            request_timeout,
        })
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ProviderError>> + Send,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(map_provider_error),
            Err(_) => Err(ChainError::Timeout(self.request_timeout.as_millis() as u64)),
        }
    }

    /// `eth_call` of a zero-argument view function
    async fn view(&self, to: Address, signature: &str, block: Option<u64>) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(to)
            .data(Bytes::from(abi::selector(signature).to_vec()))
            .into();
        let block = block.map(|n| BlockId::Number(BlockNumber::Number(n.into())));

        self.timed(self.provider.call(&tx, block)).await
    }
}

/// JSON-RPC error responses are the node's verdict on the request; anything
/// else is a transport problem.
fn map_provider_error(err: ProviderError) -> ChainError {
    match err.as_error_response() {
        Some(response) => ChainError::from_rpc_response(response.code, &response.message),
        None => ChainError::Rpc(err.to_string()),
    }
}

fn receipt_status(tx_hash: H256, receipt: TransactionReceipt) -> ReceiptStatus {
    let block_number = match receipt.block_number {
        Some(n) => n.as_u64(),
        None => return ReceiptStatus::Pending,
    };

    if receipt.status.map(|s| s.as_u64()) != Some(1) {
        return ReceiptStatus::Reverted {
            tx_hash,
            block_number,
        };
    }

    let swaps = receipt.logs.iter().filter_map(abi::decode_swap_log).collect();
    ReceiptStatus::Success(ReceiptDetails {
        tx_hash,
        block_number,
        gas_used: receipt.gas_used.unwrap_or_default(),
        effective_gas_price: receipt.effective_gas_price,
        swaps,
    })
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn get_block_number(&self) -> Result<u64, ChainError> {
        let number = self.timed(self.provider.get_block_number()).await?;
        Ok(number.as_u64())
    }

    async fn get_reserves(&self, pair: Address) -> Result<Reserves, ChainError> {
        // Pin the read to one block so the snapshot is internally consistent
        let block_number = self.get_block_number().await?;
        let data = self.view(pair, abi::GET_RESERVES, Some(block_number)).await?;
        let (reserve0, reserve1) = abi::decode_reserves(&data)?;

        debug!(?pair, block_number, %reserve0, %reserve1, "getReserves");
        Ok(Reserves {
            reserve0,
            reserve1,
            block_number,
        })
    }

    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address), ChainError> {
        let token0 = abi::decode_address(&self.view(pair, abi::TOKEN0, None).await?)?;
        let token1 = abi::decode_address(&self.view(pair, abi::TOKEN1, None).await?)?;
        Ok((token0, token1))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        abi::decode_decimals(&self.view(token, abi::DECIMALS, None).await?)
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        self.timed(self.provider.get_gas_price()).await
    }

    async fn get_nonce(&self, account: Address) -> Result<U256, ChainError> {
        self.timed(
            self.provider
                .get_transaction_count(account, Some(BlockNumber::Latest.into())),
        )
        .await
    }

    async fn submit_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        let result = tokio::time::timeout(
            self.request_timeout,
            self.provider.send_raw_transaction(raw),
        )
        .await;

        match result {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => {
                let err = map_provider_error(e);
                warn!("Raw transaction submission failed: {}", err);
                Err(err)
            }
            Err(_) => Err(ChainError::Timeout(self.request_timeout.as_millis() as u64)),
        }
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<ReceiptStatus, ChainError> {
        let receipt = self
            .timed(self.provider.get_transaction_receipt(tx_hash))
            .await?;

        Ok(match receipt {
            Some(receipt) => receipt_status(tx_hash, receipt),
            None => ReceiptStatus::Pending,
        })
    }
}
