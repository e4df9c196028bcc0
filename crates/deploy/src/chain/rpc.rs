//! Ethereum JSON-RPC client.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{ChainClient, Submission, TxReceipt};
use crate::error::{DeployError, Result};

/// Default timeout for a single RPC request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Chain client that signs nothing itself: transactions go through
/// `eth_sendTransaction`, so `sender` must be an account unlocked on the node
/// (Anvil and Hardhat dev accounts, Geth with a keystore, ...).
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    http: reqwest::Client,
    url: Url,
    sender: Address,
    poll_interval: Duration,
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    status: u64,
    contract_address: Option<Address>,
}

impl From<RawReceipt> for TxReceipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            tx_hash: raw.transaction_hash,
            block_number: raw.block_number,
            success: raw.status == 1,
            contract_address: raw.contract_address,
        }
    }
}

/// The fields of `eth_getTransactionByHash` needed to locate a created contract.
#[derive(Debug, Deserialize)]
struct RawTransaction {
    from: Address,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    nonce: u64,
}

impl RawTransaction {
    /// Address a contract creation gets once this transaction is mined.
    fn created_address(&self) -> Address {
        self.from.create(self.nonce)
    }
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn parse_hex_u64(s: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

impl RpcChainClient {
    pub fn new(url: Url, sender: Address) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeployError::ChainSubmissionFailed(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            sender,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Interval between `eth_getTransactionReceipt` polls while waiting.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn json_rpc_call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let failed = |reason: String| DeployError::ChainSubmissionFailed(format!("{method}: {reason}"));

        let response: Value = self
            .http
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .json()
            .await
            .map_err(|e| failed(format!("invalid response: {e}")))?;

        if let Some(error) = response.get("error") {
            return Err(failed(
                error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown RPC error")
                    .to_string(),
            ));
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| failed("no result in response".to_string()))?;

        serde_json::from_value(result).map_err(|e| failed(format!("unexpected result: {e}")))
    }

    /// The node-assigned transaction, once it knows about it.
    async fn transaction(&self, tx_hash: B256) -> Result<Option<RawTransaction>> {
        self.json_rpc_call("eth_getTransactionByHash", vec![serde_json::json!(tx_hash)])
            .await
    }

    async fn send_transaction(&self, tx: Value) -> Result<B256> {
        self.json_rpc_call("eth_sendTransaction", vec![tx]).await
    }
}

impl ChainClient for RpcChainClient {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64> {
        let id: String = self.json_rpc_call("eth_chainId", vec![]).await?;
        parse_hex_u64(&id)
            .map_err(|e| DeployError::ChainSubmissionFailed(format!("invalid chain id `{id}`: {e}")))
    }

    async fn deploy_bytecode(&self, bytecode: &Bytes, constructor_args: &Bytes) -> Result<Submission> {
        let data = Bytes::from([bytecode.as_ref(), constructor_args.as_ref()].concat());

        let tx_hash = self
            .send_transaction(serde_json::json!({
                "from": self.sender,
                "data": data,
            }))
            .await?;

        // Nonce assigned by the node, not the pending count before submission.
        let contract_address = self
            .transaction(tx_hash)
            .await?
            .map(|tx| tx.created_address());
        tracing::debug!(%tx_hash, contract_address = ?contract_address, "Contract creation submitted");

        Ok(Submission {
            tx_hash,
            contract_address,
        })
    }

    async fn call(&self, to: Address, data: &Bytes) -> Result<Submission> {
        let tx_hash = self
            .send_transaction(serde_json::json!({
                "from": self.sender,
                "to": to,
                "data": data,
            }))
            .await?;

        tracing::debug!(%tx_hash, %to, "Call submitted");

        Ok(Submission {
            tx_hash,
            contract_address: None,
        })
    }

    async fn wait_for_confirmation(&self, tx_hash: B256, timeout: Duration) -> Result<TxReceipt> {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(receipt) = self.receipt(tx_hash).await? {
                    return Ok::<_, DeployError>(receipt);
                }
                tracing::trace!(%tx_hash, "Transaction pending, polling again...");
                tokio::time::sleep(self.poll_interval).await;
            }
        })
        .await
        .map_err(|_| DeployError::ConfirmationTimeout { tx_hash, timeout })?
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let raw: Option<RawReceipt> = self
            .json_rpc_call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;
        Ok(raw.map(TxReceipt::from))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.json_rpc_call(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        self.json_rpc_call(
            "eth_getStorageAt",
            vec![
                serde_json::json!(address),
                serde_json::json!(slot),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_from_json() {
        let raw: RawReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1b4",
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "gasUsed": "0x5208"
        }))
        .unwrap();

        let receipt = TxReceipt::from(raw);
        assert_eq!(receipt.block_number, 436);
        assert!(receipt.success);
        assert_eq!(
            receipt.contract_address,
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap())
        );
    }

    #[test]
    fn test_reverted_receipt() {
        let raw: RawReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "blockNumber": "0x2",
            "status": "0x0",
            "contractAddress": null
        }))
        .unwrap();

        let receipt = TxReceipt::from(raw);
        assert!(!receipt.success);
        assert_eq!(receipt.contract_address, None);
    }

    #[test]
    fn test_anvil_first_deployment_address() {
        // Anvil's first dev account deploys its first contract here.
        let sender: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(
            sender.create(0),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_created_address_from_submitted_transaction() {
        let tx: RawTransaction = serde_json::from_value(serde_json::json!({
            "hash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "from": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            "nonce": "0x1",
            "input": "0x6080"
        }))
        .unwrap();

        assert_eq!(tx.nonce, 1);
        assert_eq!(
            tx.created_address(),
            "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_submission() {
        let client = RpcChainClient::new("http://127.0.0.1:1".parse().unwrap(), Address::ZERO).unwrap();
        assert!(matches!(
            client.chain_id().await,
            Err(DeployError::ChainSubmissionFailed(_))
        ));
    }
}
