//! JSON-RPC ledger gateway client.
//!
//! Speaks JSON-RPC 2.0 to a gateway that fronts the game contract. The
//! gateway signs with its unlocked account, so this client never handles
//! keys. Push subscriptions are emulated by polling `ledger_getLogs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::events::{EventFilter, EventKind};
use super::types::{Address, LogRecord, Receipt};
use super::{Cancellation, EventHandler, LedgerClient, LedgerError, LedgerErrorKind, PendingTransaction};

/// JSON-RPC error code for a signer refusal (EIP-1193 "user rejected").
const USER_REJECTED: i64 = 4001;
/// JSON-RPC error code gateways use for execution reverts.
const EXECUTION_REVERTED: i64 = 3;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcErrorBody {
    #[track_caller]
    fn into_ledger_error(self) -> LedgerError {
        if self.code == USER_REJECTED {
            return LedgerError::new(LedgerErrorKind::Rejected, self.message);
        }
        let lowered = self.message.to_lowercase();
        if self.code == EXECUTION_REVERTED || lowered.contains("revert") {
            return LedgerError::reverted(strip_revert_prefix(&self.message));
        }
        LedgerError::new(
            LedgerErrorKind::Transport,
            format!("RPC error {}: {}", self.code, self.message),
        )
    }
}

fn strip_revert_prefix(message: &str) -> String {
    let lowered = message.to_lowercase();
    for prefix in ["execution reverted: ", "reverted: "] {
        if lowered.starts_with(prefix) {
            if let Some(reason) = message.get(prefix.len()..) {
                return reason.to_string();
            }
        }
    }
    message.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    tx_hash: String,
    block_number: u64,
    status: bool,
    #[serde(default)]
    revert_reason: Option<String>,
    #[serde(default)]
    logs: Vec<LogRecord>,
}

/// Ledger client talking to a JSON-RPC gateway over HTTP.
#[derive(Debug, Clone)]
pub struct RpcLedgerClient {
    rpc_url: String,
    contract: String,
    http: reqwest::Client,
    poll_interval: Duration,
    next_id: Arc<AtomicU64>,
    account: Arc<Mutex<Option<Address>>>,
}

impl RpcLedgerClient {
    /// Creates a client for `contract` behind the gateway at `rpc_url`.
    pub fn new(rpc_url: impl Into<String>, contract: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract: contract.into(),
            http: reqwest::Client::new(),
            poll_interval,
            next_id: Arc::new(AtomicU64::new(1)),
            account: Arc::new(Mutex::new(None)),
        }
    }

    fn sender(&self) -> Option<Address> {
        self.account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[instrument(skip(self, params), fields(rpc_url = %self.rpc_url))]
    async fn request_raw(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::new(
                LedgerErrorKind::Transport,
                format!("gateway returned HTTP {}", status),
            ));
        }

        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            debug!(code = error.code, message = %error.message, "RPC error");
            return Err(error.into_ledger_error());
        }
        Ok(body.result)
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let value = self.request_raw(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.request("ledger_blockNumber", json!([])).await
    }

    async fn logs(
        &self,
        kind: EventKind,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, LedgerError> {
        self.request(
            "ledger_getLogs",
            json!([{
                "contract": self.contract,
                "event": kind.to_string(),
                "filter": filter,
                "fromBlock": from_block,
                "toBlock": to_block,
            }]),
        )
        .await
    }
}

#[async_trait::async_trait]
impl LedgerClient for RpcLedgerClient {
    #[instrument(skip(self), fields(rpc_url = %self.rpc_url))]
    async fn connect(&self) -> Result<Address, LedgerError> {
        let accounts: Vec<Address> = self.request("ledger_accounts", json!([])).await?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::new(LedgerErrorKind::Unavailable, "gateway exposes no accounts"))?;
        info!(address = %address, "Connected to ledger gateway");
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) = Some(address.clone());
        Ok(address)
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, LedgerError> {
        self.request_raw(
            "ledger_call",
            json!([{
                "contract": self.contract,
                "method": method,
                "args": args,
                "from": self.sender(),
            }]),
        )
        .await
    }

    #[instrument(skip(self, args))]
    async fn send_transaction(
        &self,
        method: &str,
        args: Vec<Value>,
        value: Option<u64>,
    ) -> Result<Box<dyn PendingTransaction>, LedgerError> {
        let hash: String = self
            .request(
                "ledger_sendTransaction",
                json!([{
                    "contract": self.contract,
                    "method": method,
                    "args": args,
                    "value": value.map(|v| v.to_string()),
                    "from": self.sender(),
                }]),
            )
            .await?;
        info!(tx_hash = %hash, "Transaction submitted");
        Ok(Box::new(RpcPendingTransaction {
            client: self.clone(),
            hash,
        }))
    }

    fn subscribe_to_event(
        &self,
        kind: EventKind,
        filter: EventFilter,
        handler: EventHandler,
    ) -> Result<Cancellation, LedgerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LedgerError::new(LedgerErrorKind::Unavailable, format!("no async runtime: {}", e)))?;
        let client = self.clone();
        let task = runtime.spawn(async move {
            let mut last_seen = match client.block_number().await {
                Ok(block) => block,
                Err(e) => {
                    warn!(%kind, error = %e, "Could not read head block, watching from genesis");
                    0
                }
            };
            loop {
                tokio::time::sleep(client.poll_interval).await;
                let head = match client.block_number().await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!(%kind, error = %e, "Log poll failed");
                        continue;
                    }
                };
                if head <= last_seen {
                    continue;
                }
                match client.logs(kind, filter, last_seen + 1, head).await {
                    Ok(logs) => {
                        for event in logs.iter().filter_map(LogRecord::decode) {
                            if filter.matches(&event) {
                                handler(event);
                            }
                        }
                        last_seen = head;
                    }
                    Err(e) => warn!(%kind, error = %e, "Log poll failed"),
                }
            }
        });
        debug!(%kind, ?filter, "Log watcher started");
        Ok(Cancellation::abort_task(task))
    }

    async fn query_past_events(
        &self,
        kind: EventKind,
        filter: EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, LedgerError> {
        self.logs(kind, filter, from_block, to_block).await
    }
}

struct RpcPendingTransaction {
    client: RpcLedgerClient,
    hash: String,
}

#[async_trait::async_trait]
impl PendingTransaction for RpcPendingTransaction {
    fn hash(&self) -> &str {
        &self.hash
    }

    #[instrument(skip(self), fields(tx_hash = %self.hash))]
    async fn wait(self: Box<Self>) -> Result<Receipt, LedgerError> {
        loop {
            let raw = self
                .client
                .request_raw("ledger_getTransactionReceipt", json!([self.hash]))
                .await?;
            if raw.is_null() {
                tokio::time::sleep(self.client.poll_interval).await;
                continue;
            }
            let receipt: RpcReceipt = serde_json::from_value(raw)?;
            if !receipt.status {
                let reason = receipt
                    .revert_reason
                    .unwrap_or_else(|| "transaction failed".to_string());
                return Err(LedgerError::reverted(strip_revert_prefix(&reason)));
            }
            debug!(block = receipt.block_number, logs = receipt.logs.len(), "Transaction confirmed");
            return Ok(Receipt {
                tx_hash: receipt.tx_hash,
                block_number: receipt.block_number,
                logs: receipt.logs,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_error_keeps_reason() {
        let body: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 3, "message": "execution reverted: not your turn" }
        }))
        .unwrap();
        let err = body.error.unwrap().into_ledger_error();
        assert_eq!(err.kind, LedgerErrorKind::Reverted);
        assert_eq!(err.message, "not your turn");
    }

    #[test]
    fn test_user_rejection() {
        let err = RpcErrorBody {
            code: USER_REJECTED,
            message: "User denied transaction signature".to_string(),
        }
        .into_ledger_error();
        assert_eq!(err.kind, LedgerErrorKind::Rejected);
    }

    #[test]
    fn test_other_errors_are_transport() {
        let err = RpcErrorBody {
            code: -32000,
            message: "header not found".to_string(),
        }
        .into_ledger_error();
        assert_eq!(err.kind, LedgerErrorKind::Transport);
    }

    #[test]
    fn test_pending_receipt_is_null() {
        let body: RpcResponse = serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 4, "result": null })).unwrap();
        assert!(body.error.is_none());
        assert!(body.result.is_null());
    }

    #[test]
    fn test_receipt_decoding() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "txHash": "0x01",
            "blockNumber": 12,
            "status": true,
            "logs": [{
                "blockNumber": 12,
                "txHash": "0x01",
                "name": "GameCreated",
                "args": { "gameId": 5, "player1": "0xA1" }
            }]
        }))
        .unwrap();
        assert_eq!(receipt.block_number, 12);
        assert_eq!(receipt.logs[0].decode().map(|e| e.game_id()), Some(5));
    }
}
