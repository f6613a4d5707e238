//! JSON-RPC [`ChainClient`] over HTTP (requests) and WebSocket (log
//! subscriptions).
//!
//! Each log subscription owns its own WebSocket connection and background
//! task. A dropped connection is re-established with exponential backoff and
//! the subscription re-issued; logs missed while disconnected are not
//! replayed here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use shareindex_core::error::IndexerError;

use crate::client::{
    hex0x, parse_hex_bytes, parse_hex_u64, ChainClient, LogFilter, RawLog, Subscription,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-RPC code some providers use for request throttling.
const RATE_LIMITED: i64 = -32005;

/// Configuration for [`JsonRpcClient`].
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub request_timeout: Duration,
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

pub struct JsonRpcClient {
    http_url: String,
    ws_url: Option<String>,
    http: reqwest::Client,
    config: RpcClientConfig,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a client. Subscriptions need `ws_url`; without one,
    /// [`ChainClient::subscribe_logs`] fails with a configuration error.
    pub fn new(
        http_url: impl Into<String>,
        ws_url: Option<String>,
        config: RpcClientConfig,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_url: http_url.into(),
            ws_url,
            http,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let resp = self
            .http
            .post(&self.http_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Transport(format!("HTTP {}: {body}", status.as_u16())));
        }

        let envelope: RpcResponse = resp.json().await.map_err(|e| self.transport_error(e))?;
        if let Some(err) = envelope.error {
            return Err(rpc_error(err.code, err.message));
        }
        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|e| IndexerError::Decode(format!("{method} result: {e}")))
    }

    fn transport_error(&self, e: reqwest::Error) -> IndexerError {
        if e.is_timeout() {
            IndexerError::Timeout {
                ms: self.config.request_timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            IndexerError::Decode(e.to_string())
        } else {
            IndexerError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let head: String = self.request("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        self.request("eth_getLogs", json!([filter.to_params()])).await
    }

    async fn call(
        &self,
        to: Address,
        input: Bytes,
        block: Option<u64>,
    ) -> Result<Bytes, IndexerError> {
        let tag = match block {
            Some(n) => format!("{n:#x}"),
            None => "latest".to_string(),
        };
        let call = json!({ "to": hex0x(to.as_slice()), "data": hex0x(&input) });
        let output: String = self.request("eth_call", json!([call, tag])).await?;
        Ok(Bytes::from(parse_hex_bytes(&output)?))
    }

    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
        sink: mpsc::Sender<Vec<RawLog>>,
    ) -> Result<Subscription, IndexerError> {
        let url = self
            .ws_url
            .clone()
            .ok_or_else(|| IndexerError::Config("no WebSocket endpoint configured".into()))?;

        let (ws, subscription_id) =
            open_log_stream(&url, filter, self.config.request_timeout).await?;
        let label = format!("logs:{}:{}", filter.address, filter.topic0);
        debug!(subscription = %label, id = %subscription_id, "log subscription open");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(log_stream_task(
            LogStream {
                url,
                filter: *filter,
                ws,
                subscription_id,
                label: label.clone(),
            },
            sink,
            cancel_rx,
            self.config.clone(),
        ));
        Ok(Subscription::new(label, cancel_tx, task))
    }
}

/// Map a JSON-RPC error object, treating throttling as transient.
fn rpc_error(code: i64, message: String) -> IndexerError {
    if code == RATE_LIMITED || message.to_ascii_lowercase().contains("rate limit") {
        IndexerError::Transport(format!("rate limited ({code}): {message}"))
    } else {
        IndexerError::Rpc { code, message }
    }
}

/// `ws(s)://` endpoint for an `http(s)://` one.
pub fn derive_ws_url(http_url: &str) -> Option<String> {
    if let Some(rest) = http_url.strip_prefix("https://") {
        Some(format!("wss://{rest}"))
    } else {
        http_url.strip_prefix("http://").map(|rest| format!("ws://{rest}"))
    }
}

// ─── WebSocket log streams ────────────────────────────────────────────────────

struct LogStream {
    url: String,
    filter: LogFilter,
    ws: WsStream,
    subscription_id: String,
    label: String,
}

enum StreamEnd {
    Cancelled,
    SinkClosed,
    Disconnected,
}

/// Connect and issue `eth_subscribe("logs", filter)` within `timeout`;
/// returns the stream and the node's subscription id.
async fn open_log_stream(
    url: &str,
    filter: &LogFilter,
    timeout: Duration,
) -> Result<(WsStream, String), IndexerError> {
    match time::timeout(timeout, subscribe_once(url, filter)).await {
        Ok(result) => result,
        Err(_) => Err(IndexerError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
    }
}

async fn subscribe_once(url: &str, filter: &LogFilter) -> Result<(WsStream, String), IndexerError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| IndexerError::Transport(format!("ws connect: {e}")))?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["logs", filter.to_params()],
    });
    ws.send(Message::Text(request.to_string().into()))
        .await
        .map_err(|e| IndexerError::Transport(format!("ws send: {e}")))?;

    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| IndexerError::Transport(format!("ws receive: {e}")))?;
        let Message::Text(text) = msg else { continue };
        let Ok(val) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        if val.get("id").and_then(Value::as_u64) != Some(1) {
            continue;
        }
        if let Some(err) = val.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = err.get("message").and_then(Value::as_str).unwrap_or_default();
            return Err(rpc_error(code, message.to_string()));
        }
        let id = val
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| IndexerError::Decode("eth_subscribe returned no id".into()))?;
        return Ok((ws, id.to_string()));
    }
    Err(IndexerError::Transport("ws closed before subscription was confirmed".into()))
}

async fn log_stream_task(
    mut stream: LogStream,
    sink: mpsc::Sender<Vec<RawLog>>,
    mut cancel: oneshot::Receiver<()>,
    config: RpcClientConfig,
) {
    let mut backoff = config.reconnect_initial;

    loop {
        match pump(&mut stream, &sink, &mut cancel).await {
            StreamEnd::Cancelled => {
                let request = json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "eth_unsubscribe",
                    "params": [stream.subscription_id],
                });
                let _ = stream.ws.send(Message::Text(request.to_string().into())).await;
                let _ = stream.ws.close(None).await;
                debug!(subscription = %stream.label, "log subscription closed");
                return;
            }
            StreamEnd::SinkClosed => {
                let _ = stream.ws.close(None).await;
                debug!(subscription = %stream.label, "receiver gone; closing log subscription");
                return;
            }
            StreamEnd::Disconnected => {}
        }

        loop {
            warn!(subscription = %stream.label, "ws disconnected, reconnecting in {backoff:?}");
            tokio::select! {
                _ = &mut cancel => return,
                _ = time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(config.reconnect_max);

            match open_log_stream(&stream.url, &stream.filter, config.request_timeout).await {
                Ok((ws, id)) => {
                    info!(
                        subscription = %stream.label,
                        id = %id,
                        "log subscription re-established"
                    );
                    stream.ws = ws;
                    stream.subscription_id = id;
                    backoff = config.reconnect_initial;
                    break;
                }
                Err(e) => warn!(subscription = %stream.label, error = %e, "resubscribe failed"),
            }
        }
    }
}

async fn pump(
    stream: &mut LogStream,
    sink: &mpsc::Sender<Vec<RawLog>>,
    cancel: &mut oneshot::Receiver<()>,
) -> StreamEnd {
    loop {
        tokio::select! {
            _ = &mut *cancel => return StreamEnd::Cancelled,
            msg = stream.ws.next() => match msg {
                None | Some(Ok(Message::Close(_))) => return StreamEnd::Disconnected,
                Some(Err(e)) => {
                    warn!(subscription = %stream.label, error = %e, "ws receive error");
                    return StreamEnd::Disconnected;
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(log) = notification(text.as_str(), &stream.subscription_id) {
                        if sink.send(vec![log]).await.is_err() {
                            return StreamEnd::SinkClosed;
                        }
                    }
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Extract the log from an `eth_subscription` notification for `subscription_id`.
fn notification(text: &str, subscription_id: &str) -> Option<RawLog> {
    let val: Value = serde_json::from_str(text).ok()?;
    if val.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = val.get("params")?;
    if params.get("subscription").and_then(Value::as_str) != Some(subscription_id) {
        return None;
    }
    match serde_json::from_value(params.get("result")?.clone()) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %e, "malformed log notification");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_is_transient() {
        assert!(rpc_error(-32005, "limit exceeded".into()).is_transient());
        assert!(rpc_error(-32000, "Rate limit reached".into()).is_transient());

        let revert = rpc_error(3, "execution reverted".into());
        assert!(revert.is_semantic());
        assert!(matches!(revert, IndexerError::Rpc { code: 3, .. }));
    }

    #[test]
    fn ws_url_from_http() {
        assert_eq!(
            derive_ws_url("https://eth.example.org/v3/key").as_deref(),
            Some("wss://eth.example.org/v3/key")
        );
        assert_eq!(derive_ws_url("http://127.0.0.1:8545").as_deref(), Some("ws://127.0.0.1:8545"));
        assert_eq!(derive_ws_url("ipc:///tmp/geth.ipc"), None);
    }

    #[test]
    fn notification_filters_by_subscription() {
        let text = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0xabc",
                "result": {
                    "address": "0x0000000000000000000000000000000000000001",
                    "topics": ["0x01"],
                    "data": "0x",
                    "blockNumber": "0x10",
                    "logIndex": "0x1",
                    "transactionHash": "0xaa"
                }
            }
        })
        .to_string();

        let log = notification(&text, "0xabc").unwrap();
        assert_eq!(log.position().unwrap(), (16, 1));
        assert!(notification(&text, "0xdef").is_none());
        assert!(notification(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#, "0xabc").is_none());
    }

    #[tokio::test]
    async fn subscribe_without_ws_url_is_config_error() {
        let client =
            JsonRpcClient::new("http://127.0.0.1:1", None, RpcClientConfig::default()).unwrap();
        let (sink, _rx) = mpsc::channel(1);
        let filter = LogFilter::new(Address::ZERO, Default::default());
        let err = client.subscribe_logs(&filter, sink).await.unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
