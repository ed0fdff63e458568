//! wallet_feed.rs
//! WebSocket feed of transaction signatures for the watched wallets.
//! - one connection, each wallet subscribed sequentially with an ack deadline
//! - reader task forwards raw frames into a bounded queue
//! - dispatch task decodes frames and emits typed events
//! - transport failures surface on the error channel at most once
//! - shutdown closes the socket, which unblocks the reader

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::types::{EventSender, WalletTransactionSignature};

/// Buffer size for both the raw frame queue and the outgoing event channel.
pub const EVENT_BUFFER_SIZE: usize = 10_000;
const SUBSCRIBE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("failed to subscribe wallet {wallet}: {reason}")]
    Subscribe { wallet: String, reason: String },
    #[error("timeout waiting for subscription response for wallet {wallet}")]
    AckTimeout { wallet: String },
    #[error("websocket read error: {0}")]
    Read(String),
}

pub type FeedErrorReceiver = mpsc::Receiver<FeedError>;

/// Live channels handed back once every subscription is acknowledged.
pub struct FeedHandles {
    pub events: mpsc::Receiver<WalletTransactionSignature>,
    pub errors: FeedErrorReceiver,
}

pub struct WalletFeed {
    ws_endpoint: String,
    wallets: Vec<String>,
}

impl WalletFeed {
    pub fn new(ws_endpoint: String, wallets: Vec<String>) -> Self {
        Self {
            ws_endpoint,
            wallets,
        }
    }

    /// Connects and subscribes each wallet in turn. A subscription whose ack
    /// does not arrive within the deadline fails the whole feed. On success
    /// the socket is split across three tasks: reader, dispatcher, and a
    /// closer that shuts the transport when `shutdown` flips to true.
    pub async fn subscribe(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<FeedHandles, FeedError> {
        let (stream, _) = connect_async(&self.ws_endpoint)
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let (mut writer, mut reader) = stream.split();

        let mut subscription_to_wallet: HashMap<i64, String> = HashMap::new();
        for wallet in &self.wallets {
            let subscription = subscribe_wallet(&mut writer, &mut reader, wallet).await?;
            subscription_to_wallet.insert(subscription, wallet.clone());
        }
        info!(
            wallets = self.wallets.len(),
            "All wallet subscriptions acknowledged"
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (frame_tx, frame_rx) = mpsc::channel(EVENT_BUFFER_SIZE);

        tokio::spawn(reader_loop(
            reader,
            frame_tx,
            error_tx.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(dispatch_loop(
            frame_rx,
            subscription_to_wallet,
            event_tx,
            error_tx,
            shutdown.clone(),
        ));
        tokio::spawn(close_on_shutdown(writer, shutdown));

        Ok(FeedHandles {
            events: event_rx,
            errors: error_rx,
        })
    }
}

fn subscribe_request(wallet: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "logsSubscribe",
        "params": [
            { "mentions": [wallet] },
            { "commitment": "processed" }
        ]
    })
}

#[derive(Debug, Default, Deserialize)]
struct SubscribeAck {
    #[serde(default)]
    result: Option<i64>,
    #[serde(default)]
    error: Option<AckError>,
}

#[derive(Debug, Deserialize)]
struct AckError {
    #[serde(default)]
    message: String,
}

fn parse_ack(frame: &str) -> Result<i64, String> {
    let ack: SubscribeAck =
        serde_json::from_str(frame).map_err(|e| format!("invalid subscription response: {e}"))?;
    if let Some(err) = ack.error {
        return Err(err.message);
    }
    ack.result
        .ok_or_else(|| "subscription response missing result id".to_string())
}

#[derive(Debug, Default, Deserialize)]
struct LogsNotification {
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: NotificationParams,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationParams {
    #[serde(default)]
    result: NotificationResult,
    #[serde(default)]
    subscription: i64,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationResult {
    #[serde(default)]
    value: NotificationValue,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationValue {
    #[serde(default)]
    signature: String,
}

/// `Ok(Some)` for a logs notification, `Ok(None)` for any other well-formed
/// frame, `Err` for frames that do not parse at all.
fn parse_notification(frame: &str) -> Result<Option<(i64, String)>, FeedError> {
    let response: LogsNotification =
        serde_json::from_str(frame).map_err(|e| FeedError::Read(e.to_string()))?;
    if response.method != "logsNotification" {
        return Ok(None);
    }
    Ok(Some((
        response.params.subscription,
        response.params.result.value.signature,
    )))
}

async fn subscribe_wallet(
    writer: &mut WsWriter,
    reader: &mut WsReader,
    wallet: &str,
) -> Result<i64, FeedError> {
    let subscribe_err = |reason: String| FeedError::Subscribe {
        wallet: wallet.to_string(),
        reason,
    };

    writer
        .send(Message::Text(subscribe_request(wallet).to_string()))
        .await
        .map_err(|e| subscribe_err(e.to_string()))?;

    let frame = match timeout(SUBSCRIBE_ACK_TIMEOUT, reader.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(other))) => return Err(subscribe_err(format!("unexpected frame: {other:?}"))),
        Ok(Some(Err(e))) => return Err(subscribe_err(e.to_string())),
        Ok(None) => return Err(subscribe_err("connection closed".to_string())),
        Err(_) => {
            return Err(FeedError::AckTimeout {
                wallet: wallet.to_string(),
            })
        }
    };

    let subscription = parse_ack(&frame).map_err(subscribe_err)?;
    info!(wallet = %wallet, subscription, "Wallet subscription acknowledged");
    Ok(subscription)
}

/// Pulls frames off the socket into the bounded queue. Read failures are
/// reported once unless a shutdown is already in progress.
async fn reader_loop(
    mut reader: WsReader,
    frames: mpsc::Sender<String>,
    errors: mpsc::Sender<FeedError>,
    shutdown: watch::Receiver<bool>,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if frames.send(text).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                if !*shutdown.borrow() {
                    let _ = errors.try_send(FeedError::Read(e.to_string()));
                }
                return;
            }
        }
    }
    if !*shutdown.borrow() {
        let _ = errors.try_send(FeedError::Read("websocket stream ended".to_string()));
    }
}

/// Decodes queued frames and emits one event per logs notification.
async fn dispatch_loop(
    mut frames: mpsc::Receiver<String>,
    subscription_to_wallet: HashMap<i64, String>,
    events: EventSender,
    errors: mpsc::Sender<FeedError>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown signal received, exiting wallet feed loop");
                    return;
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { return };
                match parse_notification(&frame) {
                    Ok(Some((subscription, signature))) => {
                        let wallet = match subscription_to_wallet.get(&subscription) {
                            Some(wallet) => wallet.clone(),
                            None => {
                                debug!(subscription, "Notification for unknown subscription");
                                String::new()
                            }
                        };
                        let event = WalletTransactionSignature { wallet, signature };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Undecodable websocket frame: {}", e);
                        let _ = errors.try_send(e);
                        return;
                    }
                }
            }
        }
    }
}

async fn close_on_shutdown(mut writer: WsWriter, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    let _ = writer.close().await;
    info!("Wallet feed transport closed");
}
