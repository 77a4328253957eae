//! Relay subscription pool
//!
//! Holds one WebSocket per relay and multiplexes a single book subscription
//! across all of them into one `mpsc` stream of [`RelayMessage`]s. Each relay
//! task stops as soon as the subscription's cancellation token fires, so
//! `close()` guarantees no further messages are produced.

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::event::{BookFilter, RawEvent, RelayMessage};
use crate::error::{FedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default message channel capacity
const CHANNEL_CAPACITY: usize = 1024;

/// Default relay connect timeout
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayService: Send + Sync {
    /// Relay endpoints this service subscribes to
    fn relay_urls(&self) -> Vec<String>;

    async fn connect(&self) -> Result<()>;

    /// Close the active subscription and every connection. No message is
    /// delivered after this returns.
    async fn close(&self);

    async fn subscribe_book(&self, filter: BookFilter) -> Result<mpsc::Receiver<RelayMessage>>;
}

/// Relay endpoint served by a coordinator: same host, `ws(s)` scheme, `/relay/` path.
pub fn coordinator_relay_url(coordinator_url: &str) -> Option<String> {
    let mut url = Url::parse(coordinator_url).ok()?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path("/relay/");
    Some(url.to_string())
}

struct Subscription {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct RelayPool {
    urls: Vec<String>,
    channel_capacity: usize,
    connect_timeout: Duration,
    connections: Mutex<HashMap<String, WsStream>>,
    subscription: Mutex<Option<Subscription>>,
}

impl RelayPool {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        for url in &urls {
            let parsed = Url::parse(url)
                .map_err(|e| FedError::Validation(format!("invalid relay url '{url}': {e}")))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(FedError::Validation(format!(
                    "relay url '{url}' must use ws:// or wss://"
                )));
            }
        }
        Ok(Self {
            urls,
            channel_capacity: CHANNEL_CAPACITY,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connections: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
        })
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn open(url: &str, connect_timeout: Duration) -> Result<WsStream> {
        let (stream, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| FedError::Timeout {
                operation: format!("connect to relay {url}"),
                elapsed_ms: connect_timeout.as_millis() as u64,
            })??;
        Ok(stream)
    }

    async fn cancel_subscription(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.cancel.cancel();
            for task in subscription.tasks {
                let _ = task.await;
            }
        }
    }
}

#[async_trait]
impl RelayService for RelayPool {
    fn relay_urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    async fn connect(&self) -> Result<()> {
        let attempts = self.urls.iter().map(|url| async move {
            (url.clone(), Self::open(url, self.connect_timeout).await)
        });
        let results = join_all(attempts).await;

        let mut connections = self.connections.lock().await;
        let mut failures = 0;
        for (url, result) in results {
            match result {
                Ok(stream) => {
                    debug!(relay = %url, "relay connected");
                    connections.insert(url, stream);
                }
                Err(e) => {
                    failures += 1;
                    warn!(relay = %url, error = %e, "relay connection failed");
                }
            }
        }
        info!(
            connected = connections.len(),
            failed = failures,
            "relay pool connected"
        );

        if !self.urls.is_empty() && connections.is_empty() {
            return Err(FedError::RelayUnavailable(
                "no relay accepted a connection".to_string(),
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        self.cancel_subscription().await;
        let mut connections = self.connections.lock().await;
        for (url, mut stream) in connections.drain() {
            if let Err(e) = stream.close(None).await {
                debug!(relay = %url, error = %e, "relay close failed");
            }
        }
        debug!("relay pool closed");
    }

    async fn subscribe_book(&self, filter: BookFilter) -> Result<mpsc::Receiver<RelayMessage>> {
        self.cancel_subscription().await;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let subscription_id = uuid::Uuid::new_v4().simple().to_string();
        let mut connections = self.connections.lock().await;

        let tasks = self
            .urls
            .iter()
            .map(|url| {
                let relay = RelayTask {
                    url: url.clone(),
                    subscription_id: subscription_id.clone(),
                    filter: filter.clone(),
                    tx: tx.clone(),
                    cancel: cancel.clone(),
                    connect_timeout: self.connect_timeout,
                };
                let stream = connections.remove(url);
                tokio::spawn(relay.run(stream))
            })
            .collect();

        info!(
            relays = self.urls.len(),
            subscription = %subscription_id,
            "book subscription opened"
        );
        *self.subscription.lock().await = Some(Subscription { cancel, tasks });
        Ok(rx)
    }
}

struct RelayTask {
    url: String,
    subscription_id: String,
    filter: BookFilter,
    tx: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
    connect_timeout: Duration,
}

/// Parsed relay frame
#[derive(Debug, PartialEq)]
enum Frame {
    Event(RawEvent),
    EndOfStream,
    Closed(String),
    Notice(String),
    Ignored,
}

fn parse_frame(text: &str, subscription_id: &str) -> Result<Frame> {
    let frame: Vec<Value> = serde_json::from_str(text)?;
    let label = frame.first().and_then(Value::as_str).unwrap_or_default();
    let for_us = frame.get(1).and_then(Value::as_str) == Some(subscription_id);
    Ok(match label {
        "EVENT" if for_us => {
            let event = frame
                .get(2)
                .cloned()
                .ok_or_else(|| FedError::Decode("EVENT frame without event".to_string()))?;
            Frame::Event(serde_json::from_value(event)?)
        }
        "EOSE" if for_us => Frame::EndOfStream,
        "CLOSED" if for_us => Frame::Closed(
            frame
                .get(2)
                .and_then(Value::as_str)
                .unwrap_or("closed by relay")
                .to_string(),
        ),
        "NOTICE" => Frame::Notice(
            frame
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        _ => Frame::Ignored,
    })
}

impl RelayTask {
    async fn run(self, stream: Option<WsStream>) {
        let failure = match self.stream(stream).await {
            Ok(()) => return,
            Err(e) => e.to_string(),
        };
        if self.cancel.is_cancelled() {
            return;
        }
        warn!(relay = %self.url, error = %failure, "relay subscription failed");
        let _ = self
            .tx
            .send(RelayMessage::Failed {
                relay: self.url.clone(),
                reason: failure,
            })
            .await;
    }

    async fn stream(&self, stream: Option<WsStream>) -> Result<()> {
        let mut ws = match stream {
            Some(ws) => ws,
            None => tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                opened = RelayPool::open(&self.url, self.connect_timeout) => opened?,
            },
        };

        let request = json!(["REQ", self.subscription_id, self.filter]);
        tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            sent = ws.send(Message::Text(request.to_string())) => sent?,
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let close = json!(["CLOSE", self.subscription_id]);
                    let _ = ws.send(Message::Text(close.to_string())).await;
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                message = ws.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(FedError::RelayUnavailable("connection closed".to_string()));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                    };
                    let notification = match parse_frame(&text, &self.subscription_id) {
                        Ok(Frame::Event(event)) => RelayMessage::Event {
                            relay: self.url.clone(),
                            event,
                        },
                        Ok(Frame::EndOfStream) => RelayMessage::EndOfStream {
                            relay: self.url.clone(),
                        },
                        Ok(Frame::Closed(reason)) => {
                            return Err(FedError::RelayUnavailable(reason));
                        }
                        Ok(Frame::Notice(notice)) => {
                            info!(relay = %self.url, %notice, "relay notice");
                            continue;
                        }
                        Ok(Frame::Ignored) => continue,
                        Err(e) => {
                            warn!(relay = %self.url, error = %e, "skipping malformed relay frame");
                            continue;
                        }
                    };
                    // A full channel must not hold up cancellation.
                    tokio::select! {
                        _ = self.cancel.cancelled() => continue,
                        sent = self.tx.send(notification) => {
                            if sent.is_err() {
                                // Receiver dropped: nobody is listening any more.
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}
