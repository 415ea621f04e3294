//! REST + WebSocket client for the hosted document backend.
//!
//! Document and blob operations go over plain JSON REST endpoints.
//! Live queries go over a WebSocket: the client sends the descriptor,
//! the backend pushes the full current result set on establishment and
//! after every relevant change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::store::{DocumentStore, SubscriptionId, SubscriptionStream};
use crate::types::{BlobRef, Document, QueryDescriptor, QuerySnapshot};
use crate::StoreError;

/// Per-subscription delivery buffer.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// How long to wait for the backend to acknowledge a subscribe with its
/// first snapshot before treating establishment as failed.
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    action: &'static str,
    query: &'a QueryDescriptor,
}

#[derive(Deserialize)]
struct ServerMessage {
    kind: String,
    #[serde(default)]
    documents: Vec<Document>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Deserialize)]
struct GetResponse {
    fields: Value,
}

#[derive(Deserialize)]
struct BlobUrlResponse {
    url: String,
}

/// Client for the hosted backend.
pub struct HttpStore {
    http: Client,
    base_url: String,
    /// Reader tasks for live subscriptions, keyed by subscription id.
    subscriptions: DashMap<u64, JoinHandle<()>>,
    next_subscription: AtomicU64,
}

impl HttpStore {
    /// Create a new client for the given backend base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            subscriptions: DashMap::new(),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    /// The WebSocket subscribe endpoint, derived from the base URL.
    fn ws_endpoint(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/v1/subscribe", ws_base)
    }

    async fn rejection(collection: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StoreError::Write {
            collection: collection.to_string(),
            message: format!("{}: {}", status, body),
        }
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn subscribe(
        &self,
        descriptor: QueryDescriptor,
    ) -> Result<SubscriptionStream, StoreError> {
        let url = self.ws_endpoint();
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);

        debug!(subscription = id, collection = %descriptor.collection, "opening live query");

        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| StoreError::Subscription(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws.split();

        let request = serde_json::to_string(&SubscribeRequest {
            action: "subscribe",
            query: &descriptor,
        })?;
        write
            .send(Message::Text(request))
            .await
            .map_err(|e| StoreError::Subscription(format!("subscribe send failed: {}", e)))?;

        // The backend acknowledges with the initial snapshot (or an
        // error), so establishment failures surface from this call.
        let first = tokio::time::timeout(ESTABLISH_TIMEOUT, read.next())
            .await
            .map_err(|_| StoreError::Subscription("establish timeout".to_string()))?;

        let initial = match first {
            Some(Ok(Message::Text(text))) => parse_snapshot(&text)?,
            Some(Ok(other)) => {
                return Err(StoreError::Subscription(format!(
                    "unexpected establish message: {:?}",
                    other
                )))
            }
            Some(Err(e)) => return Err(StoreError::Subscription(format!("read error: {}", e))),
            None => return Err(StoreError::Subscription("stream ended".to_string())),
        };

        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        tx.try_send(initial)
            .map_err(|e| StoreError::Subscription(format!("initial delivery failed: {}", e)))?;

        let task = tokio::spawn(run_subscription(url, descriptor, read, tx, id));
        self.subscriptions.insert(id, task);

        Ok(SubscriptionStream {
            id: SubscriptionId(id),
            snapshots: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, task)) = self.subscriptions.remove(&id.0) {
            task.abort();
            debug!(subscription = id.0, "live query closed");
        }
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: Value,
    ) -> Result<String, StoreError> {
        let response = self
            .http
            .post(self.endpoint(&format!("documents/{}", collection)))
            .json(&fields)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(collection, response).await);
        }

        let created: CreateResponse = response.json().await?;
        Ok(created.id)
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.endpoint(&format!("documents/{}/{}", collection, id)))
            .json(&fields)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(collection, response).await);
        }
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.endpoint(&format!("documents/{}/{}", collection, id)))
            .json(&fields)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::rejection(collection, response).await);
        }
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("documents/{}/{}", collection, id)))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::rejection(collection, response).await);
        }
        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let response = self
            .http
            .get(self.endpoint(&format!("documents/{}/{}", collection, id)))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::InvalidResponse(format!(
                "get {}/{} returned {}",
                collection,
                id,
                response.status()
            )));
        }

        let body: GetResponse = response.json().await?;
        Ok(Some(body.fields))
    }

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>) -> Result<BlobRef, StoreError> {
        let response = self
            .http
            .post(self.endpoint(&format!("blobs/{}", path)))
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection("blobs", response).await);
        }
        Ok(BlobRef(path.to_string()))
    }

    async fn blob_url(&self, blob: &BlobRef) -> Result<String, StoreError> {
        let response = self
            .http
            .get(self.endpoint(&format!("blobs/{}/url", blob.path())))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::BlobNotFound(blob.path().to_string()));
        }
        if !response.status().is_success() {
            return Err(StoreError::InvalidResponse(format!(
                "blob url for {} returned {}",
                blob.path(),
                response.status()
            )));
        }

        let body: BlobUrlResponse = response.json().await?;
        Ok(body.url)
    }

    async fn delete_blob(&self, blob: &BlobRef) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("blobs/{}", blob.path())))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::BlobNotFound(blob.path().to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::rejection("blobs", response).await);
        }
        Ok(())
    }
}

fn parse_snapshot(text: &str) -> Result<QuerySnapshot, StoreError> {
    let message: ServerMessage = serde_json::from_str(text)?;
    match message.kind.as_str() {
        "snapshot" => Ok(QuerySnapshot::new(message.documents)),
        "error" => Err(StoreError::Subscription(
            message.error.unwrap_or_else(|| "unspecified".to_string()),
        )),
        other => Err(StoreError::InvalidResponse(format!(
            "unknown server message kind: {}",
            other
        ))),
    }
}

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Forward snapshots from the WebSocket into the subscription channel.
///
/// Runs until the consumer goes away; transport failures reconnect with
/// exponential backoff, after which the backend re-delivers the current
/// result set (a fresh snapshot is never older than a delivered one).
async fn run_subscription(
    url: String,
    descriptor: QueryDescriptor,
    mut read: WsRead,
    tx: mpsc::Sender<QuerySnapshot>,
    id: u64,
) {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(60);

    loop {
        match pump_messages(&mut read, &tx, id).await {
            PumpOutcome::ConsumerGone => {
                debug!(subscription = id, "consumer gone, ending live query");
                return;
            }
            PumpOutcome::Transport(reason) => {
                warn!(subscription = id, reason = %reason, backoff_secs = backoff.as_secs(), "live query disconnected, reconnecting");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
        }

        // Reconnect and resubscribe with the same descriptor.
        loop {
            if tx.is_closed() {
                return;
            }
            match reestablish(&url, &descriptor).await {
                Ok(stream) => {
                    info!(subscription = id, "live query reconnected");
                    read = stream;
                    backoff = Duration::from_secs(1);
                    break;
                }
                Err(e) => {
                    warn!(subscription = id, error = %e, backoff_secs = backoff.as_secs(), "reconnect failed");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, max_backoff);
                }
            }
        }
    }
}

enum PumpOutcome {
    /// The subscription receiver was dropped.
    ConsumerGone,
    /// The socket failed; reconnect.
    Transport(String),
}

async fn pump_messages(read: &mut WsRead, tx: &mpsc::Sender<QuerySnapshot>, id: u64) -> PumpOutcome {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_snapshot(&text) {
                Ok(snapshot) => {
                    if tx.send(snapshot).await.is_err() {
                        return PumpOutcome::ConsumerGone;
                    }
                    trace!(subscription = id, "snapshot forwarded");
                }
                Err(e) => {
                    warn!(subscription = id, error = %e, "failed to decode server message");
                }
            },
            Some(Ok(Message::Ping(_))) => {
                trace!(subscription = id, "received ping");
            }
            Some(Ok(Message::Close(_))) => {
                return PumpOutcome::Transport("closed by server".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return PumpOutcome::Transport(format!("read error: {}", e));
            }
            None => {
                return PumpOutcome::Transport("stream ended".to_string());
            }
        }
    }
}

async fn reestablish(url: &str, descriptor: &QueryDescriptor) -> Result<WsRead, StoreError> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| StoreError::WebSocket(format!("connection failed: {}", e)))?;
    let (mut write, read) = ws.split();

    let request = serde_json::to_string(&SubscribeRequest {
        action: "subscribe",
        query: descriptor,
    })?;
    write
        .send(Message::Text(request))
        .await
        .map_err(|e| StoreError::WebSocket(format!("subscribe send failed: {}", e)))?;

    Ok(read)
}
