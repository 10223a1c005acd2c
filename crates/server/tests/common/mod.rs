#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use chatrelay::registry::{Registry, RegistryHandle};
use chatrelay::session::SessionConfig;
use chatrelay::signer::{Signer, SIGNATURE_HEADER};
use chatrelay::state::AppState;
use chatrelay::upstream::{UpstreamError, UpstreamSender};
use chatrelay_protocol::{ChatMessage, CreateChatResponse};

pub const WEBHOOK_TOKEN: &[u8] = b"integration-token";

pub type Browser = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upstream sender that records every message it is asked to deliver.
pub struct RecordingSender {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl RecordingSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UpstreamSender for RecordingSender {
    async fn send_message(&self, message: &ChatMessage) -> Result<String, UpstreamError> {
        let _ = self.tx.send(message.clone());
        Ok(format!("remote-{}", message.id))
    }
}

/// A relay listening on an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: RegistryHandle,
    pub signer: Signer,
    pub shutdown: CancellationToken,
    pub http: reqwest::Client,
    pub server_task: JoinHandle<std::io::Result<()>>,
    pub registry_task: JoinHandle<()>,
}

impl TestRelay {
    /// Start a relay backed by a recording sender.
    pub async fn start() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (sender, sent) = RecordingSender::new();
        let relay = Self::start_with(Arc::new(sender), SessionConfig::default()).await;
        (relay, sent)
    }

    pub async fn start_with(sender: Arc<dyn UpstreamSender>, config: SessionConfig) -> Self {
        let shutdown = CancellationToken::new();
        let (registry, registry_task) =
            Registry::spawn(sender, config, shutdown.clone(), Duration::from_secs(2));
        let signer = Signer::new(WEBHOOK_TOKEN);
        let state = Arc::new(AppState::new(registry.clone(), signer.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_task = tokio::spawn(chatrelay::serve(listener, state, shutdown.clone()));

        Self {
            addr,
            registry,
            signer,
            shutdown,
            http: reqwest::Client::new(),
            server_task,
            registry_task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// `POST /chat` for `user_id`, returning the WebSocket path.
    pub async fn create_chat(&self, user_id: &str) -> String {
        let resp = self
            .http
            .post(self.url("/chat"))
            .json(&serde_json::json!({"account": "acme", "secret": "s", "userId": user_id}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: CreateChatResponse = resp.json().await.unwrap();
        body.path
    }

    pub async fn connect(&self, path: &str) -> Browser {
        let (ws, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        ws
    }

    /// Create a chat for `user_id` and connect a browser to it.
    pub async fn open_chat(&self, user_id: &str) -> (String, Browser) {
        let path = self.create_chat(user_id).await;
        let ws = self.connect(&path).await;
        let id = session_id_of(&path);
        wait_until(|| {
            let registry = self.registry.clone();
            async move {
                match registry.find_by_id(id).await {
                    Some(session) => session.is_attached(),
                    None => false,
                }
            }
        })
        .await;
        (path, ws)
    }

    /// POST `body` to `/hook` with the given signature header.
    pub async fn post_hook(&self, body: &str, signature: Option<String>) -> reqwest::Response {
        let mut req = self
            .http
            .post(self.url("/hook"))
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(signature) = signature {
            req = req.header(SIGNATURE_HEADER, signature);
        }
        req.send().await.unwrap()
    }

    pub async fn post_signed_hook(&self, body: &str) -> reqwest::Response {
        let signature = self.signer.header_value(body.as_bytes());
        self.post_hook(body, Some(signature)).await
    }
}

pub fn session_id_of(path: &str) -> uuid::Uuid {
    let id = path
        .strip_prefix(chatrelay_protocol::CHAT_WS_PREFIX)
        .unwrap();
    uuid::Uuid::parse_str(id).unwrap()
}

/// Next text frame from the browser side, skipping control frames.
pub async fn next_text(ws: &mut Browser, within: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        match frame.ok()? {
            Message::Text(text) => return Some(text.as_str().to_string()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

pub async fn send_text(ws: &mut Browser, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
