// Common test utilities for integration tests
// Shared fixtures, an in-memory backend and an in-process gateway.
#![allow(dead_code)]

use async_trait::async_trait;
use log::LevelFilter;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, WebSocketStream};

use chatroom::models::{Chatroom, FileAttachment, HistoryMessage, Page, SelfInfo, UserId};
use chatroom::{ApiError, ChatBackend};

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

pub fn chatroom(id: i64, name: &str, roster: &[(UserId, &str)]) -> Chatroom {
    Chatroom::new(id, name, roster)
}

/// A history entry as the `messages/` endpoint serves it.
pub fn history(id: i64, text: &str, recipient: i64, sender_username: &str, out: bool) -> HistoryMessage {
    serde_json::from_value(json!({
        "id": id,
        "text": text,
        "sent": 1650000000000i64 + id,
        "edited": 1650000000000i64 + id,
        "read": false,
        "file": null,
        "sender": "1",
        "recipient": recipient.to_string(),
        "out": out,
        "sender_username": sender_username,
    }))
    .expect("valid history fixture")
}

pub fn page<T>(page: u32, pages: u32, data: Vec<T>) -> Page<T> {
    Page { page, pages, data }
}

/// In-memory stand-in for the REST backend.
#[derive(Default)]
pub struct MockBackend {
    pub self_info: Mutex<Option<SelfInfo>>,
    pub chatroom_pages: Mutex<HashMap<u32, Page<Chatroom>>>,
    pub message_pages: Mutex<HashMap<u32, Page<HistoryMessage>>>,
    pub uploaded: Mutex<Vec<FileAttachment>>,
    pub requests: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_self(self, username: &str, pk: UserId) -> Self {
        *self.self_info.lock().unwrap() = Some(SelfInfo { username: username.to_string(), pk });
        self
    }

    pub fn with_chatrooms(self, number: u32, pages: u32, data: Vec<Chatroom>) -> Self {
        self.chatroom_pages.lock().unwrap().insert(number, page(number, pages, data));
        self
    }

    pub fn with_messages(self, number: u32, pages: u32, data: Vec<HistoryMessage>) -> Self {
        self.message_pages.lock().unwrap().insert(number, page(number, pages, data));
        self
    }

    pub fn with_uploads(self, files: Vec<FileAttachment>) -> Self {
        *self.uploaded.lock().unwrap() = files;
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: String) -> Result<(), ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::Status { url: request, status: 500 });
        }
        Ok(())
    }
}

fn not_found(url: String) -> ApiError {
    ApiError::Status { url, status: 404 }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn fetch_self(&self) -> Result<SelfInfo, ApiError> {
        self.record("self/".to_string())?;
        self.self_info.lock().unwrap().clone().ok_or_else(|| not_found("self/".to_string()))
    }

    async fn fetch_chatrooms(&self, number: u32) -> Result<Page<Chatroom>, ApiError> {
        let url = format!("dialogs/?page={}", number);
        self.record(url.clone())?;
        self.chatroom_pages.lock().unwrap().get(&number).cloned().ok_or_else(|| not_found(url))
    }

    async fn fetch_messages(&self, number: u32) -> Result<Page<HistoryMessage>, ApiError> {
        let url = format!("messages/?page={}", number);
        self.record(url.clone())?;
        self.message_pages.lock().unwrap().get(&number).cloned().ok_or_else(|| not_found(url))
    }

    async fn upload_files(&self, paths: &[PathBuf]) -> Result<Vec<FileAttachment>, ApiError> {
        self.record(format!("upload/ ({} files)", paths.len()))?;
        Ok(self.uploaded.lock().unwrap().clone())
    }
}

/// Loopback WebSocket server handing every accepted connection to the test.
pub struct TestGateway {
    pub url: String,
    pub connections: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

impl TestGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
        let url = format!("ws://{}/chat_ws", listener.local_addr().expect("local addr"));
        let (tx, connections) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match accept_async(stream).await {
                    Ok(ws) => {
                        if tx.send(ws).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Test gateway handshake failed: {}", e),
                }
            }
        });
        Self { url, connections }
    }

    pub async fn next_connection(&mut self) -> WebSocketStream<TcpStream> {
        tokio::time::timeout(Duration::from_secs(5), self.connections.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("gateway stopped")
    }
}

/// Address nobody listens on.
pub async fn unused_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("ws://{}/chat_ws", addr)
}
