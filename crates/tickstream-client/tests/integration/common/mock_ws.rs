//! Mock WebSocket quote server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and record the `?token=` each one presented
//! - Record received subscribe/unsubscribe messages
//! - Push arbitrary frames to all connected clients
//! - Close all connections to exercise reconnect paths

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCmd {
    /// Send a text frame to every connected client.
    Frame(String),
    /// Send a binary frame to every connected client.
    Binary(Vec<u8>),
    /// Close every connection.
    CloseAll,
}

/// A mock quote stream server for testing.
pub struct MockQuoteServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    cmd_tx: broadcast::Sender<ServerCmd>,
    messages: Arc<Mutex<VecDeque<String>>>,
    tokens: Arc<std::sync::Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    pings: Arc<Mutex<u32>>,
}

impl MockQuoteServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let tokens: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let pings: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (cmd_tx, _) = broadcast::channel::<ServerCmd>(64);

        let messages_clone = messages.clone();
        let tokens_clone = tokens.clone();
        let connections_clone = connections.clone();
        let pings_clone = pings.clone();
        let cmd_tx_clone = cmd_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let tokens = tokens_clone.clone();
                        let connections = connections_clone.clone();
                        let pings = pings_clone.clone();
                        let cmd_rx = cmd_tx_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream, messages, tokens, connections, pings, cmd_rx,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            cmd_tx,
            messages,
            tokens,
            connections,
            pings,
        }
    }

    /// Get the server's WebSocket URL (no token; clients append their own).
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get the number of Ping frames received from clients.
    pub async fn ping_count(&self) -> u32 {
        *self.pings.lock().await
    }

    /// Tokens presented in the handshake, in connection order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Push a text frame to all connected clients.
    pub fn send_frame(&self, text: impl Into<String>) {
        let _ = self.cmd_tx.send(ServerCmd::Frame(text.into()));
    }

    /// Push a binary frame to all connected clients.
    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.cmd_tx.send(ServerCmd::Binary(data));
    }

    /// Close all active connections.
    pub fn close_all(&self) {
        let _ = self.cmd_tx.send(ServerCmd::CloseAll);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    tokens: Arc<std::sync::Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    pings: Arc<Mutex<u32>>,
    mut cmd_rx: broadcast::Receiver<ServerCmd>,
) {
    // Capture the token query parameter during the handshake.
    let tokens_cb = tokens.clone();
    let callback = move |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
                         response: tokio_tungstenite::tungstenite::handshake::server::Response| {
        let token = request
            .uri()
            .query()
            .and_then(|q| {
                q.split('&')
                    .find_map(|pair| pair.strip_prefix("token="))
            })
            .unwrap_or("")
            .to_string();
        tokens_cb.lock().unwrap().push(token);
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let mut msgs = messages.lock().await;
                        msgs.push_back(text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        *pings.lock().await += 1;
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Ok(ServerCmd::Frame(text)) => {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    Ok(ServerCmd::Binary(data)) => {
                        let _ = write.send(Message::Binary(data)).await;
                    }
                    Ok(ServerCmd::CloseAll) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockQuoteServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
