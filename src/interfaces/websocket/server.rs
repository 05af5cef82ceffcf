use std::{future::Future, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, info};

use crate::{
    application::services::client_registry::{ClientRegistry, NotificationChannel},
    shared::error::ServerError,
};

pub const LIVE_RELOAD_PATH: &str = "/livereload";

// 每个连接的待发送消息上限
const OUTGOING_CAPACITY: usize = 16;

/// Registry-side handle of one WebSocket connection.
///
/// Sends fail once the connection task is gone. Dropping the handle closes
/// the connection.
pub struct WebSocketChannel {
    tx: mpsc::Sender<String>,
}

impl WebSocketChannel {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationChannel for WebSocketChannel {
    async fn send(&self, message: &str) -> Result<(), ServerError> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|_| ServerError::ChannelSendFailure("connection closed".to_string()))
    }
}

pub struct NotificationServer {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
}

impl NotificationServer {
    pub async fn bind(addr: &str, registry: Arc<ClientRegistry>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::PortBindError {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(registry: Arc<ClientRegistry>) -> Router {
        Router::new()
            .route(LIVE_RELOAD_PATH, get(handle_websocket_upgrade))
            .with_state(registry)
    }

    /// Accepts connections until `shutdown` resolves. Upgraded connections
    /// are not tracked here; they end when the registry drops their channel.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let app = Self::router(self.registry);
        info!("live reload server listening on ws://{}{}", addr, LIVE_RELOAD_PATH);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("live reload server stopped");
        Ok(())
    }
}

async fn handle_websocket_upgrade(
    State(registry): State<Arc<ClientRegistry>>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, registry))
}

async fn handle_websocket_connection(socket: WebSocket, registry: Arc<ClientRegistry>) {
    let (tx, mut rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
    let client_id = registry.register(Arc::new(WebSocketChannel::new(tx)));
    info!("live reload client {} connected", client_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sender.send(Message::Text(message.into())).await {
                        debug!("send to client {} failed: {}", client_id, e);
                        break;
                    }
                }
                None => {
                    // 已从注册表移除，主动关闭连接
                    debug!("client {} released by registry, closing", client_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("client {} closed connection", client_id);
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    debug!("ignore payload from client {}: {}", client_id, text.as_str());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("receive from client {} failed: {}", client_id, e);
                    break;
                }
            },
        }
    }

    registry.unregister(client_id);
    info!("live reload client {} disconnected", client_id);
}
