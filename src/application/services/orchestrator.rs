//! Process lifecycle: `Starting -> Running -> Stopping -> Stopped`.
//!
//! Startup is fail-fast. Shutdown stops the change detector first, then the
//! notification server together with every open channel, then the asset
//! server. Teardown problems are logged and ignored.

use std::{fmt::Display, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    application::services::{
        change_detector::ChangeDetector,
        client_registry::{ClientRegistry, RELOAD_MESSAGE},
    },
    config::ServeConfig,
    domain::{
        events::change_event::ChangeEvent, services::change_filter::ChangeFilter,
        value_objects::watched_path::WatchedPath,
    },
    interfaces::{
        http::server::{AssetServer, AssetState},
        websocket::server::NotificationServer,
    },
    shared::error::ServerError,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub struct DevServer {
    config: ServeConfig,
}

impl DevServer {
    pub fn new(config: ServeConfig) -> Self {
        Self { config }
    }

    /// Launches the notification server, the asset server and the change
    /// detector. If any of them fails nothing keeps running.
    pub async fn start(self) -> Result<RunningServer, ServerError> {
        let (state_tx, _) = watch::channel(ServerState::Starting);
        info!("server state: {}", ServerState::Starting);

        match launch(&self.config, state_tx.clone()).await {
            Ok(running) => {
                transition(&state_tx, ServerState::Running);
                Ok(running)
            }
            Err(e) => {
                error!("startup failed: {}", e);
                transition(&state_tx, ServerState::Stopping);
                transition(&state_tx, ServerState::Stopped);
                Err(e)
            }
        }
    }
}

async fn launch(
    config: &ServeConfig,
    state: watch::Sender<ServerState>,
) -> Result<RunningServer, ServerError> {
    config.validate()?;
    let root = WatchedPath::new(&config.root)?;
    let registry = Arc::new(ClientRegistry::new(config.send_timeout()));

    let notify_server = NotificationServer::bind(&config.notify_addr(), registry.clone()).await?;
    let notify_addr = notify_server.local_addr()?;

    let asset_server = AssetServer::bind(
        &config.asset_addr(),
        AssetState::new(root.clone(), notify_addr.port()),
    )
    .await?;
    let asset_addr = asset_server.local_addr()?;

    // watcher 线程只负责转发，广播在 tokio 任务中完成
    let (change_tx, change_rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let detector = ChangeDetector::start(
        root,
        ChangeFilter::new(&config.extensions, config.debounce_window()),
        move |event| {
            if change_tx.send(event).is_err() {
                debug!("broadcast loop is closed, drop change event");
            }
        },
    )?;

    let broadcast_task = tokio::spawn(broadcast_changes(change_rx, registry.clone()));

    let (notify_shutdown, notify_signal) = oneshot::channel::<()>();
    let notify_task = tokio::spawn(notify_server.serve(async move {
        let _ = notify_signal.await;
    }));

    let (asset_shutdown, asset_signal) = oneshot::channel::<()>();
    let asset_task = tokio::spawn(asset_server.serve(async move {
        let _ = asset_signal.await;
    }));

    Ok(RunningServer {
        detector,
        registry,
        asset_addr,
        notify_addr,
        broadcast_task,
        notify_shutdown,
        notify_task,
        asset_shutdown,
        asset_task,
        state,
    })
}

async fn broadcast_changes(
    mut change_rx: mpsc::UnboundedReceiver<ChangeEvent>,
    registry: Arc<ClientRegistry>,
) {
    while let Some(event) = change_rx.recv().await {
        let report = registry.broadcast(RELOAD_MESSAGE).await;
        info!(
            "{} {} -> reload sent to {} clients, {} removed",
            event.kind,
            event.path.display(),
            report.delivered,
            report.removed
        );
    }
}

fn transition(state: &watch::Sender<ServerState>, next: ServerState) {
    state.send_replace(next);
    info!("server state: {}", next);
}

pub struct RunningServer {
    detector: ChangeDetector,
    registry: Arc<ClientRegistry>,
    asset_addr: SocketAddr,
    notify_addr: SocketAddr,
    broadcast_task: JoinHandle<()>,
    notify_shutdown: oneshot::Sender<()>,
    notify_task: JoinHandle<Result<(), ServerError>>,
    asset_shutdown: oneshot::Sender<()>,
    asset_task: JoinHandle<Result<(), ServerError>>,
    state: watch::Sender<ServerState>,
}

impl RunningServer {
    pub fn asset_addr(&self) -> SocketAddr {
        self.asset_addr
    }

    pub fn notify_addr(&self) -> SocketAddr {
        self.notify_addr
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Runs until `signal` resolves, then shuts down.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("shutdown requested");
        self.shutdown().await;
    }

    pub async fn shutdown(self) {
        let RunningServer {
            mut detector,
            registry,
            broadcast_task,
            notify_shutdown,
            notify_task,
            asset_shutdown,
            asset_task,
            state,
            ..
        } = self;

        transition(&state, ServerState::Stopping);

        detector.stop();
        broadcast_task.abort();

        // close_all 之后注册的连接会被立即关闭
        let _ = notify_shutdown.send(());
        let closed = registry.close_all();
        info!("closed {} live reload connections", closed);
        await_service("live reload server", notify_task).await;

        let _ = asset_shutdown.send(());
        await_service("asset server", asset_task).await;

        transition(&state, ServerState::Stopped);
    }
}

async fn await_service(name: &str, task: JoinHandle<Result<(), ServerError>>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
        Ok(Ok(Ok(()))) => debug!("{} exited", name),
        Ok(Ok(Err(e))) => warn!("{} exited with error: {}", name, e),
        Ok(Err(e)) => warn!("{} task failed: {}", name, e),
        Err(_) => warn!("{} did not stop within {:?}", name, SHUTDOWN_GRACE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral_config(root: &std::path::Path) -> ServeConfig {
        ServeConfig {
            root: root.to_path_buf(),
            port: 0,
            notify_port: 0,
            ..ServeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let server = DevServer::new(ephemeral_config(dir.path())).start().await.unwrap();
        let state = server.state();

        assert_eq!(*state.borrow(), ServerState::Running);
        assert_ne!(server.asset_addr().port(), 0);
        assert_ne!(server.notify_addr().port(), 0);

        server.shutdown().await;
        assert_eq!(*state.borrow(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_late_handshake_after_shutdown_is_not_retained() {
        let dir = tempfile::tempdir().unwrap();
        let server = DevServer::new(ephemeral_config(dir.path())).start().await.unwrap();
        let registry = server.registry();

        server.shutdown().await;

        let (tx, mut rx) = mpsc::channel::<String>(1);
        let id = registry.register(Arc::new(
            crate::interfaces::websocket::server::WebSocketChannel::new(tx),
        ));
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_missing_root_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = ephemeral_config(&dir.path().join("missing"));

        let result = DevServer::new(config).start().await;
        assert!(matches!(result, Err(ServerError::WatchRootUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_busy_notify_port_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServeConfig {
            notify_port: occupied.local_addr().unwrap().port(),
            ..ephemeral_config(dir.path())
        };

        let result = DevServer::new(config).start().await;
        assert!(matches!(result, Err(ServerError::PortBindError { .. })));
    }

    #[tokio::test]
    async fn test_busy_asset_port_releases_notify_port() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let notify_port = free.local_addr().unwrap().port();
        drop(free);

        let config = ServeConfig {
            port: occupied.local_addr().unwrap().port(),
            notify_port,
            ..ephemeral_config(dir.path())
        };

        let result = DevServer::new(config).start().await;
        assert!(matches!(result, Err(ServerError::PortBindError { .. })));
        assert!(std::net::TcpListener::bind(("127.0.0.1", notify_port)).is_ok());
    }
}
