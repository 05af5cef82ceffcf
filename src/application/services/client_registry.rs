//! Registry of connected live reload clients.
//!
//! A client is present exactly while its notification channel is open.
//! Broadcast sends to a snapshot of the membership so the lock is never held
//! across channel I/O.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::debug;

use crate::shared::error::ServerError;

pub const RELOAD_MESSAGE: &str = "reload";
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub type ClientId = u64;

/// Server-to-client message pathway for one browser tab.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), ServerError>;
}

struct Client {
    channel: Arc<dyn NotificationChannel>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
}

pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Client>>,
    next_id: AtomicU64,
    // 置位后不再接纳新连接，只在持有 clients 锁时读写
    closed: AtomicBool,
    send_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            send_timeout,
        }
    }

    /// Adds a client and returns its id.
    ///
    /// After [`close_all`](Self::close_all) the channel is dropped instead of
    /// stored, which closes the connection straight away.
    pub fn register(&self, channel: Arc<dyn NotificationChannel>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients();
        if self.closed.load(Ordering::Relaxed) {
            debug!("registry closed, reject client {}", id);
            return id;
        }
        clients.insert(id, Client { channel });
        debug!("registered client {}", id);
        id
    }

    /// Returns whether the client was still registered.
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients().remove(&id).is_some();
        if removed {
            debug!("unregistered client {}", id);
        }
        removed
    }

    /// Sends `message` to every client registered when the call begins.
    ///
    /// Each send is independent and bounded by the registry's send timeout.
    /// Clients whose send fails are removed; the failure is never returned.
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        let recipients: Vec<(ClientId, Arc<dyn NotificationChannel>)> = self
            .clients()
            .iter()
            .map(|(id, client)| (*id, client.channel.clone()))
            .collect();

        if recipients.is_empty() {
            return BroadcastReport::default();
        }

        let send_timeout = self.send_timeout;
        let sends = recipients.into_iter().map(|(id, channel)| async move {
            let result = match tokio::time::timeout(send_timeout, channel.send(message)).await {
                Ok(result) => result,
                Err(_) => Err(ServerError::ChannelSendFailure(format!(
                    "send timed out after {:?}",
                    send_timeout
                ))),
            };
            (id, result)
        });

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("drop client {}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let removed: Vec<Client> = {
                let mut clients = self.clients();
                failed.iter().filter_map(|id| clients.remove(id)).collect()
            };
            report.removed = removed.len();
        }

        report
    }

    /// Removes every client, returning how many were registered, and stops
    /// accepting new ones.
    ///
    /// Dropping a client's channel closes its connection.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(ClientId, Client)> = {
            let mut clients = self.clients();
            self.closed.store(true, Ordering::Relaxed);
            clients.drain().collect()
        };
        drained.len()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingChannel {
        received: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, message: &str) -> Result<(), ServerError> {
            self.received.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl NotificationChannel for BrokenChannel {
        async fn send(&self, _message: &str) -> Result<(), ServerError> {
            Err(ServerError::ChannelSendFailure("connection reset".to_string()))
        }
    }

    struct StalledChannel;

    #[async_trait]
    impl NotificationChannel for StalledChannel {
        async fn send(&self, _message: &str) -> Result<(), ServerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let registry = ClientRegistry::default();
        let channels: Vec<Arc<RecordingChannel>> =
            (0..5).map(|_| Arc::new(RecordingChannel::default())).collect();
        for channel in &channels {
            registry.register(channel.clone());
        }

        let report = registry.broadcast(RELOAD_MESSAGE).await;

        assert_eq!(report, BroadcastReport { delivered: 5, removed: 0 });
        for channel in &channels {
            assert_eq!(channel.received(), vec!["reload".to_string()]);
        }
        assert_eq!(registry.len(), 5);
    }

    #[tokio::test]
    async fn test_broken_client_is_removed_without_affecting_others() {
        let registry = ClientRegistry::default();
        let healthy: Vec<Arc<RecordingChannel>> =
            (0..3).map(|_| Arc::new(RecordingChannel::default())).collect();
        for channel in &healthy {
            registry.register(channel.clone());
        }
        let broken = registry.register(Arc::new(BrokenChannel));

        let report = registry.broadcast(RELOAD_MESSAGE).await;

        assert_eq!(report, BroadcastReport { delivered: 3, removed: 1 });
        assert!(!registry.contains(broken));
        assert_eq!(registry.len(), 3);
        for channel in &healthy {
            assert_eq!(channel.received(), vec!["reload".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_stalled_client_times_out() {
        let registry = ClientRegistry::new(Duration::from_millis(50));
        let healthy = Arc::new(RecordingChannel::default());
        let healthy_id = registry.register(healthy.clone());
        let stalled_id = registry.register(Arc::new(StalledChannel));

        let report = tokio::time::timeout(Duration::from_secs(2), registry.broadcast("reload"))
            .await
            .expect("broadcast must not wait on a stalled client");

        assert_eq!(report, BroadcastReport { delivered: 1, removed: 1 });
        assert!(registry.contains(healthy_id));
        assert!(!registry.contains(stalled_id));
        assert_eq!(healthy.received(), vec!["reload".to_string()]);
    }

    #[tokio::test]
    async fn test_late_client_misses_earlier_broadcast() {
        let registry = ClientRegistry::default();
        let early = Arc::new(RecordingChannel::default());
        registry.register(early.clone());

        registry.broadcast("first").await;
        let late = Arc::new(RecordingChannel::default());
        registry.register(late.clone());
        registry.broadcast("second").await;

        assert_eq!(early.received(), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(late.received(), vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_without_clients() {
        let registry = ClientRegistry::default();
        assert_eq!(registry.broadcast(RELOAD_MESSAGE).await, BroadcastReport::default());
    }

    #[test]
    fn test_unregister_absent_client_is_noop() {
        let registry = ClientRegistry::default();
        let id = registry.register(Arc::new(RecordingChannel::default()));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(!registry.unregister(9999));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ClientRegistry::default();
        let first = registry.register(Arc::new(RecordingChannel::default()));
        let second = registry.register(Arc::new(RecordingChannel::default()));
        registry.unregister(first);
        let third = registry.register(Arc::new(RecordingChannel::default()));

        assert!(first < second && second < third);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_close_all_drains_registry() {
        let registry = ClientRegistry::default();
        for _ in 0..4 {
            registry.register(Arc::new(RecordingChannel::default()));
        }

        assert_eq!(registry.close_all(), 4);
        assert!(registry.is_empty());
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_register_after_close_all_drops_channel() {
        let registry = ClientRegistry::default();
        registry.register(Arc::new(RecordingChannel::default()));
        registry.close_all();

        let late = Arc::new(RecordingChannel::default());
        let id = registry.register(late.clone());

        assert!(!registry.contains(id));
        assert!(registry.is_empty());
        assert_eq!(Arc::strong_count(&late), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_and_broadcast() {
        let registry = Arc::new(ClientRegistry::default());

        let broadcaster = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    registry.broadcast(RELOAD_MESSAGE).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut kept = Vec::new();
                    for i in 0..50 {
                        let id = registry.register(Arc::new(RecordingChannel::default()));
                        if i % 2 == 0 {
                            assert!(registry.unregister(id));
                        } else {
                            kept.push(id);
                        }
                        tokio::task::yield_now().await;
                    }
                    kept
                })
            })
            .collect();

        let mut kept = Vec::new();
        for worker in workers {
            kept.extend(worker.await.unwrap());
        }
        broadcaster.await.unwrap();

        assert_eq!(registry.len(), 8 * 25);
        kept.sort_unstable();
        kept.dedup();
        assert_eq!(kept.len(), 8 * 25);
        assert!(kept.iter().all(|id| registry.contains(*id)));
    }
}
