use std::time::Instant;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::{
    domain::{
        events::change_event::{ChangeEvent, ChangeKind},
        services::change_filter::ChangeFilter,
        value_objects::watched_path::WatchedPath,
    },
    shared::error::ServerError,
};

/// Recursive watcher over a [`WatchedPath`] that emits debounced [`ChangeEvent`]s.
///
/// The callback runs on the watcher's notification thread and must return
/// quickly; it delays delivery of every later file system event.
pub struct ChangeDetector {
    watcher: Option<RecommendedWatcher>,
    root: WatchedPath,
}

impl ChangeDetector {
    pub fn start<F>(
        root: WatchedPath,
        mut filter: ChangeFilter,
        mut on_change: F,
    ) -> Result<Self, ServerError>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let unavailable = |e: notify::Error| ServerError::WatchRootUnavailable {
            path: root.as_path().to_path_buf(),
            reason: e.to_string(),
        };

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("{}", ServerError::TransientWatchOverflow(e.to_string()));
                        return;
                    }
                };

                if event.need_rescan() {
                    warn!(
                        "{}",
                        ServerError::TransientWatchOverflow("watcher requested a rescan".to_string())
                    );
                    return;
                }

                let Some(kind) = ChangeKind::from_event_kind(&event.kind) else {
                    return;
                };

                for path in &event.paths {
                    match filter.accept(path, kind, path.is_dir(), Instant::now()) {
                        Some(change) => {
                            info!("file {}: {}", change.kind, change.path.display());
                            on_change(change);
                        }
                        None => debug!("ignore {:?} event: {}", event.kind, path.display()),
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(unavailable)?;

        watcher
            .watch(root.as_path(), RecursiveMode::Recursive)
            .map_err(unavailable)?;
        info!("watching {} for changes", root);

        Ok(Self {
            watcher: Some(watcher),
            root,
        })
    }

    /// Releases the OS watch. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(self.root.as_path()) {
                warn!("unwatch {} failed: {}", self.root, e);
            }
            info!("stopped watching {}", self.root);
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    use crate::domain::services::change_filter::DEFAULT_EXTENSIONS;

    #[test]
    fn test_detects_relevant_change() {
        let dir = tempfile::tempdir().unwrap();
        let root = WatchedPath::new(dir.path()).unwrap();
        let (tx, rx) = mpsc::channel();

        let _detector = ChangeDetector::start(
            root.clone(),
            ChangeFilter::new(DEFAULT_EXTENSIONS, Duration::from_millis(500)),
            move |event| {
                let _ = tx.send(event);
            },
        )
        .unwrap();

        std::fs::write(root.as_path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(root.as_path().join("style.css"), "body {}").unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.path, root.as_path().join("style.css"));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = WatchedPath::new(dir.path()).unwrap();

        let mut detector = ChangeDetector::start(root, ChangeFilter::default(), |_| {}).unwrap();
        assert!(detector.is_running());

        detector.stop();
        assert!(!detector.is_running());
        detector.stop();
        assert!(!detector.is_running());
    }

    #[test]
    fn test_no_events_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let root = WatchedPath::new(dir.path()).unwrap();
        let (tx, rx) = mpsc::channel();

        let mut detector = ChangeDetector::start(
            root.clone(),
            ChangeFilter::new(DEFAULT_EXTENSIONS, Duration::ZERO),
            move |event| {
                let _ = tx.send(event);
            },
        )
        .unwrap();
        detector.stop();

        std::fs::write(root.as_path().join("index.html"), "<p>late</p>").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
