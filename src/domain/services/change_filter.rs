//! Relevance filtering and debouncing of raw file system notifications.
//!
//! The debounce window is global to one filter: a burst touching many files
//! yields at most one accepted event per window.

use std::{
    collections::HashSet,
    path::Path,
    time::{Duration, Instant},
};

use crate::domain::events::change_event::{ChangeEvent, ChangeKind};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["html", "js", "css"];

/// Timestamp of the last accepted event.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebounceState {
    last_accepted: Option<Instant>,
}

impl DebounceState {
    /// Accepts when at least `window` has passed since the last accepted
    /// event, recording `now` as the new reference point.
    pub fn try_accept(&mut self, now: Instant, window: Duration) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    #[cfg(test)]
    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

#[derive(Debug, Clone)]
pub struct ChangeFilter {
    extensions: HashSet<String>,
    window: Duration,
    state: DebounceState,
}

impl ChangeFilter {
    /// Extensions are matched case-insensitively, with or without a leading dot.
    pub fn new<I, S>(extensions: I, window: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            extensions,
            window,
            state: DebounceState::default(),
        }
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }

    /// Runs one notification through the directory filter, the extension
    /// filter and the debounce window, in that order.
    pub fn accept(
        &mut self,
        path: &Path,
        kind: ChangeKind,
        is_dir: bool,
        now: Instant,
    ) -> Option<ChangeEvent> {
        if is_dir || !self.is_relevant(path) {
            return None;
        }

        if !self.state.try_accept(now, self.window) {
            return None;
        }

        Some(ChangeEvent::new(path.to_path_buf(), kind))
    }
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS, DEFAULT_DEBOUNCE)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}
