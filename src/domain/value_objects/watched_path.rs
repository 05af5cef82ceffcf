use std::{
    fmt::Display,
    path::{Component, Path, PathBuf},
};

use crate::shared::error::ServerError;

/// Canonical root directory that is both served and watched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedPath {
    inner: PathBuf,
}

impl WatchedPath {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let path: PathBuf = path.into();

        let canonical = path
            .canonicalize()
            .map_err(|e| ServerError::WatchRootUnavailable {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if !canonical.is_dir() {
            return Err(ServerError::WatchRootUnavailable {
                path,
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self { inner: canonical })
    }

    pub fn as_path(&self) -> &Path {
        &self.inner
    }

    /// Maps a URL path onto a location below the root.
    ///
    /// Each segment is percent-decoded before it is checked, so encoded
    /// `..` or separators cannot escape the root. Returns `None` for anything
    /// outside the root or for segments that are not valid UTF-8 once decoded.
    pub fn resolve_request(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.split(['?', '#']).next().unwrap_or_default();
        let mut resolved = self.inner.clone();

        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            let decoded = urlencoding::decode(segment).ok()?;
            for component in Path::new(decoded.as_ref()).components() {
                match component {
                    Component::Normal(part) => resolved.push(part),
                    Component::CurDir => {}
                    Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                        return None;
                    }
                }
            }
        }

        Some(resolved)
    }
}

impl Display for WatchedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.display())
    }
}
