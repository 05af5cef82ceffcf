//! Static file server for the watched root.
//!
//! Every response is uncacheable so a reload always fetches fresh content,
//! and HTML documents get the live reload listener injected.

use std::{future::Future, io::ErrorKind, net::SocketAddr, path::Path, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{
    domain::value_objects::watched_path::WatchedPath,
    interfaces::http::reload_script::{inject_reload_script, render_reload_script},
    shared::error::ServerError,
};

#[derive(Clone)]
pub struct AssetState {
    root: WatchedPath,
    reload_script: Arc<str>,
}

impl AssetState {
    pub fn new(root: WatchedPath, notify_port: u16) -> Self {
        Self {
            root,
            reload_script: render_reload_script(notify_port).into(),
        }
    }
}

pub struct AssetServer {
    listener: TcpListener,
    state: AssetState,
}

impl AssetServer {
    pub async fn bind(addr: &str, state: AssetState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::PortBindError {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(state: AssetState) -> Router {
        Router::new().fallback(handle_asset_request).with_state(state)
    }

    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!("serving {} at http://{}", self.state.root, addr);
        axum::serve(self.listener, Self::router(self.state))
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("asset server stopped");
        Ok(())
    }
}

async fn handle_asset_request(
    State(state): State<AssetState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return plain_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string());
    }

    let request_path = uri.path();
    let Some(mut file_path) = state.root.resolve_request(request_path) else {
        debug!("reject path outside root: {}", request_path);
        return not_found(request_path);
    };

    if file_path.is_dir() {
        if !request_path.ends_with('/') {
            return redirect_to_directory(&uri);
        }
        let index = file_path.join("index.html");
        if !index.is_file() {
            return directory_listing(&state, &file_path, request_path).await;
        }
        file_path = index;
    }

    let content = match tokio::fs::read(&file_path).await {
        Ok(content) => content,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
            return not_found(request_path);
        }
        Err(e) => {
            warn!("read file {} failed: {}", file_path.display(), e);
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read {}", request_path),
            );
        }
    };

    let content_type = determine_content_type(&file_path);
    let body = if content_type.starts_with("text/html") {
        inject_reload_script(&content, &state.reload_script)
    } else {
        content
    };
    debug!("GET {} -> {} ({} bytes)", request_path, file_path.display(), body.len());

    file_response(StatusCode::OK, content_type, Body::from(body))
}

/// `/docs` -> `/docs/` so relative links inside the directory resolve.
fn redirect_to_directory(uri: &Uri) -> Response {
    let location = match uri.query() {
        Some(query) => format!("{}/?{}", uri.path(), query),
        None => format!("{}/", uri.path()),
    };
    let mut response = file_response(
        StatusCode::MOVED_PERMANENTLY,
        "text/plain; charset=utf-8",
        Body::empty(),
    );
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => not_found(uri.path()),
    }
}

async fn directory_listing(state: &AssetState, dir: &Path, request_path: &str) -> Response {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("list directory {} failed: {}", dir.display(), e);
            return not_found(request_path);
        }
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort_by_key(|name| name.to_lowercase());

    let decoded = urlencoding::decode(request_path).unwrap_or_else(|_| request_path.into());
    let title = escape_html(&decoded);
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Directory listing for {title}</title>\n</head>\n<body>\n<h1>Directory listing for {title}</h1>\n<hr>\n<ul>\n"
    );
    for name in &names {
        let href = match name.strip_suffix('/') {
            Some(dir_name) => format!("{}/", urlencoding::encode(dir_name)),
            None => urlencoding::encode(name).into_owned(),
        };
        html.push_str(&format!("<li><a href=\"{}\">{}</a></li>\n", href, escape_html(name)));
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    debug!("GET {} -> listing of {} entries", request_path, names.len());

    let body = inject_reload_script(html.as_bytes(), &state.reload_script);
    file_response(StatusCode::OK, "text/html; charset=utf-8", Body::from(body))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn not_found(request_path: &str) -> Response {
    plain_response(
        StatusCode::NOT_FOUND,
        format!("File not found: {}", request_path),
    )
}

fn plain_response(status: StatusCode, message: String) -> Response {
    file_response(status, "text/plain; charset=utf-8", Body::from(message))
}

fn file_response(status: StatusCode, content_type: &str, body: Body) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response()
}

fn determine_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}
