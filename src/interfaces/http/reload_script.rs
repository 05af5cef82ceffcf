//! Browser-side listener injected into served HTML.

use crate::interfaces::websocket::server::LIVE_RELOAD_PATH;

const RELOAD_CLIENT_JS: &str = include_str!("../../../assets/reload-client.js");

pub const RECONNECT_DELAY_MS: u64 = 2000;

/// Renders the `<script>` block pointing at the notification port.
pub fn render_reload_script(notify_port: u16) -> String {
    let js = RELOAD_CLIENT_JS
        .replace("__LIVE_RELOAD_PORT__", &notify_port.to_string())
        .replace("__LIVE_RELOAD_PATH__", LIVE_RELOAD_PATH)
        .replace("__LIVE_RELOAD_RETRY_MS__", &RECONNECT_DELAY_MS.to_string());
    format!("<script>\n{}</script>\n", js)
}

/// Inserts `script` before the last `</body>`, or appends it when the
/// document has no closing body tag. The document bytes are kept as they are,
/// whatever their encoding.
pub fn inject_reload_script(html: &[u8], script: &str) -> Vec<u8> {
    const BODY_CLOSE: &[u8] = b"</body>";

    let mut result = Vec::with_capacity(html.len() + script.len());
    match html.windows(BODY_CLOSE.len()).rposition(|w| w == BODY_CLOSE) {
        Some(pos) => {
            result.extend_from_slice(&html[..pos]);
            result.extend_from_slice(script.as_bytes());
            result.extend_from_slice(&html[pos..]);
        }
        None => {
            result.extend_from_slice(html);
            result.extend_from_slice(script.as_bytes());
        }
    }
    result
}
