//! Embedded development server with live reload support

use std::{path::Path, sync::Arc, time::Duration};

use assetflow_pipeline::ReloadKind;
use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tower_http::services::ServeDir;
use tracing::{debug, warn};

/// Path of the Server-Sent Events endpoint.
pub const LIVERELOAD_PATH: &str = "/__livereload";

/// Largest HTML body that gets the reload script injected.
const MAX_INJECT_BYTES: usize = 16 * 1024 * 1024;

/// Live reload message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMessage {
    /// Full page reload.
    Reload,
    /// CSS-only reload (hot reload).
    CssReload,
}

/// Server state containing the reload broadcaster.
#[derive(Clone)]
pub struct ServerState {
    /// Broadcast channel for live reload events.
    pub reload_tx: broadcast::Sender<ReloadMessage>,
}

impl ServerState {
    /// Create a new server state.
    pub fn new() -> Self {
        let (reload_tx, _) = broadcast::channel(16);
        Self { reload_tx }
    }

    /// Broadcast the message matching `kind` to every connected client.
    pub fn notify(&self, kind: ReloadKind) {
        let message = match kind {
            ReloadKind::Full => ReloadMessage::Reload,
            ReloadKind::Css => ReloadMessage::CssReload,
            ReloadKind::None => return,
        };
        // No receivers just means no browser is connected yet.
        let clients = self.reload_tx.send(message).unwrap_or(0);
        debug!(?message, clients, "broadcast reload");
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the development server router.
pub fn create_router(output_dir: &Path, state: Arc<ServerState>) -> Router {
    Router::new()
        .route(LIVERELOAD_PATH, get(livereload_handler))
        .fallback_service(ServeDir::new(output_dir))
        .layer(middleware::from_fn(inject_livereload))
        .with_state(state)
}

/// Server-Sent Events handler for live reload.
pub async fn livereload_handler(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.reload_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        match msg {
            Ok(ReloadMessage::Reload) => Some(Ok(Event::default().data("reload"))),
            Ok(ReloadMessage::CssReload) => Some(Ok(Event::default().data("css-reload"))),
            Err(_) => None, // Ignore lagged messages
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}

/// Response middleware adding [`LIVERELOAD_SCRIPT`] to successful HTML
/// responses. Files on disk are never touched.
pub async fn inject_livereload(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));
    let encoded = response.headers().contains_key(header::CONTENT_ENCODING);
    if !is_html || encoded || !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer HTML response");
            return (StatusCode::BAD_GATEWAY, "failed to read response body").into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Insert the reload script before the last `</body>`, or append it.
pub fn inject_script(html: &str) -> String {
    if html.contains(LIVERELOAD_PATH) {
        return html.to_string();
    }
    match html.rfind("</body>") {
        Some(idx) => format!("{}{LIVERELOAD_SCRIPT}{}", &html[..idx], &html[idx..]),
        None => format!("{html}{LIVERELOAD_SCRIPT}"),
    }
}

/// JavaScript snippet to inject for live reload.
pub const LIVERELOAD_SCRIPT: &str = r#"
<script>
(function() {
    const source = new EventSource('/__livereload');
    source.onmessage = function(event) {
        if (event.data === 'reload') {
            window.location.reload();
        } else if (event.data === 'css-reload') {
            document.querySelectorAll('link[rel="stylesheet"]').forEach(function(link) {
                const href = link.href.split('?')[0];
                link.href = href + '?v=' + Date.now();
            });
        }
    };
    source.onerror = function() {
        console.log('[livereload] Connection lost, retrying...');
    };
})();
</script>
"#;
