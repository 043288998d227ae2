//! Live reload in front of an external backend.
//!
//! Every request that is not the live reload endpoint is forwarded to the
//! upstream. HTML responses pass through the same injection middleware as the
//! standalone server. WebSocket upgrades are relayed over a dedicated HTTP/1
//! connection and both upgraded streams are spliced, so backend hot-reload
//! channels keep working.

use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{FromRef, Request, State},
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodRouter, any, get},
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};
use url::Url;

use crate::server::{LIVERELOAD_PATH, ServerState, inject_livereload, livereload_handler};

/// Largest request body forwarded upstream.
const MAX_REQUEST_BYTES: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Proxy errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The target is not a usable URL.
    #[error("invalid proxy target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Nothing accepted a connection at the target.
    #[error("upstream {target} is unreachable: {reason}")]
    UpstreamUnreachable { target: String, reason: String },

    /// HTTP client setup failed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parsed proxy target.
#[derive(Debug, Clone)]
pub struct Upstream {
    url: Url,
    authority: String,
}

impl Upstream {
    /// Parse an `http://host[:port]/` target.
    pub fn parse(target: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidTarget {
            target: target.to_string(),
            reason,
        };
        let url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;
        let authority = format!("{host}:{port}");
        Ok(Self { url, authority })
    }

    /// `host:port` of the upstream.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute upstream URL for a request path and query.
    pub fn join(&self, path_and_query: &str) -> String {
        let base = self.url.as_str().trim_end_matches('/');
        format!("{base}{path_and_query}")
    }
}

/// Fail with [`ProxyError::UpstreamUnreachable`] unless the upstream accepts a
/// TCP connection within `timeout`.
pub async fn check_upstream(upstream: &Upstream, timeout: Duration) -> Result<(), ProxyError> {
    let unreachable = |reason: String| ProxyError::UpstreamUnreachable {
        target: upstream.url.to_string(),
        reason,
    };
    match tokio::time::timeout(timeout, TcpStream::connect(upstream.authority())).await {
        Ok(Ok(_)) => {
            debug!(upstream = %upstream.authority, "upstream reachable");
            Ok(())
        }
        Ok(Err(e)) => Err(unreachable(e.to_string())),
        Err(_) => Err(unreachable(format!("no answer within {}ms", timeout.as_millis()))),
    }
}

/// Shared state of the proxy router.
#[derive(Clone)]
pub struct ProxyState {
    /// Live reload broadcaster.
    pub reload: Arc<ServerState>,
    client: reqwest::Client,
    upstream: Arc<Upstream>,
    websockets: bool,
}

impl ProxyState {
    pub fn new(
        reload: Arc<ServerState>,
        upstream: Upstream,
        websockets: bool,
    ) -> Result<Self, ProxyError> {
        // Redirects are the browser's business.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            reload,
            client,
            upstream: Arc::new(upstream),
            websockets,
        })
    }
}

impl FromRef<ProxyState> for Arc<ServerState> {
    fn from_ref(state: &ProxyState) -> Self {
        Arc::clone(&state.reload)
    }
}

/// Create the proxy router.
///
/// With `static_dir`, files present there are served locally and only
/// misses go upstream.
pub fn create_proxy_router(state: ProxyState, static_dir: Option<&Path>) -> Router {
    let router = Router::new().route(LIVERELOAD_PATH, get(livereload_handler));
    let router = match static_dir {
        Some(dir) => {
            let forward: MethodRouter = any(forward_handler).with_state(state.clone());
            router.fallback_service(
                ServeDir::new(dir)
                    .call_fallback_on_method_not_allowed(true)
                    .fallback(forward),
            )
        }
        None => router.fallback(forward_handler),
    };
    router
        .layer(middleware::from_fn(inject_livereload))
        .with_state(state)
}

async fn forward_handler(State(state): State<ProxyState>, request: Request) -> Response {
    if state.websockets && is_upgrade(request.headers()) {
        return tunnel(state, request).await;
    }
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "proxy request failed");
            (StatusCode::BAD_GATEWAY, format!("assetflow proxy: {e}")).into_response()
        }
    }
}

async fn forward(state: &ProxyState, request: Request) -> Result<Response, reqwest::Error> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = state.upstream.join(path_and_query);

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return Ok((StatusCode::BAD_REQUEST, "unreadable request body").into_response());
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    // Plain bodies keep HTML injectable.
    headers.remove(header::ACCEPT_ENCODING);

    debug!(method = %parts.method, %url, "forwarding");
    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are connection-scoped too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Relay an upgrade handshake upstream and splice both connections.
async fn tunnel(state: ProxyState, mut request: Request) -> Response {
    let client_upgrade = hyper::upgrade::on(&mut request);
    let authority = state.upstream.authority();

    let stream = match TcpStream::connect(authority).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "upgrade connect failed");
            return (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response();
        }
    };
    let (mut sender, connection) = match http1::handshake(TokioIo::new(stream)).await {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "upgrade handshake failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            debug!(error = %e, "upstream connection closed");
        }
    });

    let (mut parts, _) = request.into_parts();
    if let Some(path_and_query) = parts.uri.path_and_query().cloned() {
        parts.uri = path_and_query.into();
    }
    match HeaderValue::from_str(authority) {
        Ok(host) => {
            parts.headers.insert(header::HOST, host);
        }
        Err(e) => {
            warn!(error = %e, "invalid upstream authority");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    }

    let mut response = match sender
        .send_request(Request::from_parts(parts, Body::empty()))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "invalid upgrade response");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!(status = %response.status(), "upstream declined upgrade");
        strip_hop_by_hop(response.headers_mut());
        return response.map(Body::new);
    }

    let upstream_upgrade = hyper::upgrade::on(&mut response);
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "upgrade failed");
                return;
            }
        };
        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((sent, received)) => debug!(sent, received, "tunnel closed"),
            Err(e) => debug!(error = %e, "tunnel aborted"),
        }
    });

    info!("websocket tunnel established");
    let (parts, _) = response.into_parts();
    Response::from_parts(parts, Body::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_parse() {
        let upstream = Upstream::parse("http://localhost:3333/").unwrap();
        assert_eq!(upstream.authority(), "localhost:3333");
        assert_eq!(upstream.join("/api/users?page=2"), "http://localhost:3333/api/users?page=2");

        let default_port = Upstream::parse("http://backend.test").unwrap();
        assert_eq!(default_port.authority(), "backend.test:80");

        assert!(matches!(
            Upstream::parse("not a url"),
            Err(ProxyError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(!is_upgrade(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade(&headers));
    }
}
