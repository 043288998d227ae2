//! Proxy mode against real local upstreams.

use std::{fs, sync::Arc, time::Duration};

use assetflow::{
    Command, Config, cmd,
    proxy::{ProxyError, ProxyState, Upstream, check_upstream, create_proxy_router},
    server::{LIVERELOAD_PATH, ServerState},
};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Html,
    routing::get,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tower::ServiceExt;

/// A port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/", get(|| async { Html("<html><body><h1>backend</h1></body></html>") }))
        .route(
            "/api/status",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], r#"{"ok":true}"#) }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

/// Read an HTTP head, up to and including the blank line.
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// A raw upstream that accepts one upgrade and echoes everything after it.
async fn spawn_echo_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await.to_ascii_lowercase();
        assert!(head.starts_with("get /socket?room=1 http/1.1"));
        assert!(head.contains("upgrade: websocket"));
        socket
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            socket.write_all(&buf[..n]).await.unwrap();
        }
    });
    format!("http://{addr}/")
}

/// A raw upstream that refuses every upgrade.
async fn spawn_refusing_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 426 Upgrade Required\r\nContent-Type: text/plain\r\nContent-Length: 6\r\n\r\ndenied")
            .await
            .unwrap();
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
    });
    format!("http://{addr}/")
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_unreachable_upstream_is_reported() {
    let port = closed_port().await;
    let upstream = Upstream::parse(&format!("http://127.0.0.1:{port}/")).unwrap();

    let err = check_upstream(&upstream, Duration::from_millis(500))
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::UpstreamUnreachable { .. }));
}

#[tokio::test]
async fn test_dev_proxy_fails_before_building() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("assets/img")).unwrap();
    fs::write(root.path().join("assets/img/logo.webp"), b"RIFF").unwrap();

    let mut config = Config::default();
    config.paths.root = root.path().to_path_buf();
    config.proxy.target = format!("http://127.0.0.1:{}/", closed_port().await);
    config.proxy.connect_timeout_ms = 500;

    let err = cmd::run(&config, Command::DevProxy).await.unwrap_err();

    assert!(err.downcast_ref::<ProxyError>().is_some());
    assert!(!root.path().join("public").exists());
}

#[tokio::test]
async fn test_html_is_injected_and_other_content_passes_through() {
    let target = spawn_backend().await;
    let state = ProxyState::new(
        Arc::new(ServerState::new()),
        Upstream::parse(&target).unwrap(),
        true,
    )
    .unwrap();
    let router = create_proxy_router(state, None);

    let page = router
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    let html = body_string(page).await;
    assert!(html.contains("<h1>backend</h1>"));
    assert!(html.contains(LIVERELOAD_PATH));

    let json = router
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_string(json).await, r#"{"ok":true}"#);
}

#[tokio::test]
async fn test_serve_static_prefers_local_files() {
    let target = spawn_backend().await;
    let public = TempDir::new().unwrap();
    fs::create_dir_all(public.path().join("css")).unwrap();
    fs::write(public.path().join("css/main.css"), "body{}").unwrap();

    let state = ProxyState::new(
        Arc::new(ServerState::new()),
        Upstream::parse(&target).unwrap(),
        true,
    )
    .unwrap();
    let router = create_proxy_router(state, Some(public.path()));

    let css = router
        .clone()
        .oneshot(Request::get("/css/main.css").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_string(css).await, "body{}");

    let api = router
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_string(api).await, r#"{"ok":true}"#);
}

#[tokio::test]
async fn test_websocket_upgrade_is_tunnelled_both_ways() {
    let target = spawn_echo_upstream().await;
    let state = ProxyState::new(
        Arc::new(ServerState::new()),
        Upstream::parse(&target).unwrap(),
        true,
    )
    .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_proxy_router(state, None))
            .await
            .unwrap();
    });

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(
            b"GET /socket?room=1 HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
        )
        .await
        .unwrap();

    let head = tokio::time::timeout(Duration::from_secs(5), read_head(&mut client))
        .await
        .unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {head}");

    for message in [&b"ping"[..], &b"second frame"[..]] {
        client.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, message);
    }
}

#[tokio::test]
async fn test_declined_upgrade_passes_upstream_response_through() {
    let target = spawn_refusing_upstream().await;
    let state = ProxyState::new(
        Arc::new(ServerState::new()),
        Upstream::parse(&target).unwrap(),
        true,
    )
    .unwrap();
    let router = create_proxy_router(state, None);

    let response = router
        .oneshot(
            Request::get("/socket")
                .header(header::CONNECTION, "Upgrade")
                .header(header::UPGRADE, "websocket")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    assert_eq!(body_string(response).await, "denied");
}
