//! Server lifecycle state-machine tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use plinth::{
    Error, Request, Response, Route, RouteTable, Server, ServerConfig, ServerStatus,
    ServiceFactory,
};

fn test_server() -> Server {
    test_server_with(ServerConfig::builder().address("127.0.0.1:0").build().unwrap())
}

fn test_server_with(config: ServerConfig) -> Server {
    let service = ServiceFactory::new().make(RouteTable::new()).unwrap();
    Server::new(service, config)
}

/// Polls `cond` for up to two seconds.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn start_reaches_running_and_stop_reaches_stopped() {
    let server = test_server();
    assert!(server.is_stopped());
    assert!(!server.is_running());

    server.start_http().unwrap();
    assert!(eventually(|| server.is_running()).await, "server never reached Running");

    server.stop().await.unwrap();
    assert!(eventually(|| server.is_stopped()).await, "server never reached Stopped");
}

#[tokio::test]
async fn second_start_is_rejected_and_does_not_disturb_the_first() {
    let server = test_server();
    server.start_http().unwrap();

    // Whether the first start is still Starting or already Running, the
    // second must fail.
    let err = server.start_http().unwrap_err();
    assert!(matches!(err, Error::AlreadyActive(_)));

    assert!(eventually(|| server.is_running()).await);
    let err = server.start_http().unwrap_err();
    assert!(matches!(err, Error::AlreadyActive(_)));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn stop_when_stopped_is_rejected() {
    let server = test_server();
    let err = server.stop().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyStopped(_)));
}

#[tokio::test]
async fn https_without_tls_material_is_rejected() {
    let server = test_server();
    let err = server.start_https().unwrap_err();
    assert!(matches!(err, Error::TlsNotConfigured));
    assert!(server.is_stopped());
}

#[tokio::test]
async fn listener_observes_every_transition_in_order() {
    let seen: Arc<Mutex<Vec<(ServerStatus, ServerStatus)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);

    let config = ServerConfig::builder()
        .address("127.0.0.1:0")
        .status_listener(move |old, new| recorder.lock().unwrap().push((old, new)))
        .build()
        .unwrap();
    let server = test_server_with(config);

    server.start_http().unwrap();
    assert!(eventually(|| server.is_running()).await);
    server.stop().await.unwrap();
    assert!(eventually(|| server.is_stopped()).await);

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (ServerStatus::Stopped, ServerStatus::Starting),
            (ServerStatus::Starting, ServerStatus::Running),
            (ServerStatus::Running, ServerStatus::Stopped),
        ]
    );
}

#[tokio::test]
async fn stop_while_starting_still_terminates_in_stopped() {
    let server = test_server();
    server.start_http().unwrap();

    // No wait for Running: the stop may race the listener bind.
    server.stop().await.unwrap();
    assert!(eventually(|| server.is_stopped()).await, "server never settled in Stopped");
}

#[tokio::test]
async fn stop_waits_for_in_flight_requests_to_drain() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let slow = |_req: Request| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Response::text("done")
    };
    let mut table = RouteTable::new();
    table.insert("test".to_owned(), vec![Route::new("Slow", "slow", slow)]);

    let server = Server::new(
        ServiceFactory::new().make(table).unwrap(),
        ServerConfig::builder().address("127.0.0.1:0").build().unwrap(),
    );
    server.start_http().unwrap();
    assert!(eventually(|| server.is_running()).await);
    let addr = server.bound_addr().expect("bound address");

    let request = tokio::spawn(async move {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /test/slow HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        raw
    });
    // Let the request reach the handler before stopping.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let begin = std::time::Instant::now();
    server.stop().await.unwrap();

    assert!(server.is_stopped(), "stop returned before the accept loop exited");
    assert!(
        begin.elapsed() >= Duration::from_millis(100),
        "stop returned without draining the in-flight request"
    );

    let raw = request.await.unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200"), "unexpected response: {text}");
    assert!(text.ends_with("done"), "in-flight response was cut short: {text}");
}

#[tokio::test]
async fn server_can_be_restarted_after_a_full_cycle() {
    let server = test_server();

    for _ in 0..2 {
        server.start_http().unwrap();
        assert!(eventually(|| server.is_running()).await);
        server.stop().await.unwrap();
        assert!(eventually(|| server.is_stopped()).await);
    }
}

#[tokio::test]
async fn bound_addr_is_visible_while_running() {
    let server = test_server();
    assert!(server.bound_addr().is_none());

    server.start_http().unwrap();
    assert!(eventually(|| server.is_running()).await);
    let addr = server.bound_addr().expect("bound address while running");
    assert_ne!(addr.port(), 0);

    server.stop().await.unwrap();
    assert!(eventually(|| server.is_stopped()).await);
    assert!(server.bound_addr().is_none());
}

#[tokio::test]
async fn endpoint_reports_the_configured_address() {
    let config = ServerConfig::builder().address("127.0.0.1:14002").build().unwrap();
    let server = test_server_with(config);
    assert_eq!(server.endpoint(), "http://127.0.0.1:14002");
}
