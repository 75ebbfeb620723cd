mod common;

use common::router;
use crossbeam::channel;
use engine_context::adapter::{callback, stream};
use engine_context::engine::callback::IoThread;
use engine_context::{Context, MediaType, ServerError, Status};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Send `request` to `addr` and read until the server closes the connection
fn exchange(addr: std::net::SocketAddr, request: &str) -> String {
    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(request.as_bytes()).unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn greet(mut ctx: Box<dyn Context>) {
    let name = ctx.query().get("name").unwrap_or("nobody").to_string();
    let agent = ctx.header("user-agent").unwrap_or_default();
    ctx.default_response_type(MediaType::TEXT);
    ctx.send_string(&format!("hello {} from {}", name, agent));
}

const GREETING: &str = "GET /hi?name=ada HTTP/1.1\r\nHost: localhost\r\nUser-Agent: agent\r\n\r\n";

#[test]
fn test_stream_engine_serves_request() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        stream::serve_connection(conn, router, greet).unwrap();
    });

    let response = exchange(addr, GREETING);
    server.join().unwrap();
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain;charset=UTF-8\r\nContent-Length: 20\r\n\r\nhello ada from agent"
    );
}

#[test]
fn test_callback_engine_serves_request() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let io = IoThread::start("server-io").unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = channel::bounded(1);

    let server = thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        callback::serve_connection(conn, router, io, move |ctx| {
            tx.send(ctx.is_in_io_thread()).unwrap();
            // Blocking work belongs on the worker
            ctx.dispatch(Box::new(|ctx| {
                assert!(!ctx.is_in_io_thread());
                greet(ctx);
            }));
        })
        .unwrap();
    });

    let response = exchange(addr, GREETING);
    server.join().unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain;charset=UTF-8\r\nContent-Length: 20\r\n\r\nhello ada from agent"
    );
}

#[test]
fn test_form_post_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        stream::serve_connection(conn, router, |mut ctx| {
            assert_eq!(ctx.remote_address(), "127.0.0.1");
            assert_eq!(ctx.protocol(), "HTTP/1.1");
            let total: u32 = ctx
                .form()
                .unwrap()
                .get_all("n")
                .iter()
                .map(|n| n.parse::<u32>().unwrap())
                .sum();
            ctx.set_status_code(Status::Accepted);
            ctx.send_string(&total.to_string());
        })
        .unwrap();
    });

    let body = "n=1&n=2&n=39";
    let request = format!(
        "POST /sum HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = exchange(addr, &request);
    server.join().unwrap();
    assert_eq!(response, "HTTP/1.1 202 Accepted\r\nContent-Length: 2\r\n\r\n42");
}

#[test]
fn test_malformed_request_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        let result = stream::serve_connection(conn, router, |_ctx| panic!("handler must not run"));
        assert!(matches!(result, Err(ServerError::HttpParse(_))));
    });

    let response = exchange(addr, "NOT A REQUEST\r\n\r\n");
    server.join().unwrap();
    assert_eq!(response, "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
}
