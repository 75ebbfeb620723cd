#![allow(dead_code)]

use crossbeam::channel;
use engine_context::adapter::callback::CallbackContext;
use engine_context::adapter::stream::StreamContext;
use engine_context::engine::callback::{Exchange, IoThread};
use engine_context::engine::stream::{StreamRequest, StreamResponse};
use engine_context::{Context, Method, Router, ServerConfig, WorkerPool};
use parking_lot::Mutex;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// In-memory connection that captures everything written to it
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connection whose peer has gone away
pub struct BrokenSink;

impl Write for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A request both engines can be fed with
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub method: Method,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestRequest {
    pub fn get(target: &str) -> Self {
        Self {
            method: Method::Get,
            target: target.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn post(target: &str, content_type: &str, body: &[u8]) -> Self {
        Self {
            method: Method::Post,
            target: target.to_string(),
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            body: body.to_vec(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub fn router(dir: &Path) -> Arc<Router> {
    router_with(ServerConfig::new().with_tmpdir(dir))
}

pub fn router_with(config: ServerConfig) -> Arc<Router> {
    let config = config.with_worker_threads(2);
    Arc::new(Router::new(config).unwrap())
}

pub fn stream_context<W>(request: &TestRequest, router: &Arc<Router>, sink: W) -> Box<dyn Context>
where
    W: Write + Send + 'static,
{
    let native = StreamRequest::new(
        request.method,
        &request.target,
        request.headers.clone(),
        Box::new(Cursor::new(request.body.clone())),
    );
    let response = StreamResponse::new(Box::new(sink));
    Box::new(StreamContext::new(native, response, router.clone()))
}

pub fn callback_context<W>(request: &TestRequest, router: &Arc<Router>, io: &Arc<IoThread>, sink: W) -> Box<dyn Context>
where
    W: Write + Send + 'static,
{
    let exchange = Exchange::new(
        request.method,
        &request.target,
        request.headers.clone(),
        request.body.clone(),
        Box::new(sink),
        io.clone(),
    );
    Box::new(CallbackContext::new(exchange, router.clone()))
}

/// Run `handler` and wait for the request to reach its end.
///
/// Returns the failure the request ended with, if any.
pub fn run<F>(mut ctx: Box<dyn Context>, handler: F) -> Option<io::ErrorKind>
where
    F: FnOnce(Box<dyn Context>),
{
    let (tx, rx) = channel::bounded(1);
    ctx.on_complete(Box::new(move |cause| {
        let _ = tx.send(cause.map(|err| err.kind()));
    }));
    handler(ctx);
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

/// Wire output of `handler` on each engine, stream engine first
pub fn on_both_engines<F>(request: &TestRequest, router: &Arc<Router>, handler: F) -> (String, String)
where
    F: Fn(Box<dyn Context>),
{
    let stream_sink = SharedSink::new();
    let failure = run(stream_context(request, router, stream_sink.clone()), &handler);
    assert_eq!(failure, None);

    let io = IoThread::start("test-io").unwrap();
    let callback_sink = SharedSink::new();
    let failure = run(callback_context(request, router, &io, callback_sink.clone()), &handler);
    assert_eq!(failure, None);

    (stream_sink.text(), callback_sink.text())
}

/// Spare executor for dispatch tests
pub fn other_pool() -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new("other", 1).unwrap())
}

/// A multipart body with one text field and one file
pub fn multipart_body(boundary: &str, field: (&str, &str), file: (&str, &str, &[u8])) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field.0).as_bytes());
    body.extend_from_slice(field.1.as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            file.0, file.1
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(file.2);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
