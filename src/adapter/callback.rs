//! Context over the non-blocking callback engine.

use crate::adapter::{file_window, read_request, window_reader};
use crate::body::Body;
use crate::context::{default_charset, Action, Attributes, Context, RequestState};
use crate::engine::callback::{Exchange, ExchangeOwner, IoThread};
use crate::engine::multipart::{self, FormValue, PartConfig};
use crate::error::ServerResult;
use crate::executor::{same_executor, Executor, SameThreadExecutor};
use crate::http::{read_full, Status, CHUNKED, CONTENT_LENGTH, CONTENT_TYPE, RANGE, TRANSFER_ENCODING};
use crate::media::MediaType;
use crate::range::ByteRange;
use crate::router::{Route, Router};
use crate::sender::{CompleteListener, ContextSender, ResponseStream, Sender};
use crate::upload::FileUpload;
use crate::value::{Formdata, Headers, Multipart, QueryString};
use bytes::Bytes;
use log::{debug, trace};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

/// Context backed by an `Exchange`
pub struct CallbackContext {
    exchange: Exchange,
    state: RequestState,
}

impl CallbackContext {
    pub fn new(exchange: Exchange, router: Arc<Router>) -> Self {
        let worker: Arc<dyn Executor> = exchange.io_thread().clone();
        let state = RequestState::new(
            router,
            worker,
            exchange.request_method().as_str(),
            exchange.request_path(),
        );
        Self { exchange, state }
    }

    /// End the request because the engine saw the connection fail
    pub fn abort(mut self: Box<Self>, cause: io::Error) {
        self.destroy(Some(cause));
    }

    fn complete(mut self: Box<Self>, result: io::Result<()>) {
        self.destroy(result.err());
    }

    fn destroy(&mut self, cause: Option<io::Error>) {
        if !self.state.begin_release() {
            return;
        }
        self.state.log_failure(cause.as_ref());
        self.state.release_uploads();

        if let Err(err) = self.exchange.end_exchange(cause.is_some()) {
            debug!(target: self.state.router.log_target(), "end exchange failed {} {}: {}", self.state.method, self.state.path, err);
        }

        self.state.notify(cause.as_ref());
    }

    fn if_dispatch(&mut self) {
        if !self.exchange.is_dispatched() {
            trace!(target: self.state.router.log_target(), "dispatching exchange {} {}", self.state.method, self.state.path);
            self.exchange.dispatch();
        }
    }

    fn if_set_chunked(&mut self) {
        if self.exchange.response_content_length().is_none() {
            self.exchange.response_headers_mut().set(TRANSFER_ENCODING, CHUNKED);
        }
    }

    fn part_config(&self) -> PartConfig {
        let router = &self.state.router;
        PartConfig::new(router.tmpdir(), router.max_request_size(), router.buffer_size())
    }
}

/// Split parsed body entries into fields and uploads
fn form_entries(exchange: &mut Exchange, config: &PartConfig) -> ServerResult<(Vec<(String, String)>, Vec<FileUpload>)> {
    let mut fields = Vec::new();
    let mut files = Vec::new();
    if let Some(data) = exchange.form_data(config)? {
        for entry in data.iter().cloned() {
            match entry.value {
                FormValue::Field(value) => fields.push((entry.name, value)),
                FormValue::File(upload) => files.push(upload),
            }
        }
    }
    Ok((fields, files))
}

impl ExchangeOwner for CallbackContext {
    fn exchange(&mut self) -> &mut Exchange {
        &mut self.exchange
    }
}

impl Drop for CallbackContext {
    fn drop(&mut self) {
        self.destroy(None);
    }
}

/// Pumps a reader through the exchange one buffer at a time, each write
/// queued from the completion of the previous one
struct ChunkedStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl ChunkedStream {
    fn new(reader: Box<dyn Read + Send>, buffer_size: usize) -> Self {
        Self {
            reader,
            buffer: vec![0u8; buffer_size.max(1)],
        }
    }

    fn send(mut self, ctx: Box<CallbackContext>) {
        match read_full(&mut self.reader, &mut self.buffer) {
            Ok(0) => ctx.complete(Ok(())),
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&self.buffer[..n]);
                Exchange::send(ctx, chunk, move |ctx, result| match result {
                    Ok(()) => self.send(ctx),
                    Err(err) => ctx.complete(Err(err)),
                });
            }
            Err(err) => ctx.complete(Err(err)),
        }
    }
}

impl Context for CallbackContext {
    fn name(&self) -> &'static str {
        "callback"
    }

    fn router(&self) -> &Arc<Router> {
        &self.state.router
    }

    fn method(&self) -> String {
        self.state.method.clone()
    }

    fn path_string(&self) -> &str {
        &self.state.path
    }

    fn path_map(&self) -> &HashMap<String, String> {
        &self.state.path_map
    }

    fn set_path_map(&mut self, path_map: HashMap<String, String>) {
        self.state.path_map = path_map;
    }

    fn route(&self) -> Option<&Route> {
        self.state.route.as_ref()
    }

    fn set_route(&mut self, route: Route) {
        self.state.route = Some(route);
    }

    fn query(&mut self) -> &QueryString {
        let raw = Some(self.exchange.query_string()).filter(|query| !query.is_empty());
        self.state.query(raw)
    }

    fn headers(&mut self) -> &Headers {
        let exchange = &self.exchange;
        self.state.headers.get_or_init(|| {
            let mut headers = Headers::new();
            for (name, value) in exchange.request_headers() {
                headers.put(name, value);
            }
            headers
        })
    }

    fn form(&mut self) -> ServerResult<&Formdata> {
        if multipart::is_multipart(self.exchange.request_header(CONTENT_TYPE)) {
            return Ok(self.multipart()?.form());
        }
        let config = self.part_config();
        self.query();
        let exchange = &mut self.exchange;
        self.state.form_with(|| Ok(form_entries(exchange, &config)?.0))
    }

    fn multipart(&mut self) -> ServerResult<&Multipart> {
        let config = self.part_config();
        self.query();
        let exchange = &mut self.exchange;
        self.state.multipart_with(|| form_entries(exchange, &config))
    }

    fn body(&mut self) -> ServerResult<Body> {
        self.exchange.start_blocking();
        let limit = self.state.router.max_request_size();
        let length = self.exchange.request_content_length();
        let bytes = self.exchange.take_request_body().unwrap_or_default();
        Ok(Body::new(Box::new(Cursor::new(bytes)), length).limited(limit))
    }

    fn remote_address(&self) -> String {
        self.exchange
            .source_address()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    fn protocol(&self) -> String {
        self.exchange.protocol().to_string()
    }

    fn attributes(&self) -> &Attributes {
        &self.state.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.state.attributes
    }

    fn is_in_io_thread(&self) -> bool {
        self.exchange.is_in_io_thread()
    }

    fn is_async(&self) -> bool {
        self.exchange.is_dispatched()
    }

    fn dispatch_on(mut self: Box<Self>, executor: Arc<dyn Executor>, action: Action) {
        if same_executor(&self.state.worker, &executor) {
            action(self);
        } else {
            self.if_dispatch();
            trace!(target: self.state.router.log_target(), "dispatching {} {} to {}", self.state.method, self.state.path, executor.name());
            self.state.worker = executor.clone();
            executor.execute(Box::new(move || action(self)));
        }
    }

    fn detach(mut self: Box<Self>, action: Action) {
        self.if_dispatch();
        SameThreadExecutor.execute(Box::new(move || action(self)));
    }

    fn is_response_started(&self) -> bool {
        self.exchange.is_response_started()
    }

    fn on_complete(&mut self, listener: CompleteListener) {
        self.state.add_listener(listener);
    }

    fn status_code(&self) -> Status {
        self.exchange.status_code()
    }

    fn set_status_code(&mut self, status: Status) {
        self.exchange.set_status_code(status);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.exchange.response_headers_mut().set(name, value);
    }

    fn response_type(&self) -> MediaType {
        self.state.response_type.unwrap_or(MediaType::TEXT)
    }

    fn default_response_type(&mut self, media_type: MediaType) {
        if self.state.response_type.is_none() {
            let charset = default_charset(&self.state.router, media_type);
            self.set_response_type(media_type, charset.as_deref());
        }
    }

    fn set_response_type(&mut self, media_type: MediaType, charset: Option<&str>) {
        self.state.response_type = Some(media_type);
        self.exchange
            .response_headers_mut()
            .set(CONTENT_TYPE, &media_type.to_content_type_header(charset));
    }

    fn response_length(&self) -> Option<u64> {
        self.exchange.response_content_length()
    }

    fn set_response_length(&mut self, length: u64) {
        self.exchange.set_response_content_length(length);
    }

    fn response_stream(&mut self) -> ServerResult<Box<dyn Write + '_>> {
        self.exchange.start_blocking();
        self.if_set_chunked();
        Ok(Box::new(self.exchange.output_stream()))
    }

    fn response_sender(self: Box<Self>) -> Box<dyn Sender> {
        Box::new(ContextSender::new(self))
    }

    fn send_status_code(mut self: Box<Self>, status: Status) {
        self.exchange.response_headers_mut().remove(TRANSFER_ENCODING);
        self.exchange.set_response_content_length(0);
        self.exchange.set_status_code(status);
        self.destroy(None);
    }

    fn send_bytes(mut self: Box<Self>, data: Bytes) {
        self.exchange.response_headers_mut().remove(TRANSFER_ENCODING);
        self.exchange.set_response_content_length(data.len() as u64);
        Exchange::send(self, data, |ctx, result| ctx.complete(result));
    }

    fn send_stream(mut self: Box<Self>, stream: ResponseStream) {
        let reader = match stream {
            ResponseStream::File(file) => return self.send_file(file),
            ResponseStream::Reader(reader) => reader,
        };

        let reader = match self.exchange.response_content_length() {
            Some(length) if length > 0 => {
                let range = ByteRange::resolve(self.exchange.request_header(RANGE), length);
                range.apply(&mut *self);
                match window_reader(reader, &range) {
                    Ok(reader) => reader,
                    Err(err) => return self.complete(Err(err)),
                }
            }
            _ => {
                let headers = self.exchange.response_headers_mut();
                headers.remove(CONTENT_LENGTH);
                headers.set(TRANSFER_ENCODING, CHUNKED);
                reader
            }
        };

        let buffer_size = self.state.router.buffer_size();
        ChunkedStream::new(reader, buffer_size).send(self);
    }

    fn send_file(mut self: Box<Self>, file: File) {
        let length = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => return self.complete(Err(err)),
        };
        self.exchange.response_headers_mut().remove(TRANSFER_ENCODING);
        self.exchange.set_response_content_length(length);

        let range = ByteRange::resolve(self.exchange.request_header(RANGE), length);
        range.apply(&mut *self);
        let reader = match file_window(file, &range) {
            Ok(reader) => reader,
            Err(err) => return self.complete(Err(err)),
        };

        let buffer_size = self.state.router.buffer_size();
        ChunkedStream::new(reader, buffer_size).send(self);
    }
}

/// Serve one request from `stream` with the callback engine; the handler
/// starts on the I/O thread
pub fn serve_connection<H>(
    mut stream: TcpStream,
    router: Arc<Router>,
    io: Arc<IoThread>,
    handler: H,
) -> ServerResult<()>
where
    H: FnOnce(Box<dyn Context>) + Send + 'static,
{
    let head = read_request(&mut stream, &router)?;
    let source = stream.peer_addr().ok();
    let sink = stream.try_clone()?;

    let exchange = Exchange::from_head(head, source, Box::new(sink), io.clone());
    let ctx = Box::new(CallbackContext::new(exchange, router));
    io.execute(Box::new(move || handler(ctx)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::http::Method;
    use crossbeam::channel;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn context(target: &str, capture: &Capture) -> Box<CallbackContext> {
        let router = Arc::new(Router::with_worker(ServerConfig::new(), Arc::new(SameThreadExecutor)));
        let io = IoThread::start("callback-test-io").unwrap();
        let exchange = Exchange::new(Method::Get, target, Vec::new(), Vec::new(), Box::new(capture.clone()), io);
        Box::new(CallbackContext::new(exchange, router))
    }

    #[test]
    fn test_send_string_completes_on_io_thread() {
        let capture = Capture::default();
        let mut ctx = context("/hello", &capture);
        let (tx, rx) = channel::bounded(1);
        ctx.on_complete(Box::new(move |cause| {
            tx.send((cause.is_none(), IoThread::is_current())).unwrap();
        }));
        ctx.send_string("hello");

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (true, true));
        assert_eq!(
            String::from_utf8_lossy(&capture.0.lock()),
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"
        );
    }

    #[test]
    fn test_detach_marks_dispatched_and_runs_inline() {
        let capture = Capture::default();
        let ctx = context("/", &capture);
        let (tx, rx) = channel::bounded(1);
        let caller = std::thread::current().id();
        ctx.detach(Box::new(move |ctx| {
            tx.send((ctx.is_async(), std::thread::current().id() == caller)).unwrap();
        }));
        assert_eq!(rx.try_recv().unwrap(), (true, true));
    }

    #[test]
    fn test_absent_query_is_empty_singleton() {
        let capture = Capture::default();
        let mut ctx = context("/p", &capture);
        assert!(ctx.query().is_empty_query());
        assert_eq!(ctx.name(), "callback");
        assert!(!ctx.is_in_io_thread());
    }
}
