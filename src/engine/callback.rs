//! Non-blocking engine driven by an I/O thread.
//!
//! Writes are queued on the I/O thread and report back through callbacks;
//! the exchange can be switched to blocking mode for stream-style output.

use crate::body::Body;
use crate::engine::multipart::{self, FormEntry, PartConfig};
use crate::error::{ServerError, ServerResult};
use crate::executor::{Executor, Task};
use crate::http::{
    write_chunk, write_last_chunk, HeaderList, Method, RequestHead, ResponseHead, Status, CONTENT_LENGTH, CONTENT_TYPE,
};
use bytes::Bytes;
use crossbeam::channel::{self, Sender};
use log::{debug, warn};
use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

thread_local! {
    static IN_IO_THREAD: Cell<bool> = Cell::new(false);
}

/// The thread that performs every non-blocking write
pub struct IoThread {
    name: String,
    sender: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl IoThread {
    pub fn start(name: &str) -> io::Result<Arc<Self>> {
        let (sender, receiver) = channel::unbounded::<Task>();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            IN_IO_THREAD.with(|flag| flag.set(true));
            while let Ok(task) = receiver.recv() {
                task();
            }
        })?;

        debug!("started io thread {}", name);

        Ok(Arc::new(Self {
            name: name.to_string(),
            sender: Some(sender),
            handle: Some(handle),
        }))
    }

    /// Whether the calling thread is an I/O thread
    pub fn is_current() -> bool {
        IN_IO_THREAD.with(|flag| flag.get())
    }
}

impl Executor for IoThread {
    fn execute(&self, task: Task) {
        match &self.sender {
            Some(sender) => {
                if let Err(err) = sender.send(task) {
                    warn!("io thread {} stopped, running task inline", self.name);
                    (err.0)();
                }
            }
            None => task(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for IoThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoThread").field("name", &self.name).finish()
    }
}

/// Parsed form body attached to an exchange
#[derive(Debug, Default)]
pub struct FormData {
    entries: Vec<FormEntry>,
}

impl FormData {
    /// Entries in body order
    pub fn iter(&self) -> impl Iterator<Item = &FormEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owner of an exchange that `Exchange::send` hands back on completion
pub trait ExchangeOwner: Send + 'static {
    fn exchange(&mut self) -> &mut Exchange;
}

/// Native request/response pair of the non-blocking engine
pub struct Exchange {
    method: Method,
    request_path: String,
    query_string: String,
    protocol: String,
    source: Option<SocketAddr>,
    request_headers: Vec<(String, String)>,
    request_body: Option<Vec<u8>>,
    form_data: Option<FormData>,
    head: ResponseHead,
    response_started: bool,
    complete: bool,
    blocking: bool,
    dispatched: bool,
    sink: Box<dyn Write + Send>,
    io: Arc<IoThread>,
}

impl Exchange {
    pub fn new(
        method: Method,
        target: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        sink: Box<dyn Write + Send>,
        io: Arc<IoThread>,
    ) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method,
            request_path: path.to_string(),
            query_string: query.to_string(),
            protocol: "HTTP/1.1".to_string(),
            source: None,
            request_headers: headers,
            request_body: Some(body),
            form_data: None,
            head: ResponseHead::default(),
            response_started: false,
            complete: false,
            blocking: false,
            dispatched: false,
            sink,
            io,
        }
    }

    /// Build an exchange from a head read off the wire
    pub fn from_head(
        head: RequestHead,
        source: Option<SocketAddr>,
        sink: Box<dyn Write + Send>,
        io: Arc<IoThread>,
    ) -> Self {
        Self {
            method: head.method,
            request_path: head.path,
            query_string: head.query.unwrap_or_default(),
            protocol: head.version,
            source,
            request_headers: head.headers,
            request_body: Some(head.body),
            form_data: None,
            head: ResponseHead::default(),
            response_started: false,
            complete: false,
            blocking: false,
            dispatched: false,
            sink,
            io,
        }
    }

    pub fn request_method(&self) -> Method {
        self.method
    }

    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// Raw query string, empty when there is none
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn source_address(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Request header lines in arrival order
    pub fn request_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.request_headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared `Content-Length` of the request, if any
    pub fn request_content_length(&self) -> Option<u64> {
        self.request_header(CONTENT_LENGTH).and_then(|value| value.trim().parse().ok())
    }

    /// The buffered request body; `None` once taken
    pub fn take_request_body(&mut self) -> Option<Vec<u8>> {
        self.request_body.take()
    }

    /// Parse the form body on first use; `None` when the body is not a form
    pub fn form_data(&mut self, config: &PartConfig) -> ServerResult<Option<&FormData>> {
        if self.form_data.is_none() {
            let content_type = self.request_header(CONTENT_TYPE).map(str::to_string);
            let content_type = content_type.as_deref();

            let entries = if multipart::is_multipart(content_type) {
                let boundary = content_type
                    .and_then(multipart::parse_boundary)
                    .ok_or_else(|| ServerError::Multipart("Missing boundary".to_string()))?;
                let body = self.read_form_body(config)?;
                multipart::parse_multipart(&body, &boundary, config)?
            } else if multipart::is_urlencoded(content_type) {
                let body = self.read_form_body(config)?;
                multipart::parse_urlencoded(&body)
            } else {
                return Ok(None);
            };
            self.form_data = Some(FormData { entries });
        }
        Ok(self.form_data.as_ref())
    }

    fn read_form_body(&mut self, config: &PartConfig) -> ServerResult<Vec<u8>> {
        let body = self.take_request_body().unwrap_or_default();
        Body::from_bytes(body).limited(config.max_request_size).bytes()
    }

    // Response side

    pub fn status_code(&self) -> Status {
        self.head.status
    }

    pub fn set_status_code(&mut self, status: Status) {
        self.head.status = status;
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderList {
        &mut self.head.headers
    }

    pub fn response_content_length(&self) -> Option<u64> {
        self.head.content_length()
    }

    pub fn set_response_content_length(&mut self, length: u64) {
        self.head.set_content_length(length);
    }

    pub fn is_response_started(&self) -> bool {
        self.response_started
    }

    /// Allow blocking writes from the calling thread
    pub fn start_blocking(&mut self) {
        self.blocking = true;
    }

    /// Keep the exchange open after the handler returns
    pub fn dispatch(&mut self) {
        self.dispatched = true;
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn is_in_io_thread(&self) -> bool {
        IoThread::is_current()
    }

    pub fn io_thread(&self) -> &Arc<IoThread> {
        &self.io
    }

    /// Blocking body writer; only valid after `start_blocking`
    pub fn output_stream(&mut self) -> ExchangeOutput<'_> {
        ExchangeOutput { exchange: self }
    }

    /// Queue `data` on the I/O thread and hand the owner to `callback` once
    /// it has been written
    pub fn send<O, F>(mut owner: Box<O>, data: Bytes, callback: F)
    where
        O: ExchangeOwner,
        F: FnOnce(Box<O>, io::Result<()>) + Send + 'static,
    {
        let io = owner.exchange().io.clone();
        io.execute(Box::new(move || {
            let result = owner.exchange().write_body(&data).and_then(|_| owner.exchange().sink.flush());
            callback(owner, result);
        }));
    }

    /// Finish the response: commit the head, terminate a chunked body and flush.
    /// An `aborted` exchange only flushes what is already on the wire.
    pub fn end_exchange(&mut self, aborted: bool) -> io::Result<()> {
        if self.complete {
            return Ok(());
        }
        self.complete = true;
        if aborted {
            return self.sink.flush();
        }
        if !self.response_started && self.head.content_length().is_none() && !self.head.is_chunked() {
            self.head.set_content_length(0);
        }
        self.start_response()?;
        if self.head.is_chunked() {
            write_last_chunk(&mut self.sink)?;
        }
        self.sink.flush()
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        if self.complete {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "exchange already complete"));
        }
        self.start_response()?;
        if self.head.is_chunked() {
            write_chunk(&mut self.sink, data)
        } else {
            self.sink.write_all(data)
        }
    }

    fn start_response(&mut self) -> io::Result<()> {
        if !self.response_started {
            self.response_started = true;
            self.head.serialize(&mut self.sink)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.method)
            .field("request_path", &self.request_path)
            .field("query_string", &self.query_string)
            .field("head", &self.head)
            .field("response_started", &self.response_started)
            .field("dispatched", &self.dispatched)
            .finish()
    }
}

/// Blocking writer over an exchange in blocking mode
pub struct ExchangeOutput<'a> {
    exchange: &'a mut Exchange,
}

impl Write for ExchangeOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.exchange.blocking {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "exchange is not in blocking mode",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.exchange.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.exchange.start_response()?;
        self.exchange.sink.flush()
    }
}
