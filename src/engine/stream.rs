//! Blocking, thread-per-request engine.
//!
//! The request exposes servlet-style accessors over a parsed request head and
//! a body stream; the response writes straight to the connection from the
//! calling thread.

use crate::body::Body;
use crate::engine::multipart::{self, FormEntry, FormValue, PartConfig};
use crate::error::{ServerError, ServerResult};
use crate::http::{
    read_full, write_chunk, write_last_chunk, Method, RequestHead, ResponseHead, Status, CONTENT_LENGTH, CONTENT_TYPE,
};
use crate::upload::FileUpload;
use crate::value::QueryString;
use bytes::Bytes;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::net::SocketAddr;

/// Native request of the blocking engine
pub struct StreamRequest {
    method: Method,
    path: String,
    query: Option<String>,
    query_parameters: Option<QueryString>,
    protocol: String,
    remote: Option<SocketAddr>,
    headers: Vec<(String, String)>,
    content_length: Option<u64>,
    input: Option<Box<dyn Read + Send>>,
    multipart_config: Option<PartConfig>,
    entries: Option<Vec<FormEntry>>,
    async_started: bool,
    async_completed: bool,
}

impl StreamRequest {
    pub fn new(method: Method, target: &str, headers: Vec<(String, String)>, input: Box<dyn Read + Send>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        let content_length = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_LENGTH))
            .and_then(|(_, value)| value.trim().parse().ok());
        let query_parameters = query.as_deref().map(QueryString::parse);

        Self {
            method,
            path,
            query,
            query_parameters,
            protocol: "HTTP/1.1".to_string(),
            remote: None,
            headers,
            content_length,
            input: Some(input),
            multipart_config: None,
            entries: None,
            async_started: false,
            async_completed: false,
        }
    }

    /// Build a request from a head read off the wire
    pub fn from_head(head: RequestHead, remote: Option<SocketAddr>) -> Self {
        let target = match &head.query {
            Some(query) => format!("{}?{}", head.path, query),
            None => head.path.clone(),
        };
        let mut request = Self::new(head.method, &target, head.headers, Box::new(Cursor::new(head.body)));
        request.protocol = head.version;
        request.remote = remote;
        request
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path_info(&self) -> &str {
        &self.path
    }

    /// Raw query string, `None` when the target had no `?`
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Parsed query, `None` when the target had no `?`
    pub fn query_parameters(&self) -> Option<&QueryString> {
        self.query_parameters.as_ref()
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Distinct header names in arrival order
    pub fn header_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.headers {
            if !names.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    /// Every value of a header
    pub fn headers(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The body stream; empty once it has been consumed
    pub fn input_stream(&mut self) -> Box<dyn Read + Send> {
        self.input.take().unwrap_or_else(|| Box::new(io::empty()))
    }

    /// Enable multipart parsing for this request
    pub fn set_multipart_config(&mut self, config: PartConfig) {
        self.multipart_config = Some(config);
    }

    /// Names of query and body parameters, query first
    pub fn parameter_names(&mut self) -> ServerResult<Vec<String>> {
        let mut names: Vec<String> = self
            .query_parameters
            .as_ref()
            .map(|query| query.names().map(str::to_string).collect())
            .unwrap_or_default();
        for entry in self.entries()? {
            if !entry.is_file() && !names.contains(&entry.name) {
                names.push(entry.name.clone());
            }
        }
        Ok(names)
    }

    /// Query values of `name` followed by its body values
    pub fn parameter_values(&mut self, name: &str) -> ServerResult<Vec<String>> {
        let mut values: Vec<String> = self
            .query_parameters
            .as_ref()
            .map(|query| query.get_all(name).to_vec())
            .unwrap_or_default();
        for entry in self.entries()? {
            if let FormValue::Field(value) = &entry.value {
                if entry.name == name {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    /// File parts of a multipart body
    pub fn parts(&mut self) -> ServerResult<Vec<FileUpload>> {
        Ok(self
            .entries()?
            .iter()
            .filter_map(|entry| match &entry.value {
                FormValue::File(upload) => Some(upload.clone()),
                FormValue::Field(_) => None,
            })
            .collect())
    }

    pub fn start_async(&mut self) {
        self.async_started = true;
    }

    pub fn is_async_started(&self) -> bool {
        self.async_started
    }

    pub fn complete_async(&mut self) {
        self.async_completed = true;
    }

    pub fn is_async_completed(&self) -> bool {
        self.async_completed
    }

    fn entries(&mut self) -> ServerResult<&[FormEntry]> {
        if self.entries.is_none() {
            let entries = self.read_entries()?;
            self.entries = Some(entries);
        }
        Ok(self.entries.as_deref().unwrap_or(&[]))
    }

    fn read_entries(&mut self) -> ServerResult<Vec<FormEntry>> {
        let content_type = self.content_type().map(str::to_string);
        let content_type = content_type.as_deref();

        if multipart::is_urlencoded(content_type) {
            let limit = self.multipart_config.as_ref().map(|c| c.max_request_size).unwrap_or(0);
            let body = Body::new(self.input_stream(), self.content_length).limited(limit).bytes()?;
            return Ok(multipart::parse_urlencoded(&body));
        }

        if multipart::is_multipart(content_type) {
            // Without a config the parts are left unread
            let config = match &self.multipart_config {
                Some(config) => config.clone(),
                None => return Ok(Vec::new()),
            };
            let boundary = content_type
                .and_then(multipart::parse_boundary)
                .ok_or_else(|| ServerError::Multipart("Missing boundary".to_string()))?;
            let body = Body::new(self.input_stream(), self.content_length)
                .limited(config.max_request_size)
                .bytes()?;
            return multipart::parse_multipart(&body, &boundary, &config);
        }

        Ok(Vec::new())
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("async_started", &self.async_started)
            .finish()
    }
}

/// Content handed to `StreamResponse::send_content`
pub enum Content {
    Bytes(Bytes),
    /// Copied in `buffer_size` pieces until the reader is exhausted
    Stream {
        reader: Box<dyn Read + Send>,
        buffer_size: usize,
    },
}

/// Owner of a response that `send_content` hands back on completion
pub trait ResponseOwner: Send + 'static {
    fn response(&mut self) -> &mut StreamResponse;
}

/// Native response of the blocking engine
pub struct StreamResponse {
    head: ResponseHead,
    sink: Box<dyn Write + Send>,
    committed: bool,
    closed: bool,
}

impl StreamResponse {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            head: ResponseHead::default(),
            sink,
            committed: false,
            closed: false,
        }
    }

    pub fn status(&self) -> Status {
        self.head.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.head.status = status;
    }

    /// Replace a header, `None` removes it
    pub fn set_header(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => self.head.headers.set(name, value),
            None => self.head.headers.remove(name),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.head.content_length()
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.head.set_content_length(length);
    }

    /// Whether the status line and headers went out
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Blocking writer for the body; the head goes out on the first write
    pub fn output_stream(&mut self) -> HttpOutput<'_> {
        HttpOutput { response: self }
    }

    /// Write `content` from the calling thread and hand the owner to `callback`
    pub fn send_content<O, F>(mut owner: Box<O>, content: Content, callback: F)
    where
        O: ResponseOwner,
        F: FnOnce(Box<O>, io::Result<()>),
    {
        let result = owner.response().write_content(content);
        callback(owner, result);
    }

    /// Finish the response: commit the head, terminate a chunked body and flush.
    ///
    /// An `aborted` response only flushes what already went out, so a client
    /// never mistakes a truncated body for a complete one.
    pub fn close_output(&mut self, aborted: bool) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if aborted {
            return self.sink.flush();
        }
        if !self.committed && self.head.content_length().is_none() && !self.head.is_chunked() {
            self.head.set_content_length(0);
        }
        self.commit()?;
        if self.head.is_chunked() {
            write_last_chunk(&mut self.sink)?;
        }
        self.sink.flush()
    }

    fn write_content(&mut self, content: Content) -> io::Result<()> {
        match content {
            Content::Bytes(data) => self.write_body(&data)?,
            Content::Stream {
                mut reader,
                buffer_size,
            } => {
                let mut buffer = vec![0u8; buffer_size.max(1)];
                loop {
                    let n = read_full(&mut reader, &mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    self.write_body(&buffer[..n])?;
                }
            }
        }
        self.sink.flush()
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response output closed"));
        }
        self.commit()?;
        if self.head.is_chunked() {
            write_chunk(&mut self.sink, data)
        } else {
            self.sink.write_all(data)
        }
    }

    fn commit(&mut self) -> io::Result<()> {
        if !self.committed {
            self.committed = true;
            self.head.serialize(&mut self.sink)?;
        }
        Ok(())
    }
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("head", &self.head)
            .field("committed", &self.committed)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Body writer borrowed from a `StreamResponse`
pub struct HttpOutput<'a> {
    response: &'a mut StreamResponse,
}

impl Write for HttpOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.response.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.response.commit()?;
        self.response.sink.flush()
    }
}
