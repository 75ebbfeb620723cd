use crate::error::{ServerError, ServerResult};
use std::io::{self, Read, Write};
use std::str;

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Continue = 100,
    SwitchingProtocols = 101,

    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,
    PartialContent = 206,

    MovedPermanently = 301,
    Found = 302,
    NotModified = 304,

    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    RequestTimeout = 408,
    PayloadTooLarge = 413,
    RangeNotSatisfiable = 416,

    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
}

impl Status {
    const ALL: [Status; 22] = [
        Status::Continue,
        Status::SwitchingProtocols,
        Status::Ok,
        Status::Created,
        Status::Accepted,
        Status::NoContent,
        Status::PartialContent,
        Status::MovedPermanently,
        Status::Found,
        Status::NotModified,
        Status::BadRequest,
        Status::Unauthorized,
        Status::Forbidden,
        Status::NotFound,
        Status::MethodNotAllowed,
        Status::RequestTimeout,
        Status::PayloadTooLarge,
        Status::RangeNotSatisfiable,
        Status::InternalServerError,
        Status::NotImplemented,
        Status::BadGateway,
        Status::ServiceUnavailable,
    ];

    /// Numeric code of this status
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Look up a known status by its numeric code
    pub fn from_u16(code: u16) -> Option<Status> {
        Self::ALL.iter().copied().find(|status| status.as_u16() == code)
    }

    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Continue => "Continue",
            Status::SwitchingProtocols => "Switching Protocols",

            Status::Ok => "OK",
            Status::Created => "Created",
            Status::Accepted => "Accepted",
            Status::NoContent => "No Content",
            Status::PartialContent => "Partial Content",

            Status::MovedPermanently => "Moved Permanently",
            Status::Found => "Found",
            Status::NotModified => "Not Modified",

            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::RequestTimeout => "Request Timeout",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::RangeNotSatisfiable => "Range Not Satisfiable",

            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
            Status::BadGateway => "Bad Gateway",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
}

impl Method {
    /// Parse a method from a string, ignoring case
    pub fn from_str(s: &str) -> ServerResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            "PATCH" => Ok(Method::Patch),
            _ => Err(ServerError::HttpParse(format!("Invalid method: {}", s))),
        }
    }

    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
        }
    }
}

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const ACCEPT_RANGES: &str = "Accept-Ranges";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const RANGE: &str = "Range";
pub const CHUNKED: &str = "chunked";

/// Response headers in insertion order, names compared without case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value of `name` with `value`, keeping the first position
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(idx) => {
                self.entries[idx].1 = value.to_string();
                let mut seen = false;
                self.entries.retain(|(n, _)| {
                    if !n.eq_ignore_ascii_case(name) {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// Append a value without touching existing ones
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// Status line plus headers of an outgoing response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: Status,
    pub headers: HeaderList,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new(Status::Ok)
    }
}

impl ResponseHead {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: HeaderList::new(),
        }
    }

    /// Declared content length, if any
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.headers.set(CONTENT_LENGTH, &length.to_string());
    }

    /// Whether the body goes out with chunked transfer encoding
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get(TRANSFER_ENCODING)
            .map(|value| value.eq_ignore_ascii_case(CHUNKED))
            .unwrap_or(false)
    }

    /// Serialize the status line and headers
    pub fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        // Write status line
        write!(writer, "HTTP/1.1 {} {}\r\n", self.status.as_u16(), self.status.as_str())?;

        // Write headers
        for (name, value) in self.headers.iter() {
            write!(writer, "{}: {}\r\n", name, value)?;
        }

        // Write blank line
        write!(writer, "\r\n")
    }
}

/// Write one chunk of a chunked body; empty input writes nothing
pub fn write_chunk<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    write!(writer, "{:x}\r\n", data.len())?;
    writer.write_all(data)?;
    writer.write_all(b"\r\n")
}

/// Terminate a chunked body
pub fn write_last_chunk<W: Write + ?Sized>(writer: &mut W) -> io::Result<()> {
    writer.write_all(b"0\r\n\r\n")
}

/// Fill `buf` from `reader`, short only at end of stream
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// HTTP Parser State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpParserState {
    RequestLine,
    Headers,
    Body,
    Complete,
}

/// A fully read request as it came off the wire
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub version: String,
    /// Header lines in arrival order, repeated names kept
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestHead {
    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Incremental HTTP/1.1 request parser
pub struct HttpParser {
    pub state: HttpParserState,
    buffer: Vec<u8>,
    method: Option<Method>,
    target: Option<String>,
    version: Option<String>,
    headers: Vec<(String, String)>,
    body_start: usize,
    content_length: usize,
    max_body_size: usize,
}

impl HttpParser {
    /// Create a new HTTP parser, `max_body_size` of `0` means unlimited
    pub fn new(max_body_size: usize) -> Self {
        Self {
            state: HttpParserState::RequestLine,
            buffer: Vec::new(),
            method: None,
            target: None,
            version: None,
            headers: Vec::new(),
            body_start: 0,
            content_length: 0,
            max_body_size,
        }
    }

    /// Feed a chunk of data, returns true once a whole request is buffered
    pub fn parse(&mut self, data: &[u8]) -> ServerResult<bool> {
        // If we're already complete, reset
        if self.state == HttpParserState::Complete {
            self.reset();
        }
        self.buffer.extend_from_slice(data);

        if self.state == HttpParserState::RequestLine || self.state == HttpParserState::Headers {
            // Find the end of headers marker
            let headers_end = match find(&self.buffer, b"\r\n\r\n") {
                Some(pos) => pos,
                None => return Ok(false),
            };
            let head = str::from_utf8(&self.buffer[..headers_end])
                .map_err(|_| ServerError::HttpParse("Invalid UTF-8".to_string()))?
                .to_string();

            let mut lines = head.split("\r\n");
            let request_line = lines
                .next()
                .ok_or_else(|| ServerError::HttpParse("Missing request line".to_string()))?;
            self.parse_request_line(request_line)?;
            self.state = HttpParserState::Headers;

            for line in lines.filter(|line| !line.is_empty()) {
                self.parse_header(line)?;
            }

            // Check for content length
            self.content_length = match self.header("content-length") {
                Some(value) => value
                    .parse()
                    .map_err(|_| ServerError::HttpParse(format!("Invalid Content-Length: {}", value)))?,
                None => 0,
            };
            if self.max_body_size > 0 && self.content_length > self.max_body_size {
                return Err(ServerError::PayloadTooLarge {
                    limit: self.max_body_size as u64,
                });
            }

            // Body starts after headers end marker
            self.body_start = headers_end + 4;
            self.state = HttpParserState::Body;
        }

        if self.state == HttpParserState::Body
            && self.buffer.len() - self.body_start >= self.content_length
        {
            // Trim any excess data
            self.buffer.truncate(self.body_start + self.content_length);
            self.state = HttpParserState::Complete;
        }

        Ok(self.is_complete())
    }

    /// Parse a request line
    fn parse_request_line(&mut self, line: &str) -> ServerResult<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ServerError::HttpParse("Invalid request line".to_string()));
        }

        self.method = Some(Method::from_str(parts[0])?);
        self.target = Some(parts[1].to_string());
        self.version = Some(parts[2].to_string());

        Ok(())
    }

    /// Parse a header line
    fn parse_header(&mut self, line: &str) -> ServerResult<()> {
        if let Some(colon_idx) = line.find(':') {
            let name = line[..colon_idx].trim().to_string();
            let value = line[colon_idx + 1..].trim().to_string();
            self.headers.push((name, value));
            Ok(())
        } else {
            Err(ServerError::HttpParse("Invalid header".to_string()))
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if the parser has completed parsing a request
    pub fn is_complete(&self) -> bool {
        self.state == HttpParserState::Complete
    }

    /// Reset the parser for a new request
    pub fn reset(&mut self) {
        self.state = HttpParserState::RequestLine;
        self.buffer.clear();
        self.method = None;
        self.target = None;
        self.version = None;
        self.headers.clear();
        self.body_start = 0;
        self.content_length = 0;
    }

    /// Get the parsed request
    pub fn get_request(&self) -> ServerResult<RequestHead> {
        if !self.is_complete() {
            return Err(ServerError::HttpParse("Request not complete".to_string()));
        }

        let method = self
            .method
            .ok_or_else(|| ServerError::HttpParse("Method not set".to_string()))?;

        let target = self
            .target
            .as_ref()
            .ok_or_else(|| ServerError::HttpParse("URI not set".to_string()))?;

        let (path, query) = match target.find('?') {
            Some(pos) => (target[..pos].to_string(), Some(target[pos + 1..].to_string())),
            None => (target.clone(), None),
        };

        Ok(RequestHead {
            method,
            path,
            query,
            version: self.version.clone().unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers.clone(),
            body: self.buffer[self.body_start..].to_vec(),
        })
    }
}

/// Position of `needle` inside `haystack`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
