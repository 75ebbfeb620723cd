//! Context over the blocking stream engine.

use crate::adapter::{file_window, read_request, window_reader};
use crate::body::Body;
use crate::context::{default_charset, Action, Attributes, Context, RequestState};
use crate::engine::multipart::{self, PartConfig};
use crate::engine::stream::{Content, ResponseOwner, StreamRequest, StreamResponse};
use crate::error::ServerResult;
use crate::executor::{same_executor, Executor};
use crate::http::{Status, CHUNKED, CONTENT_LENGTH, CONTENT_TYPE, RANGE, TRANSFER_ENCODING};
use crate::media::MediaType;
use crate::range::ByteRange;
use crate::router::{Route, Router};
use crate::sender::{CompleteListener, ContextSender, ResponseStream, Sender};
use crate::value::{Formdata, Headers, Multipart, QueryString};
use bytes::Bytes;
use log::{debug, trace};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;

/// Context backed by a `StreamRequest`/`StreamResponse` pair
pub struct StreamContext {
    request: StreamRequest,
    response: StreamResponse,
    state: RequestState,
}

impl StreamContext {
    pub fn new(request: StreamRequest, response: StreamResponse, router: Arc<Router>) -> Self {
        let worker = router.worker().clone();
        let state = RequestState::new(router, worker, request.method().as_str(), request.path_info());
        Self {
            request,
            response,
            state,
        }
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

        let closed = self.response.close_output(cause.is_some());
        if self.request.is_async_started() && !self.request.is_async_completed() {
            self.request.complete_async();
        }
        if let Err(err) = closed {
            debug!(target: self.state.router.log_target(), "close output failed {} {}: {}", self.state.method, self.state.path, err);
        }

        self.state.notify(cause.as_ref());
    }

    fn if_start_async(&mut self) {
        if !self.request.is_async_started() {
            trace!(target: self.state.router.log_target(), "starting async {} {}", self.state.method, self.state.path);
            self.request.start_async();
        }
    }

    fn if_set_chunked(&mut self) {
        if self.response.content_length().is_none() {
            self.response.set_header(TRANSFER_ENCODING, Some(CHUNKED));
        }
    }

    fn part_config(&self) -> PartConfig {
        let router = &self.state.router;
        PartConfig::new(router.tmpdir(), router.max_request_size(), router.buffer_size())
    }
}

/// Every request parameter as a name/value pair, query values included
fn parameters(request: &mut StreamRequest) -> ServerResult<Vec<(String, String)>> {
    let mut fields = Vec::new();
    for name in request.parameter_names()? {
        for value in request.parameter_values(&name)? {
            fields.push((name.clone(), value));
        }
    }
    Ok(fields)
}

impl ResponseOwner for StreamContext {
    fn response(&mut self) -> &mut StreamResponse {
        &mut self.response
    }
}

impl Drop for StreamContext {
    fn drop(&mut self) {
        self.destroy(None);
    }
}

impl Context for StreamContext {
    fn name(&self) -> &'static str {
        "stream"
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
        let raw = self.request.query_string().filter(|query| !query.is_empty());
        self.state.query(raw)
    }

    fn headers(&mut self) -> &Headers {
        let request = &self.request;
        self.state.headers.get_or_init(|| {
            let mut headers = Headers::new();
            for name in request.header_names() {
                for value in request.headers(name) {
                    headers.put(name, value);
                }
            }
            headers
        })
    }

    fn form(&mut self) -> ServerResult<&Formdata> {
        if multipart::is_multipart(self.request.content_type()) {
            return Ok(self.multipart()?.form());
        }
        let config = self.part_config();
        self.query();
        let request = &mut self.request;
        self.state.form_with(|| {
            request.set_multipart_config(config);
            parameters(request)
        })
    }

    fn multipart(&mut self) -> ServerResult<&Multipart> {
        let config = self.part_config();
        self.query();
        let request = &mut self.request;
        self.state.multipart_with(|| {
            request.set_multipart_config(config);
            Ok((parameters(request)?, request.parts()?))
        })
    }

    fn body(&mut self) -> ServerResult<Body> {
        let limit = self.state.router.max_request_size();
        Ok(Body::new(self.request.input_stream(), self.request.content_length()).limited(limit))
    }

    fn remote_address(&self) -> String {
        self.request
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    fn protocol(&self) -> String {
        self.request.protocol().to_string()
    }

    fn attributes(&self) -> &Attributes {
        &self.state.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.state.attributes
    }

    fn is_in_io_thread(&self) -> bool {
        false
    }

    fn is_async(&self) -> bool {
        self.request.is_async_started()
    }

    fn dispatch_on(mut self: Box<Self>, executor: Arc<dyn Executor>, action: Action) {
        if same_executor(&self.state.worker, &executor) {
            action(self);
        } else {
            self.if_start_async();
            trace!(target: self.state.router.log_target(), "dispatching {} {} to {}", self.state.method, self.state.path, executor.name());
            self.state.worker = executor.clone();
            executor.execute(Box::new(move || action(self)));
        }
    }

    fn detach(mut self: Box<Self>, action: Action) {
        self.if_start_async();
        action(self);
    }

    fn is_response_started(&self) -> bool {
        self.response.is_committed()
    }

    fn on_complete(&mut self, listener: CompleteListener) {
        self.state.add_listener(listener);
    }

    fn status_code(&self) -> Status {
        self.response.status()
    }

    fn set_status_code(&mut self, status: Status) {
        self.response.set_status(status);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, Some(value));
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
        self.response
            .set_header(CONTENT_TYPE, Some(&media_type.to_content_type_header(charset)));
    }

    fn response_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    fn set_response_length(&mut self, length: u64) {
        self.response.set_content_length(length);
    }

    fn response_stream(&mut self) -> ServerResult<Box<dyn Write + '_>> {
        self.if_set_chunked();
        Ok(Box::new(self.response.output_stream()))
    }

    fn response_sender(mut self: Box<Self>) -> Box<dyn Sender> {
        self.if_set_chunked();
        self.if_start_async();
        Box::new(ContextSender::new(self))
    }

    fn send_status_code(mut self: Box<Self>, status: Status) {
        self.response.set_header(TRANSFER_ENCODING, None);
        self.response.set_content_length(0);
        self.response.set_status(status);
        self.destroy(None);
    }

    fn send_bytes(mut self: Box<Self>, data: Bytes) {
        self.response.set_header(TRANSFER_ENCODING, None);
        self.response.set_content_length(data.len() as u64);
        StreamResponse::send_content(self, Content::Bytes(data), |ctx, result| ctx.complete(result));
    }

    fn send_stream(mut self: Box<Self>, stream: ResponseStream) {
        let reader = match stream {
            ResponseStream::File(file) => return self.send_file(file),
            ResponseStream::Reader(reader) => reader,
        };

        let reader = match self.response.content_length() {
            Some(length) if length > 0 => {
                let range = ByteRange::resolve(self.request.header(RANGE), length);
                range.apply(&mut *self);
                match window_reader(reader, &range) {
                    Ok(reader) => reader,
                    Err(err) => return self.complete(Err(err)),
                }
            }
            _ => {
                self.response.set_header(CONTENT_LENGTH, None);
                self.response.set_header(TRANSFER_ENCODING, Some(CHUNKED));
                reader
            }
        };

        let content = Content::Stream {
            reader,
            buffer_size: self.state.router.buffer_size(),
        };
        StreamResponse::send_content(self, content, |ctx, result| ctx.complete(result));
    }

    fn send_file(mut self: Box<Self>, file: File) {
        let length = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => return self.complete(Err(err)),
        };
        self.response.set_header(TRANSFER_ENCODING, None);
        self.response.set_content_length(length);

        let range = ByteRange::resolve(self.request.header(RANGE), length);
        range.apply(&mut *self);
        let reader = match file_window(file, &range) {
            Ok(reader) => reader,
            Err(err) => return self.complete(Err(err)),
        };

        let content = Content::Stream {
            reader,
            buffer_size: self.state.router.buffer_size(),
        };
        StreamResponse::send_content(self, content, |ctx, result| ctx.complete(result));
    }
}

/// Serve one request from `stream` with the blocking engine
pub fn serve_connection<H>(mut stream: TcpStream, router: Arc<Router>, handler: H) -> ServerResult<()>
where
    H: FnOnce(Box<dyn Context>),
{
    let head = read_request(&mut stream, &router)?;
    let remote = stream.peer_addr().ok();
    let sink = stream.try_clone()?;

    let request = StreamRequest::from_head(head, remote);
    let response = StreamResponse::new(Box::new(sink));
    handler(Box::new(StreamContext::new(request, response, router)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::executor::SameThreadExecutor;
    use crate::http::Method;
    use parking_lot::Mutex;
    use std::io::Cursor;

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

    fn context(target: &str, headers: Vec<(&str, &str)>, capture: &Capture) -> Box<StreamContext> {
        let router = Arc::new(Router::with_worker(ServerConfig::new(), Arc::new(SameThreadExecutor)));
        let headers = headers
            .into_iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        let request = StreamRequest::new(Method::Get, target, headers, Box::new(Cursor::new(Vec::new())));
        let response = StreamResponse::new(Box::new(capture.clone()));
        Box::new(StreamContext::new(request, response, router))
    }

    #[test]
    fn test_send_status_code_clears_chunking() {
        let capture = Capture::default();
        let mut ctx = context("/", vec![], &capture);
        ctx.set_header(TRANSFER_ENCODING, CHUNKED);
        ctx.send_status_code(Status::NoContent);
        assert_eq!(
            String::from_utf8_lossy(&capture.0.lock()),
            "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_response_stream_is_chunked_without_length() {
        let capture = Capture::default();
        let mut ctx = context("/", vec![], &capture);
        {
            let mut out = ctx.response_writer(MediaType::TEXT, None).unwrap();
            out.write_all(b"hi").unwrap();
        }
        assert!(ctx.is_response_started());
        drop(ctx);
        assert_eq!(
            String::from_utf8_lossy(&capture.0.lock()),
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain;charset=UTF-8\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn test_empty_query_target_uses_singleton() {
        let capture = Capture::default();
        let mut ctx = context("/p?", vec![], &capture);
        assert!(ctx.query().is_empty_query());
        assert_eq!(ctx.name(), "stream");
        assert!(!ctx.is_in_io_thread());
    }
}
