//! The per-request contract shared by every server engine.
//!
//! A context moves through four states: fresh, reading (request data
//! realized lazily and memoized), responding (first response byte committed,
//! metadata frozen) and terminal (engine handles closed, uploads destroyed,
//! listeners notified). Send operations and dispatch take the boxed context
//! by value, so nothing can touch it after it has been handed off.

use crate::body::Body;
use crate::error::{connection_lost, ServerResult};
use crate::executor::Executor;
use crate::http::Status;
use crate::media::MediaType;
use crate::router::{Route, Router};
use crate::sender::{CompleteListener, ResponseStream, Sender};
use crate::upload::FileUpload;
use crate::value::{Formdata, Headers, Memo, Multipart, QueryString, ValueMap};
use bytes::Bytes;
use log::{debug, error};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;

/// Work run against a context on some executor
pub type Action = Box<dyn FnOnce(Box<dyn Context>) + Send + 'static>;

/// Per-request values handlers attach for each other
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send>(&mut self, name: &str, value: T) {
        self.values.insert(name.to_string(), Box::new(value));
    }

    /// Typed lookup; `None` when missing or of another type
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.values.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// One inbound HTTP exchange, independent of the engine serving it
pub trait Context: Send {
    /// Engine name
    fn name(&self) -> &'static str;

    /// The owning router
    fn router(&self) -> &Arc<Router>;

    // Request

    /// Request method, upper case
    fn method(&self) -> String;

    fn path_string(&self) -> &str;

    fn path_map(&self) -> &HashMap<String, String>;

    fn set_path_map(&mut self, path_map: HashMap<String, String>);

    /// The matched route, assigned by the router
    fn route(&self) -> Option<&Route>;

    fn set_route(&mut self, route: Route);

    fn query(&mut self) -> &QueryString;

    fn headers(&mut self) -> &Headers;

    /// First value of a request header
    fn header(&mut self, name: &str) -> Option<String> {
        self.headers().get(name).map(str::to_string)
    }

    /// Body fields; names also present in the query string are left out
    fn form(&mut self) -> ServerResult<&Formdata>;

    /// Body fields plus uploaded files
    fn multipart(&mut self) -> ServerResult<&Multipart>;

    /// The request body, capped at the router's maximum request size
    fn body(&mut self) -> ServerResult<Body>;

    fn remote_address(&self) -> String;

    fn protocol(&self) -> String;

    fn attributes(&self) -> &Attributes;

    fn attributes_mut(&mut self) -> &mut Attributes;

    // Lifecycle

    fn is_in_io_thread(&self) -> bool;

    /// Whether the exchange was marked asynchronous
    fn is_async(&self) -> bool;

    /// Run `action` on the router's worker
    fn dispatch(self: Box<Self>, action: Action) {
        let worker = self.router().worker().clone();
        self.dispatch_on(worker, action);
    }

    /// Run `action` on `executor`, inline when already running there
    fn dispatch_on(self: Box<Self>, executor: Arc<dyn Executor>, action: Action);

    /// Mark the exchange asynchronous and run `action` right away
    fn detach(self: Box<Self>, action: Action);

    fn is_response_started(&self) -> bool;

    /// Observe the end of this request
    fn on_complete(&mut self, listener: CompleteListener);

    // Response metadata, only meaningful before the response starts

    fn status_code(&self) -> Status;

    fn set_status_code(&mut self, status: Status);

    fn set_header(&mut self, name: &str, value: &str);

    /// Current response type, `text/plain` when never set
    fn response_type(&self) -> MediaType;

    /// Set the response type unless one was already set
    fn default_response_type(&mut self, media_type: MediaType);

    /// Set the response type and its `Content-Type` header
    fn set_response_type(&mut self, media_type: MediaType, charset: Option<&str>);

    fn response_length(&self) -> Option<u64>;

    fn set_response_length(&mut self, length: u64);

    // Response body

    /// Blocking output for the body, chunked unless a length was set
    fn response_stream(&mut self) -> ServerResult<Box<dyn Write + '_>>;

    /// Like `response_stream` after setting the response type. Without an
    /// explicit charset, textual types get the router's default one
    fn response_writer(&mut self, media_type: MediaType, charset: Option<&str>) -> ServerResult<Box<dyn Write + '_>> {
        let charset = match charset {
            Some(charset) => Some(charset.to_string()),
            None => default_charset(self.router(), media_type),
        };
        self.set_response_type(media_type, charset.as_deref());
        self.response_stream()
    }

    fn response_sender(self: Box<Self>) -> Box<dyn Sender>;

    /// Finish with an empty body
    fn send_status_code(self: Box<Self>, status: Status);

    fn send_bytes(self: Box<Self>, data: Bytes);

    fn send_string(self: Box<Self>, data: &str) {
        self.send_bytes(Bytes::copy_from_slice(data.as_bytes()));
    }

    fn send_stream(self: Box<Self>, stream: ResponseStream);

    /// Send a file, honoring the `Range` request header
    fn send_file(self: Box<Self>, file: File);
}

/// Charset a textual media type gets when none was asked for
pub(crate) fn default_charset(router: &Router, media_type: MediaType) -> Option<String> {
    if media_type.is_textual() {
        Some(router.config().default_charset.clone())
    } else {
        None
    }
}

/// Request state every adapter keeps, whatever engine sits underneath
pub(crate) struct RequestState {
    pub router: Arc<Router>,
    /// Executor the context is currently running on
    pub worker: Arc<dyn Executor>,
    pub method: String,
    pub path: String,
    pub route: Option<Route>,
    pub path_map: HashMap<String, String>,
    pub attributes: Attributes,
    pub query: Memo<Option<QueryString>>,
    pub headers: Memo<Headers>,
    pub form: Memo<Formdata>,
    pub multipart: Memo<Multipart>,
    pub response_type: Option<MediaType>,
    files: Vec<FileUpload>,
    listeners: Vec<CompleteListener>,
    released: bool,
}

impl RequestState {
    pub fn new(router: Arc<Router>, worker: Arc<dyn Executor>, method: &str, path: &str) -> Self {
        Self {
            router,
            worker,
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            route: None,
            path_map: HashMap::new(),
            attributes: Attributes::new(),
            query: Memo::new(),
            headers: Memo::new(),
            form: Memo::new(),
            multipart: Memo::new(),
            response_type: None,
            files: Vec::new(),
            listeners: Vec::new(),
            released: false,
        }
    }

    /// Parse the raw query on first access
    pub fn query(&mut self, raw: Option<&str>) -> &QueryString {
        self.query
            .get_or_init(|| raw.map(QueryString::parse))
            .as_ref()
            .unwrap_or_else(|| QueryString::empty())
    }

    /// Build the form once from the body `fields`. Names the query carries
    /// belong to the query, so the query must be materialized first
    pub fn form_with<F>(&mut self, fields: F) -> ServerResult<&Formdata>
    where
        F: FnOnce() -> ServerResult<Vec<(String, String)>>,
    {
        let query = shadowing(&self.query);
        self.form.get_or_try_init(|| {
            let mut form = Formdata::new();
            form.merge_without(fields()?, query);
            Ok(form)
        })
    }

    /// Like `form_with` for a multipart body; every upload is tracked so
    /// teardown can destroy it
    pub fn multipart_with<F>(&mut self, parts: F) -> ServerResult<&Multipart>
    where
        F: FnOnce() -> ServerResult<(Vec<(String, String)>, Vec<FileUpload>)>,
    {
        let query = shadowing(&self.query);
        let files = &mut self.files;
        self.multipart.get_or_try_init(|| {
            let (fields, uploads) = parts()?;
            let mut multipart = Multipart::new();
            multipart.form_mut().merge_without(fields, query);
            for upload in uploads {
                files.push(upload.clone());
                multipart.put_file(upload);
            }
            Ok(multipart)
        })
    }

    pub fn add_listener(&mut self, listener: CompleteListener) {
        self.listeners.push(listener);
    }

    /// Claim the terminal transition; false when it already happened
    pub fn begin_release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        true
    }

    pub fn log_failure(&self, cause: Option<&io::Error>) {
        let target = self.router.log_target();
        if let Some(cause) = cause {
            if connection_lost(cause) {
                debug!(target: target, "exception found while sending response {} {}: {}", self.method, self.path, cause);
            } else {
                error!(target: target, "exception found while sending response {} {}: {}", self.method, self.path, cause);
            }
        }
    }

    /// Destroy every registered upload, one failure never stops the rest
    pub fn release_uploads(&mut self) {
        let target = self.router.log_target();
        for file in self.files.drain(..) {
            if let Err(err) = file.destroy() {
                debug!(target: target, "file upload destroy resulted in exception {}: {}", file.name(), err);
            }
        }
    }

    pub fn notify(&mut self, cause: Option<&io::Error>) {
        for listener in self.listeners.drain(..) {
            listener(cause);
        }
    }
}

fn shadowing(query: &Memo<Option<QueryString>>) -> &ValueMap {
    debug_assert!(query.get().is_some(), "query read after the body");
    match query.get() {
        Some(Some(query)) => &**query,
        _ => &**QueryString::empty(),
    }
}
