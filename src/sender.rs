use crate::context::Context;
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};

/// Observes the end of a request: `None` on success, the cause on failure
pub type CompleteListener = Box<dyn FnOnce(Option<&io::Error>) + Send + 'static>;

/// A response body source for `send_stream`.
///
/// File-backed sources are sent through the file path so ranges can seek
/// instead of skipping.
pub enum ResponseStream {
    File(File),
    Reader(Box<dyn Read + Send>),
}

impl ResponseStream {
    pub fn reader<R: Read + Send + 'static>(reader: R) -> Self {
        ResponseStream::Reader(Box::new(reader))
    }
}

impl From<File> for ResponseStream {
    fn from(file: File) -> Self {
        ResponseStream::File(file)
    }
}

impl From<Box<dyn Read + Send>> for ResponseStream {
    fn from(reader: Box<dyn Read + Send>) -> Self {
        ResponseStream::Reader(reader)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStream::File(file) => f.debug_tuple("File").field(file).finish(),
            ResponseStream::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Engine-neutral handle for writing one response body.
///
/// Each call registers the source with the engine and returns; the owning
/// context is torn down once the engine reports the write finished or failed.
pub trait Sender: Send {
    fn send_bytes(self: Box<Self>, data: Bytes);

    fn send_stream(self: Box<Self>, stream: ResponseStream);

    /// Takes ownership of the file and closes it once queued
    fn send_file(self: Box<Self>, file: File);
}

/// Sender bound to the context it was obtained from
pub struct ContextSender {
    ctx: Box<dyn Context>,
}

impl ContextSender {
    pub fn new(ctx: Box<dyn Context>) -> Self {
        Self { ctx }
    }
}

impl Sender for ContextSender {
    fn send_bytes(self: Box<Self>, data: Bytes) {
        self.ctx.send_bytes(data);
    }

    fn send_stream(self: Box<Self>, stream: ResponseStream) {
        self.ctx.send_stream(stream);
    }

    fn send_file(self: Box<Self>, file: File) {
        self.ctx.send_file(file);
    }
}
