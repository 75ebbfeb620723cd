mod common;

use bytes::Bytes;
use common::{callback_context, on_both_engines, router, router_with, run, stream_context, SharedSink, TestRequest};
use engine_context::engine::callback::IoThread;
use engine_context::error::connection_lost;
use engine_context::{ByteRange, Context, MediaType, ResponseStream, Router, ServerConfig};
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

fn content() -> Vec<u8> {
    (0..100u8).collect()
}

fn content_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("file.bin");
    fs::write(&path, content()).unwrap();
    path
}

/// Yields its data once, then fails
struct FailingReader(Option<Vec<u8>>);

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.take() {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "source went away")),
        }
    }
}

/// Failure and wire output of `handler` on each engine, stream engine first
fn failing_on_both_engines<F>(request: &TestRequest, router: &Arc<Router>, handler: F) -> Vec<(Option<io::ErrorKind>, String)>
where
    F: Fn(Box<dyn Context>),
{
    let io = IoThread::start("failing-io").unwrap();
    let stream_sink = SharedSink::new();
    let callback_sink = SharedSink::new();
    vec![
        (run(stream_context(request, router, stream_sink.clone()), &handler), stream_sink.text()),
        (run(callback_context(request, router, &io, callback_sink.clone()), &handler), callback_sink.text()),
    ]
}

fn expected(head: &str, body: &[u8]) -> String {
    let mut wire = head.as_bytes().to_vec();
    wire.extend_from_slice(body);
    String::from_utf8_lossy(&wire).into_owned()
}

#[test]
fn test_send_file_without_range_is_full_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = content_file(&dir);
    let router = router(dir.path());

    let (stream, callback) = on_both_engines(&TestRequest::get("/file"), &router, |ctx| {
        ctx.send_file(File::open(&path).unwrap());
    });

    let want = expected("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n", &content());
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_send_file_with_range_is_partial() {
    let dir = tempfile::tempdir().unwrap();
    let path = content_file(&dir);
    let router = router(dir.path());
    let request = TestRequest::get("/file").header("Range", "bytes=10-19");

    let (stream, callback) = on_both_engines(&request, &router, |ctx| {
        ctx.send_file(File::open(&path).unwrap());
    });

    let want = expected(
        "HTTP/1.1 206 Partial Content\r\nContent-Length: 10\r\nAccept-Ranges: bytes\r\nContent-Range: bytes 10-19/100\r\n\r\n",
        &content()[10..20],
    );
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_unsatisfiable_range_falls_back_to_full_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = content_file(&dir);
    let router = router(dir.path());
    let request = TestRequest::get("/file").header("Range", "bytes=100-120");

    let (stream, callback) = on_both_engines(&request, &router, |ctx| {
        ctx.send_file(File::open(&path).unwrap());
    });

    let want = expected("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n", &content());
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_file_backed_stream_goes_through_file_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = content_file(&dir);
    let router = router(dir.path());
    let request = TestRequest::get("/file").header("Range", "bytes=-5");

    let (stream, callback) = on_both_engines(&request, &router, |ctx| {
        ctx.send_stream(ResponseStream::from(File::open(&path).unwrap()));
    });

    let want = expected(
        "HTTP/1.1 206 Partial Content\r\nContent-Length: 5\r\nAccept-Ranges: bytes\r\nContent-Range: bytes 95-99/100\r\n\r\n",
        &content()[95..],
    );
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_stream_with_length_skips_to_range() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let request = TestRequest::get("/data").header("Range", "bytes=90-");

    let (stream, callback) = on_both_engines(&request, &router, |mut ctx| {
        ctx.set_response_type(MediaType::OCTET_STREAM, None);
        ctx.set_response_length(100);
        ctx.send_stream(ResponseStream::reader(Cursor::new(content())));
    });

    let want = expected(
        "HTTP/1.1 206 Partial Content\r\nContent-Type: application/octet-stream\r\nContent-Length: 10\r\nAccept-Ranges: bytes\r\nContent-Range: bytes 90-99/100\r\n\r\n",
        &content()[90..],
    );
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_stream_without_length_is_chunked() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(ServerConfig::new().with_tmpdir(dir.path()).with_buffer_size(4));
    // A range means nothing without a known length
    let request = TestRequest::get("/data").header("Range", "bytes=0-1");

    let (stream, callback) = on_both_engines(&request, &router, |ctx| {
        ctx.send_stream(ResponseStream::reader(Cursor::new(b"abcdefghij".to_vec())));
    });

    let want = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n4\r\nefgh\r\n2\r\nij\r\n0\r\n\r\n";
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_send_bytes_ignores_range() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let request = TestRequest::get("/data").header("Range", "bytes=0-1");

    let (stream, callback) = on_both_engines(&request, &router, |ctx| {
        ctx.send_bytes(Bytes::from_static(b"hello"));
    });

    let want = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    assert_eq!(stream, want);
    assert_eq!(callback, want);
}

#[test]
fn test_resolved_window_matches_header() {
    let range = ByteRange::resolve(Some("bytes=10-19"), 100);
    assert!(range.is_partial());
    assert_eq!((range.start(), range.end(), range.window()), (10, 20, 10));
    assert_eq!(range.content_range(), "bytes 10-19/100");

    let full = ByteRange::resolve(None, 100);
    assert!(!full.is_partial());
    assert_eq!((full.start(), full.end()), (0, 100));
}

#[test]
fn test_failed_chunked_stream_is_left_unterminated() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_with(ServerConfig::new().with_tmpdir(dir.path()).with_buffer_size(4));

    let results = failing_on_both_engines(&TestRequest::get("/data"), &router, |ctx| {
        ctx.send_stream(ResponseStream::reader(FailingReader(Some(b"abcd".to_vec()))));
    });

    // No terminating chunk: the client must see a truncated body
    for (failure, wire) in results {
        assert_eq!(failure, Some(io::ErrorKind::Other));
        assert_eq!(wire, "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n");
    }
}

#[test]
fn test_range_past_short_stream_fails_as_bad_content() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let request = TestRequest::get("/data").header("Range", "bytes=50-");

    let results = failing_on_both_engines(&request, &router, |mut ctx| {
        ctx.set_response_length(100);
        ctx.send_stream(ResponseStream::reader(Cursor::new(vec![1u8; 10])));
    });

    for (failure, wire) in results {
        assert_eq!(failure, Some(io::ErrorKind::InvalidData));
        assert!(!connection_lost(&io::Error::from(io::ErrorKind::InvalidData)));
        // Nothing was committed, so nothing goes out
        assert_eq!(wire, "");
    }
}
