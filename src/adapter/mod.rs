//! Context implementations, one per engine.

pub mod callback;
pub mod stream;

use crate::error::{ServerError, ServerResult};
use crate::http::{HttpParser, RequestHead, ResponseHead, Status};
use crate::range::ByteRange;
use crate::router::Router;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Read one whole request off a connection.
///
/// A malformed or oversized request is answered with a status-only response
/// before the error is returned.
pub(crate) fn read_request<S: Read + Write>(stream: &mut S, router: &Router) -> ServerResult<RequestHead> {
    let mut parser = HttpParser::new(router.max_request_size() as usize);
    let mut buffer = vec![0u8; router.buffer_size().max(1)];

    let parsed = loop {
        let n = stream.read(&mut buffer)?;
        if n == 0 {
            return Err(ServerError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the request was complete",
            )));
        }
        match parser.parse(&buffer[..n]) {
            Ok(true) => break parser.get_request(),
            Ok(false) => continue,
            Err(err) => break Err(err),
        }
    };

    if let Err(err) = &parsed {
        let status = match err {
            ServerError::PayloadTooLarge { .. } => Status::PayloadTooLarge,
            _ => Status::BadRequest,
        };
        let mut head = ResponseHead::new(status);
        head.set_content_length(0);
        head.serialize(stream)?;
        stream.flush()?;
    }
    parsed
}

/// Skip to the start of the window and stop at its end.
///
/// A stream shorter than its declared length is bad content, not a lost
/// connection.
pub(crate) fn window_reader(mut reader: Box<dyn Read + Send>, range: &ByteRange) -> io::Result<Box<dyn Read + Send>> {
    let start = range.start();
    if start > 0 {
        let skipped = io::copy(&mut (&mut reader).take(start), &mut io::sink())?;
        if skipped < start {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream ended before the requested range",
            ));
        }
    }
    Ok(Box::new(reader.take(range.window())))
}

/// Seek a file to the start of the window and stop at its end
pub(crate) fn file_window(mut file: File, range: &ByteRange) -> io::Result<Box<dyn Read + Send>> {
    file.seek(SeekFrom::Start(range.start()))?;
    Ok(Box::new(file.take(range.window())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::connection_lost;
    use crate::executor::SameThreadExecutor;
    use std::io::Cursor;
    use std::sync::Arc;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn router(max: u64) -> Router {
        let config = ServerConfig::new().with_buffer_size(8).with_max_request_size(max);
        Router::with_worker(config, Arc::new(SameThreadExecutor))
    }

    #[test]
    fn test_read_request_in_small_reads() {
        let mut stream = Duplex {
            input: Cursor::new(b"GET /a?b=c HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let head = read_request(&mut stream, &router(0)).unwrap();
        assert_eq!(head.path, "/a");
        assert_eq!(head.query.as_deref(), Some("b=c"));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn test_oversized_request_answered_with_413() {
        let mut stream = Duplex {
            input: Cursor::new(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n".to_vec()),
            output: Vec::new(),
        };
        let result = read_request(&mut stream, &router(10));
        assert!(matches!(result, Err(ServerError::PayloadTooLarge { limit: 10 })));
        assert_eq!(
            String::from_utf8_lossy(&stream.output),
            "HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_window_reader_skips_and_limits() {
        let range = ByteRange::resolve(Some("bytes=2-4"), 10);
        let mut reader = window_reader(Box::new(Cursor::new(b"0123456789".to_vec())), &range).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "234");
    }

    #[test]
    fn test_short_stream_is_not_a_lost_connection() {
        let range = ByteRange::resolve(Some("bytes=50-"), 100);
        let err = match window_reader(Box::new(Cursor::new(vec![0u8; 10])), &range) {
            Ok(_) => panic!("window past the end of the stream"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(!connection_lost(&err));
    }

    #[test]
    fn test_file_window_seeks() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        let range = ByteRange::resolve(Some("bytes=-3"), 10);
        let mut reader = file_window(file, &range).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "789");
    }
}
