use crate::error::{ServerError, ServerResult};
use std::fmt;
use std::io::{self, Cursor, Read};

/// Request body handle: a byte stream with an optional declared length.
///
/// When a maximum size is set, reading past it fails with
/// `ServerError::PayloadTooLarge` wrapped in the `io::Error`.
pub struct Body {
    reader: Box<dyn Read + Send>,
    length: Option<u64>,
    limit: u64,
    consumed: u64,
}

impl Body {
    pub fn new(reader: Box<dyn Read + Send>, length: Option<u64>) -> Self {
        Self {
            reader,
            length,
            limit: 0,
            consumed: 0,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self::new(Box::new(Cursor::new(bytes)), Some(length))
    }

    /// Cap the number of bytes this body may yield, `0` means no cap
    pub fn limited(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Declared length, `None` when unknown
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Read the whole body
    pub fn bytes(mut self) -> ServerResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.length.unwrap_or(0).min(64 * 1024) as usize);
        self.read_to_end(&mut buffer).map_err(ServerError::from_body_io)?;
        Ok(buffer)
    }

    /// Read the whole body as UTF-8 text
    pub fn text(self) -> ServerResult<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|e| ServerError::HttpParse(format!("Body is not UTF-8: {}", e)))
    }

    fn too_large(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::Other,
            ServerError::PayloadTooLarge { limit: self.limit },
        )
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.limit == 0 {
            let n = self.reader.read(buf)?;
            self.consumed += n as u64;
            return Ok(n);
        }

        // Read one byte past the limit so an exact-size body still succeeds
        let allowed = (self.limit + 1).saturating_sub(self.consumed);
        if allowed == 0 {
            return Err(self.too_large());
        }
        let max = buf.len().min(allowed.min(usize::MAX as u64) as usize);
        let n = self.reader.read(&mut buf[..max])?;
        self.consumed += n as u64;
        if self.consumed > self.limit {
            return Err(self.too_large());
        }
        Ok(n)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("length", &self.length)
            .field("limit", &self.limit)
            .field("consumed", &self.consumed)
            .finish()
    }
}
