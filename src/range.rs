use crate::context::Context;
use crate::http::{Status, ACCEPT_RANGES, CONTENT_RANGE};

const BYTES_UNIT: &str = "bytes=";

/// Window of a response body selected by a `Range` request header.
///
/// `start` is inclusive and `end` exclusive, so a request without a usable
/// range resolves to `{0, length}`. Only the first range of a multi-range
/// header is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
    length: u64,
    partial: bool,
}

impl ByteRange {
    /// The whole content
    pub fn full(length: u64) -> Self {
        Self {
            start: 0,
            end: length,
            length,
            partial: false,
        }
    }

    /// Resolve a raw `Range` header against the content length.
    ///
    /// Absent, malformed or unsatisfiable headers yield the full window.
    pub fn resolve(header: Option<&str>, length: u64) -> Self {
        let (first, last) = match header.and_then(parse_first_range) {
            Some(bounds) => bounds,
            None => return Self::full(length),
        };
        if length == 0 {
            return Self::full(length);
        }

        let max = length - 1;
        let (start, end) = match (first, last) {
            (Some(first), last) => {
                if first > max {
                    return Self::full(length);
                }
                let last = last.map(|last| last.min(max)).unwrap_or(max);
                if last < first {
                    return Self::full(length);
                }
                (first, last)
            }
            // Suffix form: the final `n` bytes
            (None, Some(suffix)) => {
                if suffix == 0 {
                    return Self::full(length);
                }
                (length.saturating_sub(suffix), max)
            }
            (None, None) => return Self::full(length),
        };

        Self {
            start,
            end: end + 1,
            length,
            partial: true,
        }
    }

    /// First byte of the window
    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last byte of the window
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Size of the whole content
    pub fn content_length(&self) -> u64 {
        self.length
    }

    /// Bytes that go out on the wire
    pub fn window(&self) -> u64 {
        self.end - self.start
    }

    /// Whether an explicit, satisfiable range was requested
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// `Content-Range` value, `bytes A-B/L`
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, self.length)
    }

    /// Write the partial-content response metadata; no-op for a full window
    pub fn apply(&self, ctx: &mut dyn Context) {
        if !self.partial {
            return;
        }
        ctx.set_header(ACCEPT_RANGES, "bytes");
        ctx.set_header(CONTENT_RANGE, &self.content_range());
        ctx.set_response_length(self.window());
        ctx.set_status_code(Status::PartialContent);
    }
}

/// Bounds of the first range in `bytes=a-b[,c-d...]`
fn parse_first_range(value: &str) -> Option<(Option<u64>, Option<u64>)> {
    let ranges = value.trim().strip_prefix(BYTES_UNIT)?;
    let first = ranges.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;
    let start = parse_bound(start)?;
    let end = parse_bound(end)?;
    if start.is_none() && end.is_none() {
        return None;
    }
    Some((start, end))
}

/// `Some(None)` for an empty bound, `None` when it is not a number
fn parse_bound(raw: &str) -> Option<Option<u64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(None);
    }
    raw.parse().ok().map(Some)
}
