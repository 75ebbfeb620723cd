use std::fmt;

/// A response media type such as `text/html`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaType {
    value: &'static str,
}

impl MediaType {
    pub const TEXT: MediaType = MediaType::new("text/plain");
    pub const HTML: MediaType = MediaType::new("text/html");
    pub const CSS: MediaType = MediaType::new("text/css");
    pub const JS: MediaType = MediaType::new("text/javascript");
    pub const JSON: MediaType = MediaType::new("application/json");
    pub const XML: MediaType = MediaType::new("application/xml");
    pub const FORM: MediaType = MediaType::new("application/x-www-form-urlencoded");
    pub const MULTIPART: MediaType = MediaType::new("multipart/form-data");
    pub const OCTET_STREAM: MediaType = MediaType::new("application/octet-stream");

    pub const fn new(value: &'static str) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &'static str {
        self.value
    }

    /// Whether this type carries text and therefore a charset
    pub fn is_textual(&self) -> bool {
        self.value.starts_with("text/")
            || self.value == "application/json"
            || self.value == "application/xml"
            || self.value == "application/javascript"
            || self.value.ends_with("+xml")
            || self.value.ends_with("+json")
    }

    /// Charset to emit when the caller does not pick one
    pub fn charset(&self) -> Option<&'static str> {
        if self.is_textual() {
            Some("UTF-8")
        } else {
            None
        }
    }

    /// Render the `Content-Type` header value
    pub fn to_content_type_header(&self, charset: Option<&str>) -> String {
        match charset {
            Some(charset) => format!("{};charset={}", self.value, charset),
            None => self.value.to_string(),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_header() {
        assert_eq!(
            MediaType::HTML.to_content_type_header(MediaType::HTML.charset()),
            "text/html;charset=UTF-8"
        );
        assert_eq!(
            MediaType::OCTET_STREAM.to_content_type_header(MediaType::OCTET_STREAM.charset()),
            "application/octet-stream"
        );
        assert_eq!(
            MediaType::JSON.to_content_type_header(Some("ISO-8859-1")),
            "application/json;charset=ISO-8859-1"
        );
        assert_eq!(MediaType::new("image/svg+xml").charset(), Some("UTF-8"));
        assert_eq!(MediaType::new("image/png").charset(), None);
    }
}
