//! Request body form parsing shared by the native engines.

use crate::error::{ServerError, ServerResult};
use crate::http::find;
use crate::upload::FileUpload;
use std::path::PathBuf;
use std::str;

const MULTIPART: &str = "multipart/form-data";
const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Where and how file parts get stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartConfig {
    /// Directory large file parts are spooled to
    pub location: PathBuf,
    /// Largest body accepted, `0` means unlimited
    pub max_request_size: u64,
    /// File parts up to this size stay in memory
    pub file_size_threshold: usize,
}

impl PartConfig {
    pub fn new<P: Into<PathBuf>>(location: P, max_request_size: u64, file_size_threshold: usize) -> Self {
        Self {
            location: location.into(),
            max_request_size,
            file_size_threshold,
        }
    }
}

/// Value of one form entry
#[derive(Debug, Clone)]
pub enum FormValue {
    Field(String),
    File(FileUpload),
}

/// One named entry of a parsed form body
#[derive(Debug, Clone)]
pub struct FormEntry {
    pub name: String,
    pub value: FormValue,
}

impl FormEntry {
    pub fn field(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: FormValue::Field(value.to_string()),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.value, FormValue::File(_))
    }
}

pub fn is_multipart(content_type: Option<&str>) -> bool {
    media_type_is(content_type, MULTIPART)
}

pub fn is_urlencoded(content_type: Option<&str>) -> bool {
    media_type_is(content_type, URLENCODED)
}

fn media_type_is(content_type: Option<&str>, expected: &str) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// `boundary` parameter of a multipart content type
pub fn parse_boundary(content_type: &str) -> Option<String> {
    header_params(content_type)
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// `name=value` parameters after the first `;` of a header value
pub fn header_params(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .skip(1)
        .filter_map(|param| {
            let (name, value) = param.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Decode an `application/x-www-form-urlencoded` body
pub fn parse_urlencoded(body: &[u8]) -> Vec<FormEntry> {
    url::form_urlencoded::parse(body)
        .map(|(name, value)| FormEntry::field(&name, &value))
        .collect()
}

/// Split a `multipart/form-data` body into fields and spooled files
pub fn parse_multipart(body: &[u8], boundary: &str, config: &PartConfig) -> ServerResult<Vec<FormEntry>> {
    let delimiter = format!("--{}", boundary);
    let close = format!("\r\n--{}", boundary);
    let mut entries = Vec::new();

    let mut pos = find(body, delimiter.as_bytes())
        .ok_or_else(|| ServerError::Multipart("Missing opening boundary".to_string()))?
        + delimiter.len();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(b"\r\n") {
            return Err(ServerError::Multipart("Malformed boundary line".to_string()));
        }
        pos += 2;

        let head_len = find(&body[pos..], b"\r\n\r\n")
            .ok_or_else(|| ServerError::Multipart("Unterminated part headers".to_string()))?;
        let head = str::from_utf8(&body[pos..pos + head_len])
            .map_err(|_| ServerError::Multipart("Part headers are not UTF-8".to_string()))?;
        pos += head_len + 4;

        let content_len = find(&body[pos..], close.as_bytes())
            .ok_or_else(|| ServerError::Multipart("Missing closing boundary".to_string()))?;
        let content = &body[pos..pos + content_len];
        pos += content_len + close.len();

        entries.push(parse_part(head, content, config)?);
    }

    Ok(entries)
}

fn parse_part(head: &str, content: &[u8], config: &PartConfig) -> ServerResult<FormEntry> {
    let mut disposition = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.trim());
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim());
            }
        }
    }

    let params = header_params(
        disposition.ok_or_else(|| ServerError::Multipart("Part without Content-Disposition".to_string()))?,
    );
    let param = |key: &str| {
        params
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    };
    let name = param("name").ok_or_else(|| ServerError::Multipart("Part without a name".to_string()))?;

    match param("filename") {
        Some(file_name) => {
            let upload = FileUpload::spool(
                name,
                file_name,
                content_type,
                content,
                &config.location,
                config.file_size_threshold,
            )?;
            Ok(FormEntry {
                name: name.to_string(),
                value: FormValue::File(upload),
            })
        }
        None => {
            let value = String::from_utf8_lossy(content);
            Ok(FormEntry::field(name, &value))
        }
    }
}
