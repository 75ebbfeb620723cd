//! Engine-neutral containers for request-derived values.
//!
//! Every container keeps insertion order and allows a key to carry several
//! values. Header names compare without case; query and form keys are exact.

use crate::upload::FileUpload;
use std::ops::Deref;

/// A value computed on first access and handed back unchanged afterwards
#[derive(Debug)]
pub struct Memo<T> {
    value: Option<T>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn get_or_init<F: FnOnce() -> T>(&mut self, init: F) -> &T {
        self.value.get_or_insert_with(init)
    }

    /// Like `get_or_init`, a failed initialization leaves the memo empty
    pub fn get_or_try_init<E, F>(&mut self, init: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let value = match self.value.take() {
            Some(value) => value,
            None => init()?,
        };
        let value: &T = self.value.insert(value);
        Ok(value)
    }
}

/// Ordered multi-valued map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMap {
    case_insensitive: bool,
    entries: Vec<(String, Vec<String>)>,
}

impl ValueMap {
    /// Map with exact key matching
    pub const fn new() -> Self {
        Self {
            case_insensitive: false,
            entries: Vec::new(),
        }
    }

    /// Map whose keys compare ignoring ASCII case
    pub const fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
            entries: Vec::new(),
        }
    }

    /// Append a value to `name`
    pub fn put<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Every value of `name`, in arrival order
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Vec<String> {
        match self.position(name) {
            Some(idx) => self.entries.remove(idx).1,
            None => Vec::new(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Flattened `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        if self.case_insensitive {
            self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
        } else {
            self.entries.iter().position(|(n, _)| n == name)
        }
    }
}

impl Default for ValueMap {
    fn default() -> Self {
        Self::new()
    }
}

static EMPTY_QUERY: QueryString = QueryString {
    raw: String::new(),
    values: ValueMap::new(),
};

/// Parsed query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryString {
    raw: String,
    values: ValueMap,
}

impl QueryString {
    /// The shared empty query, handed out when a request has none
    pub fn empty() -> &'static QueryString {
        &EMPTY_QUERY
    }

    /// Parse a raw query string; a leading `?` is optional
    pub fn parse(raw: &str) -> Self {
        let query = raw.strip_prefix('?').unwrap_or(raw);
        let mut values = ValueMap::new();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            values.put(name, value);
        }
        Self {
            raw: query.to_string(),
            values,
        }
    }

    /// The query as received, without the `?`
    pub fn query_string(&self) -> &str {
        &self.raw
    }

    pub fn is_empty_query(&self) -> bool {
        std::ptr::eq(self, &EMPTY_QUERY)
    }
}

impl Deref for QueryString {
    type Target = ValueMap;

    fn deref(&self) -> &ValueMap {
        &self.values
    }
}

/// Request headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    values: ValueMap,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            values: ValueMap::case_insensitive(),
        }
    }

    pub fn put<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.values.put(name, value);
    }
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Headers {
    type Target = ValueMap;

    fn deref(&self) -> &ValueMap {
        &self.values
    }
}

/// Form fields from an urlencoded or multipart body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Formdata {
    values: ValueMap,
}

impl Formdata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.values.put(name, value);
    }

    /// Copy body fields in, skipping names the query string already carries
    pub fn merge_without<I, N, V>(&mut self, fields: I, query: &ValueMap)
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str> + Into<String>,
        V: Into<String>,
    {
        for (name, value) in fields {
            if !query.contains(name.as_ref()) {
                self.put(name, value);
            }
        }
    }
}

impl Deref for Formdata {
    type Target = ValueMap;

    fn deref(&self) -> &ValueMap {
        &self.values
    }
}

/// Form fields plus the files submitted with them
#[derive(Debug, Default)]
pub struct Multipart {
    form: Formdata,
    files: Vec<FileUpload>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn form(&self) -> &Formdata {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut Formdata {
        &mut self.form
    }

    pub fn put_file(&mut self, upload: FileUpload) {
        self.files.push(upload);
    }

    /// First file submitted under `name`
    pub fn file(&self, name: &str) -> Option<&FileUpload> {
        self.files.iter().find(|file| file.name() == name)
    }

    pub fn files(&self) -> &[FileUpload] {
        &self.files
    }
}

impl Deref for Multipart {
    type Target = Formdata;

    fn deref(&self) -> &Formdata {
        &self.form
    }
}
