use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};

/// Where the content of an uploaded file lives until the request ends
enum Storage {
    Memory(Bytes),
    Disk(TempPath),
}

struct UploadInner {
    name: String,
    file_name: String,
    content_type: Option<String>,
    size: u64,
    storage: Mutex<Option<Storage>>,
}

/// A file submitted in a multipart body.
///
/// Handles are cheap clones of the same upload: the multipart container and
/// the context's upload registry share it, and `destroy` releases the backing
/// storage for all of them.
#[derive(Clone)]
pub struct FileUpload {
    inner: Arc<UploadInner>,
}

impl FileUpload {
    /// Keep small content in memory, spool anything over `threshold` into `dir`
    pub fn spool(
        name: &str,
        file_name: &str,
        content_type: Option<&str>,
        content: &[u8],
        dir: &Path,
        threshold: usize,
    ) -> io::Result<Self> {
        let storage = if content.len() <= threshold {
            Storage::Memory(Bytes::copy_from_slice(content))
        } else {
            let mut file = NamedTempFile::new_in(dir)?;
            file.write_all(content)?;
            file.flush()?;
            Storage::Disk(file.into_temp_path())
        };

        Ok(Self {
            inner: Arc::new(UploadInner {
                name: name.to_string(),
                file_name: file_name.to_string(),
                content_type: content_type.map(str::to_string),
                size: content.len() as u64,
                storage: Mutex::new(Some(storage)),
            }),
        })
    }

    /// Form field the file was submitted under
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// File name the client supplied
    pub fn file_name(&self) -> &str {
        &self.inner.file_name
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Spooled file location, `None` while the content is held in memory
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.inner.storage.lock() {
            Some(Storage::Disk(path)) => Some(path.to_path_buf()),
            _ => None,
        }
    }

    /// Whole content of the upload
    pub fn bytes(&self) -> io::Result<Bytes> {
        match &*self.inner.storage.lock() {
            Some(Storage::Memory(bytes)) => Ok(bytes.clone()),
            Some(Storage::Disk(path)) => Ok(Bytes::from(fs::read(path)?)),
            None => Err(destroyed()),
        }
    }

    /// Read the content as a stream
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &*self.inner.storage.lock() {
            Some(Storage::Memory(bytes)) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Some(Storage::Disk(path)) => Ok(Box::new(File::open(path)?)),
            None => Err(destroyed()),
        }
    }

    /// Release the backing storage; later calls do nothing
    pub fn destroy(&self) -> io::Result<()> {
        let storage = self.inner.storage.lock().take();
        match storage {
            Some(Storage::Disk(path)) => path.close(),
            Some(Storage::Memory(_)) | None => Ok(()),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.storage.lock().is_none()
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("name", &self.inner.name)
            .field("file_name", &self.inner.file_name)
            .field("content_type", &self.inner.content_type)
            .field("size", &self.inner.size)
            .finish()
    }
}

fn destroyed() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "file upload already destroyed")
}
