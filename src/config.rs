use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings the owning router hands to every request context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // I/O settings
    pub buffer_size: usize,
    pub max_request_size: u64,

    // Multipart spooling
    pub tmpdir: PathBuf,

    // Thread configuration
    pub worker_threads: usize,

    // Response defaults
    pub default_charset: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024, // 16 KB
            max_request_size: 10 * 1024 * 1024, // 10 MB

            tmpdir: std::env::temp_dir(),

            worker_threads: num_cpus::get(),

            default_charset: "UTF-8".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the I/O buffer size used for streaming and multipart parsing
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the maximum request body size, `0` disables the limit
    pub fn with_max_request_size(mut self, size: u64) -> Self {
        self.max_request_size = size;
        self
    }

    /// Set the directory file uploads are spooled to
    pub fn with_tmpdir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.tmpdir = dir.into();
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Check the values make sense before a router is built from them
    pub fn validate(&self) -> ServerResult<()> {
        if self.buffer_size == 0 {
            return Err(ServerError::Config("buffer_size must be greater than zero".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be greater than zero".to_string()));
        }
        if self.default_charset.is_empty() {
            return Err(ServerError::Config("default_charset must not be empty".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
