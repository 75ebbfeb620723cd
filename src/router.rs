use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::executor::{Executor, WorkerPool};
use crate::http::Method;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_LOG_TARGET: &str = "engine_context";

/// The route a request was matched against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// The HTTP method this route responds to
    pub method: Method,

    /// The path pattern for this route
    pub pattern: String,
}

impl Route {
    pub fn new(method: Method, pattern: &str) -> Self {
        Self {
            method,
            pattern: pattern.to_string(),
        }
    }
}

/// The router that owns the contexts: shared worker, limits and logging.
///
/// Contexts only submit work to the worker; its lifecycle belongs here.
pub struct Router {
    config: ServerConfig,
    worker: Arc<dyn Executor>,
    log_target: String,
}

// Custom Debug implementation since the worker can't be derived
impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("worker", &self.worker.name())
            .field("log_target", &self.log_target)
            .finish()
    }
}

impl Router {
    /// Create a router with its own worker pool
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let worker = WorkerPool::new("worker", config.worker_threads)?;
        Ok(Self::with_worker(config, Arc::new(worker)))
    }

    /// Create a router around an existing executor
    pub fn with_worker(config: ServerConfig, worker: Arc<dyn Executor>) -> Self {
        Self {
            config,
            worker,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }

    /// Set the target log records are emitted under
    pub fn with_log_target(mut self, target: &str) -> Self {
        self.log_target = target.to_string();
        self
    }

    /// Default worker for dispatched handlers
    pub fn worker(&self) -> &Arc<dyn Executor> {
        &self.worker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Directory multipart files are spooled to
    pub fn tmpdir(&self) -> &Path {
        &self.config.tmpdir
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn max_request_size(&self) -> u64 {
        self.config.max_request_size
    }

    pub fn log_target(&self) -> &str {
        &self.log_target
    }
}
