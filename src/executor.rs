use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A unit of work handed to an executor
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks, usually on other threads
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);

    /// Name used in log records
    fn name(&self) -> &str;
}

/// Whether two handles point at the same executor instance
pub fn same_executor(a: &Arc<dyn Executor>, b: &Arc<dyn Executor>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Runs every task immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SameThreadExecutor;

impl Executor for SameThreadExecutor {
    fn execute(&self, task: Task) {
        task();
    }

    fn name(&self) -> &str {
        "same-thread"
    }
}

/// A fixed set of threads pulling tasks from a shared queue
pub struct WorkerPool {
    name: String,
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `threads` workers named `{name}-{n}`
    pub fn new(name: &str, threads: usize) -> io::Result<Self> {
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = channel::unbounded();
        let mut handles = Vec::with_capacity(threads);

        for id in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })?;
            handles.push(handle);
        }

        debug!("started worker pool {} with {} threads", name, handles.len());

        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            handles,
        })
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        match &self.sender {
            Some(sender) => {
                if let Err(err) = sender.send(task) {
                    // Pool is shutting down; run the work rather than lose it
                    warn!("worker pool {} closed, running task inline", self.name);
                    (err.0)();
                }
            }
            None => task(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit
        self.sender.take();
        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}
