use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send>;

/// A single-threaded sequenced dispatcher: jobs run one at a time, in
/// submission order, on a dedicated task. Listener callbacks execute here so
/// the transport worker and the supervisor never run user code directly.
#[derive(Clone)]
pub struct SerialExecutor {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                job();
            }
        });
        Self { jobs }
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            log::warn!("[EXECUTOR] dispatcher gone, dropping job");
        }
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}
