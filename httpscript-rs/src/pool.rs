//! A fixed pool of single-threaded script workers.
//!
//! Lua states are not `Send`, so a script has to live on one thread from
//! start to finish. Each worker is an OS thread (`script-N`) that owns a
//! current-thread tokio runtime and a `LocalSet`; a worker interleaves many
//! runs, switching at their await points. Submissions are dispatched
//! round-robin and come back as `Send` futures, so a multi-threaded host can
//! fan out freely.
//!
//! Dropping a submission future cancels the run on its worker. Dropping the
//! pool stops accepting work, lets in-flight runs finish, and joins the
//! threads.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::client::HttpClient;
use crate::error::ErrorKind;
use crate::evaluator::ScriptEvaluator;
use crate::output::OutputSink;
use crate::result::ExecutionResult;
use crate::script::Script;

struct Job {
    script: Script,
    client: Arc<dyn HttpClient>,
    output: Arc<dyn OutputSink>,
    deadline: Duration,
    reply: oneshot::Sender<ExecutionResult>,
}

/// Round-robin pool of script worker threads.
pub struct ScriptPool {
    senders: Vec<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    next: AtomicUsize,
    evaluator: ScriptEvaluator,
}

impl ScriptPool {
    /// Start `workers` threads (at least one).
    pub fn new(workers: usize, evaluator: ScriptEvaluator) -> std::io::Result<Self> {
        let count = workers.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for i in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let eval = evaluator.clone();
            let handle = std::thread::Builder::new()
                .name(format!("script-{i}"))
                .spawn(move || worker_main(eval, rx))?;
            senders.push(tx);
            handles.push(handle);
        }

        tracing::debug!(workers = count, "script pool started");
        Ok(Self {
            senders,
            workers: handles,
            next: AtomicUsize::new(0),
            evaluator,
        })
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Queue a run with the evaluator's default timeout.
    pub fn submit(
        &self,
        script: Script,
        client: Arc<dyn HttpClient>,
        output: Arc<dyn OutputSink>,
    ) -> impl Future<Output = ExecutionResult> + Send + 'static {
        let deadline = self.evaluator.config().timeout;
        self.submit_with_deadline(script, client, output, deadline)
    }

    /// Queue a run that times out after `deadline`.
    pub fn submit_with_deadline(
        &self,
        script: Script,
        client: Arc<dyn HttpClient>,
        output: Arc<dyn OutputSink>,
        deadline: Duration,
    ) -> impl Future<Output = ExecutionResult> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let name = script.name().to_owned();
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();

        // A closed worker drops the job, which resolves `rx` below.
        let _ = self.senders[idx].send(Job {
            script,
            client,
            output,
            deadline,
            reply,
        });

        async move {
            rx.await.unwrap_or_else(|_| {
                ExecutionResult::failure(
                    ErrorKind::ScriptError,
                    format!("script worker stopped before '{name}' finished"),
                )
            })
        }
    }

    /// Stop the pool and wait for in-flight runs to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.senders.clear();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("script worker panicked");
            }
        }
    }
}

impl Drop for ScriptPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(evaluator: ScriptEvaluator, mut jobs: mpsc::UnboundedReceiver<Job>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start script worker runtime");
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async {
        while let Some(job) = jobs.recv().await {
            tokio::task::spawn_local(run_job(evaluator.clone(), job));
        }
    });
    // drain runs that were still in flight when the queue closed
    rt.block_on(local);
}

async fn run_job(evaluator: ScriptEvaluator, job: Job) {
    let Job {
        script,
        client,
        output,
        deadline,
        mut reply,
    } = job;

    let outcome = tokio::select! {
        result = evaluator.run_with_deadline(&script, client, output, deadline) => Some(result),
        _ = reply.closed() => None,
    };

    match outcome {
        Some(result) => {
            let _ = reply.send(result);
        }
        None => tracing::debug!(script = script.name(), "script run cancelled"),
    }
}
