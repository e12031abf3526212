//! Retry buffer: bounded FIFO of pending writes for one backend
//!
//! `push` is non-blocking and rejects when the byte bound would be
//! exceeded. A drain task pops the oldest jobs, coalesces neighbours that
//! share `(query, auth)` into one POST up to the batch cap, and backs off
//! exponentially on failure. Occupancy is only released once a batch has
//! been accepted, so the bound holds while a POST is in flight. The buffer
//! is volatile; whatever it holds at shutdown is lost.

use crate::backend::http::BackendClient;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Delay after the first failed attempt; doubles up to the configured cap
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct Job {
    line: Vec<u8>,
    query: String,
    auth: Option<String>,
}

impl Job {
    /// Byte cost including the newline joining overhead
    fn cost(&self) -> usize {
        self.line.len() + 1
    }
}

#[derive(Debug, Default)]
struct Queue {
    jobs: VecDeque<Job>,
    /// Bytes enqueued and not yet successfully delivered
    bytes: usize,
}

/// Bounded retry buffer draining to one backend
pub struct RetryBuffer {
    queue: Mutex<Queue>,
    max_bytes: usize,
    max_batch: usize,
    max_delay: Duration,
    notify: Notify,
    closed: AtomicBool,
}

impl RetryBuffer {
    /// Create the buffer and start its drain task
    pub fn spawn(
        client: Arc<BackendClient>,
        max_bytes: usize,
        max_batch: usize,
        max_delay: Duration,
    ) -> Arc<Self> {
        let buffer = Arc::new(Self {
            queue: Mutex::new(Queue::default()),
            max_bytes,
            max_batch,
            max_delay,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(drain_loop(buffer.clone(), client));
        buffer
    }

    /// Enqueue one row. Returns immediately; `BufferFull` when the row
    /// does not fit.
    pub fn push(&self, line: &[u8], query: &str, auth: Option<&str>) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::BufferFull);
        }

        let job = Job {
            line: line.to_vec(),
            query: query.to_string(),
            auth: auth.map(str::to_string),
        };

        {
            let mut queue = self.queue.lock();
            if queue.bytes + job.cost() > self.max_bytes {
                return Err(Error::BufferFull);
            }
            queue.bytes += job.cost();
            queue.jobs.push_back(job);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Bytes currently held (including batches in flight)
    pub fn pending_bytes(&self) -> usize {
        self.queue.lock().bytes
    }

    /// Stop accepting jobs and let the drain task exit
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Pop the head batch: the oldest job plus any immediate successors
    /// sharing its `(query, auth)`, up to the batch byte cap.
    fn take_batch(&self) -> Option<Vec<Job>> {
        let mut queue = self.queue.lock();
        let head = queue.jobs.pop_front()?;
        let mut size = head.cost();
        let mut batch = vec![head];

        while let Some(next) = queue.jobs.front() {
            let first = &batch[0];
            if next.query != first.query || next.auth != first.auth {
                break;
            }
            if size + next.cost() > self.max_batch {
                break;
            }
            let Some(next) = queue.jobs.pop_front() else {
                break;
            };
            size += next.cost();
            batch.push(next);
        }

        Some(batch)
    }

    /// Return a failed batch to the head of the queue, oldest first
    fn requeue(&self, batch: Vec<Job>) {
        let mut queue = self.queue.lock();
        for job in batch.into_iter().rev() {
            queue.jobs.push_front(job);
        }
    }

    /// Release the bytes of a delivered batch
    fn release(&self, batch: &[Job]) {
        let delivered: usize = batch.iter().map(Job::cost).sum();
        let mut queue = self.queue.lock();
        queue.bytes = queue.bytes.saturating_sub(delivered);
    }

    fn has_jobs(&self) -> bool {
        !self.queue.lock().jobs.is_empty()
    }
}

fn join_lines(batch: &[Job]) -> Vec<u8> {
    let mut body = Vec::with_capacity(batch.iter().map(Job::cost).sum());
    for job in batch {
        body.extend_from_slice(&job.line);
        body.push(b'\n');
    }
    body
}

async fn drain_loop(buffer: Arc<RetryBuffer>, client: Arc<BackendClient>) {
    let mut delay = INITIAL_RETRY_DELAY;

    loop {
        while !buffer.has_jobs() {
            if buffer.is_closed() {
                return;
            }
            buffer.notify.notified().await;
        }
        if buffer.is_closed() {
            return;
        }

        let Some(batch) = buffer.take_batch() else {
            continue;
        };
        let body = join_lines(&batch);
        let query = batch[0].query.clone();
        let auth = batch[0].auth.clone();

        match client.write(&body, &query, auth.as_deref()).await {
            Ok(resp) if resp.ok() => {
                buffer.release(&batch);
                delay = INITIAL_RETRY_DELAY;
                debug!(
                    backend = %client.name(),
                    rows = batch.len(),
                    bytes = body.len(),
                    "drained batch"
                );
            }
            Ok(resp) => {
                warn!(
                    backend = %client.name(),
                    status = resp.status,
                    delay_ms = delay.as_millis() as u64,
                    "backend rejected batch, retrying"
                );
                buffer.requeue(batch);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(buffer.max_delay);
            }
            Err(err) => {
                warn!(
                    backend = %client.name(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "backend write failed, retrying"
                );
                buffer.requeue(batch);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(buffer.max_delay);
            }
        }
    }
}
