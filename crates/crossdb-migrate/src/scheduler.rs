//! Bounded-concurrency executor for keyed work items with prerequisites.
//!
//! Workers claim items from a shared queue. An item whose prerequisites are
//! not all done goes back to the end of the queue and the worker sleeps for
//! the retry delay. Prerequisites naming the item itself or a key absent from
//! the input never block. Waiting only counts as a retry while no action is
//! running anywhere in the pool and nothing has completed since the item was
//! last checked, so a slow prerequisite never starves its dependents. An item
//! still waiting after `max_retries` idle attempts aborts the pool with
//! [`MigrateError::Scheduler`]; so does a worker panic.
//! The first failing action aborts the pool and its error is returned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// One schedulable unit.
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    pub key: String,
    pub dependencies: Vec<String>,
    pub payload: T,
}

impl<T> WorkItem<T> {
    pub fn new(key: impl Into<String>, dependencies: Vec<String>, payload: T) -> Self {
        Self {
            key: key.into(),
            dependencies,
            payload,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: 6,
            retry_delay: Duration::from_millis(50),
            max_retries: 2400,
        }
    }
}

struct Pending<T> {
    key: String,
    dependencies: Vec<String>,
    payload: T,
    retries: u32,
    /// Completed count observed at the last check.
    seen_done: usize,
}

struct Shared<T> {
    queue: Mutex<VecDeque<Pending<T>>>,
    done: Mutex<HashSet<String>>,
    running: AtomicUsize,
    abort: AtomicBool,
}

fn poisoned() -> MigrateError {
    MigrateError::Scheduler("scheduler state lock poisoned".to_string())
}

impl<T> Shared<T> {
    fn claim(&self) -> Result<Option<Pending<T>>> {
        Ok(self.queue.lock().map_err(|_| poisoned())?.pop_front())
    }

    fn requeue(&self, item: Pending<T>) -> Result<()> {
        self.queue.lock().map_err(|_| poisoned())?.push_back(item);
        Ok(())
    }

    /// Prerequisites of `item` that have not completed yet, with the number
    /// of completed items.
    fn missing(&self, item: &Pending<T>) -> Result<(Vec<String>, usize)> {
        let done = self.done.lock().map_err(|_| poisoned())?;
        let missing = item
            .dependencies
            .iter()
            .filter(|d| !done.contains(*d))
            .cloned()
            .collect();
        Ok((missing, done.len()))
    }

    fn complete(&self, key: String) -> Result<()> {
        self.done.lock().map_err(|_| poisoned())?.insert(key);
        Ok(())
    }
}

async fn worker_loop<T, F, Fut>(
    worker: usize,
    shared: Arc<Shared<T>>,
    action: Arc<F>,
    options: SchedulerOptions,
) -> Result<()>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        if shared.abort.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(mut item) = shared.claim()? else {
            debug!("Scheduler worker {} finished", worker);
            return Ok(());
        };

        let (missing, done_count) = shared.missing(&item)?;
        if missing.is_empty() {
            let key = item.key;
            shared.running.fetch_add(1, Ordering::SeqCst);
            let outcome = action(item.payload).await;
            if let Err(e) = outcome {
                shared.running.fetch_sub(1, Ordering::SeqCst);
                shared.abort.store(true, Ordering::SeqCst);
                return Err(e);
            }
            shared.complete(key)?;
            shared.running.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        if shared.running.load(Ordering::SeqCst) > 0 || done_count != item.seen_done {
            item.retries = 0;
            item.seen_done = done_count;
        } else {
            item.retries += 1;
        }
        if item.retries > options.max_retries {
            shared.abort.store(true, Ordering::SeqCst);
            return Err(MigrateError::Scheduler(format!(
                "work item '{}' starved after {} retries waiting for {}",
                item.key,
                options.max_retries,
                missing.join(", ")
            )));
        }
        shared.requeue(item)?;
        tokio::time::sleep(options.retry_delay).await;
    }
}

/// Run every item once, each after its prerequisites.
pub async fn run_all<T, F, Fut>(
    items: Vec<WorkItem<T>>,
    options: &SchedulerOptions,
    action: F,
) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if items.is_empty() {
        return Ok(());
    }
    let keys: HashSet<String> = items.iter().map(|i| i.key.clone()).collect();
    let queue: VecDeque<Pending<T>> = items
        .into_iter()
        .map(|item| {
            let key = item.key;
            let dependencies = item
                .dependencies
                .into_iter()
                .filter(|d| d != &key && keys.contains(d))
                .collect();
            Pending {
                key,
                dependencies,
                payload: item.payload,
                retries: 0,
                seen_done: 0,
            }
        })
        .collect();

    let workers = options.workers.max(1).min(queue.len());
    let shared = Arc::new(Shared {
        queue: Mutex::new(queue),
        done: Mutex::new(HashSet::new()),
        running: AtomicUsize::new(0),
        abort: AtomicBool::new(false),
    });
    let action = Arc::new(action);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let shared = shared.clone();
        let action = action.clone();
        let options = options.clone();
        handles.push(tokio::spawn(worker_loop(worker, shared, action, options)));
    }

    let mut first_error = None;
    for handle in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => {
                shared.abort.store(true, Ordering::SeqCst);
                Err(MigrateError::Scheduler(format!("worker panicked: {}", e)))
            }
        };
        if let Err(e) = outcome {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                warn!("Additional scheduler failure: {}", e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// A dependency cycle among distinct keys, if any. Self-references and
/// unknown keys are ignored.
pub fn find_cycle(graph: &[(String, Vec<String>)]) -> Option<Vec<String>> {
    let edges: HashMap<&str, Vec<&str>> = graph
        .iter()
        .map(|(k, deps)| {
            let deps = deps
                .iter()
                .map(String::as_str)
                .filter(|d| *d != k.as_str())
                .collect();
            (k.as_str(), deps)
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                return Some(path[start..].iter().map(|s| s.to_string()).collect());
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        path.push(node);
        for next in edges.get(node).into_iter().flatten() {
            if edges.contains_key(next) {
                if let Some(cycle) = visit(next, edges, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for (key, _) in graph {
        let mut path = Vec::new();
        if let Some(cycle) = visit(key, &edges, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}
