//! A small cooperative thread pool for running independent work units in
//! parallel, e.g. multiple randomized plan-rearrangement attempts.
//!
//! Lifted near-verbatim from the teacher's `database.rs`; see `DESIGN.md`.
//! The fixpoint controller itself (`fixpoint.rs`) does *not* use this —
//! per SPEC_FULL.md §5 it is single-threaded by spec. This exists for the
//! one place SPEC_FULL.md §10 calls out: `plan --attempts N`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Wraps a heap-allocated closure with a difficulty score used for sorting
/// within the work queue; jobs with a higher estimate dispatch first.
struct Job(usize, Box<dyn FnMut() + Send>);

impl PartialEq for Job {
    fn eq(&self, other: &Job) -> bool {
        self.0 == other.0
    }
}
impl Eq for Job {}
impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Job) -> Option<Ordering> {
        Some(self.0.cmp(&other.0))
    }
}
impl Ord for Job {
    fn cmp(&self, other: &Job) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// Holds the state of the work queue and allows queueing tasks onto the
/// thread pool.
#[derive(Clone)]
pub struct Executor {
    concurrency: usize,
    mutex: Arc<Mutex<BinaryHeap<Job>>>,
    work_cv: Arc<Condvar>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let g = self.mutex.lock().unwrap();
        write!(f, "Executor(active={})", g.len())
    }
}

fn queue_work(exec: &Executor, estimate: usize, mut f: Box<dyn FnMut() + Send>) {
    if exec.concurrency <= 1 {
        f();
        return;
    }
    let mut wq = exec.mutex.lock().unwrap();
    wq.push(Job(estimate, f));
    exec.work_cv.notify_one();
}

impl Executor {
    /// Instantiates a new work queue and spawns the threads servicing it.
    pub fn new(concurrency: usize) -> Executor {
        let mutex = Arc::new(Mutex::new(BinaryHeap::new()));
        let cv = Arc::new(Condvar::new());

        if concurrency > 1 {
            for _ in 0..concurrency {
                let mutex = mutex.clone();
                let cv = cv.clone();
                thread::spawn(move || loop {
                    let mut task: Job = {
                        let mut mutexg = mutex.lock().unwrap();
                        while mutexg.is_empty() {
                            mutexg = cv.wait(mutexg).unwrap();
                        }
                        mutexg.pop().unwrap()
                    };
                    (task.1)();
                });
            }
        }

        Executor {
            concurrency,
            mutex,
            work_cv: cv,
        }
    }

    /// Queues a job on this work queue. Returns a `Promise` that can be
    /// used to wait for completion; a panic inside `task` is rethrown when
    /// the promise is awaited.
    pub fn exec<TASK, RV>(&self, estimate: usize, task: TASK) -> Promise<RV>
    where
        TASK: FnOnce() -> RV,
        TASK: Send + 'static,
        RV: Send + 'static,
    {
        let parts = Arc::new((Mutex::new(None), Condvar::new()));

        let partsc = parts.clone();
        let mut tasko = Some(task);
        queue_work(
            self,
            estimate,
            Box::new(move || {
                let mut g = partsc.0.lock().unwrap();
                let taskf = panic::AssertUnwindSafe(tasko.take().expect("should only be called once"));
                *g = Some(panic::catch_unwind(taskf));
                partsc.1.notify_one();
            }),
        );

        Promise::new_once(move || {
            let mut g = parts.0.lock().unwrap();
            while g.is_none() {
                g = parts.1.wait(g).unwrap();
            }
            g.take().unwrap().unwrap()
        })
    }
}

/// A handle for a value that will be available later.
pub struct Promise<T>(Box<dyn FnMut() -> T + Send>);

impl<T> Promise<T> {
    pub fn wait(mut self) -> T {
        (self.0)()
    }

    pub fn new_once<FN>(fun: FN) -> Promise<T>
    where
        FN: FnOnce() -> T + Send + 'static,
    {
        let mut funcell = Some(fun);
        Promise(Box::new(move || (funcell.take().unwrap())()))
    }

    pub fn new(value: T) -> Self
    where
        T: Send + 'static,
    {
        Promise::new_once(move || value)
    }

    pub fn join(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
    where
        T: 'static,
    {
        Promise::new_once(move || promises.into_iter().map(|p| p.wait()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_threaded_executor_runs_inline() {
        let exec = Executor::new(1);
        let promise = exec.exec(0, || 2 + 2);
        assert_eq!(promise.wait(), 4);
    }

    #[test]
    fn multi_threaded_executor_runs_all_jobs() {
        let exec = Executor::new(4);
        let promises: Vec<_> = (0..8).map(|i| exec.exec(i, move || i * i)).collect();
        let results = Promise::join(promises).wait();
        assert_eq!(results.iter().sum::<usize>(), (0..8).map(|i| i * i).sum());
    }
}

/// Runs `f`, logging elapsed time at `debug` level if it exceeds the
/// resolution worth reporting. Generalizes the teacher's `time()` helper
/// (see SPEC_FULL.md §10) into something any pass can call.
pub fn timed<R, F: FnOnce() -> R>(name: &str, f: F) -> R {
    let start = std::time::Instant::now();
    let result = f();
    log::debug!("{} took {:?}", name, start.elapsed());
    result
}
