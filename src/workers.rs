// Multi-threaded HTTP/1.1 server built on an epoll reactor.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Fixed pool of worker threads executing connection tasks.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;

/// Opaque unit of work. Tasks have no result: a task handles its own failures.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of long-lived threads consuming one shared FIFO queue.
///
/// Each enqueued task wakes exactly one idle worker. Dropping the pool closes the queue: workers
/// keep draining whatever is already queued and then exit, but nothing waits for them to do so.
/// Use [`WorkerPool::join`] when the backlog must be finished.
pub struct WorkerPool {
    sender: Option<chan::Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers named `httpd-worker-<n>`.
    ///
    /// # Error
    ///
    /// Errors with a system/OS error if it was impossible to spawn a thread.
    pub fn new(count: usize) -> io::Result<Self> {
        let (sender, receiver) = chan::unbounded::<Task>();
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("httpd-worker-{index}"))
                .spawn(move || {
                    #[cfg(feature = "log")]
                    log::trace!(target: "workers", "Worker {index} started");

                    // Fails only once the queue is both closed and empty
                    while let Ok(task) = receiver.recv() {
                        task();
                    }

                    #[cfg(feature = "log")]
                    log::trace!(target: "workers", "Worker {index} stopped");
                })?;
            workers.push(handle);
        }

        #[cfg(feature = "log")]
        log::debug!(target: "workers", "Spawned {count} worker threads");

        Ok(WorkerPool {
            sender: Some(sender),
            workers,
        })
    }

    pub fn len(&self) -> usize { self.workers.len() }

    pub fn is_empty(&self) -> bool { self.workers.is_empty() }

    /// Number of tasks waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(chan::Sender::len).unwrap_or_default()
    }

    /// Enqueues a task. Returns the task back if the pool is already shut down.
    pub fn add_task<F>(&self, task: F) -> Result<(), Task>
    where F: FnOnce() + Send + 'static {
        let task: Task = Box::new(task);
        match &self.sender {
            Some(sender) => sender.send(task).map_err(|chan::SendError(task)| task),
            None => Err(task),
        }
    }

    /// Closes the queue and waits for the workers to finish the backlog.
    pub fn join(mut self) -> thread::Result<()> {
        self.sender = None;
        let mut res = Ok(());
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.join() {
                res = Err(err);
            }
        }
        res
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            #[cfg(feature = "log")]
            log::debug!(target: "workers", "Closing task queue of {} workers", self.workers.len());
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    use super::*;

    #[test]
    fn executes_every_task_once() {
        const PRODUCERS: usize = 8;
        const TASKS: usize = 500;

        let pool = Arc::new(WorkerPool::new(4).unwrap());
        let counters =
            Arc::new((0..PRODUCERS * TASKS).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        let barrier = Arc::new(Barrier::new(PRODUCERS));

        let producers = (0..PRODUCERS)
            .map(|p| {
                let pool = pool.clone();
                let counters = counters.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for t in 0..TASKS {
                        let counters = counters.clone();
                        pool.add_task(move || {
                            counters[p * TASKS + t].fetch_add(1, Ordering::SeqCst);
                        })
                        .map_err(|_| ())
                        .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for producer in producers {
            producer.join().unwrap();
        }

        let pool = Arc::try_unwrap(pool).map_err(|_| ()).unwrap();
        pool.join().unwrap();
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn rejects_after_close() {
        let mut pool = WorkerPool::new(1).unwrap();
        pool.sender = None;
        assert!(pool.add_task(|| {}).is_err());
        assert_eq!(pool.queued(), 0);
        pool.join().unwrap();
    }
}
