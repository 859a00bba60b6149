//! Elastic pool of reusable background lanes.
//!
//! A lane is a worker thread with its own serial job queue. Dispatching a job
//! takes the oldest idle lane (or spawns a new one when none is idle), runs the
//! job there, and puts the lane back at the end of the idle list. Lanes are
//! never retired, so the pool only grows to the peak number of jobs that were
//! in flight at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crossbeam_channel::Sender;
use tracing::debug;

use super::error::PoolError;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
struct Lane {
    index: usize,
    jobs: Sender<Job>,
}

struct PoolShared {
    name: String,
    /// Idle lanes, oldest first. The only acquire/release gate.
    idle: Mutex<VecDeque<Lane>>,
    lanes_created: AtomicUsize,
    busy: AtomicUsize,
}

impl PoolShared {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Lane>> {
        // Jobs never run while the gate is held, so a poisoned lock still
        // holds a consistent list.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, lane: Lane) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
        self.idle().push_back(lane);
    }
}

/// A named pool of background lanes.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                idle: Mutex::new(VecDeque::new()),
                lanes_created: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Grow the pool until at least `min_lanes` lanes exist.
    pub fn seed(&self, min_lanes: usize) -> Result<(), PoolError> {
        let mut idle = self.shared.idle();
        while self.lanes_created() < min_lanes {
            let lane = self.spawn_lane()?;
            idle.push_back(lane);
        }
        Ok(())
    }

    /// Run `task` on a lane, then return the lane to the pool and call `done`.
    pub fn dispatch<T, D>(&self, task: T, done: D) -> Result<(), PoolError>
    where
        T: FnOnce() + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        let lane = self.acquire()?;
        let shared = Arc::clone(&self.shared);
        let released = lane.clone();
        let job: Job = Box::new(move || {
            task();
            shared.release(released);
            done();
        });
        lane.jobs.send(job).map_err(|_| {
            self.shared.busy.fetch_sub(1, Ordering::Relaxed);
            PoolError::LaneClosed(self.lane_name(lane.index))
        })
    }

    /// Lanes spawned since the pool was created.
    pub fn lanes_created(&self) -> usize {
        self.shared.lanes_created.load(Ordering::Relaxed)
    }

    /// Lanes currently waiting for work.
    pub fn idle_lanes(&self) -> usize {
        self.shared.idle().len()
    }

    /// Jobs currently running or queued on a lane.
    pub fn busy_lanes(&self) -> usize {
        self.shared.busy.load(Ordering::Relaxed)
    }

    fn acquire(&self) -> Result<Lane, PoolError> {
        let mut idle = self.shared.idle();
        let lane = match idle.pop_front() {
            Some(lane) => lane,
            None => {
                let lane = self.spawn_lane()?;
                debug!(pool = %self.shared.name, lane = lane.index, "pool grew");
                lane
            }
        };
        self.shared.busy.fetch_add(1, Ordering::Relaxed);
        Ok(lane)
    }

    fn lane_name(&self, index: usize) -> String {
        format!("{}-{}", self.shared.name, index)
    }

    fn spawn_lane(&self) -> Result<Lane, PoolError> {
        let index = self.shared.lanes_created.fetch_add(1, Ordering::Relaxed) + 1;
        let name = self.lane_name(index);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in rx.iter() {
                    job();
                }
            })
            .map_err(|source| PoolError::Spawn { name, source })?;
        Ok(Lane { index, jobs: tx })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("lanes_created", &self.lanes_created())
            .field("busy", &self.busy_lanes())
            .finish()
    }
}
