// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Thread lifecycle management.

use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{error, info};

/// How often long-running threads should check whether their group is
/// shutting down.
pub const CHECK_FOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// The least time between two starts of the same respawnable task. A
/// task that dies sooner is restarted only once this much time has
/// passed, so that a task failing immediately cannot spin.
const RESPAWN_THROTTLE: Duration = Duration::from_secs(1);

////////////////////////////////////////////////////////////////////////
// THREAD GROUPS                                                      //
////////////////////////////////////////////////////////////////////////

/// A set of threads that are shut down together.
///
/// Threads are started either as one-shot threads
/// ([`ThreadGroup::start_oneshot`]), which run their task once, or as
/// respawnable threads ([`ThreadGroup::start_respawnable`]), whose task
/// is run again whenever it returns or panics while the group is still
/// running.
///
/// Shutdown is cooperative. [`ThreadGroup::shut_down`] only marks the
/// group; tasks are expected to poll
/// [`ThreadGroup::is_shutting_down`] (at least every
/// [`CHECK_FOR_SHUTDOWN_TIMEOUT`]) and return. Once they all have,
/// [`ThreadGroup::await_shutdown`] returns.
pub struct ThreadGroup {
    state: Mutex<GroupState>,

    /// Notified when shutdown begins and when the last thread exits.
    changed: Condvar,
}

#[derive(Default)]
struct GroupState {
    live_threads: usize,
    shutting_down: bool,
}

/// A task that can be run more than once.
type SharedTask = Arc<dyn Fn() + Send + Sync + 'static>;

impl ThreadGroup {
    /// Creates an empty thread group.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GroupState::default()),
            changed: Condvar::new(),
        })
    }

    /// Starts a thread named `name` that runs `task` once.
    pub fn start_oneshot<F>(self: &Arc<Self>, name: &str, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.running_state()?;
        spawn(self, &mut state, name, None, task).map_err(Into::into)
    }

    /// Starts a thread named `name` that runs `task`, and keeps
    /// running it in a fresh thread each time it returns or panics,
    /// until the group shuts down.
    pub fn start_respawnable<F>(self: &Arc<Self>, name: &str, task: F) -> Result<(), Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.running_state()?;
        let task: SharedTask = Arc::new(task);
        let body = task.clone();
        spawn(self, &mut state, name, Some(task), move || body()).map_err(Into::into)
    }

    /// Begins shutting down the group. No threads can be started from
    /// now on, and respawnable tasks are no longer restarted.
    pub fn shut_down(&self) {
        self.state.lock().unwrap().shutting_down = true;
        self.changed.notify_all();
    }

    /// Blocks until shutdown has begun and every thread of the group
    /// has exited. Calling this from a thread of the group deadlocks.
    pub fn await_shutdown(&self) {
        let state = self.state.lock().unwrap();
        let _state = self
            .changed
            .wait_while(state, |s| !s.shutting_down || s.live_threads > 0)
            .unwrap();
    }

    /// Returns whether the group is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }

    /// Returns the number of threads currently running in the group.
    pub fn live_threads(&self) -> usize {
        self.state.lock().unwrap().live_threads
    }

    fn running_state(&self) -> Result<MutexGuard<GroupState>, Error> {
        let state = self.state.lock().unwrap();
        if state.shutting_down {
            Err(Error::ShuttingDown)
        } else {
            Ok(state)
        }
    }
}

impl fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ThreadGroup")
            .field("live_threads", &state.live_threads)
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

/// Spawns a thread running `body`, counting it in `state`. If
/// `respawn` is given, the thread's [`ExitGuard`] uses it to start a
/// replacement.
fn spawn<F>(
    group: &Arc<ThreadGroup>,
    state: &mut MutexGuard<GroupState>,
    name: &str,
    respawn: Option<SharedTask>,
    body: F,
) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    state.live_threads += 1;
    let guard = ExitGuard {
        group: group.clone(),
        spawner: thread::current().id(),
        respawn,
        started_at: Instant::now(),
    };
    let result = thread::Builder::new().name(name.to_owned()).spawn(move || {
        let _guard = guard;
        body();
    });
    if result.is_err() {
        state.live_threads -= 1;
    }
    result.map(|_| ())
}

/// Owned by every thread of a group; its drop, when the thread's task
/// returns or unwinds, does the bookkeeping and any respawn.
struct ExitGuard {
    group: Arc<ThreadGroup>,
    spawner: ThreadId,
    respawn: Option<SharedTask>,
    started_at: Instant,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let current = thread::current();

        // Dropped by the spawning thread: the OS refused to start the
        // thread, and spawn() undoes the count itself. The records
        // mutex is already held in that case.
        if current.id() == self.spawner {
            return;
        }

        let name = current.name().unwrap_or("anonymous");
        if thread::panicking() {
            error!("Thread {} panicked", name);
        }

        let mut state = self.group.state.lock().unwrap();
        if let Some(task) = self.respawn.take() {
            if !state.shutting_down {
                if !thread::panicking() {
                    error!("Thread {} exited prematurely", name);
                }
                let elapsed = self.started_at.elapsed();
                if elapsed < RESPAWN_THROTTLE {
                    let delay = RESPAWN_THROTTLE - elapsed;
                    info!("Delaying respawn of thread {} by {} ms", name, delay.as_millis());
                    // The wait ends early if shutdown begins.
                    state = self.group.changed.wait_timeout(state, delay).unwrap().0;
                }
                if !state.shutting_down {
                    let body = task.clone();
                    if let Err(e) = spawn(&self.group, &mut state, name, Some(task), move || body()) {
                        error!("Respawn of thread {} failed: {}", name, e);
                    }
                }
            }
        }

        state.live_threads -= 1;
        if state.shutting_down && state.live_threads == 0 {
            self.group.changed.notify_all();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error type for [`ThreadGroup`] operations.
#[derive(Debug)]
pub enum Error {
    /// The OS could not create a thread.
    Io(io::Error),

    /// The [`ThreadGroup`] is shutting down.
    ShuttingDown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to start thread: {}", err),
            Self::ShuttingDown => f.write_str("thread group is shutting down"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn shutdown_waits_for_cooperating_threads() {
        const POLL: Duration = Duration::from_millis(50);
        let exited = Arc::new(AtomicUsize::new(0));
        let group = ThreadGroup::new();
        for i in 0..2 {
            let exited = exited.clone();
            let member = group.clone();
            group
                .start_oneshot(&format!("poller {}", i), move || {
                    while !member.is_shutting_down() {
                        thread::sleep(POLL);
                    }
                    exited.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(group.live_threads(), 2);
        group.shut_down();
        group.await_shutdown();
        assert_eq!(exited.load(Ordering::SeqCst), 2);
        assert_eq!(group.live_threads(), 0);
    }

    #[test]
    fn respawnable_tasks_are_restarted() {
        let runs = Arc::new((Mutex::new(0), Condvar::new()));
        let counter = runs.clone();
        let group = ThreadGroup::new();
        group
            .start_respawnable("flaky", move || {
                let (count, wakeup) = &*counter;
                *count.lock().unwrap() += 1;
                wakeup.notify_all();
            })
            .unwrap();

        let (count, wakeup) = &*runs;
        let count = wakeup.wait_while(count.lock().unwrap(), |n| *n < 2).unwrap();
        assert!(*count >= 2);
        drop(count);
        group.shut_down();
        group.await_shutdown();
    }

    #[test]
    fn no_threads_start_after_shutdown() {
        let group = ThreadGroup::new();
        group.shut_down();
        assert!(matches!(
            group.start_oneshot("late", || ()),
            Err(Error::ShuttingDown)
        ));
        assert!(matches!(
            group.start_respawnable("late", || ()),
            Err(Error::ShuttingDown)
        ));
        group.await_shutdown();
    }
}
