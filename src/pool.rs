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

//! The elastic worker pool.
//!
//! Each [`Worker`] is a thread owning one [`Resolver`]. It takes client
//! packets off the shared inbound queue, answers them from the cache or
//! by resolving them, and puts the replies on the outbound queue. The
//! [`WorkerPool`] keeps between `min` and `max` workers running,
//! adding or removing one at a time as the inbound backlog changes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use crate::cache::Cache;
use crate::message::{Message, Rcode, MIN_UDP_PAYLOAD};
use crate::queue::{BoundedQueue, Pop};
use crate::resolver::inspect::{is_empty_response, question_key};
use crate::resolver::{Resolver, Upstream};
use crate::thread::{self, ThreadGroup, CHECK_FOR_SHUTDOWN_TIMEOUT};

/// A datagram and the client it came from or goes to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserPacket {
    pub octets: Vec<u8>,
    pub client: SocketAddr,
}

/// What every worker shares.
pub struct WorkerContext {
    pub group: Arc<ThreadGroup>,
    pub inbound: Arc<BoundedQueue<UserPacket>>,
    pub outbound: Arc<BoundedQueue<UserPacket>>,

    /// The answer cache; `None` if caching is disabled.
    pub cache: Option<Arc<Cache>>,
}

/// Builds the resolver for a new worker.
pub type ResolverFactory<U> = Box<dyn Fn() -> Resolver<U> + Send + Sync>;

////////////////////////////////////////////////////////////////////////
// WORKERS                                                            //
////////////////////////////////////////////////////////////////////////

/// A handle to a worker thread.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    stop: Arc<AtomicBool>,
}

impl Worker {
    /// Starts a worker thread running `resolver`.
    fn start<U>(
        id: usize,
        context: Arc<WorkerContext>,
        resolver: Resolver<U>,
    ) -> Result<Self, thread::Error>
    where
        U: Upstream + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let group = context.group.clone();
        group.start_oneshot(&format!("worker {}", id), move || {
            run_worker(&context, resolver, &stop_flag)
        })?;
        Ok(Self { id, stop })
    }

    /// Tells the worker to stop. It finishes the packet in hand, if
    /// any, closes its resolver's sockets and exits.
    pub fn close(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// The take packet/handle packet loop of a worker thread.
fn run_worker<U: Upstream>(context: &WorkerContext, mut resolver: Resolver<U>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) && !context.group.is_shutting_down() {
        match context.inbound.pop_timeout(CHECK_FOR_SHUTDOWN_TIMEOUT) {
            Pop::Item(packet) => handle_packet(context, &mut resolver, packet),
            Pop::Timeout => continue,
            Pop::Closed => break,
        }
    }
    resolver.close();
}

/// Answers one client packet. Packets that do not parse, or that have
/// no question, are dropped.
fn handle_packet<U: Upstream>(context: &WorkerContext, resolver: &mut Resolver<U>, packet: UserPacket) {
    let query = match Message::from_wire(&packet.octets) {
        Ok(query) if !query.questions.is_empty() => query,
        Ok(_) => {
            trace!("Dropping question-less packet from {}", packet.client);
            return;
        }
        Err(e) => {
            trace!("Dropping malformed packet from {}: {}", packet.client, e);
            return;
        }
    };

    let cached = context.cache.as_ref().and_then(|cache| answer_from_cache(cache, &query));
    let reply = match cached {
        Some(reply) => reply,
        None => match resolver.resolve(&query) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Failed to resolve {:?}: {}", query.question(), e);
                query.clone()
            }
        },
    };
    if is_empty_response(&reply) {
        trace!("Empty response for {:?}", query.question());
    }

    if let Some(octets) = finish_reply(reply, &query) {
        let packet = UserPacket {
            octets,
            client: packet.client,
        };
        if context.outbound.push(packet).is_err() {
            trace!("Outbound queue closed; reply dropped");
        }
    }
}

/// Looks `query` up in the cache. On a hit, the cached answers are
/// spliced into a copy of the query.
fn answer_from_cache(cache: &Cache, query: &Message) -> Option<Message> {
    let record = cache.get(&question_key(query)?)?;
    if record.message.answers.is_empty() {
        return None;
    }
    let mut reply = query.clone();
    reply.answers = record.message.answers;
    trace!("Cache hit for {:?}", query.question());
    Some(reply)
}

/// Sets the response flags on `reply` and serializes it to fit the
/// client's UDP payload size.
fn finish_reply(mut reply: Message, query: &Message) -> Option<Vec<u8>> {
    reply.qr = true;
    reply.ra = true;
    reply.rcode = if reply.answers.is_empty() {
        Rcode::NXDOMAIN
    } else {
        Rcode::NOERROR
    };
    let limit = query
        .edns_udp_payload_size()
        .map_or(MIN_UDP_PAYLOAD, |size| (size as usize).max(MIN_UDP_PAYLOAD));
    match reply.to_wire_with_limit(limit) {
        Ok(octets) => Some(octets),
        Err(e) => {
            debug!("Failed to serialize reply to {:?}: {}", query.question(), e);
            None
        }
    }
}

////////////////////////////////////////////////////////////////////////
// WORKER POOL                                                        //
////////////////////////////////////////////////////////////////////////

/// A LIFO set of [`Worker`]s whose size stays within `[min, max]`.
///
/// Resizing is serialized by the pool's mutex.
pub struct WorkerPool<U> {
    min: usize,
    max: usize,
    context: Arc<WorkerContext>,
    factory: ResolverFactory<U>,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    workers: Vec<Worker>,
    next_id: usize,
}

impl<U: Upstream + Send + 'static> WorkerPool<U> {
    /// Creates a pool and starts `min` workers. `min` is raised to at
    /// least one and `max` to at least `min`.
    pub fn start(
        min: usize,
        max: usize,
        context: Arc<WorkerContext>,
        factory: ResolverFactory<U>,
    ) -> Result<Self, thread::Error> {
        let min = min.max(1);
        let pool = Self {
            min,
            max: max.max(min),
            context,
            factory,
            state: Mutex::new(PoolState::default()),
        };
        for _ in 0..min {
            pool.start_worker(&mut pool.state.lock().unwrap())?;
        }
        Ok(pool)
    }

    /// Resizes the pool by one step in response to an inbound queue
    /// depth of `depth`: grows if it is above `min`, shrinks if it is
    /// below.
    pub fn adjust(&self, depth: usize) {
        if depth > self.min {
            self.grow();
        } else if depth < self.min {
            self.shrink();
        }
    }

    /// Starts one more worker, unless there are already `max`.
    /// Returns whether a worker was started.
    pub fn grow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.workers.len() >= self.max {
            return false;
        }
        match self.start_worker(&mut state) {
            Ok(()) => true,
            Err(e) => {
                debug!("Could not grow worker pool: {}", e);
                false
            }
        }
    }

    /// Stops the most recently started worker, unless there are only
    /// `min`. Returns whether a worker was stopped.
    pub fn shrink(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.workers.len() <= self.min {
            return false;
        }
        match state.workers.pop() {
            Some(worker) => {
                trace!("Stopping worker {}", worker.id());
                worker.close();
                true
            }
            None => false,
        }
    }

    /// Returns the number of workers.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().workers.len()
    }

    /// Tells every worker to stop.
    pub fn close(&self) {
        for worker in self.state.lock().unwrap().workers.drain(..) {
            worker.close();
        }
    }

    fn start_worker(&self, state: &mut PoolState) -> Result<(), thread::Error> {
        let id = state.next_id;
        state.next_id += 1;
        let worker = Worker::start(id, self.context.clone(), (self.factory)())?;
        trace!("Started worker {}", id);
        state.workers.push(worker);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
