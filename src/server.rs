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

//! Wiring of the proxy: the client socket, the queues, the worker pool
//! and the cache.
//!
//! A running server consists of the following threads, all in one
//! [`ThreadGroup`]:
//!
//! * a listener, which reads client datagrams into the inbound queue
//!   and resizes the worker pool according to the queue's depth;
//! * the workers of the [`WorkerPool`];
//! * a responder, which sends the replies on the outbound queue back
//!   to clients;
//! * if caching is enabled, a cache writer, which stores the answers
//!   resolvers queue for write-back, and optionally a sweeper, which
//!   periodically purges expired entries.

use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread as std_thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::cache::{self, Cache, CachedRecord};
use crate::message::{Message, MAX_MESSAGE_LEN};
use crate::net::{is_timeout, log_io_errors, retry_if_interrupted};
use crate::pool::{UserPacket, WorkerContext, WorkerPool};
use crate::queue::{BoundedQueue, Pop};
use crate::resolver::inspect::is_successful_response;
use crate::resolver::{Resolver, SocketUpstream};
use crate::thread::{self, ThreadGroup, CHECK_FOR_SHUTDOWN_TIMEOUT};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION                                                      //
////////////////////////////////////////////////////////////////////////

/// Server configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The address to serve clients on.
    pub addr: SocketAddr,

    /// Upstream recursive resolvers, as `host` or `host:port`. Only
    /// the first three are used; if none are given, `8.8.8.8` is.
    pub upstreams: Vec<String>,

    /// Whether answers are cached.
    pub with_cache: bool,

    /// Where the cache would be persisted. This is accepted but
    /// currently never read or written.
    pub cache_file: Option<PathBuf>,

    /// How often to purge expired cache entries. Expired entries are
    /// always evicted when they are next looked up, so this only bounds
    /// memory held by entries nobody asks for again.
    pub cache_sweep_interval: Option<Duration>,

    pub worker_pool_min: usize,
    pub worker_pool_max: usize,
}

impl Config {
    /// Fixes up out-of-range pool bounds: a minimum below one becomes
    /// one, and a maximum below the minimum becomes the minimum plus
    /// ten.
    pub fn check(&mut self) {
        if self.worker_pool_min < 1 {
            self.worker_pool_min = 1;
        }
        if self.worker_pool_max < self.worker_pool_min {
            self.worker_pool_max = self.worker_pool_min + 10;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], crate::net::DNS_PORT)),
            upstreams: Vec::new(),
            with_cache: true,
            cache_file: None,
            cache_sweep_interval: None,
            worker_pool_min: 10,
            worker_pool_max: 100,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SERVER STARTUP                                                     //
////////////////////////////////////////////////////////////////////////

/// The proxy server. See the [module documentation](self).
pub struct Server;

impl Server {
    /// Binds the client socket and starts every thread of the server.
    /// The returned handle stops it again.
    pub fn start(mut config: Config) -> Result<ServerHandle, Error> {
        config.check();
        if let Some(ref path) = config.cache_file {
            debug!("Cache file {} is not used.", path.display());
        }

        let socket = UdpSocket::bind(config.addr).map_err(Error::Bind)?;
        socket
            .set_read_timeout(Some(CHECK_FOR_SHUTDOWN_TIMEOUT))
            .map_err(Error::Bind)?;
        let send_socket = socket.try_clone().map_err(Error::Bind)?;
        let local_addr = socket.local_addr().map_err(Error::Bind)?;

        let group = ThreadGroup::new();
        let capacity = config.worker_pool_max;
        let inbound = Arc::new(BoundedQueue::new(capacity));
        let outbound = Arc::new(BoundedQueue::new(capacity));
        let cache = config.with_cache.then(|| Arc::new(Cache::new()));
        let write_back = cache.as_ref().map(|_| Arc::new(BoundedQueue::new(capacity)));

        let context = Arc::new(WorkerContext {
            group: group.clone(),
            inbound: inbound.clone(),
            outbound: outbound.clone(),
            cache: cache.clone(),
        });
        let upstreams = config.upstreams.clone();
        let resolver_write_back = write_back.clone();
        let pool = WorkerPool::start(
            config.worker_pool_min,
            config.worker_pool_max,
            context,
            Box::new(move || {
                Resolver::new(
                    SocketUpstream::connect(&upstreams),
                    resolver_write_back.clone(),
                )
            }),
        );
        let pool = match pool {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                group.shut_down();
                inbound.close();
                group.await_shutdown();
                return Err(Error::Thread(e));
            }
        };

        let handle = ServerHandle {
            group,
            local_addr,
            inbound,
            outbound,
            write_back,
            cache,
            pool,
        };
        match handle.start_threads(&config, socket, send_socket) {
            Ok(()) => {
                info!(
                    "Serving on {} with {} workers.",
                    local_addr,
                    handle.pool.size()
                );
                Ok(handle)
            }
            Err(e) => {
                handle.close();
                Err(Error::Thread(e))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SERVER HANDLE                                                      //
////////////////////////////////////////////////////////////////////////

/// A handle to a running server.
pub struct ServerHandle {
    group: Arc<ThreadGroup>,
    local_addr: SocketAddr,
    inbound: Arc<BoundedQueue<UserPacket>>,
    outbound: Arc<BoundedQueue<UserPacket>>,
    write_back: Option<Arc<BoundedQueue<Message>>>,
    cache: Option<Arc<Cache>>,
    pool: Arc<WorkerPool<SocketUpstream>>,
}

impl ServerHandle {
    /// Returns the address the server is serving on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the cache, if caching is enabled.
    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    /// Stops the server and waits until all of its threads have exited.
    /// Packets still queued are dropped.
    pub fn close(self) {
        self.group.shut_down();
        self.pool.close();
        self.inbound.close();
        self.outbound.close();
        if let Some(ref write_back) = self.write_back {
            write_back.close();
        }
        self.group.await_shutdown();
        info!("Server on {} stopped.", self.local_addr);
    }

    /// Starts the listener, the responder and the cache threads.
    fn start_threads(
        &self,
        config: &Config,
        socket: UdpSocket,
        send_socket: UdpSocket,
    ) -> Result<(), thread::Error> {
        let group = self.group.clone();
        let inbound = self.inbound.clone();
        let pool = self.pool.clone();
        self.group.start_respawnable("listener", move || {
            log_io_errors(run_listener(&group, &socket, &inbound, &pool))
        })?;

        let outbound = self.outbound.clone();
        self.group
            .start_oneshot("responder", move || run_responder(&send_socket, &outbound))?;

        if let (Some(cache), Some(write_back)) = (&self.cache, &self.write_back) {
            let writer_cache = cache.clone();
            let write_back = write_back.clone();
            self.group.start_oneshot("cache writer", move || {
                run_cache_writer(&writer_cache, &write_back)
            })?;
            if let Some(interval) = config.cache_sweep_interval {
                let group = self.group.clone();
                let cache = cache.clone();
                self.group.start_oneshot("cache sweeper", move || {
                    run_cache_sweeper(&group, &cache, interval)
                })?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("group", &self.group)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// SERVER THREADS                                                     //
////////////////////////////////////////////////////////////////////////

/// The listener loop. Read errors other than the periodic timeout end
/// the task, which is then respawned.
fn run_listener(
    group: &ThreadGroup,
    socket: &UdpSocket,
    inbound: &BoundedQueue<UserPacket>,
    pool: &WorkerPool<SocketUpstream>,
) -> io::Result<()> {
    let mut buf = vec![0; MAX_MESSAGE_LEN];
    loop {
        if group.is_shutting_down() {
            return Ok(());
        }
        let (len, client) = match retry_if_interrupted(|| socket.recv_from(&mut buf)) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e),
        };
        let packet = UserPacket {
            octets: buf[..len].to_vec(),
            client,
        };
        if inbound.push(packet).is_err() {
            return Ok(());
        }
        pool.adjust(inbound.len());
    }
}

/// The responder loop. Send errors are logged and otherwise ignored.
fn run_responder(socket: &UdpSocket, outbound: &BoundedQueue<UserPacket>) {
    loop {
        match outbound.pop_timeout(CHECK_FOR_SHUTDOWN_TIMEOUT) {
            Pop::Item(packet) => {
                if let Err(e) = retry_if_interrupted(|| socket.send_to(&packet.octets, packet.client)) {
                    debug!("Failed to send reply to {}: {}", packet.client, e);
                }
            }
            Pop::Timeout => continue,
            Pop::Closed => return,
        }
    }
}

/// Stores successful answers queued by resolvers.
fn run_cache_writer(cache: &Cache, write_back: &BoundedQueue<Message>) {
    loop {
        match write_back.pop_timeout(CHECK_FOR_SHUTDOWN_TIMEOUT) {
            Pop::Item(message) => store(cache, message),
            Pop::Timeout => continue,
            Pop::Closed => return,
        }
    }
}

fn store(cache: &Cache, message: Message) {
    if !is_successful_response(&message) {
        return;
    }
    let key = match message.question() {
        Some(question) => cache::key(question),
        None => return,
    };
    if let Some(record) = CachedRecord::new(message, Instant::now()) {
        trace!("Caching {}", key);
        cache.insert(&key, record);
    }
}

/// Purges expired entries every `interval`.
fn run_cache_sweeper(group: &ThreadGroup, cache: &Cache, interval: Duration) {
    let mut next_sweep = Instant::now() + interval;
    while !group.is_shutting_down() {
        std_thread::sleep(CHECK_FOR_SHUTDOWN_TIMEOUT.min(interval));
        let now = Instant::now();
        if now >= next_sweep {
            let purged = cache.purge_expired(now);
            if purged > 0 {
                debug!("Purged {} expired cache entries.", purged);
            }
            next_sweep = now + interval;
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error from [`Server::start`].
#[derive(Debug)]
pub enum Error {
    /// The client socket could not be set up.
    Bind(io::Error),

    /// A server thread could not be started.
    Thread(thread::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bind(err) => write!(f, "failed to bind the server socket: {}", err),
            Self::Thread(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(err) => Some(err),
            Self::Thread(err) => Some(err),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::class::Class;
    use crate::name::Name;
    use crate::resolver::inspect::new_query;
    use crate::rr::{Record, Type};

    fn test_config(upstream: SocketAddr) -> Config {
        Config {
            addr: "127.0.0.1:0".parse().unwrap(),
            upstreams: vec![upstream.to_string()],
            worker_pool_min: 1,
            worker_pool_max: 2,
            ..Default::default()
        }
    }

    fn ask(server: SocketAddr, query: &Message) -> Message {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        client.send_to(&query.to_wire().unwrap(), server).unwrap();
        let mut buf = [0; 512];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        Message::from_wire(&buf[..len]).unwrap()
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut config = Config {
            worker_pool_min: 0,
            worker_pool_max: 0,
            ..Default::default()
        };
        config.check();
        assert_eq!((config.worker_pool_min, config.worker_pool_max), (1, 11));

        let mut config = Config {
            worker_pool_min: 4,
            worker_pool_max: 2,
            ..Default::default()
        };
        config.check();
        assert_eq!((config.worker_pool_min, config.worker_pool_max), (4, 14));
    }

    #[test]
    fn cached_answers_are_served_without_upstream_contact() {
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let handle = Server::start(test_config(upstream.local_addr().unwrap())).unwrap();

        let qname: Name = "cached.test.".parse().unwrap();
        let mut response = new_query(1, qname.clone(), Type::A, Class::IN);
        response.qr = true;
        response
            .answers
            .push(Record::a(qname.clone(), 60, Ipv4Addr::new(192, 0, 2, 1)));
        let cached_at = Instant::now()
            .checked_sub(Duration::from_secs(10))
            .unwrap();
        let key = cache::key(response.question().unwrap());
        handle
            .cache()
            .unwrap()
            .insert(&key, CachedRecord::new(response, cached_at).unwrap());

        let reply = ask(
            handle.local_addr(),
            &new_query(0xbeef, qname, Type::A, Class::IN),
        );
        assert_eq!(reply.id, 0xbeef);
        assert!(reply.qr && reply.ra);
        assert_eq!(reply.answers.len(), 1);
        let ttl = u32::from(reply.answers[0].ttl);
        assert!((48..=50).contains(&ttl), "TTL {} did not decay", ttl);

        upstream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0; 512];
        assert!(upstream.recv_from(&mut buf).is_err());

        handle.close();
    }

    #[test]
    fn resolved_answers_are_relayed_and_cached() {
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let fake_upstream = std_thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, peer) = upstream.recv_from(&mut buf).unwrap();
            let mut response = Message::from_wire(&buf[..len]).unwrap();
            let qname = response.question().unwrap().qname.clone();
            response.qr = true;
            response.ra = true;
            response
                .answers
                .push(Record::a(qname, 300, Ipv4Addr::new(198, 51, 100, 4)));
            upstream
                .send_to(&response.to_wire().unwrap(), peer)
                .unwrap();
        });

        let handle = Server::start(test_config(upstream_addr)).unwrap();
        let qname: Name = "fresh.test.".parse().unwrap();
        let query = new_query(0x0102, qname, Type::A, Class::IN);
        let reply = ask(handle.local_addr(), &query);
        fake_upstream.join().unwrap();

        assert_eq!(reply.id, 0x0102);
        assert_eq!(reply.questions, query.questions);
        assert_eq!(
            reply.answers[0].ipv4(),
            Some(Ipv4Addr::new(198, 51, 100, 4))
        );

        // The write-back is asynchronous.
        let cache = handle.cache().unwrap().clone();
        let key = cache::key(query.question().unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.find(&key).is_none() && Instant::now() < deadline {
            std_thread::sleep(Duration::from_millis(20));
        }
        assert!(cache.find(&key).is_some());

        handle.close();
    }
}
