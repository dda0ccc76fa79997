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

//! The resolution engine.
//!
//! Every query is first sent as-is to the configured upstream
//! resolvers (recursive mode). If what comes back is not a final
//! answer, the [`Resolver`] takes over and follows referrals and CNAME
//! chains itself (iterative mode), within fixed limits on the number of
//! steps, CNAME hops and total time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::message::{Message, Question};
use crate::queue::BoundedQueue;
use crate::rr::Record;

mod error;
pub mod inspect;
mod transport;
pub use error::{Error, Result};
pub use transport::{
    frame, SocketUpstream, Target, Upstream, ATTEMPT_TIMEOUT, DEFAULT_UPSTREAM, MAX_UPSTREAMS,
};

use inspect::{find_cname, find_extras, find_ns, find_ns_extras, got_answer, new_query};

/// The number of CNAME hops at which a chain is taken to be cyclic.
pub const CNAME_LIMIT: usize = 7;

/// The most iterative steps taken for one query.
pub const ITERATION_LIMIT: usize = 7;

/// The overall deadline for resolving one query. It is checked between
/// steps, so a step in progress is never cut short.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// The initial UDP receive buffer size.
pub const INITIAL_BUFFER_SIZE: usize = 512;

/// The receive buffer size beyond which a UDP response is rejected.
pub const MAX_BUFFER_SIZE: usize = 4096;

////////////////////////////////////////////////////////////////////////
// RESOLVER                                                           //
////////////////////////////////////////////////////////////////////////

/// A per-worker resolution engine.
///
/// A `Resolver` owns its [`Upstream`] (and with it, its sockets); it is
/// never shared between threads. Final answers it obtains are pushed
/// onto the cache write-back queue, if it was given one.
pub struct Resolver<U = SocketUpstream> {
    upstream: U,
    write_back: Option<Arc<BoundedQueue<Message>>>,
}

impl<U: Upstream> Resolver<U> {
    /// Creates a new `Resolver`. If `write_back` is provided, final
    /// answers are queued on it for caching.
    pub fn new(upstream: U, write_back: Option<Arc<BoundedQueue<Message>>>) -> Self {
        Self {
            upstream,
            write_back,
        }
    }

    /// Resolves `query`, returning the response to give the client.
    ///
    /// Upstream queries carry a random ID drawn for this resolution;
    /// the response returned has the ID of `query` again. Any failure
    /// of the initial recursive exchange is reported as
    /// [`Error::ServerFailed`].
    pub fn resolve(&mut self, query: &Message) -> Result<Message> {
        let started_at = Instant::now();
        let mut outbound = query.clone();
        outbound.id = rand::random();

        let response = self.exchange_configured(&outbound).map_err(|e| {
            debug!("Recursive exchange for {:?} failed: {}", query.question(), e);
            Error::ServerFailed
        })?;

        let mut answer = if response.id == outbound.id && got_answer(&response) {
            self.write_back(&response);
            response
        } else {
            trace!("Resolving {:?} iteratively", query.question());
            ResolutionState::new(outbound, started_at).run(self, response)?
        };
        answer.id = query.id;
        Ok(answer)
    }

    /// Closes the upstream sockets.
    pub fn close(&mut self) {
        self.upstream.close();
    }

    /// Queues a final answer for caching.
    fn write_back(&self, response: &Message) {
        if let Some(queue) = &self.write_back {
            if queue.push(response.clone()).is_err() {
                trace!("Cache write-back queue is closed");
            }
        }
    }

    /// Sends `query` to the configured upstreams.
    fn exchange_configured(&mut self, query: &Message) -> Result<Message> {
        let octets = query.to_wire().map_err(|_| Error::ServerFailed)?;
        self.resolving(Target::Configured, &octets)
    }

    /// Sends `query` to each of `servers` in turn until one produces a
    /// usable response.
    fn query_servers(&mut self, servers: &[String], query: &Message) -> Result<Message> {
        let octets = query.to_wire().map_err(|_| Error::ServerFailed)?;
        for server in servers {
            match self.resolving(Target::Server(server), &octets) {
                Ok(response) => return Ok(response),
                Err(e) => debug!("Query to {} failed: {}", server, e),
            }
        }
        Err(Error::NotFound)
    }

    /// Performs one UDP exchange with `target`, growing the receive
    /// buffer while the response does not fit and falling back to TCP
    /// if the response is truncated.
    fn resolving(&mut self, target: Target, query: &[u8]) -> Result<Message> {
        let mut buf = vec![0; INITIAL_BUFFER_SIZE];
        loop {
            let len = self
                .upstream
                .exchange_udp(target, query, &mut buf)
                .map_err(|e| {
                    debug!("UDP exchange with {:?} failed: {}", target, e);
                    Error::NotFound
                })?;
            match Message::from_wire(&buf[..len]) {
                Ok(response) if response.tc => return self.escalate(target, query),
                Ok(response) => return Ok(response),
                Err(_) if len == buf.len() => {
                    if buf.len() >= MAX_BUFFER_SIZE {
                        return Err(Error::HugePacket);
                    }
                    let doubled = buf.len() * 2;
                    buf.resize(doubled, 0);
                }
                Err(e) => {
                    debug!("Unparsable response from {:?}: {}", target, e);
                    return Err(Error::NotFound);
                }
            }
        }
    }

    /// Retries a truncated exchange over TCP: with each configured
    /// upstream in order for [`Target::Configured`], or with the same
    /// server otherwise.
    fn escalate(&mut self, target: Target, query: &[u8]) -> Result<Message> {
        match target {
            Target::Server(server) => self.exchange_tcp(server, query),
            Target::Configured => {
                let servers = self.upstream.servers().to_vec();
                for server in &servers {
                    match self.exchange_tcp(server, query) {
                        Ok(response) => return Ok(response),
                        Err(e) => debug!("TCP retry with {} failed: {}", server, e),
                    }
                }
                Err(Error::NotFound)
            }
        }
    }

    fn exchange_tcp(&mut self, server: &str, query: &[u8]) -> Result<Message> {
        let octets = self.upstream.exchange_tcp(server, query).map_err(|e| {
            debug!("TCP exchange with {} failed: {}", server, e);
            Error::NotFound
        })?;
        Message::from_wire(&octets).map_err(|_| Error::NotFound)
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATIVE RESOLUTION                                               //
////////////////////////////////////////////////////////////////////////

/// The servers the next iterative step will ask.
#[derive(Debug)]
enum Servers {
    Configured,
    Listed(Vec<String>),
}

/// The state of one iterative resolution.
#[derive(Debug)]
struct ResolutionState {
    /// The query as first sent upstream (with the resolution's ID).
    original: Message,

    /// The query the current step asks: the original, or a query for
    /// the end of a CNAME chain.
    current: Message,

    servers: Servers,
    cname_hops: usize,
    iterations: usize,
    using_default: bool,

    /// Set when the last query went to glue addresses from a referral.
    expecting_ns_followup: bool,

    started_at: Instant,

    /// Answers of the CNAME responses followed so far.
    chain: Vec<Record>,
}

impl ResolutionState {
    fn new(original: Message, started_at: Instant) -> Self {
        Self {
            current: original.clone(),
            original,
            servers: Servers::Configured,
            cname_hops: 0,
            iterations: 0,
            using_default: false,
            expecting_ns_followup: false,
            started_at,
            chain: Vec::new(),
        }
    }

    /// Runs iterative steps, starting from the non-final `response` to
    /// the recursive exchange, until a final answer or an error.
    fn run<U: Upstream>(mut self, resolver: &mut Resolver<U>, first: Message) -> Result<Message> {
        let mut response = first;
        loop {
            self.iterations += 1;
            if self.iterations > ITERATION_LIMIT {
                debug!("Giving up on {:?} after {} steps", self.question(), ITERATION_LIMIT);
                return Err(Error::ServerFailed);
            }
            if self.started_at.elapsed() >= QUERY_TIMEOUT {
                debug!("Giving up on {:?}: out of time", self.question());
                return Err(Error::ServerFailed);
            }
            if response.id != self.original.id {
                return Err(Error::InvalidResponse);
            }

            if got_answer(&response) {
                resolver.write_back(&response);
                return Ok(self.compose(response));
            }
            if self.expecting_ns_followup {
                if let Some(promoted) = find_ns_extras(&response) {
                    return Ok(self.compose(promoted));
                }
            }

            if let Some(target) = find_cname(&response) {
                self.cname_hops += 1;
                if self.cname_hops >= CNAME_LIMIT {
                    return Err(Error::CyclicCname);
                }
                trace!("Following CNAME to {}", target);
                self.chain.extend(response.answers.iter().cloned());
                self.current = match self.original.question() {
                    Some(question) => {
                        new_query(self.original.id, target, question.qtype, question.qclass)
                    }
                    None => return Err(Error::ServerFailed),
                };
                self.use_default();
            } else if let Some((servers, glue)) = referral(&response) {
                trace!("Following referral to {:?}", servers);
                self.servers = Servers::Listed(servers);
                self.expecting_ns_followup = glue;
            } else if !self.using_default {
                self.use_default();
            } else {
                return Err(Error::ServerFailed);
            }

            response = match self.ask(resolver) {
                Ok(response) => response,
                Err(e) if !self.using_default => {
                    debug!("Step failed ({}); falling back to configured upstreams", e);
                    self.use_default();
                    self.ask(resolver).map_err(|_| Error::ServerFailed)?
                }
                Err(_) => return Err(Error::ServerFailed),
            };
            if let Servers::Listed(_) = self.servers {
                self.using_default = false;
            }
        }
    }

    /// Switches to the configured upstreams.
    fn use_default(&mut self) {
        self.servers = Servers::Configured;
        self.using_default = true;
        self.expecting_ns_followup = false;
    }

    /// Sends the current query to the current servers.
    fn ask<U: Upstream>(&self, resolver: &mut Resolver<U>) -> Result<Message> {
        match &self.servers {
            Servers::Configured => resolver.exchange_configured(&self.current),
            Servers::Listed(servers) => resolver.query_servers(servers, &self.current),
        }
    }

    /// Turns a final response into the answer to the original query.
    /// After CNAMEs were followed, that means restoring the original ID
    /// and question and putting the chain in front of the answers.
    fn compose(&self, mut message: Message) -> Message {
        if !self.chain.is_empty() {
            message.id = self.original.id;
            message.questions = self.original.questions.clone();
            let mut answers = self.chain.clone();
            answers.append(&mut message.answers);
            message.answers = answers;
        }
        message
    }

    fn question(&self) -> Option<&Question> {
        self.current.question()
    }
}

/// Extracts the servers a referral points to: the glue addresses if
/// there are any (flagged by the returned `bool`), else the name server
/// host names.
fn referral(response: &Message) -> Option<(Vec<String>, bool)> {
    let glue = find_extras(response);
    if !glue.is_empty() {
        return Some((glue.iter().map(ToString::to_string).collect(), true));
    }
    match find_ns(response) {
        Some(hosts) if !hosts.is_empty() => {
            Some((hosts.iter().map(ToString::to_string).collect(), false))
        }
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::Ipv4Addr;

    use super::inspect::new_response;
    use super::*;
    use crate::class::Class;
    use crate::message::Rcode;
    use crate::name::Name;
    use crate::queue::Pop;
    use crate::rr::Type;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Via {
        Udp,
        Tcp,
    }

    type Handler = Box<dyn FnMut(Via, &str, &Message) -> Option<Vec<u8>>>;

    /// An upstream that answers from a closure and logs every exchange
    /// as (transport, target, question name).
    struct Scripted {
        servers: Vec<String>,
        handler: Handler,
        log: Vec<(Via, String, String)>,
    }

    impl Scripted {
        fn new<F>(handler: F) -> Self
        where
            F: FnMut(Via, &str, &Message) -> Option<Vec<u8>> + 'static,
        {
            Self {
                servers: vec!["upstream".to_owned()],
                handler: Box::new(handler),
                log: Vec::new(),
            }
        }

        fn exchange(&mut self, via: Via, target: &str, query: &[u8]) -> io::Result<Vec<u8>> {
            let query = Message::from_wire(query).unwrap();
            let qname = query.question().unwrap().qname.to_string();
            self.log.push((via, target.to_owned(), qname));
            (self.handler)(via, target, &query).ok_or_else(|| io::ErrorKind::TimedOut.into())
        }
    }

    impl Upstream for Scripted {
        fn exchange_udp(&mut self, target: Target, query: &[u8], buf: &mut [u8]) -> io::Result<usize> {
            let target = match target {
                Target::Configured => "configured",
                Target::Server(server) => server,
            };
            let response = self.exchange(Via::Udp, target, query)?;
            let len = response.len().min(buf.len());
            buf[..len].copy_from_slice(&response[..len]);
            Ok(len)
        }

        fn exchange_tcp(&mut self, server: &str, query: &[u8]) -> io::Result<Vec<u8>> {
            self.exchange(Via::Tcp, server, query)
        }

        fn servers(&self) -> &[String] {
            &self.servers
        }

        fn close(&mut self) {}
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn client_query(qname: &str) -> Message {
        new_query(0xbeef, name(qname), Type::A, Class::IN)
    }

    /// Builds the wire form of a response to `query`, customized by
    /// `f`.
    fn reply<F: FnOnce(&mut Message)>(query: &Message, f: F) -> Option<Vec<u8>> {
        let mut response = new_response(Rcode::NOERROR);
        response.id = query.id;
        response.questions = query.questions.clone();
        f(&mut response);
        Some(response.to_wire().unwrap())
    }

    fn qname_of(query: &Message) -> String {
        query.question().unwrap().qname.to_string()
    }

    #[test]
    fn final_answers_are_returned_and_written_back() {
        let upstream = Scripted::new(|_, _, query| {
            let owner = query.question().unwrap().qname.clone();
            reply(query, |r| {
                r.answers.push(Record::a(owner, 300, Ipv4Addr::new(192, 0, 2, 1)))
            })
        });
        let queue = Arc::new(BoundedQueue::new(4));
        let mut resolver = Resolver::new(upstream, Some(queue.clone()));

        let answer = resolver.resolve(&client_query("www.test.")).unwrap();
        assert_eq!(answer.id, 0xbeef);
        assert_eq!(answer.answers.len(), 1);
        assert_eq!(resolver.upstream.log.len(), 1);

        match queue.pop_timeout(Duration::from_millis(10)) {
            Pop::Item(cached) => assert_eq!(cached.answers, answer.answers),
            other => panic!("expected a write-back, got {:?}", other),
        }
    }

    #[test]
    fn cname_chains_are_spliced_into_one_answer() {
        let upstream = Scripted::new(|_, _, query| {
            let qname = qname_of(query);
            let owner = name(&qname);
            let next = match qname.as_str() {
                "a.test." => Some(name("b.test.")),
                "b.test." => Some(name("c.test.")),
                "c.test." => Some(name("d.test.")),
                _ => None,
            };
            reply(query, |r| match next {
                Some(target) => r.answers.push(Record::cname(owner, 60, &target)),
                None => r.answers.push(Record::a(owner, 60, Ipv4Addr::new(192, 0, 2, 4))),
            })
        });
        let mut resolver = Resolver::new(upstream, None);

        let answer = resolver.resolve(&client_query("a.test.")).unwrap();
        assert_eq!(answer.id, 0xbeef);
        assert_eq!(answer.question().unwrap().qname, name("a.test."));
        let summary: Vec<(String, Type)> = answer
            .answers
            .iter()
            .map(|rr| (rr.owner.to_string(), rr.rr_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.test.".to_owned(), Type::CNAME),
                ("b.test.".to_owned(), Type::CNAME),
                ("c.test.".to_owned(), Type::CNAME),
                ("d.test.".to_owned(), Type::A),
            ]
        );
    }

    #[test]
    fn long_cname_chains_are_cut_off() {
        // n0 -> n1 -> n2 -> ... without end.
        let upstream = Scripted::new(|_, _, query| {
            let qname = qname_of(query);
            let n: usize = qname[1..qname.find('.').unwrap()].parse().unwrap();
            let target = name(&format!("n{}.test.", n + 1));
            reply(query, |r| r.answers.push(Record::cname(name(&qname), 60, &target)))
        });
        let mut resolver = Resolver::new(upstream, None);
        assert_eq!(
            resolver.resolve(&client_query("n0.test.")),
            Err(Error::CyclicCname)
        );
        assert_eq!(resolver.upstream.log.len(), CNAME_LIMIT);
    }

    #[test]
    fn endless_referrals_hit_the_iteration_limit() {
        let upstream = Scripted::new(|_, _, query| {
            reply(query, |r| {
                r.authorities
                    .push(Record::ns(name("test."), 3600, &name("ns.test.")))
            })
        });
        let mut resolver = Resolver::new(upstream, None);
        assert_eq!(
            resolver.resolve(&client_query("www.test.")),
            Err(Error::ServerFailed)
        );
        assert_eq!(resolver.upstream.log.len(), 1 + ITERATION_LIMIT);
        assert!(resolver.upstream.log[1..]
            .iter()
            .all(|(_, target, _)| target == "ns.test."));
    }

    #[test]
    fn glue_referrals_are_followed_by_address() {
        let upstream = Scripted::new(|_, target, query| match target {
            "configured" => reply(query, |r| {
                r.authorities
                    .push(Record::ns(name("test."), 3600, &name("ns.test.")));
                r.additionals.push(Record::a(
                    name("ns.test."),
                    3600,
                    Ipv4Addr::new(192, 0, 2, 53),
                ));
            }),
            "192.0.2.53" => reply(query, |r| {
                r.aa = true;
                r.additionals.push(Record::a(
                    name("www.test."),
                    60,
                    Ipv4Addr::new(192, 0, 2, 80),
                ));
            }),
            _ => None,
        });
        let mut resolver = Resolver::new(upstream, None);
        let answer = resolver.resolve(&client_query("www.test.")).unwrap();
        assert_eq!(
            answer.answers[0].ipv4(),
            Some(Ipv4Addr::new(192, 0, 2, 80))
        );
    }

    #[test]
    fn dead_ends_fall_back_to_configured_upstreams_once() {
        let upstream = Scripted::new(|_, _, query| reply(query, |_| ()));
        let mut resolver = Resolver::new(upstream, None);
        assert_eq!(
            resolver.resolve(&client_query("www.test.")),
            Err(Error::ServerFailed)
        );
        let targets: Vec<&str> = resolver
            .upstream
            .log
            .iter()
            .map(|(_, target, _)| target.as_str())
            .collect();
        assert_eq!(targets, ["configured", "configured"]);
    }

    #[test]
    fn resolutions_out_of_time_fail_without_asking_again() {
        let upstream = Scripted::new(|_, _, query| reply(query, |_| ()));
        let mut resolver = Resolver::new(upstream, None);
        let query = client_query("slow.test.");
        let mut dead_end = new_response(Rcode::NOERROR);
        dead_end.id = query.id;
        dead_end.questions = query.questions.clone();

        let started_at = Instant::now()
            .checked_sub(QUERY_TIMEOUT + Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            ResolutionState::new(query, started_at).run(&mut resolver, dead_end),
            Err(Error::ServerFailed)
        );
        assert!(resolver.upstream.log.is_empty());
    }

    #[test]
    fn mismatched_ids_are_rejected() {
        let upstream = Scripted::new(|_, _, query| {
            reply(query, |r| r.id = r.id.wrapping_add(1))
        });
        let mut resolver = Resolver::new(upstream, None);
        assert_eq!(
            resolver.resolve(&client_query("www.test.")),
            Err(Error::InvalidResponse)
        );
    }

    #[test]
    fn truncation_escalates_to_each_upstream_over_tcp() {
        let mut upstream = Scripted::new(|via, target, query| match (via, target) {
            (Via::Udp, _) => reply(query, |r| r.tc = true),
            (Via::Tcp, "u3") => {
                let owner = query.question().unwrap().qname.clone();
                reply(query, |r| r.answers.push(Record::a(owner, 60, Ipv4Addr::LOCALHOST)))
            }
            _ => None,
        });
        upstream.servers = vec!["u1".to_owned(), "u2".to_owned(), "u3".to_owned()];
        let mut resolver = Resolver::new(upstream, None);

        let answer = resolver.resolve(&client_query("big.test.")).unwrap();
        assert_eq!(answer.answers.len(), 1);
        let log: Vec<(Via, &str)> = resolver
            .upstream
            .log
            .iter()
            .map(|(via, target, _)| (*via, target.as_str()))
            .collect();
        assert_eq!(
            log,
            [
                (Via::Udp, "configured"),
                (Via::Tcp, "u1"),
                (Via::Tcp, "u2"),
                (Via::Tcp, "u3"),
            ]
        );
    }

    #[test]
    fn failed_truncation_retries_fail_the_query() {
        let mut upstream = Scripted::new(|via, _, query| match via {
            Via::Udp => reply(query, |r| r.tc = true),
            Via::Tcp => None,
        });
        upstream.servers = vec!["u1".to_owned(), "u2".to_owned()];
        let mut resolver = Resolver::new(upstream, None);
        assert_eq!(
            resolver.resolve(&client_query("big.test.")),
            Err(Error::ServerFailed)
        );
        assert_eq!(resolver.upstream.log.len(), 3);
    }

    #[test]
    fn oversized_responses_are_huge_packets() {
        let upstream = Scripted::new(|_, _, _| Some(vec![0xff; 5000]));
        let mut resolver = Resolver::new(upstream, None);
        let query = client_query("huge.test.").to_wire().unwrap();
        assert_eq!(
            resolver.resolving(Target::Configured, &query),
            Err(Error::HugePacket)
        );
        // 512, 1024, 2048 and 4096 octets.
        assert_eq!(resolver.upstream.log.len(), 4);
        assert_eq!(
            resolver.resolve(&client_query("huge.test.")),
            Err(Error::ServerFailed)
        );
    }
}
