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

//! Upstream transport: the [`Upstream`] trait and its socket-backed
//! implementation, [`SocketUpstream`].

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::net::{compute_timeout, resolve_host, retry_if_interrupted};

/// The deadline for a single exchange with an upstream server.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// The most upstream servers that will be configured.
pub const MAX_UPSTREAMS: usize = 3;

/// The upstream used when none is configured.
pub const DEFAULT_UPSTREAM: &str = "8.8.8.8";

/// Where to send a UDP query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Target<'a> {
    /// The configured upstream resolvers, tried in order.
    Configured,

    /// A specific server, named by address or host name.
    Server(&'a str),
}

/// The transport a [`Resolver`](super::Resolver) uses to reach other
/// name servers.
///
/// The resolution logic only ever sees octets, so this is the seam at
/// which it can be driven by something other than real sockets.
pub trait Upstream {
    /// Sends `query` over UDP to `target` and receives one response
    /// into `buf`, returning its length. A response longer than `buf`
    /// is cut short, so a return value equal to `buf.len()` may mean
    /// the buffer was too small.
    fn exchange_udp(&mut self, target: Target, query: &[u8], buf: &mut [u8]) -> io::Result<usize>;

    /// Sends `query` to `server` over TCP and returns the response.
    fn exchange_tcp(&mut self, server: &str, query: &[u8]) -> io::Result<Vec<u8>>;

    /// Returns the configured upstream servers, in order.
    fn servers(&self) -> &[String];

    /// Releases any sockets held.
    fn close(&mut self);
}

////////////////////////////////////////////////////////////////////////
// SOCKET UPSTREAM                                                    //
////////////////////////////////////////////////////////////////////////

/// An [`Upstream`] over real UDP and TCP sockets.
///
/// A connected UDP socket is set up for each configured upstream when
/// the `SocketUpstream` is created. Queries to other servers, and all
/// TCP queries, use a fresh socket per exchange.
#[derive(Debug)]
pub struct SocketUpstream {
    servers: Vec<String>,
    sockets: Vec<UdpSocket>,
    timeout: Duration,
}

impl SocketUpstream {
    /// Sets up sockets for the given upstream hosts. At most
    /// [`MAX_UPSTREAMS`] are used; with none, [`DEFAULT_UPSTREAM`] is.
    /// Hosts that cannot be resolved or connected to are skipped with
    /// a warning.
    pub fn connect(hosts: &[String]) -> Self {
        Self::connect_with_timeout(hosts, ATTEMPT_TIMEOUT)
    }

    /// Like [`SocketUpstream::connect`], with a custom per-exchange
    /// deadline.
    pub fn connect_with_timeout(hosts: &[String], timeout: Duration) -> Self {
        let servers: Vec<String> = if hosts.is_empty() {
            vec![DEFAULT_UPSTREAM.to_owned()]
        } else {
            hosts.iter().take(MAX_UPSTREAMS).cloned().collect()
        };

        let mut sockets = Vec::with_capacity(servers.len());
        for server in &servers {
            match connect_udp(server, timeout) {
                Ok(socket) => sockets.push(socket),
                Err(e) => warn!("Skipping upstream {}: {}", server, e),
            }
        }

        Self {
            servers,
            sockets,
            timeout,
        }
    }
}

impl Upstream for SocketUpstream {
    fn exchange_udp(&mut self, target: Target, query: &[u8], buf: &mut [u8]) -> io::Result<usize> {
        match target {
            Target::Configured => {
                for socket in &self.sockets {
                    match exchange_on(socket, query, buf, self.timeout) {
                        Ok(n) => return Ok(n),
                        Err(e) => debug!("Upstream exchange failed: {}", e),
                    }
                }
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no configured upstream answered",
                ))
            }
            Target::Server(server) => {
                let socket = connect_udp(server, self.timeout)?;
                exchange_on(&socket, query, buf, self.timeout)
            }
        }
    }

    fn exchange_tcp(&mut self, server: &str, query: &[u8]) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let addr = resolve_host(server)?;
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(&frame(query)?)?;

        let mut len_octets = [0; 2];
        read_exact_by(&mut stream, &mut len_octets, deadline)?;
        let mut response = vec![0; u16::from_be_bytes(len_octets) as usize];
        read_exact_by(&mut stream, &mut response, deadline)?;
        Ok(response)
    }

    fn servers(&self) -> &[String] {
        &self.servers
    }

    fn close(&mut self) {
        self.sockets.clear();
    }
}

/// Creates a UDP socket connected to `server`, with read and write
/// deadlines.
fn connect_udp(server: &str, timeout: Duration) -> io::Result<UdpSocket> {
    let addr = resolve_host(server)?;
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local)?;
    socket.connect(addr)?;
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;
    Ok(socket)
}

/// Sends `query` on `socket` and waits up to `timeout` for a datagram
/// with the same ID. Anything else, such as a late reply to an earlier
/// query on the same socket, is discarded.
fn exchange_on(
    socket: &UdpSocket,
    query: &[u8],
    buf: &mut [u8],
    timeout: Duration,
) -> io::Result<usize> {
    let deadline = Instant::now() + timeout;
    retry_if_interrupted(|| socket.send(query))?;
    loop {
        let remaining = compute_timeout(deadline).ok_or_else(|| {
            io::Error::new(io::ErrorKind::TimedOut, "no response with a matching ID")
        })?;
        socket.set_read_timeout(Some(remaining))?;
        let len = retry_if_interrupted(|| socket.recv(buf))?;
        if len >= 2 && query.len() >= 2 && buf[..2] == query[..2] {
            return Ok(len);
        }
        debug!("Discarding {}-octet datagram with a stale ID", len);
    }
}

/// Prefixes `message` with its length, as DNS over TCP requires.
pub fn frame(message: &[u8]) -> io::Result<Vec<u8>> {
    let len = u16::try_from(message.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too long for TCP"))?;
    let mut framed = Vec::with_capacity(message.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(message);
    Ok(framed)
}

/// Fills `buf` from `stream`, failing if `deadline` passes first.
fn read_exact_by(stream: &mut TcpStream, buf: &mut [u8], deadline: Instant) -> io::Result<()> {
    let mut n_read = 0;
    while n_read < buf.len() {
        let timeout = compute_timeout(deadline)
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "upstream too slow"))?;
        stream.set_read_timeout(Some(timeout))?;
        match retry_if_interrupted(|| stream.read(&mut buf[n_read..]))? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => n_read += n,
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn frames_carry_a_length_prefix() {
        assert_eq!(frame(b"abc").unwrap(), b"\x00\x03abc");
        assert!(frame(&vec![0; 65536]).is_err());
    }

    #[test]
    fn upstreams_are_capped_and_defaulted() {
        let upstream = SocketUpstream::connect(&[]);
        assert_eq!(upstream.servers().to_vec(), vec!["8.8.8.8".to_owned()]);

        let hosts: Vec<String> = (1..=5).map(|i| format!("127.0.0.{}", i)).collect();
        let upstream = SocketUpstream::connect(&hosts);
        assert_eq!(upstream.servers(), &hosts[..3]);
    }

    #[test]
    fn udp_exchange_with_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let echo = thread::spawn(move || {
            let mut buf = [0; 64];
            let (n, src) = server.recv_from(&mut buf).unwrap();
            server.send_to(&buf[..n], src).unwrap();
        });

        let mut upstream = SocketUpstream::connect(&[addr]);
        let mut buf = [0; 512];
        let n = upstream
            .exchange_udp(Target::Configured, b"ping", &mut buf)
            .unwrap();
        assert_eq!(&buf[..n], b"ping");
        echo.join().unwrap();

        upstream.close();
        assert!(upstream
            .exchange_udp(Target::Configured, b"ping", &mut buf)
            .is_err());
    }

    #[test]
    fn late_replies_do_not_answer_later_queries() {
        const TIMEOUT: Duration = Duration::from_millis(500);
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let echo = thread::spawn(move || {
            let mut buf = [0; 64];
            for i in 0..3 {
                let (n, src) = server.recv_from(&mut buf).unwrap();
                if i == 0 {
                    thread::sleep(TIMEOUT * 3 / 2);
                }
                server.send_to(&buf[..n], src).unwrap();
            }
        });

        let mut upstream = SocketUpstream::connect_with_timeout(&[addr], TIMEOUT);
        let mut buf = [0; 512];
        assert!(upstream
            .exchange_udp(Target::Configured, b"\x00\x01first", &mut buf)
            .is_err());

        // The reply to the first query arrives while the second waits.
        let n = upstream
            .exchange_udp(Target::Configured, b"\x00\x02second", &mut buf)
            .unwrap();
        assert_eq!(&buf[..n], b"\x00\x02second");
        let n = upstream
            .exchange_udp(Target::Configured, b"\x00\x03third", &mut buf)
            .unwrap();
        assert_eq!(&buf[..n], b"\x00\x03third");
        echo.join().unwrap();
    }

    #[test]
    fn tcp_exchange_with_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let echo = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut framed = [0; 6];
            stream.read_exact(&mut framed).unwrap();
            stream.write_all(&framed).unwrap();
        });

        let mut upstream = SocketUpstream::connect(&[]);
        let response = upstream.exchange_tcp(&addr, b"ping").unwrap();
        assert_eq!(response, b"ping");
        echo.join().unwrap();
    }
}
