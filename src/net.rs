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

//! Small helpers shared by the blocking network code.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use log::error;

/// The well-known DNS port.
pub const DNS_PORT: u16 = 53;

/// Resolves `host` to a socket address. `host` is an IP address or a
/// host name, optionally followed by a port; without one, port 53 is
/// used.
pub fn resolve_host(host: &str) -> io::Result<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let mut addrs = match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => {
            host.to_socket_addrs()?
        }
        _ => (host.trim_start_matches('[').trim_end_matches(']'), DNS_PORT).to_socket_addrs()?,
    };
    addrs.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} has no addresses", host),
        )
    })
}

/// Computes the time until the deadline. Returns [`None`] if the
/// deadline is in the past.
pub fn compute_timeout(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|timeout| !timeout.is_zero())
}

/// Executes `f`, retrying the operation if it is interrupted.
pub fn retry_if_interrupted<F, R>(mut f: F) -> io::Result<R>
where
    F: FnMut() -> io::Result<R>,
{
    loop {
        match f() {
            Ok(r) => return Ok(r),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Returns whether an I/O error just means a read deadline passed.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Logs errors if a task exits with an I/O error.
pub fn log_io_errors<T>(result: io::Result<T>) {
    if let Err(e) = result {
        let current_thread = thread::current();
        let thread_name = current_thread.name().unwrap_or("anonymous thread");
        error!("I/O error in thread {}: {}", thread_name, e);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_default_to_port_53() {
        assert_eq!(
            resolve_host("192.0.2.1").unwrap(),
            "192.0.2.1:53".parse().unwrap()
        );
        assert_eq!(
            resolve_host("192.0.2.1:5353").unwrap(),
            "192.0.2.1:5353".parse().unwrap()
        );
        assert_eq!(
            resolve_host("2001:db8::1").unwrap(),
            "[2001:db8::1]:53".parse().unwrap()
        );
    }

    #[test]
    fn past_deadlines_have_no_timeout() {
        let past = Instant::now() - Duration::from_secs(1);
        assert_eq!(compute_timeout(past), None);
        assert!(compute_timeout(Instant::now() + Duration::from_secs(60)).is_some());
    }
}
