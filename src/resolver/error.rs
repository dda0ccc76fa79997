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

//! Resolution errors.

use std::fmt;

/// An error signaling that a query could not be resolved.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// No upstream produced a usable response.
    NotFound,

    /// Resolution failed: the recursive exchange failed, the iteration
    /// or time limit was reached, or no servers were left to ask.
    ServerFailed,

    /// A response did not carry the ID of the query it answers.
    InvalidResponse,

    /// Reserved. Nothing produces this yet.
    UnexpectedResponse,

    /// A UDP response did not fit in the largest receive buffer.
    HugePacket,

    /// The CNAME chain was too long, most likely because it loops.
    CyclicCname,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::NotFound => f.write_str("not found"),
            Self::ServerFailed => f.write_str("server failed"),
            Self::InvalidResponse => f.write_str("invalid response"),
            Self::UnexpectedResponse => f.write_str("unexpected response"),
            Self::HugePacket => f.write_str("response too large"),
            Self::CyclicCname => f.write_str("CNAME chain too long (cyclic?)"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible resolver operations.
pub type Result<T> = std::result::Result<T, Error>;
