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

//! A caching, proxying DNS resolver.
//!
//! Clients send queries over UDP to a [`server::Server`]. Each query is
//! answered from the [`cache`] when possible, and otherwise by a
//! [`resolver::Resolver`], which asks the configured upstream resolvers
//! and, when they only refer it elsewhere, follows referrals and CNAME
//! chains itself. Queries are handled by an elastic
//! [`pool::WorkerPool`] that grows and shrinks with the backlog.

pub mod cache;
pub mod class;
pub mod message;
pub mod name;
pub mod net;
pub mod pool;
pub mod queue;
pub mod resolver;
pub mod rr;
pub mod server;
pub mod thread;
