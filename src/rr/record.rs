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

//! Implementation of the [`Record`] type.

use std::net::Ipv4Addr;

use super::{Rdata, Ttl, Type};
use crate::class::Class;
use crate::name::Name;

/// A single resource record, as it appears in one of the answer,
/// authority or additional sections of a message.
///
/// Unlike an authoritative server, a proxy never needs to group records
/// into RRsets: it only inspects, copies and re-times them. So records
/// are kept flat, in message order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub owner: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    pub rdata: Rdata,
}

impl Record {
    /// Creates a new `Record`.
    pub fn new(owner: Name, rr_type: Type, class: Class, ttl: Ttl, rdata: Rdata) -> Self {
        Self {
            owner,
            rr_type,
            class,
            ttl,
            rdata,
        }
    }

    /// Creates an IN A record.
    pub fn a(owner: Name, ttl: u32, address: Ipv4Addr) -> Self {
        Self::new(
            owner,
            Type::A,
            Class::IN,
            ttl.into(),
            Rdata::from_ipv4(address),
        )
    }

    /// Creates an IN CNAME record.
    pub fn cname(owner: Name, ttl: u32, target: &Name) -> Self {
        Self::new(
            owner,
            Type::CNAME,
            Class::IN,
            ttl.into(),
            Rdata::from_name(target),
        )
    }

    /// Creates an IN NS record.
    pub fn ns(owner: Name, ttl: u32, host: &Name) -> Self {
        Self::new(
            owner,
            Type::NS,
            Class::IN,
            ttl.into(),
            Rdata::from_name(host),
        )
    }

    /// Creates an IN SOA record with conventional timer values.
    pub fn soa(owner: Name, ttl: u32, mname: &Name, rname: &Name, serial: u32) -> Self {
        Self::new(
            owner,
            Type::SOA,
            Class::IN,
            ttl.into(),
            Rdata::soa(mname, rname, serial, ttl),
        )
    }

    /// If this is a CNAME record, returns its target.
    pub fn cname_target(&self) -> Option<Name> {
        if self.rr_type == Type::CNAME {
            self.rdata.as_name()
        } else {
            None
        }
    }

    /// If this is an NS record, returns the name server's host name.
    pub fn ns_host(&self) -> Option<Name> {
        if self.rr_type == Type::NS {
            self.rdata.as_name()
        } else {
            None
        }
    }

    /// If this is an IN A record, returns its address.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        if self.rr_type == Type::A && self.class == Class::IN {
            self.rdata.as_ipv4()
        } else {
            None
        }
    }
}
