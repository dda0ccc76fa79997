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

//! Helpers for inspecting and building messages during resolution.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::cache;
use crate::class::Class;
use crate::message::{Message, Question, Rcode};
use crate::name::Name;
use crate::rr::Type;

/// Returns whether the rcode is NOERROR.
pub fn is_successful_response(message: &Message) -> bool {
    message.rcode == Rcode::NOERROR
}

/// Returns whether the answer, authority and additional sections are
/// all empty.
pub fn is_empty_response(message: &Message) -> bool {
    message.answers.is_empty() && message.authorities.is_empty() && message.additionals.is_empty()
}

/// Returns whether `message` is a final answer: either some answer has
/// the type that was asked for, or there are no answers and the
/// authority section is exactly one SOA record (an authoritative
/// negative answer).
pub fn got_answer(message: &Message) -> bool {
    let qtype = match message.question() {
        Some(question) => question.qtype,
        None => return false,
    };
    if message.answers.iter().any(|rr| rr.rr_type == qtype) {
        return true;
    }
    message.answers.is_empty()
        && message.authorities.len() == 1
        && message.authorities[0].rr_type == Type::SOA
}

/// Returns the IPv4 addresses of the A records in the additional
/// section, which in a referral are the glue for the delegated name
/// servers.
pub fn find_extras(message: &Message) -> Vec<Ipv4Addr> {
    message.additionals.iter().filter_map(|rr| rr.ipv4()).collect()
}

/// Returns the name server host names of a referral: the NS records of
/// the authority section, provided there are no answers.
pub fn find_ns(message: &Message) -> Option<Vec<Name>> {
    if !message.answers.is_empty() {
        return None;
    }
    Some(message.authorities.iter().filter_map(|rr| rr.ns_host()).collect())
}

/// For an authoritative response with additional records, returns a copy
/// whose answers are those records. OPT pseudo-records are not data and
/// are never promoted.
pub fn find_ns_extras(message: &Message) -> Option<Message> {
    if !message.aa {
        return None;
    }
    let extras: Vec<_> = message
        .additionals
        .iter()
        .filter(|rr| rr.rr_type != Type::OPT)
        .cloned()
        .collect();
    if extras.is_empty() {
        return None;
    }
    let mut copy = message.clone();
    copy.answers = extras;
    Some(copy)
}

/// Follows the CNAME records of the answer and authority sections from
/// the question name, returning the name at the end of the chain.
/// Returns `None` if the question name has no CNAME.
///
/// A chain that loops within the message is followed once around and
/// the name reached is returned; the caller's hop limit ends the loop.
pub fn find_cname(message: &Message) -> Option<Name> {
    let aliases: HashMap<&Name, Name> = message
        .answers
        .iter()
        .chain(&message.authorities)
        .filter_map(|rr| rr.cname_target().map(|target| (&rr.owner, target)))
        .collect();

    let mut current = &message.question()?.qname;
    let mut steps = 0;
    while let Some(target) = aliases.get(current) {
        current = target;
        steps += 1;
        if steps >= aliases.len() {
            break;
        }
    }
    if steps == 0 {
        None
    } else {
        Some(current.clone())
    }
}

/// Builds a query for `qname` with recursion desired.
pub fn new_query(id: u16, qname: Name, qtype: Type, qclass: Class) -> Message {
    Message {
        id,
        rd: true,
        questions: vec![Question::new(qname, qtype, qclass)],
        ..Default::default()
    }
}

/// Builds an empty response with the given rcode.
pub fn new_response(rcode: Rcode) -> Message {
    Message {
        qr: true,
        rd: true,
        rcode,
        ..Default::default()
    }
}

/// Returns the cache key of the message's first question.
pub fn question_key(message: &Message) -> Option<String> {
    message.question().map(cache::key)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
