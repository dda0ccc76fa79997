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

//! Implementation of reading and writing of DNS messages.

mod constants;
mod opcode;
mod question;
mod rcode;
pub mod reader;
pub mod writer;
pub use opcode::Opcode;
pub use question::Question;
pub use rcode::Rcode;
pub use reader::Reader;
pub use writer::Writer;

use crate::rr::{Record, Type};

/// The largest UDP payload that may be sent to a client that did not
/// advertise a larger size with EDNS.
pub const MIN_UDP_PAYLOAD: usize = 512;

/// The largest message that can be framed for TCP.
pub const MAX_MESSAGE_LEN: usize = 65535;

////////////////////////////////////////////////////////////////////////
// MESSAGES                                                           //
////////////////////////////////////////////////////////////////////////

/// An owned, fully parsed DNS message.
///
/// A proxy spends its time copying records between messages, rewriting
/// TTLs and swapping IDs, so unlike an authoritative server it works on
/// owned sections rather than writing straight into a buffer. Messages
/// are read with [`Message::from_wire`] and serialized with
/// [`Message::to_wire`] or [`Message::to_wire_with_limit`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    pub id: u16,
    pub qr: bool,
    pub opcode: Opcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: Rcode,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Parses a message in wire format. Octets after the last record
    /// counted in the header are ignored.
    pub fn from_wire(octets: &[u8]) -> reader::Result<Self> {
        let mut reader = Reader::try_from(octets)?;
        let mut message = reader.header();
        for _ in 0..reader.qdcount() {
            message.questions.push(reader.read_question()?);
        }
        for _ in 0..reader.ancount() {
            message.answers.push(reader.read_rr()?);
        }
        for _ in 0..reader.nscount() {
            message.authorities.push(reader.read_rr()?);
        }
        for _ in 0..reader.arcount() {
            message.additionals.push(reader.read_rr()?);
        }
        Ok(message)
    }

    /// Serializes the message with no size limit other than the
    /// protocol's own.
    pub fn to_wire(&self) -> writer::Result<Vec<u8>> {
        self.to_wire_with_limit(MAX_MESSAGE_LEN)
    }

    /// Serializes the message in at most `limit` octets. Records that
    /// do not fit are left out, and the TC bit is set if any were.
    /// Only when not even the header and questions fit does this fail.
    pub fn to_wire_with_limit(&self, limit: usize) -> writer::Result<Vec<u8>> {
        let mut writer = Writer::new(limit)?;
        writer.set_header(self);
        for question in &self.questions {
            writer.add_question(question)?;
        }
        let sections = [
            (writer::Section::Answer, &self.answers),
            (writer::Section::Authority, &self.authorities),
            (writer::Section::Additional, &self.additionals),
        ];
        'sections: for (section, records) in sections {
            for record in records.iter() {
                match writer.add_record(section, record) {
                    Ok(()) => (),
                    Err(writer::Error::Truncation) => {
                        writer.set_tc(true);
                        break 'sections;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(writer.finish())
    }

    /// Returns the first question of the message, if there is one.
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Returns the UDP payload size the sender advertised in an EDNS
    /// OPT record, if it included one.
    pub fn edns_udp_payload_size(&self) -> Option<u16> {
        self.additionals
            .iter()
            .find(|record| record.rr_type == Type::OPT)
            .map(|opt| u16::from(opt.class))
    }

    /// Returns an iterator over mutable references to the records of
    /// the answer, authority and additional sections, in that order.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.answers
            .iter_mut()
            .chain(self.authorities.iter_mut())
            .chain(self.additionals.iter_mut())
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
    use crate::rr::{Rdata, Ttl};

    fn sample_response() -> Message {
        let qname: Name = "www.example.com.".parse().unwrap();
        let target: Name = "example.com.".parse().unwrap();
        Message {
            id: 0x1234,
            qr: true,
            rd: true,
            ra: true,
            questions: vec![Question::new(qname.clone(), Type::A, Class::IN)],
            answers: vec![
                Record::cname(qname, 300, &target),
                Record::a(target.clone(), 60, Ipv4Addr::new(192, 0, 2, 1)),
            ],
            authorities: vec![Record::ns(
                target.clone(),
                3600,
                &"ns.example.com.".parse().unwrap(),
            )],
            additionals: vec![Record::new(
                Name::root(),
                Type::OPT,
                Class::from(1232),
                Ttl::from(0),
                Rdata::from(&b""[..]),
            )],
            ..Default::default()
        }
    }

    #[test]
    fn messages_survive_the_wire() {
        let message = sample_response();
        let octets = message.to_wire().unwrap();
        assert_eq!(Message::from_wire(&octets).unwrap(), message);
    }

    #[test]
    fn limit_truncates_and_sets_tc() {
        let message = sample_response();
        let full = message.to_wire().unwrap();
        let truncated = message.to_wire_with_limit(full.len() - 1).unwrap();
        assert!(truncated.len() < full.len());
        let parsed = Message::from_wire(&truncated).unwrap();
        assert!(parsed.tc);
        assert_eq!(parsed.answers, message.answers);
        assert!(parsed.additionals.is_empty());
    }

    #[test]
    fn edns_payload_size_is_found() {
        assert_eq!(sample_response().edns_udp_payload_size(), Some(1232));
        assert_eq!(Message::default().edns_udp_payload_size(), None);
    }
}
