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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::fmt;

use super::constants::*;
use super::{Message, Question, MAX_MESSAGE_LEN};
use crate::name::Name;
use crate::rr::{Record, Type};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// Serializes a DNS message into a growable buffer, never letting it
/// grow past a size limit.
///
/// The header is initially zeroed and can be set at any time with
/// [`Writer::set_header`]. Questions and records are appended in order
/// with [`Writer::add_question`] and [`Writer::add_record`]; attempts to
/// go back to an earlier section fail with [`Error::OutOfOrder`]. Every
/// addition is atomic: if it fails (most commonly with
/// [`Error::Truncation`], when the limit would be exceeded) the message
/// is left exactly as it was.
///
/// Domain names are compressed case-preservingly: a suffix is replaced
/// by a pointer only when an identical suffix (octet for octet) was
/// already written. Owner names, question names and the RDATA of NS,
/// CNAME and PTR records are compressed.
pub struct Writer {
    octets: Vec<u8>,
    limit: usize,
    section: Section,
    counts: [u16; 4],
    prior_names: Vec<PriorName>,
}

/// The sections of a DNS message, in the order they are written.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

/// A suffix of a name already in the message, usable as a compression
/// target.
struct PriorName {
    suffix: Box<[u8]>,
    pointer: u16,
}

impl Writer {
    /// Creates a new `Writer` that will produce a message of at most
    /// `limit` octets. The limit must leave room for the header.
    pub fn new(limit: usize) -> Result<Self> {
        if limit < HEADER_SIZE {
            Err(Error::Truncation)
        } else {
            Ok(Self {
                octets: vec![0; HEADER_SIZE],
                limit: limit.min(MAX_MESSAGE_LEN),
                section: Section::Question,
                counts: [0; 4],
                prior_names: Vec::new(),
            })
        }
    }

    /// Copies the ID and flags of `message` into the header. Section
    /// counts are kept by the `Writer` itself.
    pub fn set_header(&mut self, message: &Message) {
        let mut flags = ((u8::from(message.opcode) as u16) << OPCODE_SHIFT) & OPCODE_MASK;
        flags |= u8::from(message.rcode) as u16 & RCODE_MASK;
        for (set, mask) in [
            (message.qr, QR_MASK),
            (message.aa, AA_MASK),
            (message.tc, TC_MASK),
            (message.rd, RD_MASK),
            (message.ra, RA_MASK),
            (message.ad, AD_MASK),
            (message.cd, CD_MASK),
        ] {
            if set {
                flags |= mask;
            }
        }
        self.write_u16(ID_START, message.id);
        self.write_u16(FLAGS_START, flags);
    }

    /// Sets or clears the TC bit.
    pub fn set_tc(&mut self, tc: bool) {
        let mut flags = u16::from_be_bytes([self.octets[FLAGS_START], self.octets[FLAGS_START + 1]]);
        if tc {
            flags |= TC_MASK;
        } else {
            flags &= !TC_MASK;
        }
        self.write_u16(FLAGS_START, flags);
    }

    /// Appends a question.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        self.with_rollback(|this| {
            this.change_section(Section::Question)?;
            this.push_name(&question.qname)?;
            this.try_push(&u16::from(question.qtype).to_be_bytes())?;
            this.try_push(&u16::from(question.qclass).to_be_bytes())?;
            this.increment_count(Section::Question)
        })
    }

    /// Appends a record to `section`, which must not be a section that
    /// has already been left behind.
    pub fn add_record(&mut self, section: Section, record: &Record) -> Result<()> {
        if section == Section::Question {
            return Err(Error::OutOfOrder);
        }
        self.with_rollback(|this| {
            this.change_section(section)?;
            this.push_name(&record.owner)?;
            this.try_push(&u16::from(record.rr_type).to_be_bytes())?;
            this.try_push(&u16::from(record.class).to_be_bytes())?;
            this.try_push(&u32::from(record.ttl).to_be_bytes())?;

            // RDLENGTH is filled in once the RDATA is written.
            let rdlength_index = this.octets.len();
            this.try_push(&[0, 0])?;
            match record.rr_type {
                Type::NS | Type::CNAME | Type::PTR => match record.rdata.as_name() {
                    Some(name) => this.push_name(&name)?,
                    None => this.try_push(record.rdata.octets())?,
                },
                _ => this.try_push(record.rdata.octets())?,
            }
            let rdlength = this.octets.len() - rdlength_index - 2;
            this.write_u16(rdlength_index, rdlength as u16);
            this.increment_count(section)
        })
    }

    /// Fills in the section counts and returns the finished message.
    pub fn finish(mut self) -> Vec<u8> {
        let starts = [QDCOUNT_START, ANCOUNT_START, NSCOUNT_START, ARCOUNT_START];
        for (start, count) in starts.into_iter().zip(self.counts) {
            self.write_u16(start, count);
        }
        self.octets
    }

    /// Moves on to `section`, if that does not mean going backwards.
    fn change_section(&mut self, section: Section) -> Result<()> {
        if section < self.section {
            Err(Error::OutOfOrder)
        } else {
            self.section = section;
            Ok(())
        }
    }

    fn increment_count(&mut self, section: Section) -> Result<()> {
        let count = &mut self.counts[section as usize];
        *count = count.checked_add(1).ok_or(Error::CountOverflow)?;
        Ok(())
    }

    /// Executes `f(self)`, returning the result and rolling back the
    /// section, buffer and compression state first if the result is an
    /// error.
    fn with_rollback<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_section = self.section;
        let saved_len = self.octets.len();
        let saved_n_prior_names = self.prior_names.len();
        let saved_counts = self.counts;
        let result = f(self);
        if result.is_err() {
            self.section = saved_section;
            self.octets.truncate(saved_len);
            self.prior_names.truncate(saved_n_prior_names);
            self.counts = saved_counts;
        }
        result
    }

    /// Writes a name, replacing its longest previously written suffix
    /// with a pointer. Every new suffix that can be pointed to is
    /// remembered.
    fn push_name(&mut self, name: &Name) -> Result<()> {
        let wire = name.wire_repr();
        let mut offset = 0;
        let mut new_suffixes = Vec::new();
        while wire[offset] != 0 {
            let suffix = &wire[offset..];
            if let Some(prior) = self.prior_names.iter().find(|p| *p.suffix == *suffix) {
                let pointer = prior.pointer | 0xc000;
                self.try_push(&wire[..offset])?;
                self.try_push(&pointer.to_be_bytes())?;
                self.remember(new_suffixes, wire);
                return Ok(());
            }
            new_suffixes.push((offset, self.octets.len() + offset));
            offset += wire[offset] as usize + 1;
        }
        self.try_push(wire)?;
        self.remember(new_suffixes, wire);
        Ok(())
    }

    fn remember(&mut self, new_suffixes: Vec<(usize, usize)>, wire: &[u8]) {
        for (offset, position) in new_suffixes {
            if position <= POINTER_MAX {
                self.prior_names.push(PriorName {
                    suffix: wire[offset..].into(),
                    pointer: position as u16,
                });
            }
        }
    }

    /// Appends `data`, failing if the limit would be exceeded.
    fn try_push(&mut self, data: &[u8]) -> Result<()> {
        if self.limit - self.octets.len() >= data.len() {
            self.octets.extend_from_slice(data);
            Ok(())
        } else {
            Err(Error::Truncation)
        }
    }

    /// Overwrites two octets at `index`, which must already be written.
    fn write_u16(&mut self, index: usize, data: u16) {
        self.octets[index..index + 2].copy_from_slice(&data.to_be_bytes());
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Writer")
            .field("len", &self.octets.len())
            .field("limit", &self.limit)
            .field("section", &self.section)
            .field("counts", &self.counts)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a question or record could not be written.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Adding the question or record would overflow the corresponding
    /// 16-bit counter in the DNS header.
    CountOverflow,

    /// There is not enough room left under the limit.
    Truncation,

    /// An attempt was made to serialize a question or record in the
    /// wrong place in the message (e.g., adding a question after an
    /// answer has already been serialized).
    OutOfOrder,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::CountOverflow => f.write_str("record count would overflow"),
            Self::Truncation => f.write_str("message would be truncated"),
            Self::OutOfOrder => f.write_str("question or record serialized out of order"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::class::Class;

    fn question() -> Question {
        Question::new("dnsproxy.test.".parse().unwrap(), Type::A, Class::IN)
    }

    #[test]
    fn owner_names_are_compressed() {
        let mut writer = Writer::new(512).unwrap();
        writer.add_question(&question()).unwrap();
        let answer = Record::a("dnsproxy.test.".parse().unwrap(), 3600, Ipv4Addr::LOCALHOST);
        writer.add_record(Section::Answer, &answer).unwrap();
        assert_eq!(
            writer.finish(),
            b"\x00\x00\x00\x00\x00\x01\x00\x01\x00\x00\x00\x00\
              \x08dnsproxy\x04test\x00\x00\x01\x00\x01\
              \xc0\x0c\x00\x01\x00\x01\x00\x00\x0e\x10\x00\x04\
              \x7f\x00\x00\x01",
        );
    }

    #[test]
    fn compression_preserves_case() {
        let mut writer = Writer::new(512).unwrap();
        writer.add_question(&question()).unwrap();
        let answer = Record::a("Dnsproxy.test.".parse().unwrap(), 3600, Ipv4Addr::LOCALHOST);
        writer.add_record(Section::Answer, &answer).unwrap();
        assert_eq!(
            writer.finish(),
            b"\x00\x00\x00\x00\x00\x01\x00\x01\x00\x00\x00\x00\
              \x08dnsproxy\x04test\x00\x00\x01\x00\x01\
              \x08Dnsproxy\xc0\x15\x00\x01\x00\x01\x00\x00\x0e\x10\x00\x04\
              \x7f\x00\x00\x01",
        );
    }

    #[test]
    fn cname_rdata_is_compressed() {
        let mut writer = Writer::new(512).unwrap();
        writer.add_question(&question()).unwrap();
        let answer = Record::cname(
            "dnsproxy.test.".parse().unwrap(),
            60,
            &"www.dnsproxy.test.".parse().unwrap(),
        );
        writer.add_record(Section::Answer, &answer).unwrap();
        let octets = writer.finish();
        assert_eq!(&octets[octets.len() - 8..], b"\x00\x06\x03www\xc0\x0c");
    }

    #[test]
    fn failed_additions_are_rolled_back() {
        let mut writer = Writer::new(40).unwrap();
        writer.add_question(&question()).unwrap();
        let answer = Record::a("other.test.".parse().unwrap(), 60, Ipv4Addr::LOCALHOST);
        assert_eq!(
            writer.add_record(Section::Answer, &answer),
            Err(Error::Truncation)
        );
        let octets = writer.finish();
        assert_eq!(octets.len(), 31);
        assert_eq!(&octets[6..8], b"\x00\x00");
    }

    #[test]
    fn sections_must_be_written_in_order() {
        let mut writer = Writer::new(512).unwrap();
        let record = Record::a("dnsproxy.test.".parse().unwrap(), 60, Ipv4Addr::LOCALHOST);
        writer.add_record(Section::Authority, &record).unwrap();
        assert_eq!(
            writer.add_record(Section::Answer, &record),
            Err(Error::OutOfOrder)
        );
        assert_eq!(writer.add_question(&question()), Err(Error::OutOfOrder));
    }
}
