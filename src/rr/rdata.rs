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

//! Implementation of the [`Rdata`] type and DNS RDATA processing.

use std::fmt;
use std::net::Ipv4Addr;

use super::Type;
use crate::name::{self, Name};

////////////////////////////////////////////////////////////////////////
// RDATA TYPE                                                         //
////////////////////////////////////////////////////////////////////////

/// Owned record RDATA.
///
/// RDATA read from a message is stored with any embedded domain names
/// decompressed, so that it stays meaningful once it is separated from
/// the message it came from (in the cache, or when records are spliced
/// into another message). Only the RR types whose embedded names may be
/// compressed per [RFC 3597 § 4] and that a proxy actually meets in
/// practice (NS, CNAME, PTR, SOA and MX) are decompressed; everything
/// else is kept verbatim.
///
/// [RFC 3597 § 4]: https://datatracker.ietf.org/doc/html/rfc3597#section-4
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Rdata {
    octets: Box<[u8]>,
}

impl Rdata {
    /// Reads RDATA of type `rr_type` and length `rdlength` starting at
    /// `message[cursor]`, decompressing embedded names where needed.
    ///
    /// If the remaining part of the message is not `rdlength` long,
    /// this fails with [`ReadRdataError::UnexpectedEom`] rather than
    /// panicking.
    pub fn read(
        rr_type: Type,
        message: &[u8],
        cursor: usize,
        rdlength: u16,
    ) -> Result<Self, ReadRdataError> {
        let end = cursor + rdlength as usize;
        if end > message.len() {
            return Err(ReadRdataError::UnexpectedEom);
        }
        let buf = &message[..end];

        match rr_type {
            Type::NS | Type::CNAME | Type::PTR => read_name_rdata(buf, cursor),
            Type::SOA => read_soa(buf, cursor),
            Type::MX => read_mx(buf, cursor),
            _ => Ok(Self::from(&buf[cursor..])),
        }
    }

    /// Builds the RDATA of a record holding a single domain name (NS,
    /// CNAME or PTR).
    pub fn from_name(name: &Name) -> Self {
        Self::from(name.wire_repr())
    }

    /// Builds the RDATA of an IN A record.
    pub fn from_ipv4(address: Ipv4Addr) -> Self {
        Self::from(&address.octets()[..])
    }

    /// Builds the RDATA of an SOA record.
    pub fn soa(mname: &Name, rname: &Name, serial: u32, minimum: u32) -> Self {
        let mut octets = Vec::with_capacity(mname.wire_repr().len() + rname.wire_repr().len() + 20);
        octets.extend_from_slice(mname.wire_repr());
        octets.extend_from_slice(rname.wire_repr());
        octets.extend_from_slice(&serial.to_be_bytes());
        for field in [7200u32, 3600, 1_209_600, minimum] {
            octets.extend_from_slice(&field.to_be_bytes());
        }
        Self::from(octets.as_slice())
    }

    /// Interprets the RDATA as a single uncompressed domain name, as
    /// held by NS, CNAME and PTR records.
    pub fn as_name(&self) -> Option<Name> {
        match Name::try_from_compressed(&self.octets, 0) {
            Ok((name, len)) if len == self.octets.len() => Some(name),
            _ => None,
        }
    }

    /// Interprets the RDATA as an IN A address.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.octets.as_ref().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    /// Returns the underlying octets.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }
}

impl From<&[u8]> for Rdata {
    fn from(octets: &[u8]) -> Self {
        Self {
            octets: octets.into(),
        }
    }
}

impl fmt::Debug for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("\\# ")?;
        write!(f, "{}", self.octets.len())?;
        for octet in self.octets.iter() {
            write!(f, " {:02x}", octet)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TYPE-SPECIFIC READERS                                              //
////////////////////////////////////////////////////////////////////////

/// Decompresses RDATA consisting of a single domain name. `buf` ends
/// exactly where the RDATA ends.
fn read_name_rdata(buf: &[u8], cursor: usize) -> Result<Rdata, ReadRdataError> {
    let (name, len) = Name::try_from_compressed(buf, cursor)?;
    if buf.len() - cursor != len {
        Err(ReadRdataError::Other)
    } else {
        Ok(Rdata::from_name(&name))
    }
}

/// Decompresses SOA RDATA: two names followed by five 32-bit fields.
fn read_soa(buf: &[u8], cursor: usize) -> Result<Rdata, ReadRdataError> {
    let (mname, mlen) = Name::try_from_compressed(buf, cursor)?;
    let (rname, rlen) = Name::try_from_compressed(buf, cursor + mlen)?;
    if buf.len() - cursor - mlen - rlen != 20 {
        Err(ReadRdataError::Other)
    } else {
        let mut octets = Vec::with_capacity(mname.wire_repr().len() + rname.wire_repr().len() + 20);
        octets.extend_from_slice(mname.wire_repr());
        octets.extend_from_slice(rname.wire_repr());
        octets.extend_from_slice(&buf[cursor + mlen + rlen..]);
        Ok(Rdata::from(octets.as_slice()))
    }
}

/// Decompresses MX RDATA: a 16-bit preference and a name.
fn read_mx(buf: &[u8], cursor: usize) -> Result<Rdata, ReadRdataError> {
    if buf.len() - cursor < 2 {
        return Err(ReadRdataError::Other);
    }
    let (exchange, len) = Name::try_from_compressed(buf, cursor + 2)?;
    if buf.len() - cursor != len + 2 {
        Err(ReadRdataError::Other)
    } else {
        let mut octets = Vec::with_capacity(2 + exchange.wire_repr().len());
        octets.extend_from_slice(&buf[cursor..cursor + 2]);
        octets.extend_from_slice(exchange.wire_repr());
        Ok(Rdata::from(octets.as_slice()))
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that RDATA could not be read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReadRdataError {
    /// The message ended before the RDATA did.
    UnexpectedEom,

    /// An embedded domain name was invalid.
    InvalidName(name::Error),

    /// The RDATA was otherwise malformed.
    Other,
}

impl From<name::Error> for ReadRdataError {
    fn from(err: name::Error) -> Self {
        Self::InvalidName(err)
    }
}

impl fmt::Display for ReadRdataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::UnexpectedEom => f.write_str("unexpected end of message in RDATA"),
            Self::InvalidName(err) => write!(f, "invalid name in RDATA: {}", err),
            Self::Other => f.write_str("malformed RDATA"),
        }
    }
}

impl std::error::Error for ReadRdataError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
