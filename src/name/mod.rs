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

//! Implementation of the [`Name`] type for domain names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::str::FromStr;

mod error;
mod wire;
pub use error::Error;

/// The maximum length of a label, not including the length octet.
pub const MAX_LABEL_LEN: usize = 63;

/// The maximum length of a name's on-the-wire representation.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum number of labels in a name, including the null label.
pub const MAX_N_LABELS: usize = 128;

////////////////////////////////////////////////////////////////////////
// NAMES                                                              //
////////////////////////////////////////////////////////////////////////

/// A domain name.
///
/// A `Name` owns the uncompressed on-the-wire representation of a fully
/// qualified domain name, as defined in [RFC 1035 § 3.1]. Names read
/// from messages are decompressed on the way in (see
/// [`Name::try_from_compressed`]), so a `Name` can always be written
/// back out verbatim.
///
/// In accordance with RFC 1034 § 3.1 (clarified by RFC 4343),
/// comparison and hashing of `Name`s are ASCII-case-insensitive, while
/// the original case is kept for display and serialization.
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire: Box<[u8]>,
}

impl Name {
    /// Returns the root name.
    pub fn root() -> Self {
        Self {
            wire: Box::new([0]),
        }
    }

    /// Parses a compressed name starting at index `start` of `octets`.
    /// Pointers are followed, with indices interpreted relative to the
    /// start of `octets`; so `octets` should be the entire DNS
    /// message. On success, the name and the number of octets it
    /// occupied at `start` are returned.
    pub fn try_from_compressed(octets: &[u8], start: usize) -> Result<(Self, usize), Error> {
        wire::parse_compressed_name(octets, start)
    }

    /// Returns the on-the-wire representation of the name.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns an iterator over the non-null labels of the name, from
    /// left to right.
    pub fn labels(&self) -> Labels {
        Labels {
            wire: &self.wire,
            offset: 0,
        }
    }

    /// Returns the number of labels in the name, including the null
    /// label.
    pub fn len(&self) -> usize {
        self.labels().count() + 1
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Returns a copy of the name with all ASCII letters lowercased.
    pub fn to_lowercase(&self) -> Self {
        Self {
            wire: self.wire.to_ascii_lowercase().into_boxed_slice(),
        }
    }

    /// Builds a `Name` from a list of labels. This checks label and
    /// name lengths, but nothing else.
    fn from_labels(labels: &[Vec<u8>]) -> Result<Self, Error> {
        let mut wire = Vec::with_capacity(labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
        for label in labels {
            if label.is_empty() {
                return Err(Error::NullNonTerminal);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label);
        }
        wire.push(0);
        if wire.len() > MAX_WIRE_LEN {
            Err(Error::NameTooLong)
        } else {
            Ok(Self {
                wire: wire.into_boxed_slice(),
            })
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for octet in label {
                if *octet == b'.' {
                    f.write_str("\\.")?;
                } else if *octet == b'\\' {
                    f.write_str("\\\\")?;
                } else if octet.is_ascii_graphic() {
                    write!(f, "{}", *octet as char)?;
                } else {
                    write!(f, "\\{:03}", *octet)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.wire.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

/// Parses a name in presentation format. A trailing dot is optional:
/// every name is treated as fully qualified.
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Self::root());
        }

        let mut labels = vec![Vec::new()];
        let mut remaining_octets: &[u8] = s.as_ref();
        while let Some(&octet) = remaining_octets.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining_octets[1..])?;
                labels.last_mut().unwrap().push(value);
                remaining_octets = &remaining_octets[consumed + 1..];
            } else if octet == b'.' {
                labels.push(Vec::new());
                remaining_octets = &remaining_octets[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                labels.last_mut().unwrap().push(octet);
                remaining_octets = &remaining_octets[1..];
            }
        }

        // A trailing dot leaves an empty final label behind.
        if labels.len() > 1 && labels.last().map_or(false, Vec::is_empty) {
            labels.pop();
        }
        Self::from_labels(&labels)
    }
}

/// Parses an escape sequence. We expect `remaining_octets` to start
/// with the octet immediately *after* the backslash that introduces the
/// escape sequence.
fn parse_escape(remaining_octets: &[u8]) -> Result<(u8, usize), Error> {
    if remaining_octets.is_empty() {
        Err(Error::InvalidEscape)
    } else if remaining_octets[0].is_ascii_digit() {
        if remaining_octets.len() < 3
            || !remaining_octets[1].is_ascii_digit()
            || !remaining_octets[2].is_ascii_digit()
        {
            Err(Error::InvalidEscape)
        } else {
            let value = remaining_octets[..3]
                .iter()
                .fold(0usize, |acc, digit| 10 * acc + (digit - b'0') as usize);
            if value > 255 {
                Err(Error::InvalidEscape)
            } else {
                Ok((value as u8, 3))
            }
        }
    } else {
        Ok((remaining_octets[0], 1))
    }
}

////////////////////////////////////////////////////////////////////////
// LABEL ITERATOR                                                     //
////////////////////////////////////////////////////////////////////////

/// An iterator over the non-null labels of a [`Name`].
pub struct Labels<'a> {
    wire: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.wire[self.offset] as usize;
        if len == 0 {
            None
        } else {
            let start = self.offset + 1;
            self.offset = start + len;
            Some(&self.wire[start..self.offset])
        }
    }
}

impl FusedIterator for Labels<'_> {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_and_display_agree() {
        let name: Name = "www.Example.com.".parse().unwrap();
        assert_eq!(name.to_string(), "www.Example.com.");
        assert_eq!(name.wire_repr(), b"\x03www\x07Example\x03com\x00");
        assert_eq!(name.len(), 4);
    }

    #[test]
    fn trailing_dot_is_optional() {
        let relative: Name = "example.com".parse().unwrap();
        let absolute: Name = "example.com.".parse().unwrap();
        assert_eq!(relative, absolute);
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let lower: Name = "example.com.".parse().unwrap();
        let upper: Name = "EXAMPLE.COM.".parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(upper.to_lowercase().to_string(), "example.com.");
    }

    #[test]
    fn escapes_round_trip() {
        let name: Name = "a\\.b\\032c.test.".parse().unwrap();
        assert_eq!(name.labels().next().unwrap(), b"a.b c");
        assert_eq!(name.to_string(), "a\\.b\\032c.test.");
    }

    #[test]
    fn overlong_labels_are_rejected() {
        let label = "a".repeat(64);
        assert_eq!(label.parse::<Name>(), Err(Error::LabelTooLong));
        assert_eq!("a..b".parse::<Name>(), Err(Error::NullNonTerminal));
    }
}
