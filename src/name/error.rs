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

use std::fmt;

/// Why a [`Name`](super::Name) could not be parsed, from text or from
/// a message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    // Text form:
    /// A backslash escape was malformed or out of range.
    InvalidEscape,

    /// The text was empty.
    StrEmpty,

    /// The text contained non-ASCII characters.
    StrNotAscii,

    // Either form:
    /// A label exceeded 63 octets.
    LabelTooLong,

    /// The name exceeded 255 octets in wire form.
    NameTooLong,

    /// An empty label appeared before the end of the name.
    NullNonTerminal,

    // Wire form:
    /// A compression pointer did not point strictly backwards.
    InvalidPointer,

    /// The message ended in the middle of the name.
    UnexpectedEom,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match *self {
            Self::InvalidEscape => "bad escape sequence",
            Self::StrEmpty => "empty name",
            Self::StrNotAscii => "name is not ASCII",
            Self::LabelTooLong => "label exceeds 63 octets",
            Self::NameTooLong => "name exceeds 255 octets",
            Self::NullNonTerminal => "empty label inside name",
            Self::InvalidPointer => "compression pointer does not point backwards",
            Self::UnexpectedEom => "message ends inside name",
        };
        f.write_str(what)
    }
}

impl std::error::Error for Error {}
