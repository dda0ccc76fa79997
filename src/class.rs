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

//! The [`Class`] of a record or question.

use std::fmt;

/// A DNS class (or QCLASS), as the raw 16-bit value from the wire.
///
/// Almost all traffic is [`IN`](Class::IN). A proxy passes every
/// other value through unchanged; the one place a class is not really
/// a class is the OPT pseudo-record, which reuses the field for the
/// sender's UDP payload size.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Class(u16);

impl Class {
    pub const IN: Self = Self(1);
    pub const CH: Self = Self(3);
    pub const HS: Self = Self(4);
    pub const NONE: Self = Self(254);
    pub const ANY: Self = Self(255);

    /// Returns the standard mnemonic of the class, if it has one.
    pub fn mnemonic(self) -> Option<&'static str> {
        MNEMONICS
            .iter()
            .find(|(class, _)| *class == self)
            .map(|(_, mnemonic)| *mnemonic)
    }
}

const MNEMONICS: [(Class, &str); 5] = [
    (Class::IN, "IN"),
    (Class::CH, "CH"),
    (Class::HS, "HS"),
    (Class::NONE, "NONE"),
    (Class::ANY, "ANY"),
];

impl From<u16> for Class {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Class> for u16 {
    fn from(class: Class) -> Self {
        class.0
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.mnemonic() {
            Some(mnemonic) => f.write_str(mnemonic),
            None => write!(f, "CLASS{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_classes_use_generic_form() {
        assert_eq!(Class::IN.to_string(), "IN");
        assert_eq!(Class::from(1232).to_string(), "CLASS1232");
    }
}
