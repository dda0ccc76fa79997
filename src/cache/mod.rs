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

//! The TTL-bounded answer cache.
//!
//! Answers are cached whole, as [`Message`]s, under a key made from
//! the question (see [`key`]). Entries carry an absolute expiry and are
//! evicted lazily: an expired entry is removed by the lookup that finds
//! it. [`Cache::purge_expired`] can additionally be driven by a
//! maintenance thread.

use std::sync::RwLock;
use std::time::Instant;

use crate::message::{Message, Question};
use crate::rr::{Ttl, Type};

mod trie;
pub use trie::Trie;

////////////////////////////////////////////////////////////////////////
// CACHED RECORDS                                                     //
////////////////////////////////////////////////////////////////////////

/// A cached response together with the instant it stops being valid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachedRecord {
    pub expiry: Instant,
    pub message: Message,
}

impl CachedRecord {
    /// Wraps a resolved response for caching. The lifetime is the TTL
    /// of the first answer; responses without answers are not cached,
    /// so this returns `None` for them.
    pub fn new(message: Message, now: Instant) -> Option<Self> {
        let ttl = message.answers.first()?.ttl;
        Some(Self {
            expiry: now + ttl.as_duration(),
            message,
        })
    }

    /// Returns whether the record has expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expiry
    }
}

/// Returns the cache key for a question: the lowercased type mnemonic,
/// a dot, then the lowercased fully qualified name, as in
/// `a.www.example.com.`.
pub fn key(question: &Question) -> String {
    format!(
        "{}.{}",
        question.qtype.to_string().to_ascii_lowercase(),
        question.qname.to_lowercase()
    )
}

////////////////////////////////////////////////////////////////////////
// CACHE                                                              //
////////////////////////////////////////////////////////////////////////

/// The shared answer cache.
///
/// A single reader/writer lock guards the whole [`Trie`]. [`Cache::get`]
/// takes it exclusively since it may evict or re-time the entry it
/// finds; [`Cache::find`] only needs shared access.
#[derive(Debug, Default)]
pub struct Cache {
    trie: RwLock<Trie<CachedRecord>>,
}

impl Cache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &str, record: CachedRecord) {
        self.trie.write().unwrap().insert(key, record);
    }

    /// Removes the entry under `key`, if there is one.
    pub fn delete(&self, key: &str) {
        self.trie.write().unwrap().delete(key);
    }

    /// Looks up a live entry. See [`Cache::get_at`].
    pub fn get(&self, key: &str) -> Option<CachedRecord> {
        self.get_at(key, Instant::now())
    }

    /// Looks up the entry under `key` as of `now`.
    ///
    /// An expired entry is deleted and `None` returned. For a live
    /// entry, the TTL of every record in the cached message is first
    /// rewritten to the whole seconds remaining until expiry, so that
    /// clients see the TTL decay. EDNS OPT records are left alone,
    /// since their TTL field holds flags.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<CachedRecord> {
        let mut trie = self.trie.write().unwrap();
        if trie.find(key)?.is_expired_at(now) {
            trie.delete(key);
            return None;
        }

        let record = trie.find_mut(key)?;
        let remaining = Ttl::from_duration(record.expiry - now);
        for rr in record.message.records_mut() {
            if rr.rr_type != Type::OPT {
                rr.ttl = remaining;
            }
        }
        Some(record.clone())
    }

    /// Looks up the entry under `key` without checking its expiry or
    /// touching its TTLs.
    pub fn find(&self, key: &str) -> Option<CachedRecord> {
        self.trie.read().unwrap().find(key).cloned()
    }

    /// Removes every entry expired at `now`, returning how many were
    /// removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        self.trie
            .write()
            .unwrap()
            .retain(|record| !record.is_expired_at(now))
    }

    /// Returns the number of entries, live or expired.
    pub fn len(&self) -> usize {
        self.trie.read().unwrap().len()
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::class::Class;
    use crate::name::Name;
    use crate::rr::Record;

    fn response(qname: &str, ttl: u32) -> Message {
        let qname: Name = qname.parse().unwrap();
        Message {
            qr: true,
            questions: vec![Question::new(qname.clone(), Type::A, Class::IN)],
            answers: vec![Record::a(qname.clone(), ttl, Ipv4Addr::new(192, 0, 2, 1))],
            authorities: vec![Record::ns(qname, ttl, &"ns.test.".parse().unwrap())],
            ..Default::default()
        }
    }

    #[test]
    fn keys_are_lowercased() {
        let question = Question::new("WWW.Example.COM.".parse().unwrap(), Type::AAAA, Class::IN);
        assert_eq!(key(&question), "aaaa.www.example.com.");
    }

    #[test]
    fn responses_without_answers_are_not_cached() {
        let mut message = response("empty.test.", 60);
        message.answers.clear();
        assert!(CachedRecord::new(message, Instant::now()).is_none());
    }

    #[test]
    fn inserted_records_are_returned() {
        let cache = Cache::new();
        let start = Instant::now();
        let record = CachedRecord::new(response("www.google.com.", 60), start).unwrap();
        cache.insert("a.www.google.com.", record.clone());
        let got = cache.get_at("a.www.google.com.", start).unwrap();
        assert_eq!(got, record);
        assert!(cache.get_at("aaaa.www.google.com.", start).is_none());
    }

    #[test]
    fn ttls_decay_on_read() {
        let cache = Cache::new();
        let start = Instant::now();
        let record = CachedRecord::new(response("www.google.com.", 60), start).unwrap();
        cache.insert("a.www.google.com.", record);

        let got = cache
            .get_at("a.www.google.com.", start + Duration::from_millis(10_500))
            .unwrap();
        for rr in got.message.answers.iter().chain(&got.message.authorities) {
            assert_eq!(rr.ttl, Ttl::from(49));
        }
    }

    #[test]
    fn expired_records_are_evicted_on_read() {
        let cache = Cache::new();
        let start = Instant::now();
        let record = CachedRecord::new(response("old.test.", 1), start).unwrap();
        cache.insert("a.old.test.", record);

        let later = start + Duration::from_secs(2);
        assert!(cache.find("a.old.test.").is_some());
        assert!(cache.get_at("a.old.test.", later).is_none());
        assert!(cache.find("a.old.test.").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn find_has_no_side_effects() {
        let cache = Cache::new();
        let start = Instant::now();
        let record = CachedRecord::new(response("static.test.", 300), start).unwrap();
        cache.insert("a.static.test.", record.clone());
        assert_eq!(cache.find("a.static.test."), Some(record));
    }

    #[test]
    fn purge_removes_only_expired_records() {
        let cache = Cache::new();
        let start = Instant::now();
        for (name, ttl) in [("short.test.", 5), ("long.test.", 500)] {
            let record = CachedRecord::new(response(name, ttl), start).unwrap();
            cache.insert(&format!("a.{}", name), record);
        }
        assert_eq!(cache.purge_expired(start + Duration::from_secs(10)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.find("a.long.test.").is_some());
    }
}
