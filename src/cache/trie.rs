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

//! Implementation of the [`Trie`] type.

use std::collections::HashMap;

/// A character trie keyed by reversed strings.
///
/// Keys are stored back to front, so `a.google.com` and `b.google.com`
/// share the path `moc.elgoog.` and only branch at the last label.
/// A node holds a value only when it ends an inserted key; interior
/// nodes never carry payloads.
///
/// The trie is not synchronized; see [`Cache`](super::Cache).
#[derive(Debug)]
pub struct Trie<T> {
    root: Node<T>,
}

#[derive(Debug)]
struct Node<T> {
    is_leaf: bool,
    children: HashMap<char, Node<T>>,
    payload: Option<T>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            is_leaf: false,
            children: HashMap::new(),
            payload: None,
        }
    }

    fn is_hit(&self) -> bool {
        self.is_leaf && self.payload.is_some()
    }
}

impl<T> Trie<T> {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: T) {
        let mut node = &mut self.root;
        for c in key.chars().rev() {
            node = node.children.entry(c).or_insert_with(Node::new);
        }
        node.is_leaf = true;
        node.payload = Some(value);
    }

    /// Removes and returns the value under `key`. Nothing happens if
    /// the key was never inserted.
    pub fn delete(&mut self, key: &str) -> Option<T> {
        let node = self.node_mut(key)?;
        node.is_leaf = false;
        node.payload.take()
    }

    /// Looks up the value under `key`.
    pub fn find(&self, key: &str) -> Option<&T> {
        let mut node = &self.root;
        for c in key.chars().rev() {
            node = node.children.get(&c)?;
        }
        if node.is_hit() {
            node.payload.as_ref()
        } else {
            None
        }
    }

    /// Looks up the value under `key` for modification.
    pub fn find_mut(&mut self, key: &str) -> Option<&mut T> {
        let node = self.node_mut(key)?;
        if node.is_hit() {
            node.payload.as_mut()
        } else {
            None
        }
    }

    /// Removes every value for which `keep` returns false, returning
    /// how many were removed. Emptied branches are pruned.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        retain_in(&mut self.root, &mut keep)
    }

    /// Returns the number of values in the trie.
    pub fn len(&self) -> usize {
        count_in(&self.root)
    }

    /// Returns whether the trie holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node_mut(&mut self, key: &str) -> Option<&mut Node<T>> {
        let mut node = &mut self.root;
        for c in key.chars().rev() {
            node = node.children.get_mut(&c)?;
        }
        Some(node)
    }
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn retain_in<T, F>(node: &mut Node<T>, keep: &mut F) -> usize
where
    F: FnMut(&T) -> bool,
{
    let mut removed = 0;
    if let Some(payload) = node.payload.as_ref() {
        if !keep(payload) {
            node.payload = None;
            node.is_leaf = false;
            removed += 1;
        }
    }
    for child in node.children.values_mut() {
        removed += retain_in(child, keep);
    }
    node.children
        .retain(|_, child| child.is_leaf || !child.children.is_empty());
    removed
}

fn count_in<T>(node: &Node<T>) -> usize {
    let own = if node.is_hit() { 1 } else { 0 };
    own + node.children.values().map(count_in).sum::<usize>()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_found_by_key() {
        let mut trie = Trie::new();
        trie.insert("a.www.google.com", 1);
        trie.insert("a.www.google.com", 2);
        assert_eq!(trie.find("a.www.google.com"), Some(&2));
        assert_eq!(trie.find("aaaa.www.google.com"), None);
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn keys_share_suffix_paths() {
        let mut trie = Trie::new();
        trie.insert("a.www.google.com", 1);
        trie.insert("a.mail.google.com", 2);

        // Both keys hang off a single "moc.elgoog." path.
        let mut node = &trie.root;
        for c in "moc.elgoog.".chars() {
            assert_eq!(node.children.len(), 1);
            node = &node.children[&c];
        }
        assert_eq!(node.children.len(), 2);

        // The shared interior node is not a hit.
        assert_eq!(trie.find("google.com"), None);
        assert_eq!(trie.find(".google.com"), None);
    }

    #[test]
    fn delete_clears_only_the_addressed_key() {
        let mut trie = Trie::new();
        trie.insert("a.example.com", 1);
        trie.insert("a.www.example.com", 2);
        assert_eq!(trie.delete("a.example.com"), Some(1));
        assert_eq!(trie.delete("a.example.com"), None);
        assert_eq!(trie.delete("never.inserted"), None);
        assert_eq!(trie.find("a.example.com"), None);
        assert_eq!(trie.find("a.www.example.com"), Some(&2));
    }

    #[test]
    fn retain_prunes_removed_branches() {
        let mut trie = Trie::new();
        trie.insert("a.one.test", 1);
        trie.insert("a.two.test", 2);
        trie.insert("a.three.test", 3);
        assert_eq!(trie.retain(|value| *value != 2), 1);
        assert_eq!(trie.len(), 2);
        assert_eq!(trie.find("a.two.test"), None);
        assert_eq!(trie.retain(|_| false), 2);
        assert!(trie.is_empty());
        assert!(trie.root.children.is_empty());
    }
}
