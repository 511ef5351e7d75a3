//! Character-indexed radix matcher with explicit end-of-match semantics.
//!
//! A node can carry two kinds of terminals: a *prefix* terminal, matching
//! any key that extends this node, and an *exact* terminal, matching only
//! when the key ends here. Lookup prefers an accepted exact terminal at
//! full key length; otherwise the shortest accepted prefix terminal wins.
//! When both kinds sit on the same node, the prefix terminal is tried
//! first, so callers wanting exact semantics must terminate their pattern
//! with `#`.

use std::collections::HashMap;

use crate::error::{RutaError, RutaResult};

#[derive(Debug)]
struct TrieNode<T> {
    children: HashMap<char, TrieNode<T>>,
    prefix: Option<T>,
    exact: Option<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            prefix: None,
            exact: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalKind {
    Prefix,
    Exact,
}

#[derive(Debug)]
pub struct PathTrie<T> {
    root: TrieNode<T>,
}

impl<T> Default for PathTrie<T> {
    fn default() -> Self {
        Self {
            root: TrieNode::default(),
        }
    }
}

impl<T: Clone> PathTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pattern. A `#` marks the end of an exact key; the marker
    /// suffix controls additional insertions:
    ///
    /// - `path#` — exact match only.
    /// - `path#?` — exact, plus `path/` as a prefix.
    /// - `path#s` — exact, plus `path/` as exact (when `path` does not
    ///   already end with a slash).
    /// - `path#i` — exact, plus `path/` and `path/index.html` as exact.
    ///
    /// A pattern without `#` registers a prefix terminal.
    pub fn insert(&mut self, pattern: &str, data: T) -> RutaResult<()> {
        let Some(pos) = pattern.find('#') else {
            return self.insert_at(pattern, TerminalKind::Prefix, data);
        };

        let key = &pattern[..pos];
        let marker = &pattern[pos + 1..];
        match marker {
            "" => self.insert_at(key, TerminalKind::Exact, data),
            "?" => {
                self.insert_at(key, TerminalKind::Exact, data.clone())?;
                self.insert_at(&format!("{}/", key), TerminalKind::Prefix, data)
            }
            "s" => {
                self.insert_at(key, TerminalKind::Exact, data.clone())?;
                if !key.ends_with('/') {
                    self.insert_at(&format!("{}/", key), TerminalKind::Exact, data)?;
                }
                Ok(())
            }
            "i" => {
                self.insert_at(key, TerminalKind::Exact, data.clone())?;
                let dir = if key.ends_with('/') {
                    key.to_string()
                } else {
                    let dir = format!("{}/", key);
                    self.insert_at(&dir, TerminalKind::Exact, data.clone())?;
                    dir
                };
                self.insert_at(&format!("{}index.html", dir), TerminalKind::Exact, data)
            }
            other => Err(RutaError::config(format!(
                "unknown route marker '#{}' in pattern '{}'",
                other, pattern
            ))),
        }
    }

    fn insert_at(&mut self, key: &str, kind: TerminalKind, data: T) -> RutaResult<()> {
        let mut node = &mut self.root;
        for ch in key.chars() {
            node = node.children.entry(ch).or_default();
        }
        let slot = match kind {
            TerminalKind::Prefix => &mut node.prefix,
            TerminalKind::Exact => &mut node.exact,
        };
        if slot.is_some() {
            return Err(RutaError::config(format!(
                "Duplicate or overlapping route at '{}'",
                key
            )));
        }
        *slot = Some(data);
        Ok(())
    }

    /// Walk `key` and return the matching terminal whose data passes
    /// `accept`, along with the byte length of the matched prefix.
    ///
    /// The shortest passing prefix terminal on the walk is remembered; an
    /// accepted exact terminal at full key length wins over it, except when
    /// both terminals sit on the same node, where the prefix is tried
    /// first. There is no other backtracking: a route refused by `accept`
    /// simply drops out of consideration.
    pub fn find<F>(&self, key: &str, accept: F) -> Option<(&T, usize)>
    where
        F: Fn(&T) -> bool,
    {
        let mut node = &self.root;
        let mut depth = 0;
        let mut best_prefix: Option<(&T, usize)> = None;
        let mut chars = key.chars();
        loop {
            if best_prefix.is_none() {
                if let Some(data) = node.prefix.as_ref() {
                    if accept(data) {
                        best_prefix = Some((data, depth));
                    }
                }
            }
            match chars.next() {
                None => {
                    // Prefix-before-exact on the terminal node itself.
                    if let Some((_, d)) = best_prefix {
                        if d == depth {
                            return best_prefix;
                        }
                    }
                    if let Some(data) = node.exact.as_ref() {
                        if accept(data) {
                            return Some((data, depth));
                        }
                    }
                    return best_prefix;
                }
                Some(ch) => match node.children.get(&ch) {
                    Some(next) => {
                        node = next;
                        depth += ch.len_utf8();
                    }
                    None => return best_prefix,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_any<'a>(trie: &'a PathTrie<u32>, key: &str) -> Option<(u32, usize)> {
        trie.find(key, |_| true).map(|(d, l)| (*d, l))
    }

    #[test]
    fn test_exact_vs_prefix() {
        let mut trie = PathTrie::new();
        trie.insert("/a/", 1).unwrap();
        trie.insert("/a/b#", 2).unwrap();

        // Exact terminal at full length wins over the shorter prefix
        assert_eq!(find_any(&trie, "/a/b"), Some((2, 4)));
        // Extensions fall back to the prefix terminal
        assert_eq!(find_any(&trie, "/a/b/c"), Some((1, 3)));
        assert_eq!(find_any(&trie, "/a/x"), Some((1, 3)));
        assert_eq!(find_any(&trie, "/b"), None);
    }

    #[test]
    fn test_prefix_wins_on_same_node() {
        let mut trie = PathTrie::new();
        trie.insert("/p", 1).unwrap();
        trie.insert("/p#", 2).unwrap();

        // Both terminals sit on the same node; the prefix is tried first
        assert_eq!(find_any(&trie, "/p"), Some((1, 2)));
        assert_eq!(find_any(&trie, "/p/x"), Some((1, 2)));
    }

    #[test]
    fn test_shortest_passing_prefix_wins() {
        let mut trie = PathTrie::new();
        trie.insert("/docs/", 1).unwrap();
        trie.insert("/docs/deep/", 2).unwrap();

        assert_eq!(find_any(&trie, "/docs/deep/page"), Some((1, 6)));
    }

    #[test]
    fn test_filtered_prefix_falls_through() {
        let mut trie = PathTrie::new();
        trie.insert("/api/", 1).unwrap();
        trie.insert("/api/v2#", 2).unwrap();

        // When the prefix terminal is refused, the exact still matches
        assert_eq!(
            trie.find("/api/v2", |d| *d != 1).map(|(d, l)| (*d, l)),
            Some((2, 7))
        );
        assert_eq!(trie.find("/api/v9", |d| *d != 1), None);
    }

    #[test]
    fn test_index_marker_expansion() {
        let mut trie = PathTrie::new();
        trie.insert("/docs#i", 7).unwrap();

        assert_eq!(find_any(&trie, "/docs"), Some((7, 5)));
        assert_eq!(find_any(&trie, "/docs/"), Some((7, 6)));
        assert_eq!(find_any(&trie, "/docs/index.html"), Some((7, 16)));
        assert_eq!(find_any(&trie, "/docs/other"), None);
    }

    #[test]
    fn test_slash_marker_expansion() {
        let mut trie = PathTrie::new();
        trie.insert("/about#s", 3).unwrap();

        assert_eq!(find_any(&trie, "/about"), Some((3, 6)));
        assert_eq!(find_any(&trie, "/about/"), Some((3, 7)));
        assert_eq!(find_any(&trie, "/about/x"), None);
    }

    #[test]
    fn test_optional_slash_marker() {
        let mut trie = PathTrie::new();
        trie.insert("/app#?", 4).unwrap();

        assert_eq!(find_any(&trie, "/app"), Some((4, 4)));
        // The companion prefix terminal covers everything under /app/
        assert_eq!(find_any(&trie, "/app/"), Some((4, 5)));
        assert_eq!(find_any(&trie, "/app/deep/path"), Some((4, 5)));
    }

    #[test]
    fn test_duplicate_terminal_rejected() {
        let mut trie = PathTrie::new();
        trie.insert("/x#", 1).unwrap();
        assert!(trie.insert("/x#", 2).is_err());

        trie.insert("/y/", 1).unwrap();
        assert!(trie.insert("/y/", 2).is_err());

        // Different kinds at the same key are allowed
        trie.insert("/x", 3).unwrap();
    }

    #[test]
    fn test_unknown_marker_rejected() {
        let mut trie = PathTrie::new();
        assert!(trie.insert("/z#q", 1).is_err());
    }
}
