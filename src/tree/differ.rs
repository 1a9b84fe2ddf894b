//! Tree differ.
//!
//! [`diff`] is the pure entry point: it compares two trees and returns the
//! patches that turn the first into the second. [`Differ`] wraps it with an
//! optional memo cache, move coalescing and statistics.
//!
//! # Algorithm
//!
//! 1. Absent new tree: one `Remove` at the root. Absent old tree: one
//!    `Create` at the root.
//! 2. Kind or key differ: `Replace`, without descending.
//! 3. Props: values in `new` that differ from `old` are changed, names only
//!    in `old` are removed. One `Update` if either set is non-empty.
//! 4. Children: keyed diffing when any new child has a key, indexed
//!    diffing otherwise.
//!
//! Child paths use the key of keyed children and the position of unkeyed
//! ones. `Remove` paths are old-tree coordinates, every other patch uses
//! new-tree coordinates.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::Serialize;
use tracing::trace;

use super::node::Node;
use super::patch::{Patch, PatchKind, PatchOp};
use crate::types::{Key, Path, PathSegment, Props};

/// Diff two trees. Pure and deterministic.
pub fn diff(old: Option<&Node>, new: Option<&Node>) -> Vec<Patch> {
    let mut walker = Walker::new(false);
    walker.diff_root(old, new);
    walker.patches
}

// =============================================================================
// Walker
// =============================================================================

struct Walker {
    coalesce_moves: bool,
    patches: Vec<Patch>,
}

impl Walker {
    fn new(coalesce_moves: bool) -> Self {
        Self {
            coalesce_moves,
            patches: Vec::new(),
        }
    }

    fn diff_root(&mut self, old: Option<&Node>, new: Option<&Node>) {
        match (old, new) {
            (None, None) => {}
            (Some(old), None) => self.push(Path::root(), PatchOp::Remove { old: old.clone() }),
            (None, Some(new)) => self.push(
                Path::root(),
                PatchOp::Create {
                    node: new.clone(),
                    index: 0,
                },
            ),
            (Some(old), Some(new)) => self.diff_node(old, new, Path::root()),
        }
    }

    fn push(&mut self, path: Path, op: PatchOp) {
        self.patches.push(Patch { path, op });
    }

    fn diff_node(&mut self, old: &Node, new: &Node, path: Path) {
        if !old.is_compatible(new) {
            self.push(
                path,
                PatchOp::Replace {
                    old: old.clone(),
                    new: new.clone(),
                },
            );
            return;
        }

        let (changed, removed) = diff_props(&old.props, &new.props);
        if !changed.is_empty() || !removed.is_empty() {
            self.push(path.clone(), PatchOp::Update { changed, removed });
        }

        if new.children.iter().any(|c| c.key.is_some()) {
            self.diff_keyed(&old.children, &new.children, &path);
        } else {
            self.diff_indexed(&old.children, &new.children, &path);
        }
    }

    fn diff_indexed(&mut self, old: &[Node], new: &[Node], parent: &Path) {
        for i in 0..old.len().max(new.len()) {
            match (old.get(i), new.get(i)) {
                (Some(o), Some(n)) => {
                    let path = parent.child(PathSegment::for_child(i, n.key.as_ref()));
                    self.diff_node(o, n, path);
                }
                (Some(o), None) => {
                    let path = parent.child(PathSegment::for_child(i, o.key.as_ref()));
                    self.push(path, PatchOp::Remove { old: o.clone() });
                }
                (None, Some(n)) => {
                    let path = parent.child(PathSegment::Index(i));
                    self.push(
                        path,
                        PatchOp::Create {
                            node: n.clone(),
                            index: i,
                        },
                    );
                }
                (None, None) => {}
            }
        }
    }

    fn diff_keyed(&mut self, old: &[Node], new: &[Node], parent: &Path) {
        // First occurrence of a key wins; later duplicates are handled by
        // position so that malformed trees still diff without panicking.
        let mut old_keys: HashMap<&Key, usize> = HashMap::with_capacity(old.len());
        for (i, child) in old.iter().enumerate() {
            if let Some(key) = &child.key {
                old_keys.entry(key).or_insert(i);
            }
        }

        let mut seen_new: HashSet<&Key> = HashSet::with_capacity(new.len());
        let mut moves: Vec<(Key, usize, usize)> = Vec::new();

        for (j, child) in new.iter().enumerate() {
            let key = match &child.key {
                Some(key) if seen_new.insert(key) => key,
                _ => {
                    self.push(
                        parent.child(PathSegment::Index(j)),
                        PatchOp::Create {
                            node: child.clone(),
                            index: j,
                        },
                    );
                    continue;
                }
            };

            match old_keys.get(key) {
                Some(&i) => {
                    self.diff_node(&old[i], child, parent.child(PathSegment::Key(key.clone())));
                    if i != j {
                        moves.push((key.clone(), i, j));
                    }
                }
                None => self.push(
                    parent.child(PathSegment::Key(key.clone())),
                    PatchOp::Create {
                        node: child.clone(),
                        index: j,
                    },
                ),
            }
        }

        for (i, child) in old.iter().enumerate() {
            let retained = match &child.key {
                Some(key) => old_keys.get(key) == Some(&i) && seen_new.contains(key),
                None => false,
            };
            if retained {
                continue;
            }
            let segment = match &child.key {
                Some(key) if old_keys.get(key) == Some(&i) => PathSegment::Key(key.clone()),
                _ => PathSegment::Index(i),
            };
            self.push(parent.child(segment), PatchOp::Remove { old: child.clone() });
        }

        if self.coalesce_moves && moves.len() > 1 {
            let old_order = old.iter().filter_map(|c| c.key.clone()).collect();
            let new_order = new.iter().filter_map(|c| c.key.clone()).collect();
            self.push(
                parent.clone(),
                PatchOp::Reorder {
                    old_order,
                    new_order,
                },
            );
        } else {
            for (key, from, to) in moves {
                self.push(parent.clone(), PatchOp::Move { key, from, to });
            }
        }
    }
}

/// Changed and removed props between two maps.
pub fn diff_props(old: &Props, new: &Props) -> (Props, Vec<String>) {
    let changed: Props = new
        .iter()
        .filter(|(name, value)| old.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let removed = old
        .keys()
        .filter(|name| !new.contains_key(*name))
        .cloned()
        .collect();
    (changed, removed)
}

// =============================================================================
// Differ
// =============================================================================

/// Counters kept by a [`Differ`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub diffs: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub patches: u64,
    pub creates: u64,
    pub updates: u64,
    pub replaces: u64,
    pub removes: u64,
    pub moves: u64,
    pub reorders: u64,
}

impl DiffStats {
    fn record(&mut self, patches: &[Patch]) {
        self.patches += patches.len() as u64;
        for patch in patches {
            let counter = match patch.kind() {
                PatchKind::Create => &mut self.creates,
                PatchKind::Update => &mut self.updates,
                PatchKind::Replace => &mut self.replaces,
                PatchKind::Remove => &mut self.removes,
                PatchKind::Move => &mut self.moves,
                PatchKind::Reorder => &mut self.reorders,
            };
            *counter += 1;
        }
    }
}

struct CacheEntry {
    old: Option<Node>,
    new: Option<Node>,
    patches: Vec<Patch>,
    last_used: u64,
}

/// Differ with an LRU memo cache.
///
/// A cached result is only reused after the stored trees compare equal to
/// the requested ones, so a hash collision costs a miss and never a wrong
/// patch list.
pub struct Differ {
    cache: HashMap<u64, CacheEntry>,
    capacity: usize,
    max_patches: usize,
    caching: bool,
    coalesce_moves: bool,
    clock: u64,
    stats: DiffStats,
}

impl Differ {
    pub fn new(capacity: usize, max_patches: usize) -> Self {
        Self {
            cache: HashMap::new(),
            capacity,
            max_patches,
            caching: capacity > 0,
            coalesce_moves: false,
            clock: 0,
            stats: DiffStats::default(),
        }
    }

    pub fn with_coalesce_moves(mut self, coalesce: bool) -> Self {
        self.coalesce_moves = coalesce;
        self
    }

    /// Enable or disable the memo cache. Disabling drops cached entries.
    pub fn set_caching(&mut self, enabled: bool) {
        self.caching = enabled && self.capacity > 0;
        if !self.caching {
            self.cache.clear();
        }
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> &DiffStats {
        &self.stats
    }

    pub fn diff(&mut self, old: Option<&Node>, new: Option<&Node>) -> Vec<Patch> {
        self.stats.diffs += 1;
        self.clock += 1;

        let hash = if self.caching {
            let hash = pair_hash(old, new);
            if let Some(entry) = self.cache.get_mut(&hash) {
                if entry.old.as_ref() == old && entry.new.as_ref() == new {
                    entry.last_used = self.clock;
                    self.stats.cache_hits += 1;
                    self.stats.record(&entry.patches);
                    trace!(patches = entry.patches.len(), "diff cache hit");
                    return entry.patches.clone();
                }
            }
            self.stats.cache_misses += 1;
            Some(hash)
        } else {
            None
        };

        let mut walker = Walker::new(self.coalesce_moves);
        walker.diff_root(old, new);
        let patches = walker.patches;
        self.stats.record(&patches);

        if let Some(hash) = hash {
            if patches.len() < self.max_patches {
                self.insert(hash, old, new, &patches);
            }
        }
        patches
    }

    fn insert(&mut self, hash: u64, old: Option<&Node>, new: Option<&Node>, patches: &[Patch]) {
        if self.cache.len() >= self.capacity && !self.cache.contains_key(&hash) {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(hash, _)| *hash);
            if let Some(oldest) = oldest {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(
            hash,
            CacheEntry {
                old: old.cloned(),
                new: new.cloned(),
                patches: patches.to_vec(),
                last_used: self.clock,
            },
        );
    }
}

impl Default for Differ {
    fn default() -> Self {
        Self::new(1000, 50)
    }
}

fn pair_hash(old: Option<&Node>, new: Option<&Node>) -> u64 {
    let mut hasher = DefaultHasher::new();
    old.hash(&mut hasher);
    new.hash(&mut hasher);
    hasher.finish()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn item(key: &str) -> Node {
        Node::element("item").key(key).prop("label", key)
    }

    fn list(keys: &[&str]) -> Node {
        Node::element("list").children(keys.iter().map(|k| item(k)))
    }

    #[test]
    fn test_absent_trees() {
        let node = Node::element("frame");
        assert!(diff(None, None).is_empty());

        let patches = diff(None, Some(&node));
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].path, Path::root());
        assert!(matches!(patches[0].op, PatchOp::Create { index: 0, .. }));

        let patches = diff(Some(&node), None);
        assert_eq!(patches.len(), 1);
        assert!(matches!(patches[0].op, PatchOp::Remove { .. }));
    }

    #[test]
    fn test_identical_trees_produce_nothing() {
        let tree = list(&["a", "b"]).prop("title", Value::List(vec![1.into(), 2.into()]));
        assert!(diff(Some(&tree), Some(&tree.clone())).is_empty());
    }

    #[test]
    fn test_nan_props_diff_to_nothing() {
        let tree = Node::element("progress").prop("value", f64::NAN);
        assert!(diff(Some(&tree), Some(&tree.clone())).is_empty());
        let changed = Node::element("progress").prop("value", 0.5);
        assert_eq!(diff(Some(&tree), Some(&changed)).len(), 1);
    }

    #[test]
    fn test_kind_change_replaces_without_descending() {
        let old = Node::element("frame").child(Node::element("label"));
        let new = Node::element("panel").child(Node::element("button"));
        let patches = diff(Some(&old), Some(&new));
        assert_eq!(patches.len(), 1);
        assert!(matches!(patches[0].op, PatchOp::Replace { .. }));
    }

    #[test]
    fn test_props_changed_and_removed() {
        let old = Node::element("label").prop("text", "a").prop("color", "red");
        let new = Node::element("label").prop("text", "b");
        let patches = diff(Some(&old), Some(&new));
        assert_eq!(patches.len(), 1);
        let PatchOp::Update { changed, removed } = &patches[0].op else {
            panic!("expected update");
        };
        assert_eq!(changed.get("text"), Some(&Value::from("b")));
        assert_eq!(removed, &vec!["color".to_string()]);
    }

    #[test]
    fn test_indexed_children() {
        let old = Node::element("frame")
            .child(Node::element("a"))
            .child(Node::element("b"))
            .child(Node::element("c"));
        let new = Node::element("frame").child(Node::element("a").prop("x", 1));
        let patches = diff(Some(&old), Some(&new));
        let paths: Vec<String> = patches.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "update /0 changed=[\"x\"] removed=[]",
                "remove /1 <b>",
                "remove /2 <c>",
            ]
        );
    }

    #[test]
    fn test_keyed_rotation_is_only_moves() {
        let old = list(&["a", "b", "c"]);
        let new = list(&["c", "a", "b"]);
        let patches = diff(Some(&old), Some(&new));
        assert_eq!(patches.len(), 3);
        assert!(patches.iter().all(|p| p.kind() == PatchKind::Move));
        assert!(patches.iter().all(|p| p.path.is_root()));
    }

    #[test]
    fn test_keyed_create_and_remove() {
        let old = list(&["a", "b"]);
        let new = list(&["a", "c"]);
        let patches = diff(Some(&old), Some(&new));
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].path, Path::root().child("c"));
        assert!(matches!(patches[0].op, PatchOp::Create { index: 1, .. }));
        assert_eq!(patches[1].path, Path::root().child("b"));
        assert!(matches!(patches[1].op, PatchOp::Remove { .. }));
    }

    #[test]
    fn test_keyed_recursion_uses_key_segments() {
        let old = list(&["a", "b"]);
        let mut new = list(&["a", "b"]);
        new.children[1] = item("b").prop("label", "bee");
        let patches = diff(Some(&old), Some(&new));
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].path.to_string(), "/#b");
    }

    #[test]
    fn test_coalesced_moves() {
        let old = list(&["a", "b", "c"]);
        let new = list(&["c", "b", "a"]);
        let mut differ = Differ::default().with_coalesce_moves(true);
        let patches = differ.diff(Some(&old), Some(&new));
        assert_eq!(patches.len(), 1);
        let PatchOp::Reorder { new_order, .. } = &patches[0].op else {
            panic!("expected reorder");
        };
        assert_eq!(new_order, &vec![Key::from("c"), Key::from("b"), Key::from("a")]);
    }

    #[test]
    fn test_duplicate_keys_do_not_panic() {
        let old = list(&["a", "a"]);
        let new = list(&["a", "a", "b"]);
        let patches = diff(Some(&old), Some(&new));
        assert!(patches.iter().any(|p| p.kind() == PatchKind::Remove));
        assert!(patches.iter().any(|p| p.kind() == PatchKind::Create));
    }

    #[test]
    fn test_cache_is_transparent() {
        let old = list(&["a", "b"]);
        let new = list(&["b", "a", "c"]);
        let mut differ = Differ::new(4, 50);
        let first = differ.diff(Some(&old), Some(&new));
        let second = differ.diff(Some(&old), Some(&new));
        assert_eq!(first, second);
        assert_eq!(first, diff(Some(&old), Some(&new)));
        assert_eq!(differ.stats().cache_hits, 1);
        assert_eq!(differ.stats().cache_misses, 1);
    }

    #[test]
    fn test_cache_hits_count_patch_kinds() {
        let old = Node::element("label").prop("text", "a");
        let new = Node::element("label").prop("text", "b");
        let mut differ = Differ::new(4, 50);
        differ.diff(Some(&old), Some(&new));
        differ.diff(Some(&old), Some(&new));
        assert_eq!(differ.stats().cache_hits, 1);
        assert_eq!(differ.stats().updates, 2);
        assert_eq!(differ.stats().patches, 2);
    }

    #[test]
    fn test_cache_eviction_and_disable() {
        let mut differ = Differ::new(2, 50);
        let trees: Vec<Node> = (0..3).map(|i| Node::element("n").prop("i", i)).collect();
        differ.diff(Some(&trees[0]), Some(&trees[1]));
        differ.diff(Some(&trees[1]), Some(&trees[2]));
        differ.diff(Some(&trees[0]), Some(&trees[2]));
        assert_eq!(differ.cached_entries(), 2);

        differ.set_caching(false);
        assert_eq!(differ.cached_entries(), 0);
        differ.diff(Some(&trees[0]), Some(&trees[1]));
        assert_eq!(differ.stats().cache_hits, 0);
    }

    #[test]
    fn test_large_diffs_are_not_cached() {
        let mut differ = Differ::new(10, 2);
        let old = list(&["a", "b", "c"]);
        let new = list(&["d", "e", "f"]);
        differ.diff(Some(&old), Some(&new));
        assert_eq!(differ.cached_entries(), 0);
        assert_eq!(differ.stats().creates, 3);
        assert_eq!(differ.stats().removes, 3);
    }
}
