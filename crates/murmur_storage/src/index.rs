//! AVL-balanced ordered index over arena offsets.
//!
//! The memtable appends encoded entries to a flat arena and records
//! `key → offset` here. Each node additionally tracks the maximum key
//! in its subtree, which lets the greater-or-equal search prune whole
//! subtrees without parent pointers.

use std::cmp::Ordering;

use murmur_common::types::Key;

/// One index record: a versioned key and the arena offset of its
/// encoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Key,
    pub offset: usize,
}

#[derive(Debug)]
struct Node {
    entry: IndexEntry,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
    height: i32,
    /// Largest key in the subtree rooted here.
    max_key: Key,
}

impl Node {
    fn leaf(entry: IndexEntry) -> Box<Node> {
        let max_key = entry.key.clone();
        Box::new(Node {
            entry,
            left: None,
            right: None,
            height: 1,
            max_key,
        })
    }

    fn height(node: &Option<Box<Node>>) -> i32 {
        node.as_ref().map_or(0, |n| n.height)
    }

    fn balance_factor(&self) -> i32 {
        Self::height(&self.left) - Self::height(&self.right)
    }

    /// Recompute height and subtree max after a child change. All keys
    /// in the right subtree are greater than this node's key, so the
    /// subtree max is either the right child's max or this node's key.
    fn update(&mut self) {
        self.height = 1 + Self::height(&self.left).max(Self::height(&self.right));
        self.max_key = match &self.right {
            Some(right) => right.max_key.clone(),
            None => self.entry.key.clone(),
        };
    }
}

/// Ordered key index. Equal-key inserts overwrite the stored offset
/// without changing the tree shape.
#[derive(Debug, Default)]
pub struct Index {
    root: Option<Box<Node>>,
}

impl Index {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        self.root = Some(Self::insert_rec(self.root.take(), entry));
    }

    fn insert_rec(node: Option<Box<Node>>, entry: IndexEntry) -> Box<Node> {
        let mut node = match node {
            None => return Node::leaf(entry),
            Some(n) => n,
        };
        match entry.key.cmp(&node.entry.key) {
            Ordering::Equal => {
                node.entry.offset = entry.offset;
                node
            }
            Ordering::Less => {
                let key = entry.key.clone();
                node.left = Some(Self::insert_rec(node.left.take(), entry));
                node.update();
                Self::rebalance(node, &key)
            }
            Ordering::Greater => {
                let key = entry.key.clone();
                node.right = Some(Self::insert_rec(node.right.take(), entry));
                node.update();
                Self::rebalance(node, &key)
            }
        }
    }

    /// Restore the AVL invariant at `node` after inserting `key`
    /// somewhere below it. The inserted key picks between the single
    /// and double rotation cases.
    fn rebalance(node: Box<Node>, key: &[u8]) -> Box<Node> {
        let balance = node.balance_factor();
        if balance > 1 {
            let left_key = node.left.as_ref().map(|n| n.entry.key.clone());
            if left_key.as_deref().is_some_and(|lk| key < lk) {
                Self::rotate_right(node)
            } else {
                let mut node = node;
                node.left = node.left.take().map(Self::rotate_left);
                node.update();
                Self::rotate_right(node)
            }
        } else if balance < -1 {
            let right_key = node.right.as_ref().map(|n| n.entry.key.clone());
            if right_key.as_deref().is_some_and(|rk| key > rk) {
                Self::rotate_left(node)
            } else {
                let mut node = node;
                node.right = node.right.take().map(Self::rotate_right);
                node.update();
                Self::rotate_left(node)
            }
        } else {
            node
        }
    }

    fn rotate_left(mut node: Box<Node>) -> Box<Node> {
        let mut pivot = node.right.take().expect("rotate_left without right child");
        node.right = pivot.left.take();
        node.update();
        pivot.left = Some(node);
        pivot.update();
        pivot
    }

    fn rotate_right(mut node: Box<Node>) -> Box<Node> {
        let mut pivot = node.left.take().expect("rotate_right without left child");
        node.left = pivot.right.take();
        node.update();
        pivot.right = Some(node);
        pivot.update();
        pivot
    }

    /// Find `key`, or with `gte` the smallest key at or after it.
    ///
    /// On left descents the subtree max is checked first: if the left
    /// subtree tops out below `key`, the current node is already the
    /// smallest key at or past it and no descent is needed. Right
    /// descents only happen into subtrees whose max clears `key`, so
    /// a dead end there means no answer exists at all.
    pub fn search(&self, key: &[u8], gte: bool) -> Option<&IndexEntry> {
        let mut node = self.root.as_deref()?;
        loop {
            match key.cmp(node.entry.key.as_slice()) {
                Ordering::Equal => return Some(&node.entry),
                Ordering::Less => {
                    if !gte {
                        node = node.left.as_deref()?;
                    } else {
                        match node.left.as_deref() {
                            Some(left) if left.max_key.as_slice() >= key => node = left,
                            _ => return Some(&node.entry),
                        }
                    }
                }
                Ordering::Greater => match node.right.as_deref() {
                    Some(right) if !gte || right.max_key.as_slice() >= key => node = right,
                    _ => return None,
                },
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.search(key, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u8, offset: usize) -> IndexEntry {
        IndexEntry {
            key: vec![key],
            offset,
        }
    }

    fn build(keys: &[u8]) -> Index {
        let mut index = Index::new();
        for (i, &k) in keys.iter().enumerate() {
            index.insert(entry(k, i));
        }
        index
    }

    fn check_invariants(node: &Option<Box<Node>>) -> (i32, Option<Key>) {
        let Some(node) = node else {
            return (0, None);
        };
        let (lh, _) = check_invariants(&node.left);
        let (rh, rmax) = check_invariants(&node.right);
        assert!((lh - rh).abs() <= 1, "unbalanced at {:?}", node.entry.key);
        assert_eq!(node.height, 1 + lh.max(rh));
        let expected_max = rmax.unwrap_or_else(|| node.entry.key.clone());
        assert_eq!(node.max_key, expected_max);
        (node.height, Some(expected_max))
    }

    #[test]
    fn test_rotation_shape() {
        let index = build(&[10, 20, 30, 40, 50, 25]);
        let root = index.root.as_ref().unwrap();
        assert_eq!(root.entry.key, vec![30]);
        let left = root.left.as_ref().unwrap();
        let right = root.right.as_ref().unwrap();
        assert_eq!(left.entry.key, vec![20]);
        assert_eq!(left.left.as_ref().unwrap().entry.key, vec![10]);
        assert_eq!(left.right.as_ref().unwrap().entry.key, vec![25]);
        assert_eq!(right.entry.key, vec![40]);
        assert!(right.left.is_none());
        assert_eq!(right.right.as_ref().unwrap().entry.key, vec![50]);
        check_invariants(&index.root);
    }

    #[test]
    fn test_exact_search() {
        let index = build(&[10, 20, 30, 40, 50, 25]);
        for k in [10u8, 20, 25, 30, 40, 50] {
            assert_eq!(index.get(&[k]).unwrap().key, vec![k]);
        }
        assert!(index.get(&[15]).is_none());
        assert!(index.get(&[60]).is_none());
    }

    #[test]
    fn test_gte_search() {
        let index = build(&[1, 3, 4]);
        assert_eq!(index.search(&[2], true).unwrap().key, vec![3]);
        assert_eq!(index.search(&[3], true).unwrap().key, vec![3]);
        assert_eq!(index.search(&[0], true).unwrap().key, vec![1]);
        assert_eq!(index.search(&[4], true).unwrap().key, vec![4]);
        assert!(index.search(&[5], true).is_none());
    }

    #[test]
    fn test_gte_across_subtrees() {
        let index = build(&[10, 20, 30, 40, 50, 25]);
        assert_eq!(index.search(&[26], true).unwrap().key, vec![30]);
        assert_eq!(index.search(&[11], true).unwrap().key, vec![20]);
        assert_eq!(index.search(&[41], true).unwrap().key, vec![50]);
    }

    #[test]
    fn test_duplicate_insert_updates_offset() {
        let mut index = build(&[10, 20, 30]);
        index.insert(entry(20, 99));
        assert_eq!(index.get(&[20]).unwrap().offset, 99);
        check_invariants(&index.root);
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let mut index = Index::new();
        for i in 0u8..=200 {
            index.insert(entry(i, i as usize));
        }
        check_invariants(&index.root);
        let root = index.root.as_ref().unwrap();
        // 201 nodes; AVL height is bounded by ~1.44 log2(n).
        assert!(root.height <= 11, "height {}", root.height);
    }

    #[test]
    fn test_descending_inserts_stay_balanced() {
        let mut index = Index::new();
        for i in (0u8..=200).rev() {
            index.insert(entry(i, i as usize));
        }
        check_invariants(&index.root);
        for i in 0u8..=200 {
            assert_eq!(index.get(&[i]).unwrap().offset, i as usize);
        }
    }
}
