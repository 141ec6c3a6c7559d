//! Maglev consistent hashing.
//!
//! Each node gets a permutation of the table slots from two hashes of
//! its name; round-robin population gives every node an equal share
//! and keeps most assignments stable when the node set changes. The
//! table size is the smallest prime at or above 100 slots per node,
//! which keeps permutation skips coprime with the table.

use xxhash_rust::xxh32::xxh32;

const OFFSET_SEED: u32 = 1 << 31;
const SKIP_SEED: u32 = (1 << 31) + 1;
const SLOTS_PER_NODE: usize = 100;

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

fn next_prime(mut n: usize) -> usize {
    while !is_prime(n) {
        n += 1;
    }
    n
}

/// Lookup table from hashed keys to node names. Immutable once built;
/// membership swaps in a fresh table on every change.
pub struct Maglev {
    nodes: Vec<String>,
    table: Vec<usize>,
}

impl Maglev {
    pub fn new(mut nodes: Vec<String>) -> Self {
        nodes.sort();
        nodes.dedup();
        let table = Self::populate(&nodes);
        Self { nodes, table }
    }

    fn populate(nodes: &[String]) -> Vec<usize> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let m = next_prime(SLOTS_PER_NODE * nodes.len());
        let offsets: Vec<usize> = nodes
            .iter()
            .map(|n| xxh32(n.as_bytes(), OFFSET_SEED) as usize % m)
            .collect();
        let skips: Vec<usize> = nodes
            .iter()
            .map(|n| xxh32(n.as_bytes(), SKIP_SEED) as usize % (m - 1) + 1)
            .collect();

        let mut table = vec![usize::MAX; m];
        let mut next = vec![0usize; nodes.len()];
        let mut filled = 0;
        while filled < m {
            for i in 0..nodes.len() {
                if filled == m {
                    break;
                }
                loop {
                    let slot = (offsets[i] + next[i] * skips[i]) % m;
                    next[i] += 1;
                    if table[slot] == usize::MAX {
                        table[slot] = i;
                        filled += 1;
                        break;
                    }
                }
            }
        }
        table
    }

    /// Owning node for `key`, or `None` on an empty table.
    pub fn lookup(&self, key: &[u8]) -> Option<&str> {
        if self.table.is_empty() {
            return None;
        }
        let slot = xxh32(key, 0) as usize % self.table.len();
        Some(&self.nodes[self.table[slot]])
    }

    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }
}
