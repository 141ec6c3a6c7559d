//! Hybrid logical clock.
//!
//! Timestamps order by (wall, count, node): wall time when clocks are
//! in sync, the logical counter when they are not, and the node id as
//! a final tiebreak so no two nodes ever produce equal stamps.

use parking_lot::Mutex;

use murmur_common::types::now_ms;

const WALL_BITS: u32 = 44;
const COUNT_BITS: u32 = 12;
const NODE_BITS: u32 = 8;

const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;
const WALL_MASK: u64 = (1 << WALL_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HlcTimestamp {
    /// Wall clock milliseconds since the Unix epoch.
    pub wall: u64,
    pub count: u64,
    pub node: u64,
}

impl HlcTimestamp {
    /// Pack into a single u64, `wall:44 | count:12 | node:8`, so that
    /// integer order matches timestamp order. 44 bits of milliseconds
    /// run out in the year 2527.
    pub fn to_packed(self) -> u64 {
        (self.wall & WALL_MASK) << (COUNT_BITS + NODE_BITS)
            | (self.count & COUNT_MASK) << NODE_BITS
            | (self.node & NODE_MASK)
    }

    pub fn from_packed(packed: u64) -> Self {
        Self {
            wall: packed >> (COUNT_BITS + NODE_BITS),
            count: (packed >> NODE_BITS) & COUNT_MASK,
            node: packed & NODE_MASK,
        }
    }
}

struct HlcInner {
    wall: u64,
    count: u64,
}

/// One clock per node. `tick` stamps local events, `observe` merges a
/// remote stamp so later local stamps sort after everything this node
/// has seen.
pub struct Hlc {
    node: u64,
    inner: Mutex<HlcInner>,
}

impl Hlc {
    pub fn new(node: u64) -> Self {
        Self {
            node: node & NODE_MASK,
            inner: Mutex::new(HlcInner { wall: 0, count: 0 }),
        }
    }

    pub fn node(&self) -> u64 {
        self.node
    }

    fn stamp(&self, inner: &HlcInner) -> HlcTimestamp {
        HlcTimestamp {
            wall: inner.wall,
            count: inner.count,
            node: self.node,
        }
    }

    /// Stamp a local event.
    pub fn tick(&self) -> HlcTimestamp {
        let mut inner = self.inner.lock();
        let now = now_ms();
        if now > inner.wall {
            inner.wall = now;
            inner.count = 0;
        } else {
            inner.count += 1;
        }
        self.stamp(&inner)
    }

    /// Merge a remote stamp and stamp the receive event. The result is
    /// strictly greater than both the previous local stamp and the
    /// incoming one.
    pub fn observe(&self, incoming: HlcTimestamp) -> HlcTimestamp {
        let mut inner = self.inner.lock();
        let now = now_ms();
        if now > inner.wall && now > incoming.wall {
            inner.wall = now;
            inner.count = 0;
        } else if inner.wall == incoming.wall {
            inner.count = inner.count.max(incoming.count) + 1;
        } else if inner.wall > incoming.wall {
            inner.count += 1;
        } else {
            inner.wall = incoming.wall;
            inner.count = incoming.count + 1;
        }
        self.stamp(&inner)
    }
}
