//! A* working memory: node pool and open queue
//!
//! The pool hands out nodes keyed on `(polygon ref, state)` through an
//! intrusive hash table; nodes live in one flat array and are addressed by
//! 1-based indices so that zero can mean "no parent". The queue is a binary
//! min-heap on `total`; every node stores its current heap position, which
//! makes decrease-key a single bubble-up instead of a scan.

use crate::PolyRef;
use tilenav_common::next_pow2;

/// Node flags for pathfinding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(&self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    #[inline]
    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }
}

/// End-of-chain marker inside the hash table
const NULL_IDX: u32 = u32::MAX;

/// Node in the search graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Position the node was reached at (portal midpoint)
    pub pos: [f32; 3],
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    /// 1-based index of the parent node, 0 = none
    pub pidx: u32,
    /// Extra state distinguishing visits of one polygon from different
    /// boundary crossings
    pub state: u8,
    /// Search state flags
    pub flags: NodeFlags,
    /// 1-based position in the open queue while OPEN, 0 otherwise
    pub hidx: u32,
    /// Polygon the node stands for
    pub id: PolyRef,
}

impl Node {
    fn new(id: PolyRef, state: u8) -> Self {
        Self {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            pidx: 0,
            state,
            flags: NodeFlags::default(),
            hidx: 0,
            id,
        }
    }
}

/// Fixed-capacity node allocator with (ref, state) lookup
pub struct NodePool {
    nodes: Vec<Node>,
    /// Hash bucket heads (0-based node indices, NULL_IDX empty)
    first: Vec<u32>,
    /// Hash chain (0-based node indices)
    next: Vec<u32>,
    /// Buckets touched since the last clear
    dirty: Vec<u32>,
    max_nodes: usize,
    hash_size: usize,
}

impl NodePool {
    /// Creates a pool for at most `max_nodes` nodes
    pub fn new(max_nodes: usize) -> Self {
        let hash_size = next_pow2((max_nodes / 4).max(1) as u32) as usize;
        Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![NULL_IDX; hash_size],
            next: vec![NULL_IDX; max_nodes],
            dirty: Vec::with_capacity(hash_size.min(64)),
            max_nodes,
            hash_size,
        }
    }

    /// Forgets all nodes; only buckets that were actually used are reset
    pub fn clear(&mut self) {
        for &bucket in &self.dirty {
            self.first[bucket as usize] = NULL_IDX;
        }
        self.dirty.clear();
        self.nodes.clear();
    }

    #[inline]
    fn bucket(&self, id: PolyRef) -> usize {
        let a = id.id();
        ((a ^ (a >> 32) ^ (a >> 16)) as usize) & (self.hash_size - 1)
    }

    /// Finds the node for (id, state), allocating it on first sight.
    /// Returns the 0-based slot, or None when the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<usize> {
        let bucket = self.bucket(id);
        let mut idx = self.first[bucket];
        while idx != NULL_IDX {
            let node = &self.nodes[idx as usize];
            if node.id == id && node.state == state {
                return Some(idx as usize);
            }
            idx = self.next[idx as usize];
        }

        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len();
        self.nodes.push(Node::new(id, state));
        if self.first[bucket] == NULL_IDX {
            self.dirty.push(bucket as u32);
        }
        self.next[idx] = self.first[bucket];
        self.first[bucket] = idx as u32;
        Some(idx)
    }

    /// Finds the node for (id, state) without allocating
    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<usize> {
        let mut idx = self.first[self.bucket(id)];
        while idx != NULL_IDX {
            let node = &self.nodes[idx as usize];
            if node.id == id && node.state == state {
                return Some(idx as usize);
            }
            idx = self.next[idx as usize];
        }
        None
    }

    /// Node by 0-based slot
    #[inline]
    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    /// Mutable node by 0-based slot
    #[inline]
    pub fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// 1-based index of a slot, for parent chains
    #[inline]
    pub fn node_idx(&self, idx: usize) -> u32 {
        idx as u32 + 1
    }

    /// Node by 1-based index; 0 resolves to None
    pub fn node_at_idx(&self, idx: u32) -> Option<&Node> {
        if idx == 0 {
            None
        } else {
            self.nodes.get(idx as usize - 1)
        }
    }

    /// Number of allocated nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Pool capacity
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }
}

/// Priority queue over pool slots, keyed on `Node::total`
pub struct NodeQueue {
    /// 0-based pool slots in heap order
    heap: Vec<u32>,
    capacity: usize,
}

impl NodeQueue {
    /// Creates a queue for at most `capacity` nodes
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Empties the queue
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// True when no node is queued
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued nodes
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Inserts a node and records its heap position
    pub fn push(&mut self, pool: &mut NodePool, idx: usize) {
        if self.heap.len() >= self.capacity {
            return;
        }
        self.heap.push(idx as u32);
        self.bubble_up(pool, self.heap.len() - 1, idx as u32);
    }

    /// Removes and returns the node with the smallest total
    pub fn pop(&mut self, pool: &mut NodePool) -> Option<usize> {
        let result = *self.heap.first()?;
        pool.node_mut(result as usize).hidx = 0;

        let last = self.heap.pop().unwrap();
        if !self.heap.is_empty() {
            self.trickle_down(pool, 0, last);
        }
        Some(result as usize)
    }

    /// Restores heap order after a node's total decreased
    pub fn modify(&mut self, pool: &mut NodePool, idx: usize) {
        let hidx = pool.node(idx).hidx;
        debug_assert!(hidx != 0, "modify on a node that is not queued");
        debug_assert_eq!(self.heap[hidx as usize - 1], idx as u32);
        self.bubble_up(pool, hidx as usize - 1, idx as u32);
    }

    fn bubble_up(&mut self, pool: &mut NodePool, mut i: usize, node: u32) {
        let total = pool.node(node as usize).total;
        while i > 0 {
            let parent = (i - 1) / 2;
            let parent_node = self.heap[parent];
            if total >= pool.node(parent_node as usize).total {
                break;
            }
            self.heap[i] = parent_node;
            pool.node_mut(parent_node as usize).hidx = i as u32 + 1;
            i = parent;
        }
        self.heap[i] = node;
        pool.node_mut(node as usize).hidx = i as u32 + 1;
    }

    fn trickle_down(&mut self, pool: &mut NodePool, mut i: usize, node: u32) {
        let total = pool.node(node as usize).total;
        let size = self.heap.len();
        loop {
            let child1 = 2 * i + 1;
            if child1 >= size {
                break;
            }
            let child2 = child1 + 1;
            let mut min_child = child1;
            if child2 < size
                && pool.node(self.heap[child2] as usize).total
                    < pool.node(self.heap[child1] as usize).total
            {
                min_child = child2;
            }
            let min_node = self.heap[min_child];
            if total <= pool.node(min_node as usize).total {
                break;
            }
            self.heap[i] = min_node;
            pool.node_mut(min_node as usize).hidx = i as u32 + 1;
            i = min_child;
        }
        self.heap[i] = node;
        pool.node_mut(node as usize).hidx = i as u32 + 1;
    }
}
