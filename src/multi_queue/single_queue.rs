use std::sync::Arc;

use crate::filter_block::FilterBlockReader;
use crate::internal_key::SequenceNumber;

/// Index of "no node".
pub(crate) const NIL: usize = usize::MAX;

/// One entry of the multi-queue: a registered reader, its cache key, and its
/// position in whichever LRU list currently homes it. Sentinel nodes carry no
/// reader and never leave their list.
pub(crate) struct Node {
    pub key: Vec<u8>,
    pub reader: Option<Arc<FilterBlockReader>>,
    pub prev: usize,
    pub next: usize,
    /// Which [`SingleQueue`] the node is linked into.
    pub queue: usize,
    /// Guards against stale handles after a slot is recycled. Live nodes
    /// carry a nonzero generation.
    pub generation: u64,
    pub internal: bool,
}

/// Slab of queue nodes. Every list in the multi-queue links through this one
/// arena, so nodes can migrate between queues without reallocation.
pub(crate) struct NodeArena {
    nodes: Vec<Node>,
    free: Vec<usize>,
    next_generation: u64,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            next_generation: 1,
        }
    }

    pub fn alloc(&mut self, key: Vec<u8>, reader: Option<Arc<FilterBlockReader>>) -> usize {
        let internal = reader.is_none();
        let generation = self.next_generation;
        self.next_generation += 1;

        let node = Node {
            key,
            reader,
            prev: NIL,
            next: NIL,
            queue: NIL,
            generation,
            internal,
        };

        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Unregister a node and recycle its slot, handing back its reader.
    pub fn release(&mut self, index: usize) -> Option<Arc<FilterBlockReader>> {
        let node = &mut self.nodes[index];
        debug_assert!(!node.internal);
        let reader = node.reader.take();
        node.generation = 0;
        node.key.clear();
        node.prev = NIL;
        node.next = NIL;
        node.queue = NIL;
        self.free.push(index);
        reader
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }

    /// A handle is valid while its slot still holds the generation it was
    /// issued with.
    pub fn is_live(&self, index: usize, generation: u64) -> bool {
        index < self.nodes.len() && generation != 0 && {
            let node = &self.nodes[index];
            !node.internal && node.generation == generation && node.reader.is_some()
        }
    }
}

/// Doubly-linked MRU-to-LRU list of readers holding the same unit count.
///
/// All operations are constant-time except [`SingleQueue::find_cold`] and
/// assume the multi-queue mutex is held.
pub(crate) struct SingleQueue {
    head: usize,
    tail: usize,
    /// Which unit count this list represents.
    index: usize,
}

impl SingleQueue {
    pub fn new(arena: &mut NodeArena, index: usize) -> Self {
        let head = arena.alloc(Vec::new(), None);
        let tail = arena.alloc(Vec::new(), None);
        arena.node_mut(head).next = tail;
        arena.node_mut(head).prev = NIL;
        arena.node_mut(tail).prev = head;
        arena.node_mut(tail).next = NIL;
        Self { head, tail, index }
    }

    /// Link a node at the MRU end.
    pub fn push_mru(&self, arena: &mut NodeArena, node: usize) {
        let first = arena.node(self.head).next;
        {
            let n = arena.node_mut(node);
            n.prev = self.head;
            n.next = first;
            n.queue = self.index;
        }
        arena.node_mut(self.head).next = node;
        arena.node_mut(first).prev = node;
    }

    /// Unlink a node without recycling it.
    pub fn remove(&self, arena: &mut NodeArena, node: usize) {
        debug_assert_eq!(arena.node(node).queue, self.index);
        let (prev, next) = {
            let n = arena.node(node);
            (n.prev, n.next)
        };
        arena.node_mut(prev).next = next;
        arena.node_mut(next).prev = prev;
        let n = arena.node_mut(node);
        n.prev = NIL;
        n.next = NIL;
        n.queue = NIL;
    }

    pub fn move_to_mru(&self, arena: &mut NodeArena, node: usize) {
        self.remove(arena, node);
        self.push_mru(arena, node);
    }

    /// Walk from LRU toward MRU collecting evictable cold readers until
    /// `budget` bytes are covered or the list is exhausted. Returns whatever
    /// budget is left uncovered.
    pub fn find_cold(
        &self,
        arena: &NodeArena,
        mut budget: i64,
        now: SequenceNumber,
        out: &mut Vec<usize>,
    ) -> i64 {
        let mut current = arena.node(self.tail).prev;
        while budget > 0 && current != self.head {
            let node = arena.node(current);
            let prev = node.prev;
            if let Some(reader) = &node.reader {
                if reader.is_cold(now) && reader.can_be_evicted() {
                    budget -= reader.unit_size() as i64;
                    out.push(current);
                }
            }
            current = prev;
        }
        budget
    }

    /// Nodes from MRU to LRU; used by invariant checks and tests.
    pub fn nodes(&self, arena: &NodeArena) -> Vec<usize> {
        let mut out = Vec::new();
        let mut current = arena.node(self.head).next;
        while current != self.tail {
            out.push(current);
            current = arena.node(current).next;
        }
        out
    }
}
