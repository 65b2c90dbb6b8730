/*!
 * Waiter Nodes
 *
 * Index-linked arena of waiter nodes. Every waitable object keeps an
 * intrusive FIFO list (`WaiterList`) threaded through nodes owned by this
 * arena; every thread owns one reusable node per waited-on position.
 */

use crate::core::Handle;
use crate::sync::ThreadToken;

/// Index of a node inside [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline(always)]
    fn slot(self) -> usize {
        self.0 as usize
    }
}

/// One registration of a thread on one object
#[derive(Debug)]
pub(crate) struct WaiterNode {
    pub thread: ThreadToken,
    /// Position of the object in the thread's wait list
    pub index: usize,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    /// Object whose list currently holds this node
    queued_on: Option<Handle>,
}

impl WaiterNode {
    #[inline]
    pub fn queued_on(&self) -> Option<Handle> {
        self.queued_on
    }
}

/// Head and tail of an object's waiter queue
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WaiterList {
    head: Option<NodeId>,
    tail: Option<NodeId>,
}

impl WaiterList {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Storage for every waiter node of one wait subsystem
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    nodes: Vec<WaiterNode>,
    free: Vec<NodeId>,
}

impl NodeArena {
    /// Allocate an unlinked node for `thread` at wait position `index`
    pub fn alloc(&mut self, thread: ThreadToken, index: usize) -> NodeId {
        let node = WaiterNode {
            thread,
            index,
            prev: None,
            next: None,
            queued_on: None,
        };

        if let Some(id) = self.free.pop() {
            self.nodes[id.slot()] = node;
            return id;
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Return an unlinked node to the arena
    pub fn release(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id.slot()].queued_on.is_none());
        self.free.push(id);
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &WaiterNode {
        &self.nodes[id.slot()]
    }

    /// Append `id` to the tail of `list`, which belongs to `owner`
    pub fn push_back(&mut self, list: &mut WaiterList, id: NodeId, owner: Handle) {
        debug_assert!(self.nodes[id.slot()].queued_on.is_none());

        {
            let node = &mut self.nodes[id.slot()];
            node.prev = list.tail;
            node.next = None;
            node.queued_on = Some(owner);
        }

        match list.tail {
            Some(tail) => self.nodes[tail.slot()].next = Some(id),
            None => list.head = Some(id),
        }
        list.tail = Some(id);
    }

    /// Remove `id` from `list`
    pub fn unlink(&mut self, list: &mut WaiterList, id: NodeId) {
        let (prev, next) = {
            let node = &mut self.nodes[id.slot()];
            let links = (node.prev, node.next);
            node.prev = None;
            node.next = None;
            node.queued_on = None;
            links
        };

        match prev {
            Some(prev) => self.nodes[prev.slot()].next = next,
            None => list.head = next,
        }
        match next {
            Some(next) => self.nodes[next.slot()].prev = prev,
            None => list.tail = prev,
        }
    }

    /// Detach every node of `list` and leave it empty
    pub fn clear(&mut self, list: &mut WaiterList) {
        let mut cursor = list.head;
        while let Some(id) = cursor {
            let node = &mut self.nodes[id.slot()];
            cursor = node.next;
            node.prev = None;
            node.next = None;
            node.queued_on = None;
        }
        *list = WaiterList::default();
    }

    /// Nodes of `list` in queue order
    ///
    /// Signalers walk a snapshot because satisfying one waiter unlinks nodes
    /// from the very list being walked.
    pub fn snapshot(&self, list: &WaiterList) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut cursor = list.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.nodes[id.slot()].next;
        }
        ids
    }

    /// Live (allocated, not free) nodes
    #[inline]
    pub fn allocated(&self) -> usize {
        self.nodes.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> Handle {
        Handle::from_raw(1)
    }

    #[test]
    fn test_fifo_order_and_unlink() {
        let mut arena = NodeArena::default();
        let mut list = WaiterList::default();
        let me = ThreadToken::current();

        let a = arena.alloc(me, 0);
        let b = arena.alloc(me, 1);
        let c = arena.alloc(me, 2);
        for id in [a, b, c] {
            arena.push_back(&mut list, id, handle());
        }
        assert_eq!(arena.snapshot(&list), vec![a, b, c]);

        arena.unlink(&mut list, b);
        assert_eq!(arena.snapshot(&list), vec![a, c]);
        assert_eq!(arena.get(b).queued_on(), None);

        arena.unlink(&mut list, a);
        arena.unlink(&mut list, c);
        assert!(list.is_empty());
    }

    #[test]
    fn test_released_nodes_are_recycled() {
        let mut arena = NodeArena::default();
        let me = ThreadToken::current();

        let a = arena.alloc(me, 0);
        arena.release(a);
        let b = arena.alloc(me, 5);
        assert_eq!(a, b);
        assert_eq!(arena.get(b).index, 5);
        assert_eq!(arena.allocated(), 1);
    }

    #[test]
    fn test_clear_detaches_all() {
        let mut arena = NodeArena::default();
        let mut list = WaiterList::default();
        let me = ThreadToken::current();

        let ids: Vec<_> = (0..4).map(|i| arena.alloc(me, i)).collect();
        for &id in &ids {
            arena.push_back(&mut list, id, handle());
        }
        arena.clear(&mut list);

        assert!(list.is_empty());
        assert!(ids.iter().all(|&id| arena.get(id).queued_on().is_none()));
    }
}
