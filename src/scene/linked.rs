//! Draw-order list maintenance.
//!
//! Every node is also an entry in a doubly linked list holding the whole
//! scene in paint order. A subtree is always one contiguous run bounded by
//! its root's `first` and `last`, so attaching or detaching a subtree is a
//! constant-time splice plus a walk up the ancestors whose `last` moved.

use super::node::MaskLink;
use super::tree::SceneTree;
use super::NodeId;

impl SceneTree {
    /// Link the run `run_first..=run_last` immediately after `anchor`.
    pub(crate) fn splice_after(&mut self, anchor: NodeId, run_first: NodeId, run_last: NodeId) {
        let after = self[anchor].next;
        self[anchor].next = Some(run_first);
        self[run_first].prev = Some(anchor);
        self[run_last].next = after;
        if let Some(after) = after {
            self[after].prev = Some(run_last);
        }
    }

    /// Link the run `run_first..=run_last` immediately before `anchor`.
    pub(crate) fn splice_before(&mut self, anchor: NodeId, run_first: NodeId, run_last: NodeId) {
        match self[anchor].prev {
            Some(before) => self.splice_after(before, run_first, run_last),
            None => {
                self[anchor].prev = Some(run_last);
                self[run_last].next = Some(anchor);
                self[run_first].prev = None;
            }
        }
    }

    /// Cut the run `run_first..=run_last` out, closing the gap behind it.
    pub(crate) fn unsplice(&mut self, run_first: NodeId, run_last: NodeId) {
        let before = self[run_first].prev.take();
        let after = self[run_last].next.take();
        if let Some(before) = before {
            self[before].next = after;
        }
        if let Some(after) = after {
            self[after].prev = before;
        }
    }

    /// Walk up from `start` replacing `last == old` with `new`.
    ///
    /// Stops at the first ancestor whose `last` is something else: that
    /// ancestor's range already ends past the edited run, and so does every
    /// ancestor above it.
    pub(crate) fn forward_last(&mut self, start: Option<NodeId>, old: NodeId, new: NodeId) {
        let mut current = start;
        while let Some(id) = current {
            let node = &mut self[id];
            if node.last != old {
                break;
            }
            node.last = new;
            current = node.parent;
        }
    }

    /// Make `child` the `index`-th child of `parent`, splicing its run into draw order.
    ///
    /// The caller validates liveness, bounds and acyclicity; `child` must be detached.
    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId, index: usize) {
        let anchor = if index == 0 {
            parent
        } else {
            let sibling = self[parent].children[index - 1];
            self[sibling].last
        };
        let (run_first, run_last) = (self[child].first, self[child].last);

        self.splice_after(anchor, run_first, run_last);
        self[parent].children.insert(index, child);
        self[child].parent = Some(parent);
        self.forward_last(Some(parent), anchor, run_last);
    }

    /// Remove `child` from its parent, cutting its run out of draw order.
    ///
    /// Returns the former parent, or `None` if the node was not attached.
    pub(crate) fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self[child].parent?;
        let (run_first, run_last) = (self[child].first, self[child].last);
        let before = self[run_first].prev;

        self.unsplice(run_first, run_last);
        self[parent].children.retain(|&c| c != child);
        self[child].parent = None;
        if let Some(before) = before {
            self.forward_last(Some(parent), run_last, before);
        }
        Some(parent)
    }

    /// Bracket `target`'s run with the `begin`/`end` markers.
    pub(crate) fn wrap_with_markers(&mut self, target: NodeId, link: MaskLink) {
        let (first, last) = (self[target].first, self[target].last);
        self.splice_before(first, link.begin, link.begin);
        self.splice_after(last, link.end, link.end);

        let node = &mut self[target];
        node.first = link.begin;
        node.last = link.end;
        node.mask = Some(link);
        let parent = node.parent;
        self.forward_last(parent, last, link.end);
    }

    /// Remove the markers bracketing `target`, returning the mask link they formed.
    pub(crate) fn unwrap_markers(&mut self, target: NodeId) -> Option<MaskLink> {
        let link = self[target].mask.take()?;
        let inner_last = self[link.end].prev.unwrap_or(target);

        self.unsplice(link.begin, link.begin);
        self.unsplice(link.end, link.end);

        let node = &mut self[target];
        node.first = target;
        node.last = inner_last;
        let parent = node.parent;
        self.forward_last(parent, link.end, inner_last);
        Some(link)
    }
}
