//! Opt-in evaluation trace (spec §4.8, §7).
//!
//! Mirrors `astorion::engine::metrics`'s "metrics are opt-in, the hot
//! path skips them" design: when tracing isn't requested the context
//! carries no trace at all, so a plain roll pays nothing for it. When it
//! is requested, each recursive step appends a child node to the
//! current cursor and descends into it, and every swallowed evaluation
//! warning (spec §7: "when tracing is enabled they appear as leaf nodes
//! in the trace tree") is recorded as a labeled leaf.
//!
//! Built as a tree of `Rc<RefCell<TraceNode>>` rather than a flat
//! `Vec<TraceNode>` so a nested context can hold a stable handle to its
//! own node — the node lives behind the `Rc`, not inside its parent's
//! `Vec`, so pushing siblings elsewhere never invalidates it.

use crate::context::WarningKind;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
pub(crate) struct TraceNode {
    pub label: String,
    pub output: Option<String>,
    pub children: Vec<Rc<RefCell<TraceNode>>>,
}

impl TraceNode {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        TraceNode { label: label.into(), output: None, children: Vec::new() }
    }

    pub(crate) fn child(&mut self, label: impl Into<String>) -> Rc<RefCell<TraceNode>> {
        let node = Rc::new(RefCell::new(TraceNode::new(label)));
        self.children.push(Rc::clone(&node));
        node
    }

    pub(crate) fn push_warning(&mut self, kind: &WarningKind) {
        let mut leaf = TraceNode::new("warning");
        leaf.output = Some(format!("{kind:?}"));
        self.children.push(Rc::new(RefCell::new(leaf)));
    }

    pub(crate) fn set_output(&mut self, output: impl Into<String>) {
        self.output = Some(output.into());
    }
}

/// Plain (non-shared, non-interior-mutable) snapshot of a trace tree,
/// suitable for attaching to a [`crate::RollResult`] or printing.
#[derive(Debug, Clone)]
pub struct TraceOutput {
    pub label: String,
    pub output: Option<String>,
    pub children: Vec<TraceOutput>,
}

pub(crate) fn freeze(node: &Rc<RefCell<TraceNode>>) -> TraceOutput {
    let n = node.borrow();
    TraceOutput {
        label: n.label.clone(),
        output: n.output.clone(),
        children: n.children.iter().map(freeze).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_nodes_descend_and_survive_sibling_pushes() {
        let root = Rc::new(RefCell::new(TraceNode::new("root")));
        let first_child = root.borrow_mut().child("roll colors");
        root.borrow_mut().child("roll loot");
        first_child.borrow_mut().set_output("Red");

        let frozen = freeze(&root);
        assert_eq!(frozen.children.len(), 2);
        assert_eq!(frozen.children[0].label, "roll colors");
        assert_eq!(frozen.children[0].output.as_deref(), Some("Red"));
    }

    #[test]
    fn warnings_are_recorded_as_leaves() {
        let root = Rc::new(RefCell::new(TraceNode::new("root")));
        root.borrow_mut().push_warning(&WarningKind::UnknownVariable { name: "ghost".to_string() });
        let frozen = freeze(&root);
        assert_eq!(frozen.children[0].label, "warning");
        assert!(frozen.children[0].output.as_ref().unwrap().contains("ghost"));
    }
}
