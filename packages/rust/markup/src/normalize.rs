//! Structural clean-up passes over a parsed tree.

use crate::tree::{MarkupNode, MarkupTree};

/// Detach every text node made only of XML whitespace. Returns how many were removed.
pub fn remove_whitespace_text(tree: &mut MarkupTree) -> usize {
    detach_where(tree, MarkupNode::is_blank_text)
}

/// Detach every node that is not an element (text, comments, declarations).
///
/// Must run after identity assignment: `has_text` is computed from the text
/// children this pass removes.
pub fn remove_non_elements(tree: &mut MarkupTree) -> usize {
    detach_where(tree, |node| !node.is_element())
}

fn detach_where(tree: &mut MarkupTree, predicate: impl Fn(&MarkupNode) -> bool) -> usize {
    let root = tree.root().id();
    let doomed: Vec<_> = tree
        .root()
        .descendants()
        .filter(|n| n.id() != root && predicate(n.value()))
        .map(|n| n.id())
        .collect();

    for id in &doomed {
        if let Some(mut node) = tree.get_mut(*id) {
            node.detach();
        }
    }
    doomed.len()
}
