//! In-memory markup tree shared by the normalizer, the identity assigner and
//! the serializer.

use docforest_shared::NodeId;

/// Arena tree of parsed markup. The root is always [`MarkupNode::Document`].
pub type MarkupTree = ego_tree::Tree<MarkupNode>;

/// One node of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Document,
    Element(ElementData),
    /// Character data (CDATA included), entities left as written.
    Text(String),
    Comment,
    /// Processing instructions, declarations, doctypes.
    Other,
}

impl MarkupNode {
    pub fn as_element(&self) -> Option<&ElementData> {
        match self {
            MarkupNode::Element(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, MarkupNode::Element(_))
    }

    /// Text consisting only of XML whitespace.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, MarkupNode::Text(text) if text.chars().all(is_xml_whitespace))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, MarkupNode::Text(_))
    }
}

/// An element as parsed, plus the identity assigned during annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    /// Tag name exactly as written.
    pub name: String,
    /// Attributes in source order; duplicates are kept for the strict pass to reject.
    pub attributes: Vec<(String, String)>,
    pub identity: Option<NodeIdentity>,
}

impl ElementData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            identity: None,
        }
    }
}

/// Synthetic fields assigned once per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: NodeId,
    pub xpath: String,
    pub has_text: bool,
}

/// XML whitespace: space, tab, carriage return, line feed.
pub fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Number of element nodes reachable from the root.
pub fn element_count(tree: &MarkupTree) -> usize {
    tree.root()
        .descendants()
        .filter(|n| n.value().is_element())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_uses_xml_whitespace_only() {
        assert!(MarkupNode::Text(" \t\r\n".into()).is_blank_text());
        assert!(MarkupNode::Text(String::new()).is_blank_text());
        assert!(!MarkupNode::Text("\u{a0}".into()).is_blank_text());
        assert!(!MarkupNode::Text("&nbsp;".into()).is_blank_text());
        assert!(!MarkupNode::Comment.is_blank_text());
    }

    #[test]
    fn element_count_ignores_detached_nodes() {
        let mut tree = MarkupTree::new(MarkupNode::Document);
        let a = tree
            .root_mut()
            .append(MarkupNode::Element(ElementData::new("a")))
            .id();
        tree.root_mut().append(MarkupNode::Comment);
        if let Some(mut node) = tree.get_mut(a) {
            node.append(MarkupNode::Element(ElementData::new("b")));
            node.detach();
        }
        assert_eq!(element_count(&tree), 0);
    }
}
