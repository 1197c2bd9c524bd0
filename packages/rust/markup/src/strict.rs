//! Strict serialization and re-validation of the annotated element tree.
//!
//! [`render`] writes the element-only tree as XML, synthetic fields included
//! as attributes. [`parse_strict`] reads it back with a conforming reader:
//! end names must match, attribute names must be unique, every name must be
//! a valid XML name, and no character data is allowed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use ego_tree::iter::Edge;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

use docforest_shared::{
    AssetId, DocForestError, DocumentTree, ElementNode, HAS_TEXT_ATTRIBUTE, NODE_ID_ATTRIBUTE,
    NodeId, Result, XPATH_ATTRIBUTE,
};

use crate::tree::{MarkupNode, MarkupTree};

static XML_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}_:][\p{L}\p{N}._:\-]*$").expect("valid regex"));

fn is_xml_name(name: &str) -> bool {
    XML_NAME_RE.is_match(name)
}

/// Render every annotated element; non-element nodes are skipped.
pub fn render(tree: &MarkupTree) -> Result<String> {
    let mut out = String::new();

    for edge in tree.root().traverse() {
        match edge {
            Edge::Open(node) => {
                let MarkupNode::Element(element) = node.value() else {
                    continue;
                };
                let identity = element.identity.as_ref().ok_or_else(|| {
                    DocForestError::strict(format!("element <{}> was never annotated", element.name))
                })?;

                let _ = write!(out, "<{}", element.name);
                for (name, value) in &element.attributes {
                    let _ = write!(out, " {name}=\"{}\"", escape(value.as_str()));
                }
                let _ = write!(
                    out,
                    " {NODE_ID_ATTRIBUTE}=\"{}\" {XPATH_ATTRIBUTE}=\"{}\" {HAS_TEXT_ATTRIBUTE}=\"{}\">",
                    identity.node_id,
                    escape(identity.xpath.as_str()),
                    identity.has_text
                );
            }
            Edge::Close(node) => {
                if let MarkupNode::Element(element) = node.value() {
                    let _ = write!(out, "</{}>", element.name);
                }
            }
        }
    }

    Ok(out)
}

/// Parse rendered markup strictly into the persisted tree form.
pub fn parse_strict(asset_id: &AssetId, xml: &str) -> Result<DocumentTree> {
    let mut reader = Reader::from_str(xml);
    let mut open: Vec<NodeId> = Vec::new();
    let mut nodes = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            DocForestError::strict(format!("at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(start) => {
                let node = element_node(&start, open.last().copied())?;
                open.push(node.node_id);
                nodes.push(node);
            }
            Event::Empty(start) => {
                nodes.push(element_node(&start, open.last().copied())?);
            }
            Event::End(_) => {
                open.pop();
            }
            Event::Text(text) => {
                if !text.iter().all(|b| b.is_ascii_whitespace()) {
                    return Err(DocForestError::strict("character data in element-only tree"));
                }
            }
            Event::Eof => break,
            other => {
                return Err(DocForestError::strict(format!(
                    "unexpected {other:?} in element-only tree"
                )));
            }
        }
    }

    if let Some(id) = open.last() {
        return Err(DocForestError::strict(format!("element {id} is never closed")));
    }
    if nodes.is_empty() {
        return Err(DocForestError::strict("document has no elements"));
    }

    let tree = DocumentTree {
        asset_id: asset_id.clone(),
        nodes,
    };
    tree.validate()
        .map_err(|e| DocForestError::strict(e.to_string()))?;
    Ok(tree)
}

fn element_node(start: &BytesStart<'_>, parent: Option<NodeId>) -> Result<ElementNode> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| DocForestError::strict(format!("element name is not UTF-8: {e}")))?
        .to_string();
    if !is_xml_name(&name) {
        return Err(DocForestError::strict(format!("invalid element name <{name}>")));
    }

    let mut node_id = None;
    let mut xpath = None;
    let mut has_text = None;
    let mut attributes = BTreeMap::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| DocForestError::strict(format!("<{name}>: {e}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| DocForestError::strict(format!("<{name}>: attribute name: {e}")))?
            .to_string();
        if !is_xml_name(&key) {
            return Err(DocForestError::strict(format!(
                "<{name}>: invalid attribute name '{key}'"
            )));
        }
        let value = attr
            .unescape_value()
            .map_err(|e| DocForestError::strict(format!("<{name} {key}>: {e}")))?
            .into_owned();

        match key.as_str() {
            NODE_ID_ATTRIBUTE => {
                let id = value.parse::<NodeId>().map_err(|e| {
                    DocForestError::strict(format!("<{name}>: bad node id '{value}': {e}"))
                })?;
                node_id = Some(id);
            }
            XPATH_ATTRIBUTE => xpath = Some(value),
            HAS_TEXT_ATTRIBUTE => {
                has_text = Some(match value.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(DocForestError::strict(format!(
                            "<{name}>: bad text flag '{value}'"
                        )));
                    }
                });
            }
            _ => {
                attributes.insert(key, value);
            }
        }
    }

    let missing = |field: &str| DocForestError::strict(format!("<{name}>: missing {field}"));
    Ok(ElementNode {
        node_id: node_id.ok_or_else(|| missing(NODE_ID_ATTRIBUTE))?,
        parent_node_id: parent,
        xpath: xpath.ok_or_else(|| missing(XPATH_ATTRIBUTE))?,
        has_text: has_text.ok_or_else(|| missing(HAS_TEXT_ATTRIBUTE))?,
        name,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::annotate;
    use crate::normalize::{remove_non_elements, remove_whitespace_text};
    use crate::tolerant;
    use docforest_shared::NodeIdStrategy;

    fn asset() -> AssetId {
        AssetId::new("doc-1").unwrap()
    }

    fn prepared(markup: &str) -> MarkupTree {
        let mut tree = tolerant::parse(markup).unwrap();
        remove_whitespace_text(&mut tree);
        annotate(&mut tree, &asset(), NodeIdStrategy::Deterministic);
        remove_non_elements(&mut tree);
        tree
    }

    #[test]
    fn render_includes_synthetic_fields() {
        let tree = prepared(r#"<a title="x &amp; &quot;y&quot;">t</a>"#);
        let xml = render(&tree).unwrap();
        assert!(xml.starts_with(r#"<a title="x &amp; &quot;y&quot;" __nodeid=""#));
        assert!(xml.contains(r#"__xpath="/a[1]" __hastext="true">"#));
        assert!(xml.ends_with("</a>"));
    }

    #[test]
    fn render_rejects_unannotated_elements() {
        let tree = tolerant::parse("<a/>").unwrap();
        assert!(matches!(
            render(&tree).unwrap_err(),
            DocForestError::StrictParse { .. }
        ));
    }

    #[test]
    fn strict_parse_rebuilds_the_forest() {
        let tree = prepared(r#"<a><b x="1"/><b x="2"/>text</a><c/>"#);
        let doc = parse_strict(&asset(), &render(&tree).unwrap()).unwrap();

        let names: Vec<_> = doc.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "b", "c"]);
        assert_eq!(doc.roots().count(), 2);

        let a = &doc.nodes[0];
        assert!(a.has_text);
        assert_eq!(doc.children(&a.node_id).count(), 2);
        assert_eq!(doc.nodes[2].attributes.get("x").map(String::as_str), Some("2"));
        assert_eq!(doc.nodes[2].xpath, "/a[1]/b[2]");
        assert!(!doc.nodes[1].has_text);
    }

    #[test]
    fn duplicate_attributes_fail_strict_pass() {
        let tree = prepared(r#"<a x="1" x="2"/>"#);
        let err = parse_strict(&asset(), &render(&tree).unwrap()).unwrap_err();
        assert!(matches!(err, DocForestError::StrictParse { .. }));
    }

    #[test]
    fn invalid_names_fail_strict_pass() {
        let tree = prepared("<1abc>x</1abc>");
        assert!(parse_strict(&asset(), &render(&tree).unwrap()).is_err());

        let tree = prepared(r#"<a @click="go"/>"#);
        assert!(parse_strict(&asset(), &render(&tree).unwrap()).is_err());
    }

    #[test]
    fn empty_and_broken_input_fail() {
        assert!(parse_strict(&asset(), "").is_err());
        assert!(parse_strict(&asset(), "<a>").is_err());
        assert!(parse_strict(&asset(), "<a></b>").is_err());
        assert!(parse_strict(&asset(), "<a>text</a>").is_err());
    }

    #[test]
    fn missing_synthetic_field_fails() {
        let xml = r#"<a __nodeid="0190f6a2-0000-7000-8000-000000000000" __xpath="/a[1]"/>"#;
        let err = parse_strict(&asset(), xml).unwrap_err();
        assert!(err.to_string().contains("__hastext"));
    }
}
