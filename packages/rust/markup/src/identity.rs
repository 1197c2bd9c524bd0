//! Node identity: id, positional path and direct-text flag for every element.

use std::collections::HashMap;

use tracing::debug;

use docforest_shared::{AssetId, NodeId, NodeIdStrategy, is_reserved_attribute};

use crate::tree::{MarkupNode, MarkupTree, NodeIdentity};

/// Annotate every element in pre-order. Returns the number of elements annotated.
///
/// The positional path is `/name[i]` per level, where `i` counts the element
/// and its preceding element siblings with the same (case-sensitive) name.
/// Attributes whose names carry the reserved prefix are dropped here so they
/// cannot collide with the synthetic fields.
pub fn annotate(tree: &mut MarkupTree, asset_id: &AssetId, strategy: NodeIdStrategy) -> usize {
    let mut paths: HashMap<ego_tree::NodeId, String> = HashMap::new();
    let mut planned: Vec<(ego_tree::NodeId, NodeIdentity)> = Vec::new();

    for node in tree.root().descendants() {
        let MarkupNode::Element(element) = node.value() else {
            continue;
        };

        let parent_path = node
            .parent()
            .and_then(|p| paths.get(&p.id()))
            .map(String::as_str)
            .unwrap_or("");
        let position = 1 + node
            .prev_siblings()
            .filter(|s| s.value().as_element().is_some_and(|e| e.name == element.name))
            .count();
        let xpath = format!("{parent_path}/{}[{position}]", element.name);

        let has_text = node.children().any(|c| c.value().is_text());
        let node_id = match strategy {
            NodeIdStrategy::Random => NodeId::random(),
            NodeIdStrategy::Deterministic => NodeId::derived(asset_id, &xpath),
        };

        paths.insert(node.id(), xpath.clone());
        planned.push((
            node.id(),
            NodeIdentity {
                node_id,
                xpath,
                has_text,
            },
        ));
    }

    let count = planned.len();
    for (id, identity) in planned {
        let Some(mut node) = tree.get_mut(id) else {
            continue;
        };
        if let MarkupNode::Element(element) = node.value() {
            let before = element.attributes.len();
            element.attributes.retain(|(name, _)| !is_reserved_attribute(name));
            if element.attributes.len() != before {
                debug!(%asset_id, element = %element.name, "dropped reserved attributes");
            }
            element.identity = Some(identity);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::remove_whitespace_text;
    use crate::tolerant;

    fn asset() -> AssetId {
        AssetId::new("doc-1").unwrap()
    }

    fn identities(tree: &MarkupTree) -> Vec<(String, NodeIdentity)> {
        tree.root()
            .descendants()
            .filter_map(|n| n.value().as_element())
            .map(|e| (e.name.clone(), e.identity.clone().unwrap()))
            .collect()
    }

    #[test]
    fn paths_count_same_named_siblings() {
        let mut tree = tolerant::parse("<a><b/><c/><b><b/></b></a>").unwrap();
        annotate(&mut tree, &asset(), NodeIdStrategy::Random);

        let paths: Vec<_> = identities(&tree).into_iter().map(|(_, i)| i.xpath).collect();
        assert_eq!(
            paths,
            vec!["/a[1]", "/a[1]/b[1]", "/a[1]/c[1]", "/a[1]/b[2]", "/a[1]/b[2]/b[1]"]
        );
    }

    #[test]
    fn sibling_count_is_case_sensitive() {
        let mut tree = tolerant::parse("<r><Item/><item/><Item/></r>").unwrap();
        annotate(&mut tree, &asset(), NodeIdStrategy::Random);

        let paths: Vec<_> = identities(&tree).into_iter().map(|(_, i)| i.xpath).collect();
        assert_eq!(paths[1..], ["/r[1]/Item[1]", "/r[1]/item[1]", "/r[1]/Item[2]"]);
    }

    #[test]
    fn has_text_reflects_direct_text_only() {
        let mut tree = tolerant::parse("<p>\n  <b>bold</b>\n</p>").unwrap();
        remove_whitespace_text(&mut tree);
        annotate(&mut tree, &asset(), NodeIdStrategy::Random);

        let flags: Vec<_> = identities(&tree)
            .into_iter()
            .map(|(name, i)| (name, i.has_text))
            .collect();
        assert_eq!(flags, vec![("p".to_string(), false), ("b".to_string(), true)]);
    }

    #[test]
    fn random_ids_are_distinct() {
        let mut tree = tolerant::parse("<a><b/><b/></a>").unwrap();
        annotate(&mut tree, &asset(), NodeIdStrategy::Random);
        let ids: std::collections::HashSet<_> =
            identities(&tree).into_iter().map(|(_, i)| i.node_id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn deterministic_ids_are_stable() {
        let markup = "<a><b/><b/></a>";
        let mut first = tolerant::parse(markup).unwrap();
        let mut second = tolerant::parse(markup).unwrap();
        annotate(&mut first, &asset(), NodeIdStrategy::Deterministic);
        annotate(&mut second, &asset(), NodeIdStrategy::Deterministic);
        assert_eq!(identities(&first), identities(&second));

        let other = AssetId::new("doc-2").unwrap();
        let mut third = tolerant::parse(markup).unwrap();
        annotate(&mut third, &other, NodeIdStrategy::Deterministic);
        assert_ne!(identities(&first)[0].1.node_id, identities(&third)[0].1.node_id);
    }

    #[test]
    fn reserved_user_attributes_are_dropped() {
        let mut tree = tolerant::parse(r#"<a __nodeid="spoof" __x="1" keep="2"/>"#).unwrap();
        annotate(&mut tree, &asset(), NodeIdStrategy::Random);
        let a = tree
            .root()
            .children()
            .find_map(|n| n.value().as_element().cloned())
            .unwrap();
        assert_eq!(a.attributes, vec![("keep".to_string(), "2".to_string())]);
    }
}
