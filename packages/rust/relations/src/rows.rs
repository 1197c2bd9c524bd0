//! Row shapes of the five relations and how each is derived.

use std::collections::BTreeSet;

use serde::Serialize;

use docforest_shared::{AssetId, DocumentTree, NodeId, RawDocument};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileRow {
    pub asset_id: AssetId,
    pub file_type: String,
    pub bucket_name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeRow {
    pub asset_id: AssetId,
    pub node_id: NodeId,
    pub name: String,
    #[serde(rename = "XPath")]
    pub xpath: String,
    pub has_text: bool,
}

/// One (name, value) pair of the attribute vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeRow {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeAttributeRow {
    pub node_id: NodeId,
    pub attribute_name: String,
    pub attribute_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeParentRow {
    pub node_id: NodeId,
    pub parent_node_id: NodeId,
}

pub const FILE_HEADER: [&str; 4] = ["AssetId", "FileType", "BucketName", "Key"];
pub const NODE_HEADER: [&str; 5] = ["AssetId", "NodeId", "Name", "XPath", "HasText"];
pub const ATTRIBUTE_HEADER: [&str; 2] = ["Key", "Value"];
pub const NODE_ATTRIBUTE_HEADER: [&str; 3] = ["NodeId", "AttributeName", "AttributeValue"];
pub const NODE_PARENT_HEADER: [&str; 2] = ["NodeId", "ParentNodeId"];

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Lower-cased extension of the key's last path segment, dot included.
///
/// Empty when the segment has no dot or ends with one.
pub fn file_type_of(key: &str) -> String {
    let segment = key.rsplit(['/', '\\']).next().unwrap_or(key);
    match segment.rfind('.') {
        Some(dot) if dot + 1 < segment.len() => segment[dot..].to_lowercase(),
        _ => String::new(),
    }
}

pub fn file_row(document: &RawDocument) -> FileRow {
    FileRow {
        asset_id: document.asset_id.clone(),
        file_type: file_type_of(&document.key),
        bucket_name: document.bucket_name.clone(),
        key: document.key.clone(),
    }
}

pub fn node_rows(tree: &DocumentTree) -> impl Iterator<Item = NodeRow> + '_ {
    tree.nodes.iter().map(|node| NodeRow {
        asset_id: tree.asset_id.clone(),
        node_id: node.node_id,
        name: node.name.clone(),
        xpath: node.xpath.clone(),
        has_text: node.has_text,
    })
}

pub fn node_attribute_rows(tree: &DocumentTree) -> impl Iterator<Item = NodeAttributeRow> + '_ {
    tree.nodes.iter().flat_map(|node| {
        node.user_attributes().map(move |(name, value)| NodeAttributeRow {
            node_id: node.node_id,
            attribute_name: name.to_string(),
            attribute_value: value.to_string(),
        })
    })
}

pub fn node_parent_rows(tree: &DocumentTree) -> impl Iterator<Item = NodeParentRow> + '_ {
    tree.nodes.iter().filter_map(|node| {
        node.parent_node_id.map(|parent| NodeParentRow {
            node_id: node.node_id,
            parent_node_id: parent,
        })
    })
}

/// Add a tree's distinct user (name, value) pairs to `vocabulary`.
pub fn collect_vocabulary(tree: &DocumentTree, vocabulary: &mut BTreeSet<AttributeRow>) {
    for node in &tree.nodes {
        for (name, value) in node.user_attributes() {
            vocabulary.insert(AttributeRow {
                key: name.to_string(),
                value: value.to_string(),
            });
        }
    }
}
