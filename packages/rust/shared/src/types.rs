//! Core domain types: assets, raw documents, element nodes and document trees.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{DocForestError, Result};

/// Prefix marking synthetic (pipeline-injected) attribute names.
pub const RESERVED_ATTRIBUTE_PREFIX: &str = "__";

/// Synthetic attribute carrying the node id through the strict pass.
pub const NODE_ID_ATTRIBUTE: &str = "__nodeid";

/// Synthetic attribute carrying the positional path through the strict pass.
pub const XPATH_ATTRIBUTE: &str = "__xpath";

/// Synthetic attribute carrying the has-direct-text flag through the strict pass.
pub const HAS_TEXT_ATTRIBUTE: &str = "__hastext";

/// Namespace for deterministic (asset id + path derived) node ids.
const NODE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d1c_3f0a_9b2e_4c71_8a55_2f0e_b7d4_19c3);

/// Whether an attribute name is synthetic and must stay out of user-attribute relations.
pub fn is_reserved_attribute(name: &str) -> bool {
    name.starts_with(RESERVED_ATTRIBUTE_PREFIX)
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// Corpus-unique asset identifier. Also names the asset's files in the stores,
/// so it must be usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Validate and wrap an asset id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(DocForestError::validation("asset id must not be empty"));
        }
        if id.starts_with('.') {
            return Err(DocForestError::validation(format!(
                "asset id '{id}' must not start with '.'"
            )));
        }
        if id.contains(['/', '\\', '\0']) {
            return Err(DocForestError::validation(format!(
                "asset id '{id}' must not contain path separators"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AssetId {
    type Error = DocForestError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AssetId {
    type Err = DocForestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// ManifestEntry
// ---------------------------------------------------------------------------

/// One row of the input manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "AssetId")]
    pub asset_id: AssetId,
    /// Operator bookkeeping only; the fetch stage ignores it.
    #[serde(rename = "FileType", default)]
    pub file_type: Option<String>,
    #[serde(rename = "BucketName")]
    pub bucket_name: String,
    #[serde(rename = "Key")]
    pub key: String,
}

impl std::fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.asset_id)
    }
}

// ---------------------------------------------------------------------------
// RawDocument
// ---------------------------------------------------------------------------

/// A fetched blob, as persisted by the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDocument {
    pub asset_id: AssetId,
    pub bucket_name: String,
    pub key: String,
    /// Fetched bytes, base64 encoded on disk.
    #[serde(with = "base64_content")]
    pub content: Vec<u8>,
    /// Hex SHA-256 of `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl RawDocument {
    /// Build a raw document for a manifest entry, stamping checksum and fetch time.
    pub fn new(entry: &ManifestEntry, content: Vec<u8>) -> Self {
        Self {
            asset_id: entry.asset_id.clone(),
            bucket_name: entry.bucket_name.clone(),
            key: entry.key.clone(),
            content_sha256: Some(content_sha256(&content)),
            content,
            fetched_at: Some(Utc::now()),
        }
    }

    /// Content decoded as text (invalid UTF-8 sequences are replaced).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Check the recorded checksum, if any, against the content.
    pub fn verify_checksum(&self) -> Result<()> {
        match &self.content_sha256 {
            Some(expected) if *expected != content_sha256(&self.content) => {
                Err(DocForestError::validation(format!(
                    "content checksum mismatch for asset {}",
                    self.asset_id
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Compute the hex SHA-256 of raw content.
pub fn content_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

mod base64_content {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Identifier of one element node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Fresh run-local identifier, unique process-wide.
    pub fn random() -> Self {
        Self(Uuid::now_v7())
    }

    /// Reproducible identifier derived from the asset id and positional path.
    pub fn derived(asset_id: &AssetId, xpath: &str) -> Self {
        let name = format!("{asset_id}\n{xpath}");
        Self(Uuid::new_v5(&NODE_ID_NAMESPACE, name.as_bytes()))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ElementNode / DocumentTree
// ---------------------------------------------------------------------------

/// One annotated element of a normalized document.
///
/// The synthetic fields are typed; `attributes` only ever holds user attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ElementNode {
    #[serde(rename = "__nodeid")]
    pub node_id: NodeId,
    #[serde(default)]
    pub parent_node_id: Option<NodeId>,
    pub name: String,
    #[serde(rename = "__xpath")]
    pub xpath: String,
    #[serde(rename = "__hastext")]
    pub has_text: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementNode {
    pub fn is_root(&self) -> bool {
        self.parent_node_id.is_none()
    }

    /// User attributes, skipping any reserved names.
    pub fn user_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .filter(|(name, _)| !is_reserved_attribute(name))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// The persisted forest of one asset, nodes in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentTree {
    pub asset_id: AssetId,
    pub nodes: Vec<ElementNode>,
}

impl DocumentTree {
    pub fn roots(&self) -> impl Iterator<Item = &ElementNode> {
        self.nodes.iter().filter(|n| n.is_root())
    }

    pub fn children<'a>(&'a self, parent: &'a NodeId) -> impl Iterator<Item = &'a ElementNode> {
        self.nodes
            .iter()
            .filter(move |n| n.parent_node_id.as_ref() == Some(parent))
    }

    /// Check structural invariants: unique ids, parents defined before their
    /// children, no reserved names in the user attribute maps.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if let Some(parent) = &node.parent_node_id {
                if !seen.contains(parent) {
                    return Err(DocForestError::validation(format!(
                        "asset {}: node {} references parent {parent} before it is defined",
                        self.asset_id, node.node_id
                    )));
                }
            }
            if !seen.insert(node.node_id) {
                return Err(DocForestError::validation(format!(
                    "asset {}: duplicate node id {}",
                    self.asset_id, node.node_id
                )));
            }
            if let Some(name) = node.attributes.keys().find(|k| is_reserved_attribute(k)) {
                return Err(DocForestError::validation(format!(
                    "asset {}: node {} carries reserved attribute {name}",
                    self.asset_id, node.node_id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Relation
// ---------------------------------------------------------------------------

/// The five output relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Files,
    Nodes,
    Attributes,
    NodeAttributes,
    NodeParent,
}

impl Relation {
    /// All relations, in export order.
    pub const ALL: [Relation; 5] = [
        Relation::Files,
        Relation::Nodes,
        Relation::Attributes,
        Relation::NodeAttributes,
        Relation::NodeParent,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Relation::Files => "files.csv",
            Relation::Nodes => "nodes.csv",
            Relation::Attributes => "attributes.csv",
            Relation::NodeAttributes => "nodeAttributes.csv",
            Relation::NodeParent => "nodeParent.csv",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str) -> AssetId {
        AssetId::new(id).unwrap()
    }

    fn node(id: NodeId, parent: Option<NodeId>, name: &str) -> ElementNode {
        ElementNode {
            node_id: id,
            parent_node_id: parent,
            name: name.into(),
            xpath: format!("/{name}[1]"),
            has_text: false,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn asset_id_rejects_path_like_values() {
        assert!(AssetId::new("").is_err());
        assert!(AssetId::new("..").is_err());
        assert!(AssetId::new(".hidden").is_err());
        assert!(AssetId::new("a/b").is_err());
        assert!(AssetId::new(r"a\b").is_err());
        assert_eq!(asset("A-17").as_str(), "A-17");
    }

    #[test]
    fn manifest_entry_deserializes_with_pascal_case() {
        let json = r#"{"AssetId":"a1","BucketName":"docs","Key":"x/y.xml"}"#;
        let entry: ManifestEntry = serde_json::from_str(json).expect("deserialize");
        assert_eq!(entry.asset_id.as_str(), "a1");
        assert_eq!(entry.file_type, None);
        assert_eq!(entry.key, "x/y.xml");
    }

    #[test]
    fn raw_document_encodes_content_as_base64() {
        let entry = ManifestEntry {
            asset_id: asset("a1"),
            file_type: None,
            bucket_name: "docs".into(),
            key: "a.xml".into(),
        };
        let raw = RawDocument::new(&entry, b"<a/>".to_vec());
        let json = serde_json::to_string(&raw).expect("serialize");
        assert!(json.contains(r#""Content":"PGEvPg==""#));

        let parsed: RawDocument = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.content, b"<a/>");
        parsed.verify_checksum().expect("checksum matches");
    }

    #[test]
    fn raw_document_detects_checksum_mismatch() {
        let entry = ManifestEntry {
            asset_id: asset("a1"),
            file_type: None,
            bucket_name: "docs".into(),
            key: "a.xml".into(),
        };
        let mut raw = RawDocument::new(&entry, b"<a/>".to_vec());
        raw.content.truncate(2);
        assert!(raw.verify_checksum().is_err());
    }

    #[test]
    fn derived_node_ids_are_reproducible() {
        let a = asset("doc");
        assert_eq!(NodeId::derived(&a, "/a[1]"), NodeId::derived(&a, "/a[1]"));
        assert_ne!(NodeId::derived(&a, "/a[1]"), NodeId::derived(&a, "/a[2]"));
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn element_node_serializes_synthetic_fields_apart_from_attributes() {
        let mut n = node(NodeId::random(), None, "a");
        n.attributes.insert("x".into(), "1".into());
        let json = serde_json::to_value(&n).expect("serialize");
        assert!(json.get("__nodeid").is_some());
        assert_eq!(json["__xpath"], "/a[1]");
        assert_eq!(json["__hastext"], false);
        assert_eq!(json["Attributes"]["x"], "1");
    }

    #[test]
    fn tree_validation_requires_parent_first() {
        let root = NodeId::random();
        let child = NodeId::random();
        let ok = DocumentTree {
            asset_id: asset("d"),
            nodes: vec![node(root, None, "a"), node(child, Some(root), "b")],
        };
        ok.validate().expect("valid tree");
        assert_eq!(ok.roots().count(), 1);
        assert_eq!(ok.children(&root).count(), 1);

        let bad = DocumentTree {
            asset_id: asset("d"),
            nodes: vec![node(child, Some(root), "b"), node(root, None, "a")],
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn user_attributes_skip_reserved_names() {
        let mut n = node(NodeId::random(), None, "a");
        n.attributes.insert("__nodeid".into(), "x".into());
        n.attributes.insert("id".into(), "main".into());
        let attrs: Vec<_> = n.user_attributes().collect();
        assert_eq!(attrs, vec![("id", "main")]);
    }

    #[test]
    fn relation_file_names() {
        let names: Vec<_> = Relation::ALL.iter().map(|r| r.file_name()).collect();
        assert_eq!(
            names,
            vec![
                "files.csv",
                "nodes.csv",
                "attributes.csv",
                "nodeAttributes.csv",
                "nodeParent.csv"
            ]
        );
    }
}
