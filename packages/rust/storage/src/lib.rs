//! Filesystem artifact store.
//!
//! The [`ArtifactStore`] owns one artifacts directory:
//!
//! ```text
//! <root>/assets/<asset id>.json   raw documents (fetch stage)
//! <root>/trees/<asset id>.json    normalized trees (normalize stage)
//! <root>/csv/<relation>.csv       output relations (decompose stage)
//! ```
//!
//! Presence of a file is the completion marker for its item. Every write goes
//! through [`AtomicFile`], so a present file is always a complete one.

pub mod atomic;
pub mod manifest;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use docforest_shared::{AssetId, DocForestError, DocumentTree, RawDocument, Relation, Result};

pub use atomic::{AtomicFile, write_atomic};
pub use manifest::load_manifest;

const ASSETS_DIR: &str = "assets";
const TREES_DIR: &str = "trees";
const CSV_DIR: &str = "csv";

/// Handle to one artifacts directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// Snapshot of what the store currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub raw_documents: usize,
    pub trees: usize,
    pub relations: Vec<(Relation, bool)>,
}

impl ArtifactStore {
    /// Open (creating if needed) the store at `root` and sweep temporaries left
    /// behind by an interrupted run.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        for dir in [store.assets_dir(), store.trees_dir(), store.csv_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| DocForestError::io(&dir, e))?;
            sweep_temporaries(&dir)?;
        }
        debug!(root = %store.root.display(), "artifact store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub fn trees_dir(&self) -> PathBuf {
        self.root.join(TREES_DIR)
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.root.join(CSV_DIR)
    }

    // -----------------------------------------------------------------------
    // Raw documents
    // -----------------------------------------------------------------------

    pub fn raw_path(&self, asset_id: &AssetId) -> PathBuf {
        self.assets_dir().join(format!("{asset_id}.json"))
    }

    pub fn has_raw(&self, asset_id: &AssetId) -> bool {
        self.raw_path(asset_id).is_file()
    }

    pub fn write_raw(&self, document: &RawDocument) -> Result<()> {
        write_json(&self.raw_path(&document.asset_id), document)
    }

    /// Read a raw document, rejecting it if its checksum does not match.
    pub fn read_raw(&self, asset_id: &AssetId) -> Result<RawDocument> {
        let document: RawDocument = read_json(&self.raw_path(asset_id))?;
        if document.asset_id != *asset_id {
            return Err(DocForestError::validation(format!(
                "raw artifact for {asset_id} records asset id {}",
                document.asset_id
            )));
        }
        document.verify_checksum()?;
        Ok(document)
    }

    /// Asset ids with a raw document, sorted.
    pub fn list_raw(&self) -> Result<Vec<AssetId>> {
        list_json(&self.assets_dir())
    }

    // -----------------------------------------------------------------------
    // Normalized trees
    // -----------------------------------------------------------------------

    pub fn tree_path(&self, asset_id: &AssetId) -> PathBuf {
        self.trees_dir().join(format!("{asset_id}.json"))
    }

    pub fn has_tree(&self, asset_id: &AssetId) -> bool {
        self.tree_path(asset_id).is_file()
    }

    pub fn write_tree(&self, tree: &DocumentTree) -> Result<()> {
        write_json(&self.tree_path(&tree.asset_id), tree)
    }

    pub fn read_tree(&self, asset_id: &AssetId) -> Result<DocumentTree> {
        let tree: DocumentTree = read_json(&self.tree_path(asset_id))?;
        tree.validate()?;
        Ok(tree)
    }

    /// Asset ids with a normalized tree, sorted.
    pub fn list_trees(&self) -> Result<Vec<AssetId>> {
        list_json(&self.trees_dir())
    }

    // -----------------------------------------------------------------------
    // Relations
    // -----------------------------------------------------------------------

    pub fn relation_path(&self, relation: Relation) -> PathBuf {
        self.csv_dir().join(relation.file_name())
    }

    pub fn has_relation(&self, relation: Relation) -> bool {
        self.relation_path(relation).is_file()
    }

    /// Start writing a relation file; it appears only once committed.
    pub fn create_relation(&self, relation: Relation) -> Result<AtomicFile> {
        AtomicFile::create(self.relation_path(relation))
    }

    pub fn status(&self) -> Result<StoreStatus> {
        Ok(StoreStatus {
            raw_documents: self.list_raw()?.len(),
            trees: self.list_trees()?.len(),
            relations: Relation::ALL
                .iter()
                .map(|&r| (r, self.has_relation(r)))
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| DocForestError::Codec(format!("{}: {e}", path.display())))?;
    write_atomic(path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| DocForestError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DocForestError::Codec(format!("{}: {e}", path.display())))
}

fn list_json(dir: &Path) -> Result<Vec<AssetId>> {
    let entries = std::fs::read_dir(dir).map_err(|e| DocForestError::io(dir, e))?;
    let mut ids = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| DocForestError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if atomic::is_hidden(name) {
            continue;
        }
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };
        match AssetId::new(stem) {
            Ok(id) => ids.push(id),
            Err(e) => warn!(file = name, error = %e, "ignoring unexpected artifact"),
        }
    }

    ids.sort();
    Ok(ids)
}

fn sweep_temporaries(dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| DocForestError::io(dir, e))?;
    let mut swept = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| DocForestError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if atomic::is_hidden(&name) && name.ends_with(atomic::TEMP_SUFFIX) {
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| DocForestError::io(&path, e))?;
            swept += 1;
        }
    }
    if swept > 0 {
        info!(dir = %dir.display(), swept, "removed stale temporaries");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use docforest_shared::{ElementNode, ManifestEntry, NodeId};
    use std::collections::BTreeMap;

    fn entry(id: &str) -> ManifestEntry {
        ManifestEntry {
            asset_id: AssetId::new(id).unwrap(),
            file_type: None,
            bucket_name: "corpus".into(),
            key: format!("docs/{id}.xml"),
        }
    }

    fn tree(id: &str) -> DocumentTree {
        let root = NodeId::random();
        DocumentTree {
            asset_id: AssetId::new(id).unwrap(),
            nodes: vec![
                ElementNode {
                    node_id: root,
                    parent_node_id: None,
                    name: "a".into(),
                    xpath: "/a[1]".into(),
                    has_text: true,
                    attributes: BTreeMap::new(),
                },
                ElementNode {
                    node_id: NodeId::random(),
                    parent_node_id: Some(root),
                    name: "b".into(),
                    xpath: "/a[1]/b[1]".into(),
                    has_text: false,
                    attributes: BTreeMap::from([("x".to_string(), "1".to_string())]),
                },
            ],
        }
    }

    #[test]
    fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("Artifacts")).unwrap();
        assert!(store.assets_dir().is_dir());
        assert!(store.trees_dir().is_dir());
        assert!(store.csv_dir().is_dir());
    }

    #[test]
    fn raw_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let doc = RawDocument::new(&entry("b"), b"<a>hi</a>".to_vec());
        store.write_raw(&doc).unwrap();
        store
            .write_raw(&RawDocument::new(&entry("a"), b"<x/>".to_vec()))
            .unwrap();

        assert!(store.has_raw(&doc.asset_id));
        assert_eq!(store.read_raw(&doc.asset_id).unwrap(), doc);
        let ids: Vec<_> = store.list_raw().unwrap().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn raw_artifact_is_base64_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let doc = RawDocument::new(&entry("1"), b"<a/>".to_vec());
        store.write_raw(&doc).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.raw_path(&doc.asset_id)).unwrap())
                .unwrap();
        assert_eq!(value["AssetId"], "1");
        assert_eq!(value["BucketName"], "corpus");
        assert_eq!(value["Content"], "PGEvPg==");
    }

    #[test]
    fn corrupted_raw_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let mut doc = RawDocument::new(&entry("1"), b"<a>full</a>".to_vec());
        store.write_raw(&doc).unwrap();

        doc.content.truncate(4);
        std::fs::write(
            store.raw_path(&doc.asset_id),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();
        let err = store.read_raw(&doc.asset_id).unwrap_err();
        assert!(matches!(err, DocForestError::Validation { .. }));
    }

    #[test]
    fn tree_round_trip_uses_reserved_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let t = tree("9");
        store.write_tree(&t).unwrap();

        assert_eq!(store.read_tree(&t.asset_id).unwrap(), t);
        let raw = std::fs::read_to_string(store.tree_path(&t.asset_id)).unwrap();
        assert!(raw.contains("\"__nodeid\""));
        assert!(raw.contains("\"__xpath\":\"/a[1]/b[1]\""));
        assert!(raw.contains("\"__hastext\":true"));
    }

    #[test]
    fn listing_ignores_hidden_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        store.write_tree(&tree("1")).unwrap();
        std::fs::write(store.trees_dir().join("notes.txt"), "x").unwrap();
        std::fs::write(store.trees_dir().join(".hidden.json"), "x").unwrap();

        assert_eq!(store.list_trees().unwrap().len(), 1);
    }

    #[test]
    fn reopening_sweeps_stale_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let stale = store.assets_dir().join(".7.json.tmp");
        std::fs::write(&stale, "{\"trunc").unwrap();

        ArtifactStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(!store.has_raw(&AssetId::new("7").unwrap()));
    }

    #[test]
    fn status_reports_counts_and_relations() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        store
            .write_raw(&RawDocument::new(&entry("1"), b"<a/>".to_vec()))
            .unwrap();
        let mut file = store.create_relation(Relation::Nodes).unwrap();
        std::io::Write::write_all(&mut file, b"AssetId\n").unwrap();
        file.commit().unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.raw_documents, 1);
        assert_eq!(status.trees, 0);
        assert!(status.relations.contains(&(Relation::Nodes, true)));
        assert!(status.relations.contains(&(Relation::Files, false)));
    }
}
