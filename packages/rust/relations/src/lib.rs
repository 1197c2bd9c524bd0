//! Relational decomposition of the normalized forest.
//!
//! Each relation is exported by its own pass over the stores and is skipped
//! entirely when its file already exists. A relation file appears only once
//! fully written.

pub mod rows;

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument};

use docforest_shared::{DocForestError, Relation, Result};
use docforest_storage::{ArtifactStore, AtomicFile};

pub use rows::{
    AttributeRow, FileRow, NodeAttributeRow, NodeParentRow, NodeRow, file_type_of,
};

/// What happened to one relation during an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Written { rows: usize },
    /// The file already existed and was left untouched.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationOutcome {
    pub relation: Relation,
    pub status: ExportStatus,
}

/// Export all five relations, in [`Relation::ALL`] order.
#[instrument(skip_all, fields(root = %store.root().display()))]
pub fn export_relations(store: &ArtifactStore) -> Result<Vec<RelationOutcome>> {
    Relation::ALL
        .iter()
        .map(|&relation| export_relation(store, relation))
        .collect()
}

/// Export one relation unless its file already exists.
#[instrument(skip_all, fields(relation = %relation))]
pub fn export_relation(store: &ArtifactStore, relation: Relation) -> Result<RelationOutcome> {
    if store.has_relation(relation) {
        info!("relation exists, skipping");
        return Ok(RelationOutcome {
            relation,
            status: ExportStatus::Skipped,
        });
    }

    let started = Instant::now();
    let mut out = RelationWriter::create(store, relation)?;

    match relation {
        Relation::Files => {
            out.header(&rows::FILE_HEADER)?;
            for asset_id in store.list_raw()? {
                let document = store.read_raw(&asset_id)?;
                out.row(&rows::file_row(&document))?;
            }
        }
        Relation::Nodes => {
            out.header(&rows::NODE_HEADER)?;
            for asset_id in store.list_trees()? {
                let tree = store.read_tree(&asset_id)?;
                for row in rows::node_rows(&tree) {
                    out.row(&row)?;
                }
            }
        }
        Relation::Attributes => {
            out.header(&rows::ATTRIBUTE_HEADER)?;
            let mut vocabulary = BTreeSet::new();
            for asset_id in store.list_trees()? {
                let tree = store.read_tree(&asset_id)?;
                rows::collect_vocabulary(&tree, &mut vocabulary);
            }
            for row in &vocabulary {
                out.row(row)?;
            }
        }
        Relation::NodeAttributes => {
            out.header(&rows::NODE_ATTRIBUTE_HEADER)?;
            for asset_id in store.list_trees()? {
                let tree = store.read_tree(&asset_id)?;
                for row in rows::node_attribute_rows(&tree) {
                    out.row(&row)?;
                }
            }
        }
        Relation::NodeParent => {
            out.header(&rows::NODE_PARENT_HEADER)?;
            for asset_id in store.list_trees()? {
                let tree = store.read_tree(&asset_id)?;
                for row in rows::node_parent_rows(&tree) {
                    out.row(&row)?;
                }
            }
        }
    }

    let rows = out.finish()?;
    info!(
        rows,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "relation written"
    );
    Ok(RelationOutcome {
        relation,
        status: ExportStatus::Written { rows },
    })
}

// ---------------------------------------------------------------------------
// RelationWriter
// ---------------------------------------------------------------------------

/// CSV writer over an uncommitted relation file.
struct RelationWriter {
    relation: Relation,
    writer: csv::Writer<AtomicFile>,
    rows: usize,
}

impl RelationWriter {
    fn create(store: &ArtifactStore, relation: Relation) -> Result<Self> {
        let file = store.create_relation(relation)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Self {
            relation,
            writer,
            rows: 0,
        })
    }

    fn header(&mut self, columns: &[&str]) -> Result<()> {
        self.writer
            .write_record(columns)
            .map_err(|e| codec(self.relation, e))
    }

    fn row<T: Serialize>(&mut self, row: &T) -> Result<()> {
        self.writer
            .serialize(row)
            .map_err(|e| codec(self.relation, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and commit; returns the number of data rows.
    fn finish(self) -> Result<usize> {
        let relation = self.relation;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| DocForestError::Codec(format!("{relation}: {}", e.error())))?;
        file.commit()?;
        Ok(self.rows)
    }
}

fn codec(relation: Relation, e: csv::Error) -> DocForestError {
    DocForestError::Codec(format!("{relation}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docforest_shared::{
        AssetId, DocumentTree, ElementNode, ManifestEntry, NodeId, RawDocument,
    };
    use std::collections::BTreeMap;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn raw(id: &str, key: &str) -> RawDocument {
        let entry = ManifestEntry {
            asset_id: AssetId::new(id).unwrap(),
            file_type: None,
            bucket_name: "corpus".into(),
            key: key.into(),
        };
        RawDocument::new(&entry, b"<a/>".to_vec())
    }

    fn small_tree(id: &str) -> DocumentTree {
        let a = NodeId::random();
        let element = |node_id: NodeId, parent: Option<NodeId>, name: &str, xpath: &str, x: Option<&str>| ElementNode {
            node_id,
            parent_node_id: parent,
            name: name.into(),
            xpath: xpath.into(),
            has_text: parent.is_none(),
            attributes: x
                .map(|v| BTreeMap::from([("x".to_string(), v.to_string())]))
                .unwrap_or_default(),
        };
        DocumentTree {
            asset_id: AssetId::new(id).unwrap(),
            nodes: vec![
                element(a, None, "a", "/a[1]", None),
                element(NodeId::random(), Some(a), "b", "/a[1]/b[1]", Some("1")),
                element(NodeId::random(), Some(a), "b", "/a[1]/b[2]", Some("2")),
            ],
        }
    }

    fn read(store: &ArtifactStore, relation: Relation) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(store.relation_path(relation))
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn empty_store_writes_headers_only() {
        let (_dir, store) = store();
        let outcomes = export_relations(&store).unwrap();
        assert!(
            outcomes
                .iter()
                .all(|o| o.status == ExportStatus::Written { rows: 0 })
        );
        assert_eq!(read(&store, Relation::NodeParent), vec![vec!["NodeId", "ParentNodeId"]]);
        assert_eq!(
            read(&store, Relation::Files),
            vec![vec!["AssetId", "FileType", "BucketName", "Key"]]
        );
    }

    #[test]
    fn small_document_relations() {
        let (_dir, store) = store();
        store.write_raw(&raw("42", "docs/Sample.XML")).unwrap();
        let tree = small_tree("42");
        store.write_tree(&tree).unwrap();

        export_relations(&store).unwrap();

        let files = read(&store, Relation::Files);
        assert_eq!(files[1], vec!["42", ".xml", "corpus", "docs/Sample.XML"]);

        let nodes = read(&store, Relation::Nodes);
        assert_eq!(nodes[0], vec!["AssetId", "NodeId", "Name", "XPath", "HasText"]);
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[1][4], "true");
        assert_eq!(nodes[2][4], "false");
        assert_eq!(nodes[3][3], "/a[1]/b[2]");

        let vocabulary = read(&store, Relation::Attributes);
        assert_eq!(vocabulary[1..], [vec!["x", "1"], vec!["x", "2"]]);

        let edges = read(&store, Relation::NodeAttributes);
        assert_eq!(edges.len(), 3);

        let a_id = tree.nodes[0].node_id.to_string();
        let parents = read(&store, Relation::NodeParent);
        assert_eq!(parents.len(), 3);
        assert!(parents[1..].iter().all(|row| row[1] == a_id));
    }

    #[test]
    fn files_relation_covers_assets_without_trees() {
        let (_dir, store) = store();
        store.write_raw(&raw("1", "a.xml")).unwrap();
        store.write_raw(&raw("2", "b")).unwrap();
        store.write_tree(&small_tree("1")).unwrap();

        let outcome = export_relation(&store, Relation::Files).unwrap();
        assert_eq!(outcome.status, ExportStatus::Written { rows: 2 });
        assert_eq!(read(&store, Relation::Files)[2][1], "");
    }

    #[test]
    fn existing_relation_is_not_regenerated() {
        let (_dir, store) = store();
        std::fs::write(store.relation_path(Relation::Nodes), "keep me\n").unwrap();
        store.write_tree(&small_tree("1")).unwrap();

        let outcomes = export_relations(&store).unwrap();
        assert_eq!(outcomes[1].status, ExportStatus::Skipped);
        assert_eq!(
            std::fs::read_to_string(store.relation_path(Relation::Nodes)).unwrap(),
            "keep me\n"
        );
        assert_eq!(outcomes[4].status, ExportStatus::Written { rows: 2 });
    }

    #[test]
    fn values_with_separators_are_quoted() {
        let (_dir, store) = store();
        let mut tree = small_tree("q");
        tree.nodes[1]
            .attributes
            .insert("title".into(), "a, \"b\"\nc".into());
        store.write_tree(&tree).unwrap();

        export_relation(&store, Relation::Attributes).unwrap();
        let rows = read(&store, Relation::Attributes);
        assert!(rows.contains(&vec!["title".to_string(), "a, \"b\"\nc".to_string()]));
    }
}
