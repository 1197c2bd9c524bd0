//! Shared types, error model, and configuration for docforest.
//!
//! This crate is the foundation depended on by all other docforest crates.
//! It provides:
//! - [`DocForestError`]: the unified error type
//! - Domain types ([`AssetId`], [`ManifestEntry`], [`RawDocument`], [`DocumentTree`], [`Relation`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlobConfig, BlobKind, MarkupConfig, NodeIdStrategy, PathsConfig, PipelineConfig,
    WorkersConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{DocForestError, Result};
pub use types::{
    AssetId, DocumentTree, ElementNode, HAS_TEXT_ATTRIBUTE, ManifestEntry, NODE_ID_ATTRIBUTE,
    NodeId, RESERVED_ATTRIBUTE_PREFIX, RawDocument, Relation, XPATH_ATTRIBUTE, content_sha256,
    is_reserved_attribute,
};
