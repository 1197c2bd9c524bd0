//! Markup normalization: raw document text to an annotated element forest.
//!
//! The passes run in a fixed order:
//! 1. tolerant parse ([`tolerant::parse`], optional HTML5 fallback); script and
//!    style content, stray `<` and downlevel `<![...]>` markup are tolerated
//! 2. drop whitespace-only text
//! 3. assign identity to every element ([`identity::annotate`])
//! 4. drop every non-element node
//! 5. render and strictly re-parse ([`strict::render`], [`strict::parse_strict`])
//!
//! A document that fails step 1 or step 5 is rejected as a whole.

pub mod identity;
pub mod normalize;
pub mod strict;
pub mod tolerant;
pub mod tree;

use tracing::{debug, instrument, warn};

use docforest_shared::{AssetId, DocForestError, DocumentTree, NodeIdStrategy, Result};

pub use tree::{ElementData, MarkupNode, MarkupTree, NodeIdentity};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for [`normalize_document`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// How node ids are produced.
    pub node_ids: NodeIdStrategy,
    /// Re-parse with the HTML5 parser when the tolerant tokenizer fails.
    pub html5_fallback: bool,
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Normalize one document into its persisted tree form.
///
/// Errors are [`DocForestError::Parse`] or [`DocForestError::StrictParse`];
/// either way the document produces no tree.
#[instrument(skip_all, fields(asset_id = %asset_id))]
pub fn normalize_document(
    asset_id: &AssetId,
    text: &str,
    options: NormalizeOptions,
) -> Result<DocumentTree> {
    let mut tree = match tolerant::parse(text) {
        Ok(tree) => tree,
        Err(e) if options.html5_fallback => {
            warn!(error = %e, "tolerant parse failed, retrying with HTML5 parser");
            tolerant::parse_html5(text)
        }
        Err(e) => return Err(e),
    };

    let blank = normalize::remove_whitespace_text(&mut tree);
    if tree::element_count(&tree) == 0 {
        return Err(DocForestError::parse("document has no elements"));
    }

    let annotated = identity::annotate(&mut tree, asset_id, options.node_ids);
    let dropped = normalize::remove_non_elements(&mut tree);
    debug!(annotated, blank, dropped, "tree annotated");

    let rendered = strict::render(&tree)?;
    let document = strict::parse_strict(asset_id, &rendered)?;

    debug!(nodes = document.nodes.len(), "strict pass accepted");
    Ok(document)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
