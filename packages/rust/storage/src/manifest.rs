//! Manifest loading.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, instrument};

use docforest_shared::{DocForestError, ManifestEntry, Result};

/// Load every manifest row.
///
/// Columns are matched by header name and trimmed; `FileType` may be absent and
/// extra columns are ignored. Any malformed row or repeated asset id fails the
/// whole load.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DocForestError::config(format!("cannot read manifest {}: {e}", path.display())))?;

    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for (index, row) in reader.deserialize::<ManifestEntry>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let entry = row.map_err(|e| {
            DocForestError::config(format!("{} line {line}: {e}", path.display()))
        })?;
        if entry.bucket_name.is_empty() || entry.key.is_empty() {
            return Err(DocForestError::config(format!(
                "{} line {line}: asset {} has an empty bucket or key",
                path.display(),
                entry.asset_id
            )));
        }
        if !seen.insert(entry.asset_id.clone()) {
            return Err(DocForestError::config(format!(
                "{} line {line}: duplicate asset id {}",
                path.display(),
                entry.asset_id
            )));
        }
        entries.push(entry);
    }

    info!(entries = entries.len(), "manifest loaded");
    Ok(entries)
}
