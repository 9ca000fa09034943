use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use pipegraph_core::types::GraphMetadata;
use pipegraph_graph::parse_graph;

/// Suffix of catalog files that name their graph explicitly.
pub const GRAPH_SUFFIX: &str = "-graph.yaml";

/// One graph definition found in the hub catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    /// Name to pass to `activate`.
    pub name: String,
    pub file: PathBuf,
    pub metadata: Option<GraphMetadata>,
    pub node_count: usize,
    /// Why the file could not be read or parsed.
    pub error: Option<String>,
}

/// The activation name for a catalog file, if it is a graph file at all.
pub fn graph_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(GRAPH_SUFFIX)
        .or_else(|| file_name.strip_suffix(".yaml"))
        .filter(|name| !name.is_empty())
}

/// Every graph in `catalog`, sorted by name.
///
/// When both `{name}-graph.yaml` and `{name}.yaml` exist only the first is
/// listed, matching the lookup order used by activation.
pub async fn list_catalog(catalog: &Path) -> Vec<CatalogEntry> {
    let mut dir = match tokio::fs::read_dir(catalog).await {
        Ok(d) => d,
        Err(e) => {
            debug!(path = %catalog.display(), error = %e, "Cannot read catalog directory");
            return Vec::new();
        }
    };

    let mut entries: Vec<(String, bool, PathBuf)> = Vec::new();

    loop {
        let entry = match dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %catalog.display(), error = %e, "Catalog listing interrupted");
                break;
            }
        };
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(name) = graph_name(file_name).map(str::to_string) else {
            continue;
        };
        let preferred = file_name.ends_with(GRAPH_SUFFIX);
        entries.push((name, preferred, path));
    }

    // Preferred files sort first within a name, then duplicates drop out.
    entries.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    entries.dedup_by(|later, earlier| later.0 == earlier.0);

    let mut listed = Vec::with_capacity(entries.len());
    for (name, _, file) in entries {
        listed.push(describe(name, file).await);
    }
    listed
}

async fn describe(name: String, file: PathBuf) -> CatalogEntry {
    let parsed = match tokio::fs::read_to_string(&file).await {
        Ok(text) => parse_graph(&text).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match parsed {
        Ok(graph) => CatalogEntry {
            name,
            file,
            node_count: graph.nodes.len(),
            metadata: Some(graph.metadata),
            error: None,
        },
        Err(error) => {
            warn!(file = %file.display(), %error, "Unusable catalog graph");
            CatalogEntry {
                name,
                file,
                metadata: None,
                node_count: 0,
                error: Some(error),
            }
        }
    }
}
