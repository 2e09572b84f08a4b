use crate::export::{ExportMetadata, FileNode, GraphExport};
use crate::relationship::Relationship;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-file analysis metadata kept alongside the edge store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    /// True when the last analysis could not parse the file
    pub is_unparseable: bool,
    /// Wall-clock time of the last analysis that touched this file
    pub last_analyzed: DateTime<Utc>,
    /// Number of relationships currently sourced from this file
    pub relationship_count: usize,
}

#[derive(Debug, Default)]
struct GraphState {
    /// Edges indexed by source file, in insertion order per file
    by_source: FxHashMap<String, Vec<Relationship>>,
    /// Rendered target -> source files with at least one edge to it
    dependents: FxHashMap<String, BTreeSet<String>>,
    /// Per-file metadata for every file that has been analyzed
    metadata: FxHashMap<String, FileMetadata>,
}

/// Store of relationship edges plus per-file metadata.
///
/// Re-analyzing a file atomically replaces all of its previously
/// contributed edges; readers never observe a half-removed, half-inserted
/// edge set. All mutation happens under a single write lock.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    state: RwLock<GraphState>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().expect("relationship graph lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().expect("relationship graph lock poisoned")
    }

    /// Atomically replace every edge sourced from `source_file` with the
    /// given set and refresh the file's metadata. No stale edges survive.
    pub fn replace_file_relationships(
        &self,
        source_file: &str,
        relationships: Vec<Relationship>,
    ) {
        let mut state = self.write();
        Self::remove_source_edges(&mut state, source_file);

        for relationship in &relationships {
            state
                .dependents
                .entry(relationship.target.render())
                .or_default()
                .insert(source_file.to_string());
        }

        let count = relationships.len();
        state
            .by_source
            .insert(source_file.to_string(), relationships);
        state.metadata.insert(
            source_file.to_string(),
            FileMetadata {
                is_unparseable: false,
                last_analyzed: Utc::now(),
                relationship_count: count,
            },
        );
    }

    /// Record a parse failure: drops any previous edges for the file and
    /// marks it unparseable in the metadata store.
    pub fn mark_unparseable(&self, source_file: &str) {
        let mut state = self.write();
        Self::remove_source_edges(&mut state, source_file);
        state.metadata.insert(
            source_file.to_string(),
            FileMetadata {
                is_unparseable: true,
                last_analyzed: Utc::now(),
                relationship_count: 0,
            },
        );
    }

    /// Drop a file's edges and metadata entirely (e.g. the file was deleted).
    pub fn remove_file(&self, source_file: &str) {
        let mut state = self.write();
        Self::remove_source_edges(&mut state, source_file);
        state.metadata.remove(source_file);
    }

    fn remove_source_edges(state: &mut GraphState, source_file: &str) {
        if let Some(old) = state.by_source.remove(source_file) {
            for relationship in &old {
                let rendered = relationship.target.render();
                if let Some(sources) = state.dependents.get_mut(&rendered) {
                    sources.remove(source_file);
                    if sources.is_empty() {
                        state.dependents.remove(&rendered);
                    }
                }
            }
        }
    }

    /// All edges sourced from `file`, in insertion order.
    pub fn get_dependencies(&self, file: &str) -> Vec<Relationship> {
        self.read()
            .by_source
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    /// All edges that point at `target` (a file path or a rendered marker).
    pub fn get_dependents(&self, target: &str) -> Vec<Relationship> {
        let state = self.read();
        let Some(sources) = state.dependents.get(target) else {
            return Vec::new();
        };

        let mut edges = Vec::new();
        for source in sources {
            if let Some(relationships) = state.by_source.get(source) {
                edges.extend(
                    relationships
                        .iter()
                        .filter(|r| r.target.render() == target)
                        .cloned(),
                );
            }
        }
        edges
    }

    pub fn file_metadata(&self, file: &str) -> Option<FileMetadata> {
        self.read().metadata.get(file).cloned()
    }

    /// Total number of edges across all files.
    pub fn relationship_count(&self) -> usize {
        self.read().by_source.values().map(Vec::len).sum()
    }

    /// Number of files with metadata (analyzed at least once).
    pub fn file_count(&self) -> usize {
        self.read().metadata.len()
    }

    /// All tracked files, sorted for deterministic output.
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.read().metadata.keys().cloned().collect();
        files.sort();
        files
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.by_source.clear();
        state.dependents.clear();
        state.metadata.clear();
    }

    /// Lossless serializable view of the graph for the outer service layer.
    pub fn export(&self) -> GraphExport {
        let state = self.read();

        let mut nodes: Vec<FileNode> = state
            .metadata
            .iter()
            .map(|(path, metadata)| FileNode {
                path: path.clone(),
                is_unparseable: metadata.is_unparseable,
                last_analyzed: metadata.last_analyzed,
                relationship_count: metadata.relationship_count,
            })
            .collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));

        let mut sources: Vec<&String> = state.by_source.keys().collect();
        sources.sort();
        let relationships: Vec<Relationship> = sources
            .into_iter()
            .flat_map(|source| state.by_source[source].iter().cloned())
            .collect();

        let metadata = ExportMetadata {
            file_count: nodes.len(),
            relationship_count: relationships.len(),
            generated_at: Utc::now(),
        };

        GraphExport {
            nodes,
            relationships,
            metadata,
        }
    }
}
