use crate::relationship::Relationship;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file entry in the exported graph view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub is_unparseable: bool,
    pub last_analyzed: DateTime<Utc>,
    pub relationship_count: usize,
}

/// Summary block of an export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub file_count: usize,
    pub relationship_count: usize,
    pub generated_at: DateTime<Utc>,
}

/// Serializable view of the whole graph, consumed by the outer
/// protocol/service layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<FileNode>,
    pub relationships: Vec<Relationship>,
    pub metadata: ExportMetadata,
}

impl GraphExport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
