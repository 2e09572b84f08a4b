pub mod export;
pub mod relationship;
pub mod store;

pub use export::{ExportMetadata, FileNode, GraphExport};
pub use relationship::{Relationship, RelationshipType, ResolvedTarget};
pub use store::{FileMetadata, RelationshipGraph};
