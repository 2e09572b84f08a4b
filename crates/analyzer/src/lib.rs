pub mod analysis;
pub mod cache;
pub mod config;
pub mod detectors;
pub mod syntax;
pub mod test_detection;

pub use analysis::FileAnalyzer;
pub use analysis::builder::RelationshipBuilder;
pub use analysis::types::{
    DynamicPatternWarning, FileSymbolData, PatternType, ReferenceKind, SymbolDefinition,
    SymbolKind, SymbolReference, WarningSeverity,
};
pub use cache::{CacheEntry, CacheError, CacheStatistics, SymbolCache};
pub use config::{AnalyzerConfig, CacheConfig};
pub use detectors::{Detector, DetectorContext, DetectorRegistry, RegistryError};
pub use test_detection::TestFileClassifier;
