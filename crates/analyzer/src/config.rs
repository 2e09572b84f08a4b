use std::path::PathBuf;

/// Analysis configuration, threaded explicitly through constructors.
///
/// There is no process-wide settings singleton; tests construct independent
/// configurations.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Files with more lines than this are skipped, not errored
    pub max_file_lines: usize,
    /// Syntax trees nested deeper than this are treated as unparseable
    pub max_tree_depth: usize,
    /// Emit a warning for `from X import *` statements
    pub warn_on_wildcards: bool,
    /// Suppress WARNING-severity dynamic-pattern output in test modules
    pub suppress_test_warnings: bool,
    /// Project root used for pytest-config discovery and relative paths
    pub project_root: Option<PathBuf>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_file_lines: 10_000,
            max_tree_depth: 256,
            warn_on_wildcards: false,
            suppress_test_warnings: true,
            project_root: None,
        }
    }
}

/// Symbol-cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached files; least-recently-used entries are
    /// evicted beyond this bound
    pub capacity: usize,
    /// Also hash file contents so changes that preserve mtime are detected
    pub validate_content_hash: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            validate_content_hash: false,
        }
    }
}
