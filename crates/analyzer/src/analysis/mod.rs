pub mod builder;
pub mod types;

use crate::analysis::types::{DynamicPatternWarning, FileSymbolData, WarningSeverity};
use crate::cache::SymbolCache;
use crate::config::AnalyzerConfig;
use crate::detectors::{DetectorContext, DetectorRegistry};
use crate::syntax::{PythonParser, start_line, walk_tree};
use anyhow::{Context, Result};
use builder::RelationshipBuilder;
use graph::RelationshipGraph;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

enum SourceRead {
    Contents(String),
    Oversized(usize),
    Failed(std::io::Error),
}

/// Drives tree traversal for one file and fans every node out to the
/// registered detectors, in priority order.
///
/// A failing detector is logged and skipped so one broken detector cannot
/// block the others; partial results from the rest are still committed.
pub struct FileAnalyzer {
    config: AnalyzerConfig,
    parser: PythonParser,
    registry: DetectorRegistry,
    warnings: Vec<DynamicPatternWarning>,
}

impl FileAnalyzer {
    /// Analyzer with the default detector set.
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        let registry = DetectorRegistry::with_default_detectors(&config);
        Self::with_registry(config, registry)
    }

    /// Analyzer over a caller-assembled registry.
    pub fn with_registry(config: AnalyzerConfig, registry: DetectorRegistry) -> Result<Self> {
        let parser = PythonParser::new().context("failed to load the Python grammar")?;
        Ok(Self {
            config,
            parser,
            registry,
            warnings: Vec::new(),
        })
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Dynamic-pattern warnings collected since the last call. Warnings are
    /// ephemeral; they are never persisted in the graph or the cache.
    pub fn take_pattern_warnings(&mut self) -> Vec<DynamicPatternWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Legacy single-phase analysis: runs every detector's `detect` over
    /// every node and commits the edges to the graph, replacing whatever
    /// the file contributed before.
    ///
    /// Returns false without raising on read or parse failure (recorded as
    /// unparseable metadata) and on oversized files (skipped, no metadata
    /// side effects).
    pub fn analyze_file(&mut self, path: &Path, graph: &RelationshipGraph) -> bool {
        let filepath = normalize_path(path);

        let source = match self.read_source(path) {
            SourceRead::Contents(source) => source,
            SourceRead::Oversized(lines) => {
                log::info!(
                    "skipping {filepath}: {lines} lines exceeds limit of {}",
                    self.config.max_file_lines
                );
                return false;
            }
            SourceRead::Failed(error) => {
                log::warn!("failed to read {filepath}: {error}");
                graph.mark_unparseable(&filepath);
                return false;
            }
        };

        let parsed = match self.parser.parse(source) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::warn!("failed to parse {filepath}: {error}");
                graph.mark_unparseable(&filepath);
                return false;
            }
        };
        if parsed.has_errors() {
            log::debug!("syntax errors in {filepath}");
            graph.mark_unparseable(&filepath);
            return false;
        }

        let ctx = DetectorContext {
            filepath: &filepath,
            source: &parsed.source,
            tree: &parsed.tree,
        };
        let max_depth = self.config.max_tree_depth;
        let registry = &mut self.registry;
        let warnings = &mut self.warnings;

        let mut edges = Vec::new();
        let traversal = walk_tree(parsed.tree.root_node(), max_depth, |node| {
            for detector in registry.detectors_mut() {
                match detector.detect(node, &ctx) {
                    Ok(found) => edges.extend(found),
                    Err(error) => log::warn!(
                        "detector '{}' failed at {}:{}: {error}",
                        detector.name(),
                        ctx.filepath,
                        start_line(node)
                    ),
                }
                for warning in detector.pattern_warnings(node, &ctx) {
                    log_pattern_warning(&warning);
                    warnings.push(warning);
                }
            }
        });
        if traversal.is_err() {
            log::warn!("tree depth limit exceeded in {filepath}");
            graph.mark_unparseable(&filepath);
            return false;
        }

        graph.replace_file_relationships(&filepath, edges);
        true
    }

    /// Two-phase extraction front end: same guards as `analyze_file`, but
    /// every node goes through `extract_symbols` instead.
    ///
    /// Returns `None` for unreadable or oversized files and an
    /// `is_valid = false` record for parse failures, so a failed parse is
    /// never mistaken for "file defines nothing".
    pub fn extract_file_symbols(&mut self, path: &Path) -> Option<FileSymbolData> {
        let filepath = normalize_path(path);

        let source = match self.read_source(path) {
            SourceRead::Contents(source) => source,
            SourceRead::Oversized(lines) => {
                log::info!(
                    "skipping {filepath}: {lines} lines exceeds limit of {}",
                    self.config.max_file_lines
                );
                return None;
            }
            SourceRead::Failed(error) => {
                log::warn!("failed to read {filepath}: {error}");
                return None;
            }
        };

        let parsed = match self.parser.parse(source) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::warn!("failed to parse {filepath}: {error}");
                return Some(FileSymbolData::invalid(&filepath));
            }
        };
        if parsed.has_errors() {
            log::debug!("syntax errors in {filepath}");
            return Some(FileSymbolData::invalid(&filepath));
        }

        let ctx = DetectorContext {
            filepath: &filepath,
            source: &parsed.source,
            tree: &parsed.tree,
        };
        let max_depth = self.config.max_tree_depth;
        let registry = &mut self.registry;
        let warnings = &mut self.warnings;

        let mut data = FileSymbolData::new(&filepath);
        let traversal = walk_tree(parsed.tree.root_node(), max_depth, |node| {
            for detector in registry.detectors_mut() {
                if !detector.supports_symbol_extraction() {
                    continue;
                }
                match detector.extract_symbols(node, &ctx) {
                    Ok((definitions, references)) => {
                        data.definitions.extend(definitions);
                        data.references.extend(references);
                    }
                    Err(error) => log::warn!(
                        "detector '{}' failed at {}:{}: {error}",
                        detector.name(),
                        ctx.filepath,
                        start_line(node)
                    ),
                }
                for warning in detector.pattern_warnings(node, &ctx) {
                    log_pattern_warning(&warning);
                    warnings.push(warning);
                }
            }
        });
        if traversal.is_err() {
            log::warn!("tree depth limit exceeded in {filepath}");
            return Some(FileSymbolData::invalid(&filepath));
        }

        Some(data)
    }

    /// Single-phase analysis over every Python file under `root`.
    /// Returns (succeeded, failed) counts.
    pub fn analyze_project(&mut self, root: &Path, graph: &RelationshipGraph) -> (usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;
        for file in python_files(root) {
            if self.analyze_file(&file, graph) {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        log::info!(
            "analyzed {}: {succeeded} ok, {failed} failed, {} relationships",
            root.display(),
            graph.relationship_count()
        );
        (succeeded, failed)
    }

    /// Two-phase extraction over every Python file under `root`, serving
    /// unchanged files from the cache. Passing an already-populated builder
    /// extends it incrementally; previously processed files are never
    /// re-extracted as long as their cache entries are valid.
    pub fn extract_project(
        &mut self,
        root: &Path,
        cache: &mut SymbolCache,
        builder: &mut RelationshipBuilder,
    ) -> (usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;

        for file in python_files(root) {
            let key = normalize_path(&file);
            if let Some(cached) = cache.get(&key) {
                let data = cached.clone();
                builder.add_file_data(data);
                succeeded += 1;
                continue;
            }

            match self.extract_file_symbols(&file) {
                Some(data) if data.is_valid => {
                    cache.set(&key, data.clone());
                    builder.add_file_data(data);
                    succeeded += 1;
                }
                Some(_) | None => failed += 1,
            }
        }
        (succeeded, failed)
    }

    fn read_source(&self, path: &Path) -> SourceRead {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => return SourceRead::Failed(error),
        };
        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(error) => {
                // Fallback decoding for files that are not valid UTF-8
                log::debug!("lossy decode of {}", path.display());
                String::from_utf8_lossy(error.as_bytes()).into_owned()
            }
        };

        let lines = source.lines().count();
        if lines > self.config.max_file_lines {
            return SourceRead::Oversized(lines);
        }
        SourceRead::Contents(source)
    }
}

fn log_pattern_warning(warning: &DynamicPatternWarning) {
    match warning.severity {
        WarningSeverity::Warning => log::warn!(
            "{} at {}:{}: {}",
            warning.pattern_type.as_str(),
            warning.filepath,
            warning.line_number,
            warning.message
        ),
        WarningSeverity::Info => log::info!(
            "{} at {}:{}: {}",
            warning.pattern_type.as_str(),
            warning.filepath,
            warning.line_number,
            warning.message
        ),
    }
}

/// Python files under a root, gitignore-respecting, sorted for
/// deterministic processing order.
fn python_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(root)
        .build()
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|extension| extension == "py"))
        .collect();
    files.sort();
    files
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
